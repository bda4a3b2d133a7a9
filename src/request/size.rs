//! Human-readable size and rate strings (`"2M"`, `"500K"`, `"1.5GiB"`, `"800K/s"`).
//!
//! Suffixes are binary multiples (K = 1024). A trailing `B`, `iB` and a rate
//! suffix `/s` are accepted and ignored.

use std::sync::LazyLock;

use regex::Regex;

#[allow(clippy::expect_used)]
static SIZE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*([KMGT])?(?:I?B)?\s*(?:/S)?\s*$")
        .expect("size regex is valid") // Static pattern, safe to panic
});

/// Parses a size or rate string into bytes (or bytes per second).
///
/// Returns `None` for malformed input or values that overflow `u64`.
///
/// # Examples
///
/// ```
/// use unidl_core::request::parse_size;
///
/// assert_eq!(parse_size("2M"), Some(2 * 1024 * 1024));
/// assert_eq!(parse_size("500k"), Some(500 * 1024));
/// assert_eq!(parse_size("1024"), Some(1024));
/// assert_eq!(parse_size("lots"), None);
/// ```
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn parse_size(value: &str) -> Option<u64> {
    let captures = SIZE_PATTERN.captures(value)?;
    let number: f64 = captures.get(1)?.as_str().parse().ok()?;
    let multiplier: u64 = match captures
        .get(2)
        .map(|m| m.as_str().to_ascii_uppercase())
        .as_deref()
    {
        None => 1,
        Some("K") => 1 << 10,
        Some("M") => 1 << 20,
        Some("G") => 1 << 30,
        Some("T") => 1 << 40,
        Some(_) => return None,
    };

    let bytes = number * multiplier as f64;
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return None;
    }
    Some(bytes.round() as u64)
}
