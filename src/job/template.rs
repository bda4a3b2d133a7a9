//! Output filename templates in `%(field)s` form.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;

use crate::download::sanitize_filename;

/// Template used when the request does not override it.
pub const DEFAULT_OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Placeholder for fields the entry does not provide.
const MISSING_FIELD: &str = "NA";

#[allow(clippy::expect_used)]
static FIELD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"%\(([a-z_]+)\)s").expect("template regex is valid") // Static pattern, safe to panic
});

/// Values substituted into an output template.
#[derive(Debug, Clone, Default)]
pub struct TemplateFields<'a> {
    /// Media title.
    pub title: Option<&'a str>,
    /// Extractor identifier.
    pub id: Option<&'a str>,
    /// Final file extension (without dot).
    pub ext: &'a str,
    /// Channel or uploader name.
    pub uploader: Option<&'a str>,
    /// 1-based playlist position.
    pub playlist_index: Option<u32>,
    /// Selected format identifier.
    pub format_id: Option<&'a str>,
}

/// Output filename template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputTemplate(String);

impl Default for OutputTemplate {
    fn default() -> Self {
        Self(DEFAULT_OUTPUT_TEMPLATE.to_string())
    }
}

impl OutputTemplate {
    /// Wraps a template string; blank templates fall back to the default.
    #[must_use]
    pub fn new(template: Option<&str>) -> Self {
        match template.map(str::trim) {
            Some(t) if !t.is_empty() => Self(t.to_string()),
            _ => Self::default(),
        }
    }

    /// The raw template.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Renders a single, sanitized filename (directory separators are flattened).
    ///
    /// Unknown or missing fields render as `NA`. The extension is appended
    /// when the template does not reference `%(ext)s`.
    #[must_use]
    pub fn render(&self, fields: &TemplateFields<'_>) -> String {
        let rendered = FIELD_PATTERN.replace_all(&self.0, |caps: &Captures<'_>| {
            let value = match &caps[1] {
                "title" => fields.title.map(str::to_string),
                "id" => fields.id.map(str::to_string),
                "ext" => Some(fields.ext.to_string()),
                "uploader" => fields.uploader.map(str::to_string),
                "playlist_index" => fields.playlist_index.map(|i| format!("{i:02}")),
                "format_id" => fields.format_id.map(str::to_string),
                _ => None,
            };
            value
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| MISSING_FIELD.to_string())
        });

        let mut name = rendered.replace(['/', '\\'], "_");
        if !self.0.contains("%(ext)s") && !fields.ext.is_empty() {
            name.push('.');
            name.push_str(fields.ext);
        }
        sanitize_filename(&name)
    }
}
