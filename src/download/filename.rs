//! Filename sanitization and path resolution inside a job's working directory.

use std::path::{Component, Path, PathBuf};

use url::Url;

/// Longest stem kept when a rendered title is used as a filename.
const MAX_STEM_CHARS: usize = 180;

/// Sanitizes a filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems
/// (`/ \ : * ? " < > |` and control characters) and rewrites names that
/// consist only of dot segments.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let sanitized = sanitized.trim().to_string();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    let sanitized = truncate_stem(&sanitized);
    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

/// Truncates overly long stems while keeping the extension intact.
fn truncate_stem(name: &str) -> String {
    let (stem, ext) = split_extension(name);
    if stem.chars().count() <= MAX_STEM_CHARS {
        return name.to_string();
    }
    let stem: String = stem.chars().take(MAX_STEM_CHARS).collect();
    format!("{stem}{ext}")
}

/// Splits `name` into `(stem, ".ext")`; the extension part is empty when absent.
pub(crate) fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    }
}

/// Resolves a unique file path, adding a numeric suffix if the file exists.
///
/// Example: `clip.mp4`, then `clip_1.mp4`, `clip_2.mp4`, ...
#[must_use]
pub fn resolve_unique_path(dir: &Path, filename: &str) -> PathBuf {
    let filename = {
        let sanitized = sanitize_filename(filename);
        if sanitized.trim_matches('_').is_empty() {
            "media.bin".to_string()
        } else {
            sanitized
        }
    };
    let base_path = dir.join(&filename);

    if !base_path.exists() {
        return base_path;
    }

    let (stem, ext) = split_extension(&filename);
    for i in 1..1000 {
        let new_path = dir.join(format!("{stem}_{i}{ext}"));
        if !new_path.exists() {
            return new_path;
        }
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dir.join(format!("{stem}_{timestamp}{ext}"))
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Extension (without dot, lowercase) of the last URL path segment.
pub(crate) fn extension_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last_segment = parsed.path_segments()?.next_back()?;
    let dot_index = last_segment.rfind('.')?;
    let ext = &last_segment[dot_index + 1..];
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_lowercase())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_filename_removes_invalid_chars() {
        assert_eq!(sanitize_filename("a/b.mp4"), "a_b.mp4");
        assert_eq!(sanitize_filename("a\\b.mp4"), "a_b.mp4");
        assert_eq!(sanitize_filename("Q&A: live?.webm"), "Q&A_ live_.webm");
        assert_eq!(sanitize_filename("x<y>|z.mp3"), "x_y__z.mp3");
    }

    #[test]
    fn test_sanitize_filename_rewrites_dot_segments() {
        assert_eq!(sanitize_filename("."), "_");
        assert_eq!(sanitize_filename(".."), "__");
        assert_eq!(sanitize_filename("   "), "_");
    }

    #[test]
    fn test_sanitize_filename_preserves_unicode() {
        assert_eq!(sanitize_filename("日本語 (1).mp4"), "日本語 (1).mp4");
    }

    #[test]
    fn test_sanitize_filename_truncates_long_stem_keeps_extension() {
        let long = format!("{}.mp4", "t".repeat(400));
        let out = sanitize_filename(&long);
        assert!(out.ends_with(".mp4"));
        assert_eq!(out.chars().count(), MAX_STEM_CHARS + 4);
    }

    #[test]
    fn test_resolve_unique_path_adds_suffix() {
        let dir = TempDir::new().unwrap();
        let first = resolve_unique_path(dir.path(), "clip.mp4");
        assert_eq!(first, dir.path().join("clip.mp4"));
        std::fs::write(&first, b"x").unwrap();
        let second = resolve_unique_path(dir.path(), "clip.mp4");
        assert_eq!(second, dir.path().join("clip_1.mp4"));
    }

    #[test]
    fn test_resolve_unique_path_never_escapes_dir() {
        let dir = TempDir::new().unwrap();
        let path = resolve_unique_path(dir.path(), "../../etc/passwd");
        assert_eq!(path.parent().unwrap(), dir.path());
    }

    #[test]
    fn test_extension_from_url() {
        assert_eq!(
            extension_from_url("https://i.ytimg.com/vi/x/maxresdefault.JPG?v=1"),
            Some("jpg".to_string())
        );
        assert_eq!(extension_from_url("https://cdn.example.com/thumb"), None);
    }
}
