//! Format resolution: quality presets and codec preferences into a
//! format-selection expression plus an audio post-processing plan.

use serde::Serialize;
use tracing::debug;

use crate::request::{AudioFormat, DownloadRequest, VideoCodec, VideoQuality};

/// Default audio bitrate (kbit/s) for extraction.
pub const DEFAULT_AUDIO_QUALITY: &str = "192";

/// Container separate video and audio streams are merged into.
pub const MERGE_CONTAINER: &str = "mp4";

/// Audio-only selection expression.
const AUDIO_EXPRESSION: &str = "bestaudio/best";

/// Audio extraction step requested by the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioExtraction {
    /// Target codec; `Best` keeps the source codec.
    pub codec: AudioFormat,
    /// Bitrate in kbit/s or VBR level.
    pub quality: String,
    /// Keep the downloaded video next to the extracted audio.
    pub keep_video: bool,
}

/// Result of format resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatPlan {
    /// Format-selection expression handed to the extractor.
    pub expression: String,
    /// Container for merging separate video and audio streams.
    pub merge_output_format: Option<String>,
    /// Audio extraction, when the job is audio-only.
    pub audio_extraction: Option<AudioExtraction>,
    /// Audio conversion of a retained video.
    pub audio_conversion: Option<AudioFormat>,
    /// Resolution ceiling in lines, when a preset applies.
    pub height_ceiling: Option<u32>,
    /// Label reported to the caller (`720p`, `audio`, `custom format`).
    pub label: String,
}

/// Inputs to [`resolve`], borrowed from a request.
#[derive(Debug, Clone, Copy)]
pub struct FormatPreferences<'a> {
    /// Quality preset.
    pub quality: VideoQuality,
    /// Raw format override; wins over `quality`.
    pub format: Option<&'a str>,
    /// Codec preference.
    pub video_codec: Option<VideoCodec>,
    /// Audio-only extraction.
    pub extract_audio: bool,
    /// Target audio container.
    pub audio_format: Option<AudioFormat>,
    /// Audio bitrate or VBR level.
    pub audio_quality: Option<&'a str>,
    /// Keep video after extraction.
    pub keep_video: bool,
}

impl<'a> FormatPreferences<'a> {
    /// Borrows the format-related fields of a request.
    #[must_use]
    pub fn from_request(request: &'a DownloadRequest) -> Self {
        Self {
            quality: request.quality,
            format: request.format.as_deref(),
            video_codec: request.video_codec,
            extract_audio: request.extract_audio,
            audio_format: request.audio_format,
            audio_quality: request.audio_quality.as_deref(),
            keep_video: request.keep_video,
        }
    }
}

impl Default for FormatPreferences<'_> {
    fn default() -> Self {
        Self {
            quality: VideoQuality::default(),
            format: None,
            video_codec: None,
            extract_audio: false,
            audio_format: None,
            audio_quality: None,
            keep_video: false,
        }
    }
}

/// Resolves preferences into a [`FormatPlan`]. Pure and deterministic.
///
/// A raw `format` is passed through verbatim and the preset is ignored,
/// including the `audio` preset. `extract_audio` selects audio-only streams
/// in either case.
///
/// # Examples
///
/// ```
/// use unidl_core::format::{resolve, FormatPreferences};
/// use unidl_core::request::VideoQuality;
///
/// let plan = resolve(&FormatPreferences { quality: VideoQuality::P480, ..Default::default() });
/// assert!(plan.expression.starts_with("best[height<=480]"));
/// assert_eq!(plan.merge_output_format.as_deref(), Some("mp4"));
/// ```
#[must_use]
pub fn resolve(prefs: &FormatPreferences<'_>) -> FormatPlan {
    let custom = prefs.format.map(str::trim).filter(|f| !f.is_empty());
    // With a raw format the preset is ignored, so only `extract_audio` selects audio.
    let audio_only =
        prefs.extract_audio || (custom.is_none() && prefs.quality == VideoQuality::Audio);

    let audio_extraction = audio_only.then(|| AudioExtraction {
        codec: match (prefs.audio_format, prefs.extract_audio) {
            (Some(codec), _) => codec,
            (None, true) => AudioFormat::Best,
            (None, false) => AudioFormat::Mp3,
        },
        quality: prefs
            .audio_quality
            .map_or_else(|| DEFAULT_AUDIO_QUALITY.to_string(), |q| q.trim().to_string()),
        keep_video: prefs.keep_video,
    });

    let audio_conversion = match prefs.audio_format {
        Some(codec) if !audio_only && codec != AudioFormat::Best => Some(codec),
        _ => None,
    };

    let plan = if let Some(expression) = custom {
        FormatPlan {
            expression: expression.to_string(),
            merge_output_format: (!audio_only).then(|| MERGE_CONTAINER.to_string()),
            audio_extraction,
            audio_conversion,
            height_ceiling: None,
            label: "custom format".to_string(),
        }
    } else if audio_only {
        FormatPlan {
            expression: AUDIO_EXPRESSION.to_string(),
            merge_output_format: None,
            audio_extraction,
            audio_conversion: None,
            height_ceiling: None,
            label: VideoQuality::Audio.as_str().to_string(),
        }
    } else {
        let ceiling = prefs.quality.height_ceiling();
        let mut expression = String::new();
        if let Some(filter) = prefs.video_codec.and_then(codec_filter) {
            let height = height_filter(ceiling);
            expression.push_str(&format!("bestvideo{height}{filter}+bestaudio/"));
        }
        expression.push_str(&preset_expression(ceiling));
        FormatPlan {
            expression,
            merge_output_format: Some(MERGE_CONTAINER.to_string()),
            audio_extraction: None,
            audio_conversion,
            height_ceiling: ceiling,
            label: prefs.quality.as_str().to_string(),
        }
    };

    debug!(expression = %plan.expression, label = %plan.label, "format resolved");
    plan
}

/// Preset expression preferring pre-muxed streams under the ceiling.
fn preset_expression(ceiling: Option<u32>) -> String {
    let h = height_filter(ceiling);
    if ceiling.is_none() {
        return "best/bestvideo+bestaudio".to_string();
    }
    format!(
        "best{h}[ext=mp4]/best{h}/bestvideo{h}[ext=mp4]+bestaudio[ext=m4a]/bestvideo{h}+bestaudio"
    )
}

fn height_filter(ceiling: Option<u32>) -> String {
    ceiling.map_or_else(String::new, |h| format!("[height<={h}]"))
}

/// Codec filter for a preference; `Best` adds nothing.
fn codec_filter(codec: VideoCodec) -> Option<&'static str> {
    match codec {
        VideoCodec::H264 => Some("[vcodec*=avc1]"),
        VideoCodec::H265 => Some("[vcodec~='^(hev1|hvc1)']"),
        VideoCodec::Vp9 => Some("[vcodec~='^vp0?9']"),
        VideoCodec::Av1 => Some("[vcodec*=av01]"),
        VideoCodec::Best => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ceilings_in(expression: &str) -> Vec<u32> {
        expression
            .match_indices("[height<=")
            .filter_map(|(i, m)| {
                let rest = &expression[i + m.len()..];
                rest.split(']').next()?.parse().ok()
            })
            .collect()
    }

    #[test]
    fn test_every_preset_uses_only_its_own_ceiling() {
        for (quality, ceiling) in [
            (VideoQuality::P1080, 1080),
            (VideoQuality::P720, 720),
            (VideoQuality::P480, 480),
        ] {
            for codec in [None, Some(VideoCodec::H264), Some(VideoCodec::Av1)] {
                let plan = resolve(&FormatPreferences {
                    quality,
                    video_codec: codec,
                    ..Default::default()
                });
                let found = ceilings_in(&plan.expression);
                assert!(!found.is_empty(), "{quality:?} has no ceiling");
                assert!(
                    found.iter().all(|&h| h == ceiling),
                    "{quality:?} leaked another ceiling: {}",
                    plan.expression
                );
                assert_eq!(plan.height_ceiling, Some(ceiling));
                assert_eq!(plan.label, quality.as_str());
            }
        }
    }

    #[test]
    fn test_preset_prefers_premuxed_then_pairs() {
        let plan = resolve(&FormatPreferences::default());
        assert_eq!(
            plan.expression,
            "best[height<=720][ext=mp4]/best[height<=720]/\
             bestvideo[height<=720][ext=mp4]+bestaudio[ext=m4a]/bestvideo[height<=720]+bestaudio"
        );
        assert_eq!(plan.merge_output_format.as_deref(), Some("mp4"));
        assert!(plan.audio_extraction.is_none());
    }

    #[test]
    fn test_best_has_no_ceiling() {
        let plan = resolve(&FormatPreferences {
            quality: VideoQuality::Best,
            ..Default::default()
        });
        assert_eq!(plan.expression, "best/bestvideo+bestaudio");
        assert!(ceilings_in(&plan.expression).is_empty());
    }

    #[test]
    fn test_raw_format_wins_over_quality() {
        let alone = resolve(&FormatPreferences {
            format: Some("137+140"),
            ..Default::default()
        });
        let with_quality = resolve(&FormatPreferences {
            format: Some("137+140"),
            quality: VideoQuality::P480,
            video_codec: Some(VideoCodec::Vp9),
            ..Default::default()
        });
        assert_eq!(alone.expression, "137+140");
        assert_eq!(with_quality, alone);
        assert_eq!(with_quality.label, "custom format");
    }

    #[test]
    fn test_raw_format_plan_is_independent_of_every_preset() {
        let alone = resolve(&FormatPreferences {
            format: Some("137+140"),
            ..Default::default()
        });
        assert_eq!(alone.merge_output_format.as_deref(), Some("mp4"));
        assert!(alone.audio_extraction.is_none());

        for quality in [
            VideoQuality::P1080,
            VideoQuality::P720,
            VideoQuality::P480,
            VideoQuality::Audio,
            VideoQuality::Best,
        ] {
            let plan = resolve(&FormatPreferences {
                format: Some("137+140"),
                quality,
                ..Default::default()
            });
            assert_eq!(plan, alone, "{quality:?} changed a raw-format plan");
        }
    }

    #[test]
    fn test_raw_format_with_extract_audio_still_extracts() {
        let plan = resolve(&FormatPreferences {
            format: Some("251"),
            quality: VideoQuality::P480,
            extract_audio: true,
            ..Default::default()
        });
        assert_eq!(plan.expression, "251");
        assert!(plan.merge_output_format.is_none());
        assert_eq!(
            plan.audio_extraction.map(|a| a.codec),
            Some(AudioFormat::Best)
        );
    }

    #[test]
    fn test_audio_preset_defaults_to_mp3_192() {
        let plan = resolve(&FormatPreferences {
            quality: VideoQuality::Audio,
            ..Default::default()
        });
        assert_eq!(plan.expression, "bestaudio/best");
        let extraction = plan.audio_extraction.unwrap_or_else(|| panic!("audio plan"));
        assert_eq!(extraction.codec, AudioFormat::Mp3);
        assert_eq!(extraction.quality, "192");
        assert!(!extraction.keep_video);
        assert!(plan.merge_output_format.is_none());
    }

    #[test]
    fn test_extract_audio_without_format_keeps_source_codec() {
        let plan = resolve(&FormatPreferences {
            extract_audio: true,
            keep_video: true,
            audio_quality: Some("5"),
            ..Default::default()
        });
        let extraction = plan.audio_extraction.unwrap_or_else(|| panic!("audio plan"));
        assert_eq!(extraction.codec, AudioFormat::Best);
        assert_eq!(extraction.quality, "5");
        assert!(extraction.keep_video);
        assert_eq!(plan.label, "audio");
    }

    #[test]
    fn test_audio_format_on_video_adds_conversion() {
        let plan = resolve(&FormatPreferences {
            audio_format: Some(AudioFormat::Opus),
            ..Default::default()
        });
        assert_eq!(plan.audio_conversion, Some(AudioFormat::Opus));
        assert!(plan.audio_extraction.is_none());
    }

    #[test]
    fn test_codec_preference_prepends_filtered_alternative() {
        let plan = resolve(&FormatPreferences {
            quality: VideoQuality::P1080,
            video_codec: Some(VideoCodec::H264),
            ..Default::default()
        });
        assert!(
            plan.expression
                .starts_with("bestvideo[height<=1080][vcodec*=avc1]+bestaudio/best[height<=1080]"),
            "{}",
            plan.expression
        );
        let none = resolve(&FormatPreferences {
            video_codec: Some(VideoCodec::Best),
            ..Default::default()
        });
        assert_eq!(none.expression, resolve(&FormatPreferences::default()).expression);
    }
}
