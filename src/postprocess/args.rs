//! Pure ffmpeg argument builders for each post-processing step.
//!
//! Builders return only the step-specific arguments (`-i ... <output>`);
//! the transcoder adds global flags such as `-y` and `-loglevel`.

use std::path::Path;

use crate::request::AudioFormat;

/// Audio encoder for a target format (`copy` keeps the source codec).
#[must_use]
pub fn audio_encoder(codec: AudioFormat) -> &'static str {
    match codec {
        AudioFormat::Mp3 => "libmp3lame",
        AudioFormat::M4a => "aac",
        AudioFormat::Opus => "libopus",
        AudioFormat::Vorbis => "libvorbis",
        AudioFormat::Wav => "pcm_s16le",
        AudioFormat::Best => "copy",
    }
}

/// File extension produced for a target format.
///
/// `Best` keeps the source codec, so the extension follows the source container.
#[must_use]
pub fn audio_extension(codec: AudioFormat, source_ext: &str) -> &'static str {
    match codec {
        AudioFormat::Mp3 => "mp3",
        AudioFormat::M4a => "m4a",
        AudioFormat::Opus => "opus",
        AudioFormat::Vorbis => "ogg",
        AudioFormat::Wav => "wav",
        AudioFormat::Best => match source_ext.to_ascii_lowercase().as_str() {
            "mp4" | "m4a" | "m4v" | "mov" => "m4a",
            "webm" | "opus" => "opus",
            "mp3" => "mp3",
            "ogg" | "oga" => "ogg",
            "wav" => "wav",
            "flac" => "flac",
            _ => "mka",
        },
    }
}

/// Quality arguments: levels `0`-`10` are VBR (`-q:a`), larger values a bitrate in kbit/s.
#[must_use]
pub fn audio_quality_args(codec: AudioFormat, quality: &str) -> Vec<String> {
    if matches!(codec, AudioFormat::Best | AudioFormat::Wav) {
        return Vec::new();
    }
    let digits = quality.trim().trim_end_matches(['k', 'K']).trim();
    match digits.parse::<u32>() {
        Ok(level) if level <= 10 => vec!["-q:a".to_string(), level.to_string()],
        Ok(kbps) => vec!["-b:a".to_string(), format!("{kbps}k")],
        Err(_) => Vec::new(),
    }
}

/// Arguments for extracting the audio track of `input` into `output`.
#[must_use]
pub fn extract_audio_args(input: &Path, output: &Path, codec: AudioFormat, quality: &str) -> Vec<String> {
    let mut args = vec![
        "-i".to_string(),
        path_arg(input),
        "-vn".to_string(),
        "-c:a".to_string(),
        audio_encoder(codec).to_string(),
    ];
    args.extend(audio_quality_args(codec, quality));
    args.push(path_arg(output));
    args
}

/// Arguments for re-encoding the audio of a video while copying the video stream.
#[must_use]
pub fn convert_audio_args(input: &Path, output: &Path, codec: AudioFormat) -> Vec<String> {
    vec![
        "-i".to_string(),
        path_arg(input),
        "-map".to_string(),
        "0".to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        audio_encoder(codec).to_string(),
        path_arg(output),
    ]
}

/// Arguments for merging separate video and audio streams into one container.
#[must_use]
pub fn merge_args(video: &Path, audio: &Path, output: &Path) -> Vec<String> {
    vec![
        "-i".to_string(),
        path_arg(video),
        "-i".to_string(),
        path_arg(audio),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "1:a:0".to_string(),
        "-c".to_string(),
        "copy".to_string(),
        path_arg(output),
    ]
}

/// Arguments for writing container metadata tags. `None` when there is nothing to write.
#[must_use]
pub fn metadata_args(input: &Path, output: &Path, tags: &[(&str, &str)]) -> Option<Vec<String>> {
    let tags: Vec<_> = tags.iter().filter(|(_, v)| !v.trim().is_empty()).collect();
    if tags.is_empty() {
        return None;
    }
    let mut args = vec![
        "-i".to_string(),
        path_arg(input),
        "-map".to_string(),
        "0".to_string(),
        "-c".to_string(),
        "copy".to_string(),
    ];
    for (key, value) in tags {
        args.push("-metadata".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(path_arg(output));
    Some(args)
}

/// Whether a container can carry cover art.
#[must_use]
pub fn supports_cover_art(ext: &str) -> bool {
    matches!(ext, "mp3" | "m4a" | "mp4" | "m4v" | "mov")
}

/// Arguments for embedding `thumbnail` as attached picture.
#[must_use]
pub fn embed_thumbnail_args(input: &Path, thumbnail: &Path, output: &Path, ext: &str) -> Vec<String> {
    // Audio containers have no video stream, so the picture is the first one.
    let picture_stream = if matches!(ext, "mp3" | "m4a") { 0 } else { 1 };
    vec![
        "-i".to_string(),
        path_arg(input),
        "-i".to_string(),
        path_arg(thumbnail),
        "-map".to_string(),
        "0".to_string(),
        "-map".to_string(),
        "1".to_string(),
        "-c".to_string(),
        "copy".to_string(),
        format!("-disposition:v:{picture_stream}"),
        "attached_pic".to_string(),
        path_arg(output),
    ]
}

/// Subtitle codec for a container, `None` when subtitles cannot be embedded.
#[must_use]
pub fn subtitle_codec(ext: &str) -> Option<&'static str> {
    match ext {
        "mp4" | "m4v" | "mov" => Some("mov_text"),
        "mkv" => Some("srt"),
        "webm" => Some("webvtt"),
        _ => None,
    }
}

/// Arguments for embedding subtitle tracks `(lang, path)`.
#[must_use]
pub fn embed_subtitles_args(
    input: &Path,
    tracks: &[(String, &Path)],
    output: &Path,
    codec: &str,
) -> Vec<String> {
    let mut args = vec!["-i".to_string(), path_arg(input)];
    for (_, path) in tracks {
        args.push("-i".to_string());
        args.push(path_arg(path));
    }
    args.push("-map".to_string());
    args.push("0".to_string());
    for index in 1..=tracks.len() {
        args.push("-map".to_string());
        args.push(index.to_string());
    }
    args.extend(["-c", "copy", "-c:s", codec].map(str::to_string));
    for (index, (lang, _)) in tracks.iter().enumerate() {
        args.push(format!("-metadata:s:s:{index}"));
        args.push(format!("language={lang}"));
    }
    args.push(path_arg(output));
    args
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
