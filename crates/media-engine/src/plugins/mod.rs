//! Built-in plugins.

pub mod direct_url;
pub mod local;

pub use direct_url::DirectUrlPlugin;
pub use local::LocalFilePlugin;

use media_engine_types::StreamQuality;

fn is_supported_extension(ext: &str) -> bool {
    matches!(
        ext,
        "flac"
            | "wav"
            | "aiff"
            | "aif"
            | "mp3"
            | "m4a"
            | "aac"
            | "alac"
            | "ogg"
            | "oga"
            | "opus"
            | "webm"
    )
}

fn content_type_for_ext(ext: &str) -> Option<&'static str> {
    let mime = match ext {
        "flac" => "audio/flac",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "aiff" | "aif" => "audio/aiff",
        "aac" | "m4a" | "alac" => "audio/mp4",
        "ogg" | "oga" | "opus" => "audio/ogg",
        "webm" => "audio/webm",
        _ => return None,
    };
    Some(mime)
}

fn quality_for_ext(ext: &str) -> StreamQuality {
    match ext {
        "flac" | "wav" | "aiff" | "aif" | "alac" => StreamQuality::Lossless,
        _ => StreamQuality::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_extensions() {
        assert!(is_supported_extension("flac"));
        assert!(is_supported_extension("webm"));
        assert!(!is_supported_extension("txt"));
        assert_eq!(content_type_for_ext("opus"), Some("audio/ogg"));
        assert_eq!(quality_for_ext("wav"), StreamQuality::Lossless);
        assert_eq!(quality_for_ext("mp3"), StreamQuality::Unknown);
    }
}
