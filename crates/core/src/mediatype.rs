//! The media-type table: file extension → mime, kind, and offered outputs.
//!
//! This table replaces per-request content sniffing: the request path's
//! extension decides which processor family handles it and which output
//! formats are acceptable.

use serde::Serialize;

/// Processor family for a media type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

/// A supported media type.
#[derive(Clone, Debug, Serialize)]
pub struct MediaType {
    pub extension: &'static str,
    pub mime: &'static str,
    pub kind: MediaKind,
}

/// Output formats every image source may convert to.
const IMAGE_FORMATS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "avif"];

/// Still-image formats offered by video/audio/document thumbnails.
const THUMBNAIL_FORMATS: &[&str] = &["jpg", "jpeg", "png", "webp", "avif"];

/// Output formats every audio source may transcode to.
const AUDIO_FORMATS: &[&str] = &["mp3", "wav", "flac", "aac", "ogg", "m4a", "wma", "opus"];

impl MediaType {
    /// Whether this media type offers `format` as an output.
    pub fn offers(&self, format: &str) -> bool {
        match self.kind {
            MediaKind::Image => IMAGE_FORMATS.contains(&format),
            MediaKind::Video | MediaKind::Document => {
                format == self.extension || THUMBNAIL_FORMATS.contains(&format)
            }
            MediaKind::Audio => {
                AUDIO_FORMATS.contains(&format) || THUMBNAIL_FORMATS.contains(&format)
            }
        }
    }
}

macro_rules! media_types {
    ($(($ext:literal, $mime:literal, $kind:ident)),* $(,)?) => {
        &[$(MediaType { extension: $ext, mime: $mime, kind: MediaKind::$kind }),*]
    };
}

/// All supported media types.
pub static MEDIA_TYPES: &[MediaType] = media_types![
    // Image formats
    ("jpg", "image/jpeg", Image),
    ("jpeg", "image/jpeg", Image),
    ("png", "image/png", Image),
    ("gif", "image/gif", Image),
    ("webp", "image/webp", Image),
    ("avif", "image/avif", Image),
    // Video formats
    ("mp4", "video/mp4", Video),
    ("webm", "video/webm", Video),
    ("avi", "video/x-msvideo", Video),
    ("mov", "video/quicktime", Video),
    ("mkv", "video/x-matroska", Video),
    ("flv", "video/x-flv", Video),
    ("wmv", "video/x-ms-wmv", Video),
    ("m4v", "video/x-m4v", Video),
    ("3gp", "video/3gpp", Video),
    ("ogv", "video/ogg", Video),
    // Audio formats
    ("mp3", "audio/mpeg", Audio),
    ("wav", "audio/wav", Audio),
    ("flac", "audio/flac", Audio),
    ("aac", "audio/aac", Audio),
    ("ogg", "audio/ogg", Audio),
    ("m4a", "audio/mp4", Audio),
    ("wma", "audio/x-ms-wma", Audio),
    ("opus", "audio/opus", Audio),
    // Document formats
    ("pdf", "application/pdf", Document),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Document
    ),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Document
    ),
    (
        "pptx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        Document
    ),
    ("doc", "application/msword", Document),
    ("xls", "application/vnd.ms-excel", Document),
    ("ppt", "application/vnd.ms-powerpoint", Document),
    ("odt", "application/vnd.oasis.opendocument.text", Document),
    ("ods", "application/vnd.oasis.opendocument.spreadsheet", Document),
    ("odp", "application/vnd.oasis.opendocument.presentation", Document),
    ("txt", "text/plain", Document),
    ("rtf", "application/rtf", Document),
    ("csv", "text/csv", Document),
    ("epub", "application/epub+zip", Document),
    ("xml", "application/xml", Document),
];

/// Look up a media type by lowercase extension (without leading dot).
pub fn media_type_for(extension: &str) -> Option<&'static MediaType> {
    MEDIA_TYPES.iter().find(|t| t.extension == extension)
}

/// The mime type an output `format` is served with, when it is a format we
/// know how to produce.
pub fn mime_for_format(format: &str) -> Option<&'static str> {
    media_type_for(format).map(|t| t.mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_offers_image_outputs_only() {
        let jpg = media_type_for("jpg").unwrap();
        assert!(jpg.offers("webp"));
        assert!(jpg.offers("jpeg"));
        assert!(!jpg.offers("mp4"));
    }

    #[test]
    fn video_offers_itself_and_thumbnail_formats() {
        let mp4 = media_type_for("mp4").unwrap();
        assert!(mp4.offers("mp4"));
        assert!(mp4.offers("jpg"));
        assert!(!mp4.offers("webm"));
        assert!(!mp4.offers("gif"));
    }

    #[test]
    fn audio_offers_transcodes_and_artwork() {
        let flac = media_type_for("flac").unwrap();
        assert!(flac.offers("mp3"));
        assert!(flac.offers("png"));
        assert!(!flac.offers("pdf"));
    }

    #[test]
    fn unknown_extension_is_none() {
        assert!(media_type_for("exe").is_none());
    }
}
