//! Processor selection.
//!
//! A two-level decision: the media kind picks the processor family, the
//! options decide whether any derivation is needed at all. `None` means
//! pass-through: the staged file is served unmodified.

use crate::audio::AudioProcessor;
use crate::document::DocumentProcessor;
use crate::error::EngineResult;
use crate::image::ImageProcessor;
use crate::job::Job;
use crate::video::VideoProcessor;
use async_trait::async_trait;
use refract_core::{MediaKind, Options};

/// A format-specific derivation.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, job: &mut Job) -> EngineResult<()>;
}

static IMAGE: ImageProcessor = ImageProcessor;
static VIDEO: VideoProcessor = VideoProcessor;
static AUDIO: AudioProcessor = AudioProcessor;
static DOCUMENT: DocumentProcessor = DocumentProcessor;

/// Select the processor for a request, or `None` for pass-through.
pub fn processor_for(
    kind: MediaKind,
    extension: &str,
    options: &Options,
) -> Option<&'static dyn Processor> {
    match kind {
        MediaKind::Image => Some(&IMAGE),
        MediaKind::Video => {
            if options.detail || !options.preview.is_empty() || !options.thumbnail.is_empty() {
                Some(&VIDEO)
            } else {
                None
            }
        }
        MediaKind::Audio => {
            let transcode = options.output_format != extension || options.quality > 0;
            if options.detail || !options.thumbnail.is_empty() || transcode {
                Some(&AUDIO)
            } else {
                None
            }
        }
        MediaKind::Document => {
            if options.thumbnail.is_empty() {
                None
            } else {
                Some(&DOCUMENT)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> Options {
        Options {
            output_format: "mp4".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn plain_video_passes_through() {
        assert!(processor_for(MediaKind::Video, "mp4", &opts()).is_none());
    }

    #[test]
    fn video_thumbnail_selects_processor() {
        let mut o = opts();
        o.thumbnail = "720p".to_string();
        assert!(processor_for(MediaKind::Video, "mp4", &o).is_some());
    }

    #[test]
    fn images_always_process() {
        let mut o = opts();
        o.output_format = "jpg".to_string();
        assert!(processor_for(MediaKind::Image, "jpg", &o).is_some());
    }

    #[test]
    fn same_format_audio_passes_through() {
        let mut o = opts();
        o.output_format = "mp3".to_string();
        assert!(processor_for(MediaKind::Audio, "mp3", &o).is_none());
        o.output_format = "ogg".to_string();
        assert!(processor_for(MediaKind::Audio, "mp3", &o).is_some());
    }

    #[test]
    fn document_without_thumbnail_passes_through() {
        let mut o = opts();
        o.output_format = "pdf".to_string();
        assert!(processor_for(MediaKind::Document, "pdf", &o).is_none());
        o.thumbnail = "480p".to_string();
        assert!(processor_for(MediaKind::Document, "pdf", &o).is_some());
    }
}
