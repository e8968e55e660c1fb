//! Derivation engine for refract.
//!
//! Transforms staged source files through external media tools (ImageMagick,
//! ffmpeg/ffprobe, pdftoppm, LibreOffice). Every derivation lands at a path
//! that is a deterministic function of the source identity and the canonical
//! options, so re-running a processor with the same inputs is a cache hit.
//!
//! Tool invocations are the substitution point: each one runs under a
//! per-step deadline and is killed on cancellation.

pub mod audio;
pub mod command;
pub mod document;
pub mod error;
pub mod image;
pub mod job;
pub mod registry;
pub mod video;

pub use error::{EngineError, EngineResult};
pub use job::{CacheProbe, Job};
pub use registry::{Processor, processor_for};
