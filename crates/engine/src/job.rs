//! The unit of work handed to a processor.

use refract_core::{MediaKind, Options, VideoProfile};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Outcome of a derivation cache lookup, surfaced as debug headers.
#[derive(Clone, Debug)]
pub struct CacheProbe {
    /// "HIT" or "MISS".
    pub status: &'static str,
    pub key: String,
    pub path: PathBuf,
}

/// A derivation job. Processors read the staged file and options, and set
/// the derived output fields. An untouched `derived_path` means the staged
/// file is served as-is.
#[derive(Clone, Debug)]
pub struct Job {
    /// Tenant-relative source path, the stable part of cache keys.
    pub original_path: String,
    /// Local path of the staged source.
    pub staged_path: PathBuf,
    /// Tenant cache root; derivation subdirectories live under it.
    pub cache_root: PathBuf,
    pub kind: MediaKind,
    pub options: Options,
    /// Resolved video profile, when the request named one.
    pub video_profile: Option<VideoProfile>,

    /// Path of the derived artifact, set by the processor.
    pub derived_path: Option<PathBuf>,
    /// Mime override for the derived artifact (thumbnails, JSON).
    pub derived_mime: Option<String>,
    /// Metadata map for `detail=true` image requests.
    pub metadata: Option<serde_json::Value>,
    /// Last derivation cache probe, for debug headers.
    pub cache_probe: Option<CacheProbe>,
}

impl Job {
    pub fn new(
        original_path: String,
        staged_path: PathBuf,
        cache_root: PathBuf,
        kind: MediaKind,
        options: Options,
        video_profile: Option<VideoProfile>,
    ) -> Self {
        Self {
            original_path,
            staged_path,
            cache_root,
            kind,
            options,
            video_profile,
            derived_path: None,
            derived_mime: None,
            metadata: None,
            cache_probe: None,
        }
    }

    /// Derivation cache key over the source identity and the parts of the
    /// options that matter, hex-encoded.
    pub fn cache_key(&self, parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.original_path.as_bytes());
        for part in parts {
            hasher.update(b"_");
            hasher.update(part.as_bytes());
        }
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(32);
        for byte in &digest[..16] {
            hex.push_str(&format!("{byte:02x}"));
        }
        hex
    }

    pub fn record_probe(&mut self, status: &'static str, key: &str, path: &std::path::Path) {
        self.cache_probe = Some(CacheProbe {
            status,
            key: key.to_string(),
            path: path.to_path_buf(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refract_core::media_type_for;

    fn job(path: &str) -> Job {
        Job::new(
            path.to_string(),
            PathBuf::from("/cache/x"),
            PathBuf::from("/cache"),
            media_type_for("mp4").unwrap().kind,
            Options::default(),
            None,
        )
    }

    #[test]
    fn cache_key_is_deterministic() {
        let a = job("movies/a.mp4").cache_key(&["720p", "", "0", "jpg"]);
        let b = job("movies/a.mp4").cache_key(&["720p", "", "0", "jpg"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn cache_key_varies_with_inputs() {
        let a = job("movies/a.mp4").cache_key(&["720p"]);
        let b = job("movies/a.mp4").cache_key(&["1080p"]);
        let c = job("movies/b.mp4").cache_key(&["720p"]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
