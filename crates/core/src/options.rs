//! Request option parsing and ladder snapping.
//!
//! Options arrive as query parameters. Width, height, and quality are snapped
//! to fixed ladders so that the set of derivable artifacts per source is
//! bounded and cache-friendly. The canonical fragment produced by
//! [`Options::cache_fragment`] is embedded in image derivation paths: same
//! options, same path, cache hit.

use crate::error::{Error, Result};
use crate::mediatype::MediaType;
use crate::{IMAGE_QUALITY, IMAGE_SIZES};
use serde::Serialize;
use std::collections::HashMap;

/// Crop anchor, mapped onto ImageMagick gravity by the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CropAnchor {
    #[default]
    Center,
    Top,
    Bottom,
    Left,
    Right,
}

impl CropAnchor {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "top" => Self::Top,
            "bottom" => Self::Bottom,
            "left" => Self::Left,
            "right" => Self::Right,
            _ => Self::Center,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Center => "center",
            Self::Top => "top",
            Self::Bottom => "bottom",
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    /// ImageMagick gravity name for this anchor.
    pub fn gravity(&self) -> &'static str {
        match self {
            Self::Center => "center",
            Self::Top => "north",
            Self::Bottom => "south",
            Self::Left => "west",
            Self::Right => "east",
        }
    }
}

/// Parsed request options.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Options {
    /// Resize target width, 0 = unset. Snapped to [`IMAGE_SIZES`].
    pub width: u32,
    /// Resize target height, 0 = unset. Snapped to [`IMAGE_SIZES`].
    pub height: u32,
    /// Preserve aspect ratio. Disabled by `crop` or by both dimensions set.
    pub keep_aspect: bool,
    /// Quality 1–100 snapped to [`IMAGE_QUALITY`], 0 = unset.
    pub quality: u32,
    pub anchor: CropAnchor,
    /// Output container/codec; defaults to the source extension.
    pub output_format: String,
    /// Named video profile reference, resolved by the pipeline.
    pub profile: String,
    /// Preview spec: named quality or `WxH`.
    pub preview: String,
    /// Thumbnail spec: named quality or `WxH`.
    pub thumbnail: String,
    /// Thumbnail timestamp in seconds, 0 = mid-duration.
    pub ss: u32,
    /// Emit JSON metadata instead of media bytes.
    pub detail: bool,
    /// Force attachment disposition.
    pub download: bool,
}

/// Snap `input` to the largest ladder value ≤ `input`; inputs below the
/// ladder clamp to the smallest value. The ladder is descending.
pub fn snap_to_ladder(input: u32, ladder: &[u32]) -> u32 {
    for &v in ladder {
        if v <= input {
            return v;
        }
    }
    ladder.last().copied().unwrap_or(input)
}

fn parse_u32(params: &HashMap<String, String>, key: &str) -> Result<Option<u32>> {
    match params.get(key) {
        Some(raw) if !raw.is_empty() => raw
            .parse::<u32>()
            .map(Some)
            .map_err(|_| Error::InvalidOption(format!("{key}={raw}"))),
        _ => Ok(None),
    }
}

fn parse_bool(params: &HashMap<String, String>, key: &str) -> bool {
    matches!(
        params.get(key).map(String::as_str),
        Some("1") | Some("true") | Some("yes")
    )
}

impl Options {
    /// Parse options from query parameters for a request of type `media`.
    ///
    /// Errors are `InvalidOption` for malformed numerics and
    /// `UnsupportedFormat` when the requested output format is not offered
    /// by the source type; both map to client errors upstream.
    pub fn parse(params: &HashMap<String, String>, media: &MediaType) -> Result<Self> {
        let mut opts = Options {
            keep_aspect: !params.contains_key("crop"),
            ..Default::default()
        };

        if let Some(w) = parse_u32(params, "width")? {
            opts.width = w;
        }
        if let Some(h) = parse_u32(params, "height")? {
            opts.height = h;
        }
        if let Some(size) = params.get("size").filter(|s| !s.is_empty()) {
            let (w, h) = size
                .split_once('x')
                .ok_or_else(|| Error::InvalidOption(format!("size={size}")))?;
            opts.width = w
                .parse()
                .map_err(|_| Error::InvalidOption(format!("size={size}")))?;
            opts.height = h
                .parse()
                .map_err(|_| Error::InvalidOption(format!("size={size}")))?;
        }
        if let Some(q) = parse_u32(params, "q")? {
            if q > 100 {
                return Err(Error::InvalidOption(format!("q={q}")));
            }
            // q=0 means "not specified".
            opts.quality = q;
        }

        if let Some(dir) = params.get("dir") {
            opts.anchor = CropAnchor::parse(dir);
        }
        if opts.width > 0 && opts.height > 0 {
            opts.keep_aspect = false;
        }

        opts.output_format = params
            .get("format")
            .filter(|f| !f.is_empty())
            .cloned()
            .unwrap_or_else(|| media.extension.to_string());
        if !media.offers(&opts.output_format) {
            return Err(Error::UnsupportedFormat(opts.output_format));
        }

        opts.profile = params.get("profile").cloned().unwrap_or_default();
        opts.preview = params.get("preview").cloned().unwrap_or_default();
        opts.thumbnail = params.get("thumbnail").cloned().unwrap_or_default();
        if let Some(ss) = parse_u32(params, "ss")? {
            opts.ss = ss;
        }
        opts.detail = parse_bool(params, "detail");
        opts.download = parse_bool(params, "download");

        if opts.width > 0 {
            opts.width = snap_to_ladder(opts.width, IMAGE_SIZES);
        }
        if opts.height > 0 {
            opts.height = snap_to_ladder(opts.height, IMAGE_SIZES);
        }
        if opts.quality > 0 {
            opts.quality = snap_to_ladder(opts.quality, IMAGE_QUALITY);
        }

        Ok(opts)
    }

    /// Canonical fragment embedded in derivation cache paths. Parsing the
    /// same query twice yields the same fragment.
    pub fn cache_fragment(&self) -> String {
        format!(
            "{}x{}a{}q{}d{}p{}",
            self.width, self.height, self.keep_aspect, self.quality,
            self.anchor.as_str(),
            self.profile
        )
    }
}
