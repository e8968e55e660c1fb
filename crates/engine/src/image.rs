//! Image derivation via ImageMagick.
//!
//! Conversions land next to the staged source as
//! `<stem><options-fragment>.<format>`, so the option set is visible in the
//! cache path and identical requests hit the same file. `detail=true`
//! metadata combines `identify` container data with decoded EXIF values
//! (EXIF wins on overlap) and is cached in a `.metadata.json` sidecar
//! invalidated by source modification time.

use crate::command::{IMAGE_CONVERT_TIMEOUT, remove_partial, run_tool};
use crate::error::EngineResult;
use crate::job::Job;
use crate::registry::Processor;
use async_trait::async_trait;
use refract_core::aspect_ratio_name;
use refract_core::mediatype::mime_for_format;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::fs;
use tracing::{debug, warn};

pub struct ImageProcessor;

#[async_trait]
impl Processor for ImageProcessor {
    async fn process(&self, job: &mut Job) -> EngineResult<()> {
        if job.options.detail {
            // Metadata extraction failures do not fail the request; the
            // image itself can still be served.
            if let Err(e) = load_metadata(job).await {
                warn!(path = %job.staged_path.display(), error = %e, "image metadata extraction failed");
            }
        }
        convert_image(job).await
    }
}

/// Dimensions for the named quality presets; unknown names fall back to 480p.
pub(crate) fn quality_dimensions(quality: &str) -> (u32, u32) {
    match quality.to_ascii_lowercase().as_str() {
        "720p" => (1280, 720),
        "1080p" => (1920, 1080),
        "4k" => (3840, 2160),
        _ => (854, 480),
    }
}

/// Parse a thumbnail/preview spec: literal `WxH` or a named preset.
/// Returns `(width, height, custom)`.
pub(crate) fn parse_target_dimensions(spec: &str) -> (u32, u32, bool) {
    if let Some((w, h)) = spec.split_once('x') {
        if let (Ok(w), Ok(h)) = (w.parse::<u32>(), h.parse::<u32>()) {
            if w > 0 && h > 0 {
                return (w, h, true);
            }
        }
    }
    let (w, h) = quality_dimensions(spec);
    (w, h, false)
}

/// Normalize a requested output format to a still-image extension.
pub(crate) fn normalize_image_format(format: &str) -> &'static str {
    match format.to_ascii_lowercase().as_str() {
        "webp" => "webp",
        "png" => "png",
        "avif" => "avif",
        _ => "jpg",
    }
}

/// Resize `source` to the thumbnail `spec` and write `dest`.
///
/// Literal `WxH` specs resize-to-fill and center-crop to the exact box;
/// named presets resize within the preset bounds.
pub(crate) async fn size_to_target(
    source: &Path,
    dest: &Path,
    spec: &str,
    quality: u32,
) -> EngineResult<()> {
    let mut args: Vec<String> = vec![source.display().to_string()];

    let (width, height, custom) = parse_target_dimensions(spec);
    if custom {
        args.push("-resize".to_string());
        args.push(format!("{width}x{height}^"));
        args.push("-gravity".to_string());
        args.push("center".to_string());
        args.push("-crop".to_string());
        args.push(format!("{width}x{height}+0+0"));
    } else {
        args.push("-resize".to_string());
        args.push(format!("{width}x{height}"));
    }

    if quality > 0 {
        args.push("-quality".to_string());
        args.push(quality.to_string());
    }

    args.push(dest.display().to_string());
    if let Err(e) = run_tool("convert", &args, IMAGE_CONVERT_TIMEOUT).await {
        remove_partial(dest).await;
        return Err(e);
    }
    Ok(())
}

/// Run the option-driven conversion for an image source.
async fn convert_image(job: &mut Job) -> EngineResult<()> {
    let opts = job.options.clone();
    let stem = job.staged_path.with_extension("");
    let fragment = opts.cache_fragment();
    let derived = PathBuf::from(format!(
        "{}{}.{}",
        stem.display(),
        fragment,
        opts.output_format
    ));

    let mime = mime_for_format(&opts.output_format).map(str::to_string);

    if fs::try_exists(&derived).await? {
        job.record_probe("HIT", &fragment, &derived);
        job.derived_path = Some(derived);
        job.derived_mime = mime;
        return Ok(());
    }
    job.record_probe("MISS", &fragment, &derived);

    let mut args: Vec<String> = vec![job.staged_path.display().to_string()];

    match (opts.width, opts.height) {
        (0, 0) => {}
        (w, 0) if opts.keep_aspect => {
            args.push("-resize".to_string());
            args.push(w.to_string());
        }
        (0, h) if opts.keep_aspect => {
            args.push("-resize".to_string());
            args.push(format!("x{h}"));
        }
        (w, h) if opts.keep_aspect => {
            args.push("-resize".to_string());
            args.push(format!("{w}x{h}"));
        }
        (w, h) if w > 0 && h > 0 => {
            // Fill the exact box, then crop from the requested anchor.
            args.push("-resize".to_string());
            args.push(format!("{w}x{h}^"));
            args.push("-gravity".to_string());
            args.push(opts.anchor.gravity().to_string());
            args.push("-crop".to_string());
            args.push(format!("{w}x{h}+0+0"));
        }
        (w, 0) => {
            args.push("-resize".to_string());
            args.push(w.to_string());
        }
        (0, h) => {
            args.push("-resize".to_string());
            args.push(format!("x{h}"));
        }
        _ => unreachable!(),
    }

    if opts.quality > 0 {
        args.push("-quality".to_string());
        args.push(opts.quality.to_string());
    }

    args.push(derived.display().to_string());
    if let Err(e) = run_tool("convert", &args, IMAGE_CONVERT_TIMEOUT).await {
        remove_partial(&derived).await;
        return Err(e);
    }

    job.derived_path = Some(derived);
    job.derived_mime = mime;
    Ok(())
}

/// Load metadata for `detail=true`, reading the sidecar cache when it is
/// still valid for the staged source.
async fn load_metadata(job: &mut Job) -> EngineResult<()> {
    let sidecar = PathBuf::from(format!(
        "{}.metadata.json",
        job.staged_path.with_extension("").display()
    ));

    if fs::try_exists(&sidecar).await? {
        let source_meta = fs::metadata(&job.staged_path).await?;
        let sidecar_meta = fs::metadata(&sidecar).await?;
        let fresh = match (source_meta.modified(), sidecar_meta.modified()) {
            (Ok(src), Ok(side)) => src <= side,
            _ => false,
        };
        if fresh {
            let cached = fs::read(&sidecar).await?;
            if let Ok(value) = serde_json::from_slice::<Value>(&cached) {
                debug!(sidecar = %sidecar.display(), "image metadata sidecar hit");
                job.metadata = Some(value);
                return Ok(());
            }
        }
    }

    let mut metadata = extract_identify_metadata(&job.staged_path).await?;
    overlay_file_info(&mut metadata, &job.staged_path).await;

    let value = Value::Object(metadata);
    if let Ok(bytes) = serde_json::to_vec(&value) {
        if let Err(e) = fs::write(&sidecar, bytes).await {
            warn!(sidecar = %sidecar.display(), error = %e, "failed to write metadata sidecar");
        }
    }
    job.metadata = Some(value);
    Ok(())
}

/// Extract container metadata plus EXIF via ImageMagick identify. EXIF
/// values override overlapping container values.
async fn extract_identify_metadata(path: &Path) -> EngineResult<Map<String, Value>> {
    let mut metadata = Map::new();

    let format_arg = "%w,%h,%[colorspace],%[depth],%[quality],%[format],%[exif:*]";
    let output = run_tool(
        "identify",
        &[
            "-format".to_string(),
            format_arg.to_string(),
            path.display().to_string(),
        ],
        IMAGE_CONVERT_TIMEOUT,
    )
    .await?;
    let text = String::from_utf8_lossy(&output);

    let parts: Vec<&str> = text.split(',').collect();
    if parts.len() >= 2 {
        if let (Ok(width), Ok(height)) = (
            parts[0].trim().parse::<f64>(),
            parts[1].trim().parse::<f64>(),
        ) {
            metadata.insert("width".to_string(), Value::from(width as u64));
            metadata.insert("height".to_string(), Value::from(height as u64));
            metadata.insert(
                "aspect_ratio".to_string(),
                Value::from(aspect_ratio_name(width, height)),
            );
        }
        if parts.len() >= 6 {
            for (key, idx) in [("colorspace", 2), ("bit_depth", 3), ("quality", 4)] {
                let v = parts[idx].trim();
                if !v.is_empty() {
                    metadata.insert(key.to_string(), Value::from(v));
                }
            }
        }
    }

    // Remaining parts carry exif entries of the form `exif:Key=Value`; these
    // override the container values above.
    for part in parts.iter().skip(6) {
        if let Some((key, value)) = part.split_once('=') {
            let key = key.trim().trim_start_matches("exif:").to_ascii_lowercase();
            let value = value.trim();
            if !key.is_empty() && !value.is_empty() {
                metadata.insert(key, Value::from(value));
            }
        }
    }

    // EXIF pixel dimensions win over what the container reported.
    let exif_dims = (
        metadata
            .get("pixelxdimension")
            .and_then(Value::as_str)
            .and_then(|v| v.parse::<f64>().ok()),
        metadata
            .get("pixelydimension")
            .and_then(Value::as_str)
            .and_then(|v| v.parse::<f64>().ok()),
    );
    if let (Some(width), Some(height)) = exif_dims {
        metadata.insert("width".to_string(), Value::from(width as u64));
        metadata.insert("height".to_string(), Value::from(height as u64));
        metadata.insert(
            "aspect_ratio".to_string(),
            Value::from(aspect_ratio_name(width, height)),
        );
    }

    // Verbose pass for DPI, color profile, and transparency.
    match run_tool(
        "identify",
        &["-verbose".to_string(), path.display().to_string()],
        IMAGE_CONVERT_TIMEOUT,
    )
    .await
    {
        Ok(verbose) => {
            let verbose = String::from_utf8_lossy(&verbose).into_owned();
            if let Some((x, y)) = parse_resolution(&verbose) {
                metadata.insert("dpi_x".to_string(), Value::from(x));
                metadata.insert("dpi_y".to_string(), Value::from(y));
            }
            if verbose.contains("Profile-icc:") {
                metadata.insert("has_color_profile".to_string(), Value::from(true));
            }
            if verbose.contains("Alpha:") {
                metadata.insert("has_transparency".to_string(), Value::from(true));
            }
        }
        Err(e) => debug!(error = %e, "verbose identify failed"),
    }

    Ok(metadata)
}

/// Pull `Resolution: WxH` out of verbose identify output.
fn parse_resolution(verbose: &str) -> Option<(u64, u64)> {
    let rest = &verbose[verbose.find("Resolution: ")? + "Resolution: ".len()..];
    let token = rest.split_whitespace().next()?;
    let (x, y) = token.split_once('x')?;
    Some((x.parse().ok()?, y.trim_end_matches('+').parse().ok()?))
}

async fn overlay_file_info(metadata: &mut Map<String, Value>, path: &Path) {
    if let Ok(meta) = fs::metadata(path).await {
        metadata.insert("file_size".to_string(), Value::from(meta.len()));
        if let Ok(modified) = meta.modified() {
            let modified: OffsetDateTime = modified.into();
            if let Ok(formatted) = modified.format(&Rfc3339) {
                metadata.insert("modified_time".to_string(), Value::from(formatted));
            }
        }
    }
}
