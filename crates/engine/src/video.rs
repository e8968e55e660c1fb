//! Video derivation via ffmpeg/ffprobe.
//!
//! Three derivations, all cached under the tenant cache root:
//! - `detail=true` → `video_metadata/<key>.json`, one ffprobe call for
//!   format and stream data.
//! - `thumbnail=` → `thumbnails/<key>_<spec>.<ext>`, a full-resolution frame
//!   extract re-encoded to the requested size and format.
//! - `preview=` → `previews/<key>_<label>.mp4`, up to five 4-second chunks
//!   distributed across the duration, extracted in parallel and losslessly
//!   concatenated.

use crate::command::{
    CHUNK_EXTRACT_TIMEOUT, CONCAT_TIMEOUT, FRAME_EXTRACT_TIMEOUT, PROBE_TIMEOUT, remove_partial,
    run_tool,
};
use crate::error::{EngineError, EngineResult};
use crate::image::{normalize_image_format, parse_target_dimensions, size_to_target};
use crate::job::Job;
use crate::registry::Processor;
use async_trait::async_trait;
use futures::StreamExt;
use refract_core::aspect_ratio_name;
use refract_core::mediatype::mime_for_format;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Seconds per preview chunk.
const CHUNK_SECONDS: f64 = 4.0;
/// Maximum total preview duration in seconds.
const MAX_PREVIEW_SECONDS: f64 = 20.0;
/// CRF for preview compression (higher = smaller file).
const PREVIEW_CRF: &str = "28";
/// Bound on concurrent chunk extractions.
const MAX_CONCURRENT_CHUNKS: usize = 4;

pub struct VideoProcessor;

#[async_trait]
impl Processor for VideoProcessor {
    async fn process(&self, job: &mut Job) -> EngineResult<()> {
        if job.options.detail {
            return generate_metadata(job).await;
        }
        if !job.options.preview.is_empty() {
            return generate_preview(job).await;
        }
        if !job.options.thumbnail.is_empty() {
            return generate_thumbnail(job).await;
        }
        // Nothing requested; the registry should not have selected us, but
        // pass-through is the safe answer.
        Ok(())
    }
}

/// Duration of a video in seconds via ffprobe.
pub(crate) async fn probe_duration(path: &Path) -> EngineResult<f64> {
    let output = run_tool(
        "ffprobe",
        &[
            "-v".to_string(),
            "quiet".to_string(),
            "-show_entries".to_string(),
            "format=duration".to_string(),
            "-of".to_string(),
            "csv=p=0".to_string(),
            path.display().to_string(),
        ],
        PROBE_TIMEOUT,
    )
    .await?;

    String::from_utf8_lossy(&output)
        .trim()
        .parse::<f64>()
        .map_err(|_| EngineError::Probe("unparsable duration".to_string()))
}

async fn generate_thumbnail(job: &mut Job) -> EngineResult<()> {
    let opts = job.options.clone();
    let format = normalize_image_format(&opts.output_format);
    let key = job.cache_key(&[&opts.preview, &opts.thumbnail, &opts.ss.to_string(), format]);

    let cache_dir = job.cache_root.join("thumbnails");
    fs::create_dir_all(&cache_dir).await?;
    let final_path = cache_dir.join(format!("{key}_{}.{format}", opts.thumbnail));

    let mime = mime_for_format(format).map(str::to_string);
    if fs::try_exists(&final_path).await? {
        debug!(key = %key, path = %final_path.display(), "video thumbnail cache hit");
        job.record_probe("HIT", &key, &final_path);
        job.derived_path = Some(final_path);
        job.derived_mime = mime;
        return Ok(());
    }
    job.record_probe("MISS", &key, &final_path);

    let timestamp = if opts.ss > 0 {
        opts.ss as f64
    } else {
        probe_duration(&job.staged_path).await? / 2.0
    };

    // Full-resolution frame first, sized and re-encoded second.
    let frame_path = cache_dir.join(format!("{key}_{}_temp.jpg", opts.thumbnail));
    let extract = run_tool(
        "ffmpeg",
        &[
            "-ss".to_string(),
            format!("{timestamp:.2}"),
            "-i".to_string(),
            job.staged_path.display().to_string(),
            "-vframes".to_string(),
            "1".to_string(),
            "-q:v".to_string(),
            "2".to_string(),
            "-y".to_string(),
            frame_path.display().to_string(),
        ],
        FRAME_EXTRACT_TIMEOUT,
    )
    .await;
    if let Err(e) = extract {
        remove_partial(&frame_path).await;
        return Err(e);
    }

    let sized = size_to_target(&frame_path, &final_path, &opts.thumbnail, opts.quality).await;
    remove_partial(&frame_path).await;
    sized?;

    job.derived_path = Some(final_path);
    job.derived_mime = mime;
    Ok(())
}

async fn generate_preview(job: &mut Job) -> EngineResult<()> {
    let opts = job.options.clone();

    // A resolved profile overrides the preset: its dimensions and codec
    // drive the encode, its name labels the cache entry.
    let (width, height, label, codec) = match &job.video_profile {
        Some(p) if p.width > 0 && p.height > 0 => (
            p.width,
            p.height,
            p.profile.clone(),
            if p.codec.is_empty() {
                "libx264".to_string()
            } else {
                p.codec.clone()
            },
        ),
        _ => {
            let (w, h, custom) = parse_target_dimensions(&opts.preview);
            let label = if custom {
                opts.preview.clone()
            } else {
                normalize_preview_label(&opts.preview)
            };
            (w, h, label, "libx264".to_string())
        }
    };

    let key = job.cache_key(&[&opts.preview, &opts.thumbnail, &opts.ss.to_string(), &label]);
    let cache_dir = job.cache_root.join("previews");
    fs::create_dir_all(&cache_dir).await?;
    let preview_path = cache_dir.join(format!("{key}_{label}.mp4"));

    if fs::try_exists(&preview_path).await? {
        debug!(key = %key, path = %preview_path.display(), "video preview cache hit");
        job.record_probe("HIT", &key, &preview_path);
        job.derived_path = Some(preview_path);
        job.derived_mime = Some("video/mp4".to_string());
        return Ok(());
    }
    job.record_probe("MISS", &key, &preview_path);

    let duration = probe_duration(&job.staged_path).await?;

    let max_chunks = (MAX_PREVIEW_SECONDS / CHUNK_SECONDS) as usize;
    let possible = ((duration / CHUNK_SECONDS) as usize).max(1);
    let chunk_count = possible.min(max_chunks);
    let interval = duration / chunk_count as f64;

    let temp_dir = cache_dir.join(format!("temp_{key}"));
    fs::create_dir_all(&temp_dir).await?;

    let result = extract_and_concat(
        &job.staged_path,
        &temp_dir,
        &preview_path,
        chunk_count,
        interval,
        width,
        height,
        &codec,
    )
    .await;

    let _ = fs::remove_dir_all(&temp_dir).await;
    if result.is_err() {
        remove_partial(&preview_path).await;
    }
    result?;

    job.derived_path = Some(preview_path);
    job.derived_mime = Some("video/mp4".to_string());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn extract_and_concat(
    staged: &Path,
    temp_dir: &Path,
    preview_path: &Path,
    chunk_count: usize,
    interval: f64,
    width: u32,
    height: u32,
    codec: &str,
) -> EngineResult<()> {
    let chunk_paths: Vec<PathBuf> = (0..chunk_count)
        .map(|i| temp_dir.join(format!("chunk_{i}.mp4")))
        .collect();

    let mut extracts = futures::stream::iter((0..chunk_count).map(|i| {
        let staged = staged.to_path_buf();
        let chunk_path = chunk_paths[i].clone();
        let codec = codec.to_string();
        let start = i as f64 * interval;
        async move { extract_chunk(&staged, &chunk_path, start, width, height, &codec).await }
    }))
    .buffer_unordered(MAX_CONCURRENT_CHUNKS);

    while let Some(result) = extracts.next().await {
        result?;
    }
    drop(extracts);

    let mut concat_list = String::new();
    for path in &chunk_paths {
        concat_list.push_str(&format!("file '{}'\n", path.display()));
    }
    let list_path = temp_dir.join("concat.txt");
    fs::write(&list_path, concat_list).await?;

    run_tool(
        "ffmpeg",
        &[
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            list_path.display().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-y".to_string(),
            preview_path.display().to_string(),
        ],
        CONCAT_TIMEOUT,
    )
    .await?;
    Ok(())
}

/// Extract one video-only, compressed chunk scaled and padded to the target
/// box.
async fn extract_chunk(
    staged: &Path,
    chunk_path: &Path,
    start: f64,
    width: u32,
    height: u32,
    codec: &str,
) -> EngineResult<()> {
    let scale = format!(
        "scale={width}:{height}:force_original_aspect_ratio=decrease,pad={width}:{height}:(ow-iw)/2:(oh-ih)/2"
    );
    let result = run_tool(
        "ffmpeg",
        &[
            "-ss".to_string(),
            format!("{start:.2}"),
            "-i".to_string(),
            staged.display().to_string(),
            "-t".to_string(),
            format!("{CHUNK_SECONDS:.2}"),
            "-vf".to_string(),
            scale,
            "-c:v".to_string(),
            codec.to_string(),
            "-preset".to_string(),
            "fast".to_string(),
            "-crf".to_string(),
            PREVIEW_CRF.to_string(),
            "-an".to_string(),
            "-y".to_string(),
            chunk_path.display().to_string(),
        ],
        CHUNK_EXTRACT_TIMEOUT,
    )
    .await;
    if let Err(e) = result {
        remove_partial(chunk_path).await;
        return Err(e);
    }
    Ok(())
}

fn normalize_preview_label(spec: &str) -> String {
    match spec.to_ascii_lowercase().as_str() {
        "720p" => "720p".to_string(),
        "1080p" => "1080p".to_string(),
        "4k" => "4k".to_string(),
        _ => "480p".to_string(),
    }
}

/// Probe-derived metadata, serialized as the `detail=true` response body.
#[derive(Debug, Default, Serialize)]
struct VideoMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bitrate: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    video_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    color_space: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pixel_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    audio_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_channels: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<u64>,

    subtitle_count: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    subtitle_languages: Vec<String>,

    filename: String,
    file_path: String,
}

async fn generate_metadata(job: &mut Job) -> EngineResult<()> {
    let key = job.cache_key(&["metadata"]);
    let cache_dir = job.cache_root.join("video_metadata");
    fs::create_dir_all(&cache_dir).await?;
    let json_path = cache_dir.join(format!("{key}.json"));

    if fs::try_exists(&json_path).await? {
        debug!(key = %key, path = %json_path.display(), "video metadata cache hit");
        job.record_probe("HIT", &key, &json_path);
        job.derived_path = Some(json_path);
        job.derived_mime = Some("application/json".to_string());
        return Ok(());
    }
    job.record_probe("MISS", &key, &json_path);

    let file_meta = fs::metadata(&job.staged_path).await?;
    let mut metadata = VideoMetadata {
        filename: Path::new(&job.original_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        file_path: job.original_path.clone(),
        size: Some(file_meta.len()),
        ..Default::default()
    };

    // One probe call covers format and stream data.
    let probe = run_tool(
        "ffprobe",
        &[
            "-v".to_string(),
            "quiet".to_string(),
            "-print_format".to_string(),
            "json".to_string(),
            "-show_format".to_string(),
            "-show_streams".to_string(),
            job.staged_path.display().to_string(),
        ],
        PROBE_TIMEOUT,
    )
    .await?;
    let probe: Value = serde_json::from_slice(&probe)
        .map_err(|_| EngineError::Probe("unparsable ffprobe json".to_string()))?;

    if let Some(format) = probe.get("format") {
        metadata.format = format
            .get("format_name")
            .and_then(Value::as_str)
            .map(str::to_string);
        metadata.bitrate = format
            .get("bit_rate")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok());
        metadata.duration = format
            .get("duration")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok());
    }

    if let Some(streams) = probe.get("streams").and_then(Value::as_array) {
        for stream in streams {
            match stream.get("codec_type").and_then(Value::as_str) {
                Some("video") => {
                    metadata.video_codec = stream
                        .get("codec_name")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    metadata.width = stream.get("width").and_then(Value::as_u64);
                    metadata.height = stream.get("height").and_then(Value::as_u64);
                    if let (Some(w), Some(h)) = (metadata.width, metadata.height) {
                        metadata.aspect_ratio = Some(aspect_ratio_name(w as f64, h as f64));
                    }
                    metadata.color_space = stream
                        .get("color_space")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    metadata.pixel_format = stream
                        .get("pix_fmt")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    metadata.frame_rate = stream
                        .get("r_frame_rate")
                        .and_then(Value::as_str)
                        .and_then(parse_frame_rate);
                }
                Some("audio") => {
                    metadata.audio_codec = stream
                        .get("codec_name")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    metadata.audio_channels = stream.get("channels").and_then(Value::as_u64);
                    metadata.sample_rate = stream
                        .get("sample_rate")
                        .and_then(Value::as_str)
                        .and_then(|s| s.parse().ok());
                }
                Some("subtitle") => {
                    metadata.subtitle_count += 1;
                    if let Some(lang) = stream
                        .get("tags")
                        .and_then(|t| t.get("language"))
                        .and_then(Value::as_str)
                    {
                        metadata.subtitle_languages.push(lang.to_string());
                    }
                }
                _ => {}
            }
        }
    }

    let json = serde_json::to_vec_pretty(&metadata)?;
    fs::write(&json_path, json).await?;

    job.derived_path = Some(json_path);
    job.derived_mime = Some("application/json".to_string());
    Ok(())
}

fn parse_frame_rate(raw: &str) -> Option<f64> {
    let (num, den) = raw.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    if den > 0.0 { Some(num / den) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refract_core::{MediaKind, Options};
    use tempfile::tempdir;

    #[tokio::test]
    async fn existing_thumbnail_is_a_cache_hit() {
        let dir = tempdir().unwrap();
        let staged = dir.path().join("movie.mp4");
        tokio::fs::write(&staged, b"mp4").await.unwrap();

        let options = Options {
            thumbnail: "720p".to_string(),
            output_format: "jpg".to_string(),
            ..Default::default()
        };
        let mut job = Job::new(
            "movie.mp4".to_string(),
            staged,
            dir.path().to_path_buf(),
            MediaKind::Video,
            options,
            None,
        );

        let key = job.cache_key(&["", "720p", "0", "jpg"]);
        let thumb_dir = dir.path().join("thumbnails");
        tokio::fs::create_dir_all(&thumb_dir).await.unwrap();
        let cached = thumb_dir.join(format!("{key}_720p.jpg"));
        tokio::fs::write(&cached, b"jpeg").await.unwrap();

        generate_thumbnail(&mut job).await.unwrap();
        assert_eq!(job.derived_path.as_deref(), Some(cached.as_path()));
        assert_eq!(job.derived_mime.as_deref(), Some("image/jpeg"));
        assert_eq!(job.cache_probe.as_ref().unwrap().status, "HIT");
    }

    #[test]
    fn frame_rate_parses_rational() {
        assert_eq!(parse_frame_rate("30000/1001"), Some(30000.0 / 1001.0));
        assert_eq!(parse_frame_rate("25/1"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("nonsense"), None);
    }

    #[test]
    fn preview_label_defaults_to_480p() {
        assert_eq!(normalize_preview_label("1080p"), "1080p");
        assert_eq!(normalize_preview_label("potato"), "480p");
    }
}
