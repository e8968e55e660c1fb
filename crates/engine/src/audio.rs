//! Audio derivation via ffmpeg/ffprobe.
//!
//! Transcodes between audio containers with per-format quality mapping,
//! extracts embedded artwork into the image sizing pipeline, and emits tag
//! metadata as JSON for `detail=true`.

use crate::command::{CHUNK_EXTRACT_TIMEOUT, PROBE_TIMEOUT, remove_partial, run_tool};
use crate::error::{EngineError, EngineResult};
use crate::image::{normalize_image_format, size_to_target};
use crate::job::Job;
use crate::registry::Processor;
use async_trait::async_trait;
use refract_core::mediatype::mime_for_format;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

pub struct AudioProcessor;

#[async_trait]
impl Processor for AudioProcessor {
    async fn process(&self, job: &mut Job) -> EngineResult<()> {
        if job.options.detail {
            return generate_metadata(job).await;
        }
        if !job.options.thumbnail.is_empty() {
            return generate_artwork_thumbnail(job).await;
        }
        transcode(job).await
    }
}

/// Quality arguments for the target format, mapping the snapped 1–100 scale
/// onto each codec's native range.
fn quality_args(format: &str, quality: u32) -> Vec<String> {
    if quality == 0 {
        return Vec::new();
    }
    match format {
        "mp3" => {
            // MP3 VBR runs 0 (best) to 9 (worst), inverted from our scale.
            let q = 9 - (quality * 9 / 100);
            vec!["-q:a".to_string(), q.to_string()]
        }
        "ogg" => {
            // Vorbis VBR runs -1 to 10.
            let q = (quality as i32 * 11 / 100) - 1;
            vec!["-q:a".to_string(), q.to_string()]
        }
        "flac" | "wav" | "wma" => Vec::new(),
        // AAC, M4A, Opus, and everything else: linear bitrate 64–320 kbps.
        _ => {
            let bitrate = 64 + (quality * 256 / 100);
            vec!["-b:a".to_string(), format!("{bitrate}k")]
        }
    }
}

/// Codec selection for the target format. Formats not listed use ffmpeg's
/// container default.
fn codec_args(format: &str) -> Vec<String> {
    let codec = match format {
        "mp3" => "libmp3lame",
        "aac" | "m4a" => "aac",
        "ogg" => "libvorbis",
        "flac" => "flac",
        "wav" => "pcm_s16le",
        "wma" => "wmav2",
        "opus" => "libopus",
        _ => return Vec::new(),
    };
    vec!["-codec:a".to_string(), codec.to_string()]
}

async fn transcode(job: &mut Job) -> EngineResult<()> {
    let opts = job.options.clone();
    let format = opts.output_format.to_ascii_lowercase();
    let stem = job.staged_path.with_extension("");
    let fragment = opts.cache_fragment();
    let derived = PathBuf::from(format!("{}{}.{}", stem.display(), fragment, format));
    let mime = mime_for_format(&format).map(str::to_string);

    if fs::try_exists(&derived).await? {
        job.record_probe("HIT", &fragment, &derived);
        job.derived_path = Some(derived);
        job.derived_mime = mime;
        return Ok(());
    }
    job.record_probe("MISS", &fragment, &derived);

    let mut args: Vec<String> = vec![
        "-i".to_string(),
        job.staged_path.display().to_string(),
    ];
    args.extend(quality_args(&format, opts.quality));
    args.extend(codec_args(&format));
    args.push("-y".to_string());
    args.push(derived.display().to_string());

    if let Err(e) = run_tool("ffmpeg", &args, CHUNK_EXTRACT_TIMEOUT).await {
        remove_partial(&derived).await;
        return Err(e);
    }

    job.derived_path = Some(derived);
    job.derived_mime = mime;
    Ok(())
}

async fn generate_artwork_thumbnail(job: &mut Job) -> EngineResult<()> {
    let opts = job.options.clone();
    let format = normalize_image_format(&opts.output_format);
    let key = job.cache_key(&[&opts.thumbnail, format]);

    let cache_dir = job.cache_root.join("audio_thumbnails");
    fs::create_dir_all(&cache_dir).await?;
    let final_path = cache_dir.join(format!("{key}_{}.{format}", opts.thumbnail));

    let mime = mime_for_format(format).map(str::to_string);
    if fs::try_exists(&final_path).await? {
        debug!(key = %key, path = %final_path.display(), "audio thumbnail cache hit");
        job.record_probe("HIT", &key, &final_path);
        job.derived_path = Some(final_path);
        job.derived_mime = mime;
        return Ok(());
    }
    job.record_probe("MISS", &key, &final_path);

    // Embedded cover art travels as an attached picture stream; copy it out
    // untouched, then size it like any other thumbnail source.
    let art_path = cache_dir.join(format!("{key}_{}_temp.jpg", opts.thumbnail));
    let extract = run_tool(
        "ffmpeg",
        &[
            "-i".to_string(),
            job.staged_path.display().to_string(),
            "-an".to_string(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-y".to_string(),
            art_path.display().to_string(),
        ],
        CHUNK_EXTRACT_TIMEOUT,
    )
    .await;
    if extract.is_err() {
        remove_partial(&art_path).await;
        return Err(EngineError::NoArtwork(job.original_path.clone()));
    }

    let sized = size_to_target(&art_path, &final_path, &opts.thumbnail, opts.quality).await;
    remove_partial(&art_path).await;
    sized?;

    job.derived_path = Some(final_path);
    job.derived_mime = mime;
    Ok(())
}

/// Tag metadata serialized as the `detail=true` response body.
#[derive(Debug, Default, Serialize)]
struct AudioMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    album_artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    composer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    year: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    track: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    track_total: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disc: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disc_total: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<f64>,

    filename: String,
    file_size: u64,
    has_artwork: bool,
}

async fn generate_metadata(job: &mut Job) -> EngineResult<()> {
    let key = job.cache_key(&["metadata"]);
    let cache_dir = job.cache_root.join("audio_metadata");
    fs::create_dir_all(&cache_dir).await?;
    let json_path = cache_dir.join(format!("{key}.json"));

    if fs::try_exists(&json_path).await? {
        debug!(key = %key, path = %json_path.display(), "audio metadata cache hit");
        job.record_probe("HIT", &key, &json_path);
        job.derived_path = Some(json_path);
        job.derived_mime = Some("application/json".to_string());
        return Ok(());
    }
    job.record_probe("MISS", &key, &json_path);

    let file_meta = fs::metadata(&job.staged_path).await?;

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

    let mut metadata = AudioMetadata {
        filename: Path::new(&job.original_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        file_size: file_meta.len(),
        ..Default::default()
    };

    if let Some(format) = probe.get("format") {
        metadata.format = format
            .get("format_name")
            .and_then(Value::as_str)
            .map(str::to_string);
        metadata.duration = format
            .get("duration")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok());

        if let Some(tags) = format.get("tags") {
            metadata.title = tag_str(tags, &["title", "TITLE"]);
            metadata.artist = tag_str(tags, &["artist", "ARTIST"]);
            metadata.album = tag_str(tags, &["album", "ALBUM"]);
            metadata.album_artist = tag_str(tags, &["album_artist", "ALBUM_ARTIST"]);
            metadata.composer = tag_str(tags, &["composer", "COMPOSER"]);
            metadata.genre = tag_str(tags, &["genre", "GENRE"]);
            metadata.year = tag_str(tags, &["date", "DATE", "year"])
                .and_then(|d| d.get(..4).and_then(|y| y.parse().ok()));
            (metadata.track, metadata.track_total) =
                tag_pair(tags, &["track", "TRACK"]);
            (metadata.disc, metadata.disc_total) = tag_pair(tags, &["disc", "DISC"]);
        }
    }

    // An attached picture stream marks embedded artwork.
    metadata.has_artwork = probe
        .get("streams")
        .and_then(Value::as_array)
        .is_some_and(|streams| {
            streams.iter().any(|s| {
                s.get("disposition")
                    .and_then(|d| d.get("attached_pic"))
                    .and_then(Value::as_i64)
                    == Some(1)
            })
        });

    let json = serde_json::to_vec_pretty(&metadata)?;
    fs::write(&json_path, json).await?;

    job.derived_path = Some(json_path);
    job.derived_mime = Some("application/json".to_string());
    Ok(())
}

fn tag_str(tags: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| tags.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

/// Parse "N" or "N/M" tag values into (number, total).
fn tag_pair(tags: &Value, keys: &[&str]) -> (Option<i64>, Option<i64>) {
    let Some(raw) = tag_str(tags, keys) else {
        return (None, None);
    };
    match raw.split_once('/') {
        Some((n, total)) => (n.trim().parse().ok(), total.trim().parse().ok()),
        None => (raw.trim().parse().ok(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mp3_quality_is_inverted_vbr() {
        assert_eq!(quality_args("mp3", 100), vec!["-q:a", "0"]);
        assert_eq!(quality_args("mp3", 50), vec!["-q:a", "5"]);
    }

    #[test]
    fn aac_and_opus_use_linear_bitrate() {
        assert_eq!(quality_args("aac", 100), vec!["-b:a", "320k"]);
        assert_eq!(quality_args("opus", 50), vec!["-b:a", "192k"]);
        assert_eq!(quality_args("aac", 1), vec!["-b:a", "66k"]);
    }

    #[test]
    fn fixed_codec_formats_take_no_quality() {
        assert!(quality_args("flac", 80).is_empty());
        assert!(quality_args("wav", 80).is_empty());
        assert!(quality_args("anything", 0).is_empty());
    }

    #[test]
    fn codec_selection_matches_format() {
        assert_eq!(codec_args("mp3"), vec!["-codec:a", "libmp3lame"]);
        assert_eq!(codec_args("opus"), vec!["-codec:a", "libopus"]);
        assert!(codec_args("xyz").is_empty());
    }

    #[test]
    fn track_pairs_parse_both_forms() {
        let tags = json!({"track": "3/12", "disc": "1"});
        assert_eq!(tag_pair(&tags, &["track"]), (Some(3), Some(12)));
        assert_eq!(tag_pair(&tags, &["disc"]), (Some(1), None));
        assert_eq!(tag_pair(&tags, &["missing"]), (None, None));
    }
}
