//! Document first-page previews.
//!
//! PDFs rasterize directly through pdftoppm; office formats go through a
//! LibreOffice PDF intermediate first. Anything that fails (or has no
//! converter, like plain text) gets a synthesized placeholder annotated with
//! the file type, so a thumbnail request always produces an image.

use crate::command::{
    IMAGE_CONVERT_TIMEOUT, OFFICE_CONVERT_TIMEOUT, remove_partial, run_tool,
};
use crate::error::EngineResult;
use crate::image::{normalize_image_format, size_to_target};
use crate::job::Job;
use crate::registry::Processor;
use async_trait::async_trait;
use refract_core::mediatype::mime_for_format;
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Office formats LibreOffice can convert to PDF.
const OFFICE_EXTENSIONS: &[&str] = &[
    "docx", "doc", "odt", "xlsx", "xls", "ods", "pptx", "ppt", "odp",
];

pub struct DocumentProcessor;

#[async_trait]
impl Processor for DocumentProcessor {
    async fn process(&self, job: &mut Job) -> EngineResult<()> {
        let opts = job.options.clone();
        let format = normalize_image_format(&opts.output_format);
        let key = job.cache_key(&[&opts.thumbnail, format]);

        let cache_dir = job.cache_root.join("document_thumbnails");
        fs::create_dir_all(&cache_dir).await?;
        let final_path = cache_dir.join(format!("{key}_{}.{format}", opts.thumbnail));

        let mime = mime_for_format(format).map(str::to_string);
        if fs::try_exists(&final_path).await? {
            debug!(key = %key, path = %final_path.display(), "document thumbnail cache hit");
            job.record_probe("HIT", &key, &final_path);
            job.derived_path = Some(final_path);
            job.derived_mime = mime;
            return Ok(());
        }
        job.record_probe("MISS", &key, &final_path);

        let extension = job
            .staged_path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        // First page to a full-size raster, falling back to a placeholder.
        let page_path = cache_dir.join(format!("{key}_{}_temp.png", opts.thumbnail));
        let rasterized = match extension.as_str() {
            "pdf" => pdf_to_image(&job.staged_path, &page_path).await,
            ext if OFFICE_EXTENSIONS.contains(&ext) => {
                office_to_image(&job.staged_path, &page_path, &cache_dir).await
            }
            _ => Err(crate::error::EngineError::Probe(format!(
                "no rasterizer for .{extension}"
            ))),
        };

        if let Err(e) = &rasterized {
            debug!(error = %e, "document rasterization failed, using placeholder");
            remove_partial(&page_path).await;
            let label = if extension.is_empty() {
                "document".to_string()
            } else {
                extension.clone()
            };
            placeholder_image(&page_path, &label).await?;
        }

        let sized = size_to_target(&page_path, &final_path, &opts.thumbnail, opts.quality).await;
        remove_partial(&page_path).await;
        sized?;

        job.derived_path = Some(final_path);
        job.derived_mime = mime;
        Ok(())
    }
}

/// Rasterize the first PDF page.
async fn pdf_to_image(pdf: &Path, output: &Path) -> EngineResult<()> {
    // pdftoppm writes to a name prefix, not the final filename.
    let prefix = output.with_extension("");
    run_tool(
        "pdftoppm",
        &[
            "-png".to_string(),
            "-singlefile".to_string(),
            "-f".to_string(),
            "1".to_string(),
            "-l".to_string(),
            "1".to_string(),
            pdf.display().to_string(),
            prefix.display().to_string(),
        ],
        IMAGE_CONVERT_TIMEOUT,
    )
    .await?;
    Ok(())
}

/// Convert an office document through a PDF intermediate.
async fn office_to_image(source: &Path, output: &Path, work_dir: &Path) -> EngineResult<()> {
    let temp_dir = work_dir.join(format!(
        "temp_{}",
        source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    ));
    fs::create_dir_all(&temp_dir).await?;

    let result = async {
        run_tool(
            "soffice",
            &[
                "--headless".to_string(),
                "--convert-to".to_string(),
                "pdf".to_string(),
                "--outdir".to_string(),
                temp_dir.display().to_string(),
                source.display().to_string(),
            ],
            OFFICE_CONVERT_TIMEOUT,
        )
        .await?;

        // LibreOffice names the PDF after the input's stem.
        let pdf = temp_dir.join(format!(
            "{}.pdf",
            source
                .file_stem()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        ));
        if !fs::try_exists(&pdf).await? {
            return Err(crate::error::EngineError::Probe(
                "LibreOffice produced no PDF".to_string(),
            ));
        }

        pdf_to_image(&pdf, output).await
    }
    .await;

    let _ = fs::remove_dir_all(&temp_dir).await;
    result
}

/// Synthesize a white canvas annotated with the file type.
async fn placeholder_image(output: &Path, label: &str) -> EngineResult<()> {
    if let Err(e) = run_tool(
        "convert",
        &[
            "-size".to_string(),
            "800x600".to_string(),
            "xc:white".to_string(),
            "-gravity".to_string(),
            "center".to_string(),
            "-pointsize".to_string(),
            "72".to_string(),
            "-annotate".to_string(),
            "0".to_string(),
            label.to_string(),
            output.display().to_string(),
        ],
        IMAGE_CONVERT_TIMEOUT,
    )
    .await
    {
        remove_partial(output).await;
        return Err(e);
    }
    Ok(())
}
