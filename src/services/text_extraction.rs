use anyhow::{anyhow, Context, Result};
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use crate::models::{FileKind, UploadedDocument};

/// Pages past this index rarely carry proposal or bill fields; skipping them
/// keeps the text layer fast enough to sit in front of the AI call.
const MAX_PDF_PAGES: u32 = 3;

/// Luma cutoff for the OCR binarization step.
const BINARIZE_THRESHOLD: u8 = 160;

pub struct TextExtractor;

impl TextExtractor {
    /// Turns an uploaded document into plain text. The declared MIME type
    /// picks the path; an unusable type or a decode failure is an error the
    /// caller records on the owning document.
    pub fn extract(upload: &UploadedDocument, ocr_language: &str) -> Result<String> {
        match FileKind::from_mime(&upload.mime_type) {
            Some(FileKind::Pdf) => Self::extract_from_pdf(&upload.path),
            Some(FileKind::Image) => Self::extract_from_image(&upload.path, ocr_language),
            None => Err(anyhow!(
                "unsupported MIME type for text extraction: {}",
                upload.mime_type
            )),
        }
    }

    pub fn extract_from_pdf(path: &Path) -> Result<String> {
        let started = Instant::now();
        let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let (truncated, pages) = truncate_pdf_pages(&bytes, MAX_PDF_PAGES);

        let text = pdf_extract::extract_text_from_mem(&truncated)
            .map_err(|e| anyhow!("pdf text layer: {e}"))?;
        if text.trim().is_empty() {
            return Err(anyhow!("pdf contains no extractable text layer"));
        }

        info!(
            pages,
            chars = text.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "extracted pdf text layer"
        );
        Ok(text)
    }

    pub fn extract_from_image(path: &Path, language: &str) -> Result<String> {
        let started = Instant::now();
        let image = image::open(path).with_context(|| format!("decode {}", path.display()))?;

        let preprocessed = preprocess_for_ocr(&image);

        // Scoped artifact: the temp file is removed when this binding drops,
        // on success and failure alike.
        let mut artifact = tempfile::Builder::new()
            .prefix("solsight-ocr-")
            .suffix(".png")
            .tempfile()
            .context("create ocr artifact")?;
        {
            let mut png = Vec::new();
            image::DynamicImage::ImageLuma8(preprocessed)
                .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
                .context("encode ocr artifact")?;
            artifact.write_all(&png).context("write ocr artifact")?;
            artifact.flush()?;
        }

        let artifact_path = artifact
            .path()
            .to_str()
            .ok_or_else(|| anyhow!("invalid artifact path"))?
            .to_string();
        let text = run_ocr(&artifact_path, language)?;

        info!(
            chars = text.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "extracted image text via ocr"
        );
        Ok(text)
    }
}

/// Drops every page past `keep` from the PDF so downstream extraction only
/// scans the front of the document. Falls back to the untouched bytes when the
/// document cannot be re-assembled.
fn truncate_pdf_pages(bytes: &[u8], keep: u32) -> (Vec<u8>, u32) {
    let mut doc = match lopdf::Document::load_mem(bytes) {
        Ok(doc) => doc,
        Err(_) => return (bytes.to_vec(), 0),
    };

    let total = doc.get_pages().len() as u32;
    if total <= keep {
        return (bytes.to_vec(), total);
    }

    let surplus: Vec<u32> = ((keep + 1)..=total).collect();
    doc.delete_pages(&surplus);

    let mut out = Vec::new();
    if doc.save_to(&mut out).is_err() {
        return (bytes.to_vec(), total);
    }
    debug!(total, kept = keep, "truncated pdf for extraction");
    (out, keep)
}

/// Fixed deterministic transform applied before recognition: grayscale,
/// contrast normalization, sharpening, then a hard binarize. Photographed
/// bills recognize noticeably better after this pass.
fn preprocess_for_ocr(image: &image::DynamicImage) -> image::GrayImage {
    let gray = image.grayscale().adjust_contrast(24.0).unsharpen(1.2, 4);
    let mut luma = gray.to_luma8();
    for pixel in luma.pixels_mut() {
        pixel.0[0] = if pixel.0[0] > BINARIZE_THRESHOLD { 255 } else { 0 };
    }
    luma
}

fn run_ocr(image_path: &str, language: &str) -> Result<String> {
    let text = tesseract::Tesseract::new(None, Some(language))
        .map_err(|e| anyhow!("tesseract init: {e}"))?
        .set_image(image_path)
        .map_err(|e| anyhow!("tesseract image: {e}"))?
        .recognize()
        .map_err(|e| anyhow!("tesseract recognize: {e}"))?
        .get_text()
        .map_err(|e| anyhow!("ocr text: {e}"))?;
    Ok(text)
}
