//! Document intake.
//!
//! Everything here runs on the submitting thread before a job exists, so a
//! rejected document never reaches the queue.

use std::io::Cursor;

use sha2::{Digest, Sha256};

use crate::config::IntakeConfig;
use crate::document::DocumentFormat;
use crate::error::IntakeError;

/// What intake learned about a document's bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Inspection {
    pub content_hash: String,
    pub format: DocumentFormat,
    pub page_count: u32,
    pub mime_type: String,
    pub size: usize,
}

/// Lowercase hex SHA-256 of the content. Duplicate submissions are detected
/// by this value.
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Identifies the format from leading magic bytes.
pub fn sniff_format(content: &[u8]) -> Option<DocumentFormat> {
    if content.starts_with(b"%PDF-") {
        return Some(DocumentFormat::Pdf);
    }
    match image::guess_format(content).ok()? {
        image::ImageFormat::Png => Some(DocumentFormat::Png),
        image::ImageFormat::Jpeg => Some(DocumentFormat::Jpeg),
        image::ImageFormat::Tiff => Some(DocumentFormat::Tiff),
        image::ImageFormat::Gif => Some(DocumentFormat::Gif),
        image::ImageFormat::Bmp => Some(DocumentFormat::Bmp),
        image::ImageFormat::WebP => Some(DocumentFormat::Webp),
        _ => None,
    }
}

fn extension(format: DocumentFormat) -> &'static str {
    match format {
        DocumentFormat::Pdf => "pdf",
        DocumentFormat::Png => "png",
        DocumentFormat::Jpeg => "jpg",
        DocumentFormat::Tiff => "tiff",
        DocumentFormat::Gif => "gif",
        DocumentFormat::Bmp => "bmp",
        DocumentFormat::Webp => "webp",
    }
}

/// Content type for a format, used when the submitter supplies none.
pub fn mime_for(format: DocumentFormat) -> String {
    mime_guess::from_ext(extension(format))
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

fn pdf_page_count(content: &[u8]) -> Result<u32, IntakeError> {
    let doc = lopdf::Document::load_mem(content)
        .map_err(|e| IntakeError::MalformedPdf(e.to_string()))?;
    let pages = doc.get_pages().len() as u32;
    if pages == 0 {
        return Err(IntakeError::MalformedPdf("document has no pages".to_string()));
    }
    Ok(pages)
}

fn check_image_header(content: &[u8]) -> Result<(), IntakeError> {
    let (width, height) = image::ImageReader::new(Cursor::new(content))
        .with_guessed_format()
        .map_err(|e| IntakeError::MalformedImage(e.to_string()))?
        .into_dimensions()
        .map_err(|e| IntakeError::MalformedImage(e.to_string()))?;
    if width == 0 || height == 0 {
        return Err(IntakeError::MalformedImage(format!(
            "image has no area ({}x{})",
            width, height
        )));
    }
    Ok(())
}

/// Validates submitted bytes and derives the document's identity.
///
/// `declared_pages` is checked against what the content actually holds when
/// the submitter supplies it.
pub fn inspect(
    content: &[u8],
    declared_pages: Option<u32>,
    config: &IntakeConfig,
) -> Result<Inspection, IntakeError> {
    let _span = tracing::debug_span!("intake.inspect", size = content.len()).entered();

    if content.is_empty() {
        return Err(IntakeError::Empty);
    }
    if content.len() > config.max_bytes {
        return Err(IntakeError::TooLarge {
            size: content.len(),
            limit: config.max_bytes,
        });
    }

    let format = sniff_format(content).ok_or_else(|| {
        let head: Vec<String> = content.iter().take(4).map(|b| format!("{:02x}", b)).collect();
        IntakeError::UnsupportedFormat(format!("unrecognised signature {}", head.join(" ")))
    })?;
    if !config.allowed_formats.contains(&format) {
        return Err(IntakeError::FormatNotAllowed(format));
    }

    let page_count = if format == DocumentFormat::Pdf {
        pdf_page_count(content)?
    } else {
        check_image_header(content)?;
        1
    };
    if page_count > config.max_pages {
        return Err(IntakeError::TooManyPages {
            pages: page_count,
            limit: config.max_pages,
        });
    }
    if let Some(declared) = declared_pages {
        if declared != page_count {
            return Err(IntakeError::PageCountMismatch {
                declared,
                detected: page_count,
            });
        }
    }

    Ok(Inspection {
        content_hash: content_hash(content),
        format,
        page_count,
        mime_type: mime_for(format),
        size: content.len(),
    })
}
