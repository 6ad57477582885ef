//! Local Tesseract provider.
//!
//! Reads image documents and maps `label: value` lines onto the requested
//! form schema. A line labelled `code` (or starting with `E14`) is taken as
//! the table code. Intended for offline runs against clean printed forms.

use std::io::Cursor;

use super::{OcrProvider, OcrRequest, ProviderError, ProviderOutput, RawCell};

pub struct TesseractProvider {
    languages: String,
}

impl TesseractProvider {
    pub const NAME: &'static str = "tesseract";

    pub fn new(languages: &[String]) -> Self {
        let languages = if languages.is_empty() {
            "spa".to_string()
        } else {
            languages.join("+")
        };
        Self { languages }
    }

    fn read_text(&self, image_data: &[u8]) -> Result<(String, f64), ProviderError> {
        let _span = tracing::info_span!("provider.tesseract").entered();

        let img = image::load_from_memory(image_data)
            .map_err(|e| ProviderError::MalformedInput(format!("failed to load image: {}", e)))?;

        let mut png_data = Vec::new();
        img.write_to(&mut Cursor::new(&mut png_data), image::ImageFormat::Png)
            .map_err(|e| ProviderError::MalformedInput(format!("failed to convert image: {}", e)))?;

        let mut lt = leptess::LepTess::new(None, &self.languages).map_err(|e| {
            ProviderError::Connection(format!("failed to initialise Tesseract: {}", e))
        })?;
        lt.set_image_from_mem(&png_data)
            .map_err(|e| ProviderError::MalformedInput(format!("failed to set image: {}", e)))?;

        let text = lt
            .get_utf8_text()
            .map_err(|e| ProviderError::InvalidResponse(format!("OCR failed: {}", e)))?;
        let confidence = (lt.mean_text_conf().clamp(0, 100) as f64) / 100.0;

        Ok((text, confidence))
    }
}

/// Splits recognised text into schema cells and an optional table code.
pub(crate) fn parse_lines(
    text: &str,
    request: &OcrRequest,
    confidence: f64,
) -> (Vec<RawCell>, Option<String>) {
    let mut cells = Vec::new();
    let mut code = None;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let upper = line.to_ascii_uppercase();
        if upper.starts_with("E14") || upper.starts_with("E-14") {
            code = Some(line.to_string());
            continue;
        }
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        if label.trim().eq_ignore_ascii_case("code") {
            code = Some(value.trim().to_string());
            continue;
        }
        if let Some(key) = request.schema.key_for_label(label) {
            cells.push(RawCell {
                key: key.to_string(),
                page: 1,
                text: value.trim().to_string(),
                confidence,
                alternatives: Vec::new(),
            });
        }
    }

    (cells, code)
}

impl OcrProvider for TesseractProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn extract(&self, request: &OcrRequest) -> Result<ProviderOutput, ProviderError> {
        if !request.format.is_image() {
            return Err(ProviderError::UnsupportedFormat(format!(
                "{} (tesseract reads images only)",
                request.format
            )));
        }

        let (text, confidence) = self.read_text(&request.content)?;
        let (cells, code) = parse_lines(&text, request, confidence);

        Ok(ProviderOutput {
            provider: Self::NAME.to_string(),
            provider_confidence: confidence,
            cells,
            code,
        })
    }
}
