use lopdf::Document;
use tracing::{info, warn};

#[derive(Debug)]
pub enum PdfContent {
    Text(String),
    /// Image-only pages; needs a vision model or OCR.
    ScannedImage,
    /// Not a PDF, or not one lopdf can load.
    Invalid(String),
    /// A loadable PDF whose text could not be extracted.
    ExtractionFailed(String),
}

/// Below this many non-whitespace characters the PDF is treated as scanned.
const MIN_TEXT_CHARS: usize = 30;

pub fn extract_text_from_pdf(pdf_bytes: &[u8]) -> PdfContent {
    if !pdf_bytes.starts_with(b"%PDF") {
        return PdfContent::Invalid("Uploaded file is not a PDF".to_string());
    }

    let doc = match Document::load_mem(pdf_bytes) {
        Ok(d) => d,
        Err(e) => return PdfContent::Invalid(format!("Failed to parse PDF: {e}")),
    };

    if looks_like_scanned(&doc) {
        info!("PDF structural check: likely scanned / image-only");
        return PdfContent::ScannedImage;
    }

    // pdf-extract panics on some fonts and glyph tables
    let extracted = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(pdf_bytes)
    }));

    match extracted {
        Ok(Ok(text)) => {
            let meaningful = text.chars().filter(|c| !c.is_whitespace()).count();
            if meaningful < MIN_TEXT_CHARS {
                info!(chars = meaningful, "Extracted text too short, treating as scanned");
                PdfContent::ScannedImage
            } else {
                info!(chars = meaningful, pages = doc.get_pages().len(), "Text extracted");
                PdfContent::Text(text)
            }
        }
        Ok(Err(e)) => {
            warn!(error = %e, "pdf-extract failed");
            PdfContent::ExtractionFailed(format!("Failed to extract text: {e}"))
        }
        Err(_) => {
            warn!("pdf-extract panicked");
            PdfContent::ExtractionFailed("PDF text extraction panicked".to_string())
        }
    }
}

/// A page with image XObjects but no fonts is a scan. The document counts as
/// scanned when at least 80% of its pages are.
fn looks_like_scanned(doc: &Document) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false;
    }

    let mut image_only_pages = 0;
    for object_id in pages.values() {
        let Ok(page_dict) = doc.get_object(*object_id).and_then(|o| o.as_dict()) else {
            continue;
        };

        let resources = page_dict
            .get(b"Resources")
            .ok()
            .and_then(|r| doc.dereference(r).ok())
            .and_then(|(_, resolved)| resolved.as_dict().ok());

        let has_entries = |key: &[u8]| {
            resources
                .and_then(|res| res.get(key).ok())
                .and_then(|f| doc.dereference(f).ok())
                .and_then(|(_, resolved)| resolved.as_dict().ok())
                .is_some_and(|d| !d.is_empty())
        };

        if has_entries(b"XObject") && !has_entries(b"Font") {
            image_only_pages += 1;
        }
    }

    let ratio = image_only_pages as f64 / pages.len() as f64;
    info!(total_pages = pages.len(), image_only = image_only_pages, "Scanned-page analysis");
    ratio >= 0.8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_bytes() {
        let result = extract_text_from_pdf(b"this is not a pdf");
        assert!(matches!(result, PdfContent::Invalid(_)));
    }
}
