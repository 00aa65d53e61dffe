//! Page-capped PDF text extraction.

use lopdf::Document;

/// Text pulled from a PDF, with how much of the document was scanned.
#[derive(Debug)]
pub struct PdfExtraction {
    /// Concatenated page text, pages joined by newlines.
    pub text: String,
    /// Total pages in the document.
    pub page_count: usize,
    /// Pages actually scanned (capped).
    pub pages_scanned: usize,
}

/// Extract text from the first `max_pages` pages of a PDF.
///
/// Unreadable documents and unreadable individual pages both surface as an
/// error string; the caller decides whether that means `unsupported`.
pub fn extract_pdf_text(bytes: &[u8], max_pages: usize) -> Result<PdfExtraction, String> {
    let document =
        Document::load_mem(bytes).map_err(|error| format!("failed to load pdf: {error}"))?;

    let pages = document.get_pages();
    let page_count = pages.len();
    let mut sections = Vec::new();
    for page_number in pages.keys().take(max_pages) {
        match document.extract_text(&[*page_number]) {
            Ok(text) => {
                let trimmed = text.trim().to_string();
                if !trimmed.is_empty() {
                    sections.push(trimmed);
                }
            }
            Err(error) => {
                tracing::debug!(page = page_number, %error, "failed to extract pdf page text");
            }
        }
    }

    Ok(PdfExtraction {
        text: sections.join("\n"),
        page_count,
        pages_scanned: page_count.min(max_pages),
    })
}

/// Estimate the page count of a PDF payload without extracting text.
///
/// Only PDFs get a page estimate; other document types report `None` and are
/// routed by the scheduler's no-estimate rule.
pub fn estimate_page_count(bytes: &[u8]) -> Option<usize> {
    Document::load_mem(bytes)
        .ok()
        .map(|document| document.get_pages().len())
}
