//! Document type classification and type-dispatched text extraction.

pub mod markup;
pub mod ocr;
pub mod pdf;

use thiserror::Error;

use crate::processing::types::{ExtractionInfo, ExtractionMethod, UnsupportedReason};
use ocr::OcrChain;

/// Closed set of document types the pipeline recognizes.
///
/// Resolved once from the filename extension; every downstream stage matches
/// on this exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentInput {
    /// Raster image handled by OCR.
    Image,
    /// PDF handled by page-capped text extraction.
    Pdf,
    /// Plain text read directly from the bytes.
    Text,
    /// HTML markup, stripped of tags with inline images OCR'd.
    Markup,
    /// Audio, recognized but not processable.
    Audio,
    /// Extension outside the known set.
    Unknown {
        /// The unrecognized extension, lowercased.
        extension: String,
    },
}

/// Classify a filename into a [`DocumentInput`] by its extension.
pub fn classify(filename: &str) -> DocumentInput {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" | "jpg" | "jpeg" | "webp" => DocumentInput::Image,
        "pdf" => DocumentInput::Pdf,
        "txt" | "md" | "json" | "yaml" | "yml" => DocumentInput::Text,
        "html" | "htm" => DocumentInput::Markup,
        "wav" | "mp3" | "m4a" => DocumentInput::Audio,
        _ => DocumentInput::Unknown { extension },
    }
}

/// Errors raised during text extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The document type can never be processed.
    #[error("{0}")]
    Unsupported(UnsupportedReason),
}

/// Extracted text with provenance.
#[derive(Debug)]
pub struct Extraction {
    /// The extracted text.
    pub text: String,
    /// Method and confidence of the producing engine.
    pub info: ExtractionInfo,
}

/// Type-dispatched extractor over the configured engines.
pub struct Extractor {
    ocr: OcrChain,
    max_pdf_pages: usize,
    max_inline_image_ocr: usize,
}

impl Extractor {
    /// Build an extractor from an OCR chain and the extraction caps.
    pub fn new(ocr: OcrChain, max_pdf_pages: usize, max_inline_image_ocr: usize) -> Self {
        Self {
            ocr,
            max_pdf_pages,
            max_inline_image_ocr,
        }
    }

    /// Extract text from the document according to its classified type.
    ///
    /// `Unsupported` is the only error; engine-level OCR failures are
    /// downgraded to inline error text by the chain and do not surface here.
    pub async fn extract(
        &self,
        input: &DocumentInput,
        bytes: &[u8],
    ) -> Result<Extraction, ExtractError> {
        match input {
            DocumentInput::Image => {
                let result = self.ocr.recognize(bytes).await;
                Ok(Extraction {
                    text: result.text,
                    info: ExtractionInfo {
                        method: result.method,
                        confidence: result.confidence,
                    },
                })
            }
            DocumentInput::Pdf => {
                let extraction = pdf::extract_pdf_text(bytes, self.max_pdf_pages).map_err(
                    |detail| ExtractError::Unsupported(UnsupportedReason::EmptyPdfText { detail }),
                )?;
                if extraction.text.is_empty() {
                    return Err(ExtractError::Unsupported(UnsupportedReason::EmptyPdfText {
                        detail: format!(
                            "no text in the first {} of {} pages",
                            extraction.pages_scanned, extraction.page_count
                        ),
                    }));
                }
                tracing::debug!(
                    pages = extraction.page_count,
                    scanned = extraction.pages_scanned,
                    "extracted pdf text"
                );
                Ok(Extraction {
                    text: extraction.text,
                    info: ExtractionInfo {
                        method: ExtractionMethod::PdfText,
                        confidence: 1.0,
                    },
                })
            }
            DocumentInput::Text => Ok(Extraction {
                text: String::from_utf8_lossy(bytes).into_owned(),
                info: ExtractionInfo {
                    method: ExtractionMethod::TextFile,
                    confidence: 1.0,
                },
            }),
            DocumentInput::Markup => {
                let source = String::from_utf8_lossy(bytes);
                let text =
                    markup::extract_markup_text(&source, &self.ocr, self.max_inline_image_ocr)
                        .await;
                Ok(Extraction {
                    text,
                    info: ExtractionInfo {
                        method: ExtractionMethod::Markup,
                        confidence: 1.0,
                    },
                })
            }
            DocumentInput::Audio => {
                Err(ExtractError::Unsupported(UnsupportedReason::Audio))
            }
            DocumentInput::Unknown { extension } => Err(ExtractError::Unsupported(
                UnsupportedReason::UnknownType {
                    extension: extension.clone(),
                },
            )),
        }
    }
}
