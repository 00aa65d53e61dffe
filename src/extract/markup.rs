//! Markup extraction: inline image OCR plus tag stripping.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use scraper::Html;

use super::ocr::OcrChain;

/// Pattern matching base64 image data-URIs embedded in markup.
fn data_uri_pattern() -> Regex {
    Regex::new(r"data:image/(?:png|jpe?g|webp|gif);base64,([A-Za-z0-9+/=]+)")
        .expect("data-URI pattern is valid")
}

/// Extract readable text from HTML markup.
///
/// Inline base64 images are OCR'd first (up to `max_images` of them) and
/// their recognized text appended to the document body, then all tags are
/// stripped. Undecodable data-URIs are skipped.
pub async fn extract_markup_text(markup: &str, ocr: &OcrChain, max_images: usize) -> String {
    let mut appended = Vec::new();
    for capture in data_uri_pattern().captures_iter(markup).take(max_images) {
        let Some(encoded) = capture.get(1) else {
            continue;
        };
        let Ok(image) = BASE64.decode(encoded.as_str()) else {
            tracing::debug!("skipping undecodable inline image data-URI");
            continue;
        };
        let result = ocr.recognize(&image).await;
        if !result.text.is_empty() {
            appended.push(result.text);
        }
    }

    let mut text = strip_tags(markup);
    for fragment in appended {
        text.push(' ');
        text.push_str(&fragment);
    }
    text
}

/// Strip tags from markup, keeping text node content.
pub fn strip_tags(markup: &str) -> String {
    let document = Html::parse_document(markup);
    document
        .root_element()
        .text()
        .map(str::trim)
        .filter(|fragment| !fragment.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
