//! Text extraction from fetched content.
//!
//! Extraction is deterministic: the same bytes always produce the same
//! text or the same error, so extraction failures are never retried.
//!
//! | Source kind | Input | Parser |
//! |-------------|-------|--------|
//! | `url` | HTML page, plain text, or a linked PDF | `scraper` / UTF-8 / `pdf-extract` |
//! | `pdf` | PDF document | `pdf-extract` |
//! | `youtube` | timedtext caption XML | `quick-xml` |

use quick_xml::events::Event;
use scraper::{Html, Node, Selector};

use finsight_core::content::{fingerprint, normalize_text};
use finsight_core::error::ExtractError;
use finsight_core::models::SourceKind;

use crate::fetch::pdf::{has_pdf_header, MIME_PDF};
use crate::fetch::RawContent;

/// Normalized text plus metadata from one extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedContent {
    pub text: String,
    pub title: Option<String>,
    pub fingerprint: String,
}

/// Converts raw fetched bytes into normalized text.
///
/// Called on the blocking thread pool.
pub trait ContentExtractor: Send + Sync {
    fn extract(&self, raw: &RawContent) -> Result<ExtractedContent, ExtractError>;
}

/// Dispatches on source kind, then on content type for web pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct KindExtractor;

impl ContentExtractor for KindExtractor {
    fn extract(&self, raw: &RawContent) -> Result<ExtractedContent, ExtractError> {
        let (text, title) = match raw.kind {
            SourceKind::Pdf => (extract_pdf(&raw.bytes)?, None),
            SourceKind::Youtube => (extract_captions(&raw.bytes)?, None),
            SourceKind::Url => extract_web(raw)?,
        };

        let text = normalize_text(&text);
        if text.is_empty() {
            return Err(ExtractError::EmptyContent);
        }
        let title = title.map(|t| normalize_text(&t).replace('\n', " ")).filter(|t| !t.is_empty());

        Ok(ExtractedContent {
            fingerprint: fingerprint(&text),
            text,
            title,
        })
    }
}

fn extract_web(raw: &RawContent) -> Result<(String, Option<String>), ExtractError> {
    match raw.content_type.as_deref() {
        Some("text/html") | Some("application/xhtml+xml") => {
            Ok(extract_html(&String::from_utf8_lossy(&raw.bytes)))
        }
        Some(MIME_PDF) => Ok((extract_pdf(&raw.bytes)?, None)),
        Some(ct) if ct.starts_with("text/") => Ok((extract_plain(&raw.bytes)?, None)),
        Some(ct) => Err(ExtractError::UnsupportedContentType(ct.to_string())),
        None => sniff(&raw.bytes),
    }
}

/// Best guess for a response that carried no content type.
fn sniff(bytes: &[u8]) -> Result<(String, Option<String>), ExtractError> {
    if has_pdf_header(bytes) {
        return Ok((extract_pdf(bytes)?, None));
    }
    let text = extract_plain(bytes)?;
    let head = text.trim_start().get(..512).unwrap_or(text.trim_start());
    let head = head.to_ascii_lowercase();
    if head.starts_with("<!doctype html") || head.contains("<html") {
        Ok(extract_html(&text))
    } else {
        Ok((text, None))
    }
}

fn extract_plain(bytes: &[u8]) -> Result<String, ExtractError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| ExtractError::Encoding)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

const SKIPPED_ELEMENTS: &[&str] = &["head", "script", "style", "noscript", "template", "svg"];

const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li",
    "main", "nav", "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

/// Visible text of an HTML document and its `<title>`.
fn extract_html(html: &str) -> (String, Option<String>) {
    let document = Html::parse_document(html);

    let title = Selector::parse("title").ok().and_then(|sel| {
        document
            .select(&sel)
            .next()
            .map(|el| el.text().collect::<String>())
    });

    let mut out = String::new();
    for node in document.tree.root().descendants() {
        match node.value() {
            Node::Element(el) if BLOCK_ELEMENTS.contains(&el.name()) => out.push('\n'),
            Node::Text(text) => {
                let hidden = node.ancestors().any(|a| {
                    a.value()
                        .as_element()
                        .map(|el| SKIPPED_ELEMENTS.contains(&el.name()))
                        .unwrap_or(false)
                });
                if !hidden {
                    out.push_str(text);
                    out.push(' ');
                }
            }
            _ => {}
        }
    }

    (out, title)
}

/// Cue text from timedtext XML. Accepts the classic `<text>` format and the
/// `<p>` cues of format 3.
fn extract_captions(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut out = String::new();
    let mut buf = Vec::new();
    let mut depth_in_cue = 0usize;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                if depth_in_cue > 0 {
                    out.push(' ');
                    depth_in_cue += 1;
                } else if name.as_ref() == b"text" || name.as_ref() == b"p" {
                    depth_in_cue = 1;
                }
            }
            Ok(Event::End(_)) if depth_in_cue > 0 => {
                depth_in_cue -= 1;
                if depth_in_cue == 0 {
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            Ok(Event::Text(te)) if depth_in_cue > 0 => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Captions(e.to_string()))?;
                // Caption bodies are often escaped twice (`&amp;#39;`).
                let text = quick_xml::escape::unescape(&text)
                    .map(|t| t.into_owned())
                    .unwrap_or_else(|_| text.to_string());
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Captions(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
