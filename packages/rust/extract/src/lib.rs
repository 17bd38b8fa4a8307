//! Evidence extraction: raw fetched content → normalized plain text.
//!
//! HTML is parsed with `scraper`; script-like subtrees are dropped and the
//! remaining text is run through the cleanup passes in [`cleanup`]. The
//! result is lowercase, single-spaced text suitable for substring matching.

mod cleanup;

use std::borrow::Cow;
use std::sync::LazyLock;

use encoding_rs::{Encoding, UTF_8};
use regex::bytes::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, instrument};

use openness_shared::{OpennessError, Result};

/// Subtrees whose text never counts as page content.
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "head", "iframe", "object",
];

/// Elements that imply a word break around their content.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li",
    "main", "nav", "ol", "option", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

/// Only the start of a document is searched for a `<meta charset>`.
const META_SNIFF_BYTES: usize = 1024;

static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));

static META_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i-u)<meta[^>]+charset\s*=\s*["']?([a-z0-9_:.\-]+)"#).expect("valid regex")
});

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Normalized content of one page.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    /// Lowercase text with whitespace collapsed to single spaces.
    pub text: String,
    /// `<title>` as written (whitespace collapsed), if present.
    pub title: Option<String>,
    pub word_count: usize,
}

/// How a response body should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    PlainText,
}

impl ContentKind {
    /// Classify a `Content-Type` header. A missing header is treated as HTML.
    pub fn from_content_type(content_type: Option<&str>) -> Option<Self> {
        let Some(raw) = content_type else {
            return Some(Self::Html);
        };
        let mime = raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match mime.as_str() {
            "" | "text/html" | "application/xhtml+xml" => Some(Self::Html),
            "text/plain" => Some(Self::PlainText),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract text from a raw response body.
///
/// The body is decoded with the charset from the `Content-Type` header or,
/// for HTML, a `<meta charset>` near the top. Without a declared charset it
/// must be UTF-8.
///
/// Returns [`OpennessError::Parse`] for unsupported content types or
/// undeclared bodies that are not valid UTF-8. The crawler records that as
/// `parse-error`.
#[instrument(skip(body), fields(bytes = body.len()))]
pub fn extract(body: &[u8], content_type: Option<&str>) -> Result<Extracted> {
    let kind = ContentKind::from_content_type(content_type).ok_or_else(|| {
        OpennessError::parse(format!(
            "unsupported content type '{}'",
            content_type.unwrap_or_default()
        ))
    })?;

    let source = decode_body(body, content_type, kind)?;

    let extracted = match kind {
        ContentKind::Html => extract_html(&source),
        ContentKind::PlainText => extract_plain(&source),
    };
    debug!(?kind, words = extracted.word_count, "content extracted");
    Ok(extracted)
}

/// Body bytes as text, honouring a declared charset.
pub fn decode_body<'a>(
    body: &'a [u8],
    content_type: Option<&str>,
    kind: ContentKind,
) -> Result<Cow<'a, str>> {
    let declared = content_type.and_then(header_charset).or_else(|| match kind {
        ContentKind::Html => meta_charset(body),
        ContentKind::PlainText => None,
    });

    match declared {
        Some(encoding) if encoding != UTF_8 => {
            let (text, used, had_errors) = encoding.decode(body);
            if had_errors {
                debug!(encoding = used.name(), "undecodable bytes replaced");
            }
            Ok(text)
        }
        _ => {
            let body = body.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(body);
            std::str::from_utf8(body)
                .map(Cow::Borrowed)
                .map_err(|e| OpennessError::parse(format!("body is not valid UTF-8: {e}")))
        }
    }
}

/// `charset=` parameter of a `Content-Type` header.
fn header_charset(content_type: &str) -> Option<&'static Encoding> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        Encoding::for_label(value.trim().trim_matches(|c: char| c == '"' || c == '\'').as_bytes())
    })
}

fn meta_charset(body: &[u8]) -> Option<&'static Encoding> {
    let head = &body[..body.len().min(META_SNIFF_BYTES)];
    let label = META_CHARSET.captures(head)?.get(1)?;
    Encoding::for_label(label.as_bytes())
}

/// Extract text and title from an HTML document.
pub fn extract_html(html: &str) -> Extracted {
    let doc = Html::parse_document(html);

    let title = doc
        .select(&TITLE_SEL)
        .next()
        .and_then(|t| cleanup::clean_title(&t.text().collect::<String>()));

    let mut raw = String::with_capacity(html.len() / 2);
    collect_text(doc.root_element(), &mut raw);

    finish(&raw, title)
}

/// Plain text bodies only need normalization.
pub fn extract_plain(text: &str) -> Extracted {
    finish(text, None)
}

fn finish(raw: &str, title: Option<String>) -> Extracted {
    let text = cleanup::run_pipeline(raw);
    let word_count = if text.is_empty() {
        0
    } else {
        text.split(' ').count()
    };
    Extracted {
        text,
        title,
        word_count,
    }
}

/// Depth-first text collection that skips non-content subtrees.
fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if SKIPPED_TAGS.contains(&name) {
                    continue;
                }
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                let block = BLOCK_TAGS.contains(&name);
                if block {
                    out.push(' ');
                }
                collect_text(child_el, out);
                if block {
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
