//! Text normalization passes.
//!
//! Each pass is a function `&str -> String` applied in sequence.

use std::sync::LazyLock;

use regex::Regex;

/// Normalize extracted page text for matching.
pub(crate) fn run_pipeline(text: &str) -> String {
    let mut result = strip_soft_hyphens(text);
    result = collapse_whitespace(&result);
    result = result.to_lowercase();
    result
}

/// Normalize a title for display (no lowercasing).
pub(crate) fn clean_title(title: &str) -> Option<String> {
    let cleaned = collapse_whitespace(&strip_soft_hyphens(title));
    (!cleaned.is_empty()).then_some(cleaned)
}

// ---------------------------------------------------------------------------
// Pass 1: Soft hyphens
// ---------------------------------------------------------------------------

/// Remove soft hyphens, which only mark optional line-break points.
fn strip_soft_hyphens(text: &str) -> String {
    text.replace('\u{00AD}', "")
}

// ---------------------------------------------------------------------------
// Pass 2: Whitespace
// ---------------------------------------------------------------------------

/// Collapse any run of whitespace to a single space and trim the ends.
///
/// Unicode whitespace (NBSP included) is covered by `\s`. Zero-width
/// characters are not whitespace to Unicode, so they are listed explicitly.
fn collapse_whitespace(text: &str) -> String {
    static WS_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"[\s\u{200B}\u{200C}\u{200D}\u{2060}\u{FEFF}]+").expect("valid regex")
    });

    WS_RE.replace_all(text, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_all_kinds_of_whitespace() {
        let input = "  Open\u{00A0}\u{00A0}Access\t\n Policy\u{200B}now  ";
        assert_eq!(collapse_whitespace(input), "Open Access Policy now");
    }

    #[test]
    fn pipeline_lowercases_and_removes_soft_hyphens() {
        assert_eq!(run_pipeline("Jahres\u{00AD}Bericht  2024"), "jahresbericht 2024");
    }

    #[test]
    fn pipeline_is_idempotent() {
        let once = run_pipeline("  ÜBER   uns\u{2060} ");
        assert_eq!(run_pipeline(&once), once);
        assert_eq!(once, "über uns");
    }

    #[test]
    fn empty_title_is_none() {
        assert_eq!(clean_title(" \n\t "), None);
        assert_eq!(clean_title(" Home |  Example "), Some("Home | Example".into()));
    }
}
