//! Pattern matching: crawled pages → evidence candidates per criterion.
//!
//! Purely synchronous and deterministic. Ranking happens later, in the
//! adjudicator; this stage only locates every occurrence.

use std::collections::BTreeMap;

use openness_shared::{Catalog, Criterion, EvidenceCandidate, PageRecord, PatternKind};

/// Characters of context kept on each side of a text match.
pub const EXCERPT_RADIUS: usize = 100;

/// Candidates keyed by criterion id. Every catalog criterion has an entry.
pub type CandidateMap = BTreeMap<String, Vec<EvidenceCandidate>>;

/// Match every criterion of `catalog` against every ok page.
pub fn match_pages(catalog: &Catalog, pages: &[PageRecord]) -> CandidateMap {
    catalog
        .criteria()
        .map(|criterion| {
            let candidates = pages
                .iter()
                .filter(|page| page.is_ok())
                .flat_map(|page| match_page(criterion, page))
                .collect();
            (criterion.id.clone(), candidates)
        })
        .collect()
}

/// All candidates of one criterion on one page: text matches in offset
/// order per pattern, then URL matches on the page itself, then on the
/// pages it links to.
pub fn match_page(criterion: &Criterion, page: &PageRecord) -> Vec<EvidenceCandidate> {
    let mut out = Vec::new();
    let Some(text) = page.text.as_deref() else {
        return out;
    };

    for pattern in &criterion.text_patterns {
        let needle = normalize_pattern(pattern);
        if needle.is_empty() {
            continue;
        }
        for (offset, matched) in text.match_indices(needle.as_str()) {
            out.push(EvidenceCandidate {
                criterion_id: criterion.id.clone(),
                source_url: page.url.clone(),
                pattern: pattern.clone(),
                excerpt: excerpt(text, offset, offset + matched.len()),
                kind: PatternKind::Text,
                page_depth: page.depth,
                offset,
            });
        }
    }

    // Offset 0 is the page URL; a link at index i gets offset i + 1.
    let targets = std::iter::once(page.url.as_str())
        .chain(page.links.iter().map(String::as_str).filter(|l| *l != page.url));
    for (offset, target) in targets.enumerate() {
        let lowered = target.to_lowercase();
        for pattern in &criterion.url_patterns {
            let needle = pattern.trim().to_lowercase();
            if !needle.is_empty() && lowered.contains(&needle) {
                out.push(EvidenceCandidate {
                    criterion_id: criterion.id.clone(),
                    source_url: page.url.clone(),
                    pattern: pattern.clone(),
                    excerpt: target.to_string(),
                    kind: PatternKind::Url,
                    page_depth: page.depth,
                    offset,
                });
            }
        }
    }

    out
}

/// Patterns are compared the way page text is stored: lowercase, single-spaced.
fn normalize_pattern(pattern: &str) -> String {
    pattern
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Up to [`EXCERPT_RADIUS`] chars either side of `text[start..end]`.
fn excerpt(text: &str, start: usize, end: usize) -> String {
    let from = text[..start]
        .char_indices()
        .rev()
        .take(EXCERPT_RADIUS)
        .last()
        .map_or(start, |(i, _)| i);
    let to = text[end..]
        .char_indices()
        .nth(EXCERPT_RADIUS)
        .map_or(text.len(), |(i, _)| end + i);
    text[from..to].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use openness_shared::{CatalogMetadata, CriterionType, Dimension, Factor, FetchStatus};

    fn criterion(id: &str, text: &[&str], url: &[&str]) -> Criterion {
        Criterion {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            kind: CriterionType::Operational,
            text_patterns: text.iter().map(|s| s.to_string()).collect(),
            url_patterns: url.iter().map(|s| s.to_string()).collect(),
            weight: 1.0,
            confidence_threshold: None,
            dimension_id: "d".into(),
            factor_id: "f".into(),
        }
    }

    fn catalog(criteria: Vec<Criterion>) -> Catalog {
        Catalog {
            metadata: CatalogMetadata {
                name: "t".into(),
                description: String::new(),
                version: "1".into(),
                organization_type: "research".into(),
            },
            dimensions: vec![Dimension {
                id: "d".into(),
                name: "D".into(),
                description: String::new(),
                factors: vec![Factor {
                    id: "f".into(),
                    name: "F".into(),
                    description: String::new(),
                    criteria,
                }],
            }],
            fingerprint: String::new(),
        }
    }

    fn page(url: &str, text: &str) -> PageRecord {
        PageRecord::ok(url, 1, text.to_string(), None)
    }

    #[test]
    fn finds_every_occurrence_case_insensitively() {
        let c = criterion("oa", &["Open Access  Policy"], &[]);
        let p = page(
            "https://a.example/x",
            "our open access policy is new. the open access policy applies.",
        );
        let found = match_page(&c, &p);

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].offset, 4);
        assert!(found[0].offset < found[1].offset);
        assert_eq!(found[0].pattern, "Open Access  Policy");
        assert_eq!(found[0].kind, PatternKind::Text);
    }

    #[test]
    fn excerpt_is_bounded_and_char_safe() {
        let prefix = "ä".repeat(150);
        let suffix = "ü".repeat(150);
        let text = format!("{prefix} jahresbericht {suffix}");
        let c = criterion("ar", &["jahresbericht"], &[]);
        let found = match_page(&c, &page("https://a.example/", &text));

        assert_eq!(found.len(), 1);
        let ex = &found[0].excerpt;
        assert!(ex.contains("jahresbericht"));
        assert!(ex.chars().count() <= 2 * EXCERPT_RADIUS + "jahresbericht".len());
        assert!(ex.starts_with('ä'));
        assert!(ex.ends_with('ü'));
    }

    #[test]
    fn url_patterns_match_the_page_url() {
        let c = criterion("oa", &[], &["/Open-Access"]);
        let found = match_page(&c, &page("https://a.example/open-access/", "nothing here"));

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, PatternKind::Url);
        assert_eq!(found[0].excerpt, "https://a.example/open-access/");
    }

    #[test]
    fn url_patterns_match_linked_documents() {
        let c = criterion("ar", &[], &["/Jahresbericht"]);
        let mut p = page("https://a.example/ueber-uns", "wir stellen uns vor");
        p.links = vec![
            "https://a.example/ueber-uns".into(),
            "https://a.example/kontakt".into(),
            "https://a.example/files/jahresbericht-2024.pdf".into(),
        ];
        let found = match_page(&c, &p);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, PatternKind::Url);
        assert_eq!(found[0].source_url, "https://a.example/ueber-uns");
        assert_eq!(found[0].excerpt, "https://a.example/files/jahresbericht-2024.pdf");
        assert_eq!(found[0].offset, 2);
    }

    #[test]
    fn every_criterion_is_present_and_failed_pages_are_ignored() {
        let cat = catalog(vec![
            criterion("oa", &["open access"], &[]),
            criterion("ar", &["annual report"], &[]),
        ]);
        let failed = PageRecord::failed("https://a.example/y", 1, FetchStatus::Timeout, "slow");
        let pages = vec![page("https://a.example/", "open access for all"), failed];

        let map = match_pages(&cat, &pages);
        assert_eq!(map.len(), 2);
        assert_eq!(map["oa"].len(), 1);
        assert!(map["ar"].is_empty());
    }

    #[test]
    fn matching_is_idempotent() {
        let cat = catalog(vec![criterion("oa", &["open"], &["about"])]);
        let pages = vec![
            page("https://a.example/about", "open data, open access"),
            page("https://a.example/", "closed"),
        ];
        assert_eq!(match_pages(&cat, &pages), match_pages(&cat, &pages));
    }
}
