//! Breadth-first crawl frontier, ordered by relevance within a depth level.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use url::Url;

use crate::scope::relevance_score;

/// A queued URL waiting to be claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FrontierEntry {
    pub url: Url,
    pub depth: u32,
}

/// Key order: depth asc, relevance desc, insertion asc.
type FrontierKey = (u32, Reverse<u32>, u64);

#[derive(Debug, Default)]
pub(crate) struct Frontier {
    entries: BTreeMap<FrontierKey, Url>,
    next_seq: u64,
}

impl Frontier {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue `url` at `depth` and return its insertion number.
    /// Deduplication is the caller's job.
    pub(crate) fn push(&mut self, url: Url, depth: u32) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let score = relevance_score(&url);
        self.entries.insert((depth, Reverse(score), seq), url);
        seq
    }

    /// Depth of the entry that would be claimed next.
    pub(crate) fn peek_depth(&self) -> Option<u32> {
        self.entries.keys().next().map(|(depth, _, _)| *depth)
    }

    pub(crate) fn pop(&mut self) -> Option<FrontierEntry> {
        self.entries
            .pop_first()
            .map(|((depth, _, _), url)| FrontierEntry { url, depth })
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(path: &str) -> Url {
        Url::parse(&format!("https://example.org{path}")).unwrap()
    }

    #[test]
    fn shallower_entries_come_first() {
        let mut frontier = Frontier::new();
        frontier.push(url("/transparency"), 2);
        frontier.push(url("/shop"), 1);

        assert_eq!(frontier.peek_depth(), Some(1));
        assert_eq!(frontier.pop().unwrap().url.path(), "/shop");
        assert_eq!(frontier.pop().unwrap().url.path(), "/transparency");
        assert_eq!(frontier.len(), 0);
    }

    #[test]
    fn relevant_paths_lead_within_a_level() {
        let mut frontier = Frontier::new();
        frontier.push(url("/shop"), 1);
        frontier.push(url("/events"), 1);
        frontier.push(url("/ueber-uns/impressum"), 1);
        frontier.push(url("/about"), 1);

        let order: Vec<String> = std::iter::from_fn(|| frontier.pop())
            .map(|e| e.url.path().to_string())
            .collect();
        assert_eq!(order, vec!["/ueber-uns/impressum", "/about", "/shop", "/events"]);
    }

    #[test]
    fn sequence_numbers_follow_insertion() {
        let mut frontier = Frontier::new();
        assert_eq!(frontier.push(url("/"), 0), 0);
        assert_eq!(frontier.push(url("/a"), 1), 1);
        assert_eq!(frontier.len(), 2);
    }
}
