//! Bounded same-site crawling of organization websites.
//!
//! - [`engine`]: the crawler, retry handling and page records
//! - URL scope rules (same site, exclusions, SSRF) and relevance ranking

pub mod engine;
mod frontier;
mod scope;

pub use engine::{CrawlOutcome, Crawler};
pub use scope::{normalize_url, relevance_score};
