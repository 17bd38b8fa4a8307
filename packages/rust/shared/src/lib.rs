//! Shared types, error model, and configuration for the openness crawler.
//!
//! This crate is the foundation depended on by all other openness crates.
//! It provides:
//! - [`OpennessError`], the unified error type
//! - The criteria [`Catalog`] model
//! - Domain types ([`Organization`], [`PageRecord`], [`CriterionResult`], summaries)
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)
//! - [`RetryPolicy`], shared by the crawler and the adjudicator

pub mod catalog;
pub mod config;
pub mod error;
pub mod retry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use catalog::{
    Catalog, CatalogInfo, CatalogMetadata, Criterion, CriterionType, Dimension, Factor,
};
pub use config::{
    AppConfig, BackoffSection, CrawlConfig, CrawlSection, EvaluationSection, LlmConfig,
    LlmSection, RosterSection, RunConfig, RunSection, USER_AGENT, config_dir, config_file_path,
    init_config, load_config, load_config_from, parse_delimiter, validate_api_key,
};
pub use error::{OpennessError, Result};
pub use retry::RetryPolicy;
pub use types::{
    ConfidenceBands, CriterionResult, CriterionSummary, DecisionOrigin, DimensionRate,
    DimensionSummary, EvidenceCandidate, FactorSummary, FetchStatus, OrgId, Organization,
    OrganizationEvaluation, OrganizationRate, OrganizationSummary, PageRecord, PatternKind,
    RunId, RunReport, RunSummary, TypeFulfillment, ValidationIssue,
};
