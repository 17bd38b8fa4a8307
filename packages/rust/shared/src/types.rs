//! Core domain types flowing through the evaluation pipeline.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::CatalogInfo;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for run identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Organization
// ---------------------------------------------------------------------------

/// Roster position (0-based). Final results are sorted by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgId(pub usize);

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One roster entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrgId,
    pub name: String,
    pub base_url: String,
    /// Set by the roster loader when the URL looks malformed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_issue: Option<String>,
}

/// A skipped or suspicious input entry, reported but never fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Where the problem is (`row 4`, `criterion open_data`, ...).
    pub location: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

// ---------------------------------------------------------------------------
// PageRecord
// ---------------------------------------------------------------------------

/// Outcome of fetching one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchStatus {
    Ok,
    Timeout,
    HttpError,
    ParseError,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Timeout => "timeout",
            Self::HttpError => "http-error",
            Self::ParseError => "parse-error",
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fetched (or failed) page. `text` and `title` are only set when ok.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub depth: u32,
    pub status: FetchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Requests spent on this page, retries included.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Distinct absolute link targets found on the page, in document order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
}

impl PageRecord {
    pub fn ok(url: impl Into<String>, depth: u32, text: String, title: Option<String>) -> Self {
        Self {
            url: url.into(),
            depth,
            status: FetchStatus::Ok,
            http_status: Some(200),
            error: None,
            attempts: 1,
            text: Some(text),
            title,
            links: Vec::new(),
        }
    }

    pub fn failed(
        url: impl Into<String>,
        depth: u32,
        status: FetchStatus,
        error: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            depth,
            status,
            http_status: None,
            error: Some(error.into()),
            attempts: 1,
            text: None,
            title: None,
            links: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == FetchStatus::Ok
    }
}

// ---------------------------------------------------------------------------
// Evidence and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    Text,
    Url,
}

/// A located pattern match on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceCandidate {
    pub criterion_id: String,
    pub source_url: String,
    /// The pattern as written in the catalog.
    pub pattern: String,
    pub excerpt: String,
    pub kind: PatternKind,
    pub page_depth: u32,
    /// Byte offset of the match in the page text (0 for URL matches).
    pub offset: usize,
}

/// Provenance of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionOrigin {
    PatternOnly,
    Llm,
    Default,
}

impl DecisionOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PatternOnly => "pattern-only",
            Self::Llm => "llm",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for DecisionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The decision for one (organization, criterion) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub org_id: OrgId,
    pub criterion_id: String,
    pub fulfilled: bool,
    /// Always within [0, 1].
    pub confidence: f64,
    pub justification: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_excerpt: Option<String>,
    pub origin: DecisionOrigin,
    /// Confidence fell below the applicable threshold. Reporting only.
    pub low_confidence: bool,
    pub evidence_count: usize,
}

impl CriterionResult {
    /// Not fulfilled, zero confidence: used when an organization could not be crawled.
    pub fn default_for(org_id: OrgId, criterion_id: impl Into<String>, reason: &str) -> Self {
        Self {
            org_id,
            criterion_id: criterion_id.into(),
            fulfilled: false,
            confidence: 0.0,
            justification: reason.to_string(),
            source_url: None,
            evidence_excerpt: None,
            origin: DecisionOrigin::Default,
            low_confidence: true,
            evidence_count: 0,
        }
    }
}

/// Everything produced for one organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationEvaluation {
    pub organization: Organization,
    pub base_reachable: bool,
    pub successful_pages: usize,
    pub failed_pages: usize,
    /// One per catalog criterion, in catalog order.
    pub results: Vec<CriterionResult>,
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationSummary {
    pub org_id: OrgId,
    pub name: String,
    pub base_url: String,
    pub total_criteria: usize,
    pub fulfilled_count: usize,
    pub fulfillment_rate: f64,
    pub weighted_fulfillment_rate: f64,
    pub mean_confidence: f64,
    pub successful_pages: usize,
    pub failed_pages: usize,
    pub low_confidence_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionSummary {
    pub criterion_id: String,
    pub name: String,
    pub dimension_id: String,
    pub evaluated: usize,
    pub fulfilling: usize,
    pub fulfillment_rate: f64,
    pub mean_confidence: f64,
}

/// Per-organization roll-up of one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionSummary {
    pub org_id: OrgId,
    pub organization: String,
    pub dimension_id: String,
    pub dimension_name: String,
    pub total: usize,
    pub fulfilled: usize,
    pub fulfillment_rate: f64,
    pub weighted_fulfillment_rate: f64,
}

/// Per-organization roll-up of one factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorSummary {
    pub org_id: OrgId,
    pub dimension_id: String,
    pub factor_id: String,
    pub factor_name: String,
    pub total: usize,
    pub fulfilled: usize,
    pub fulfillment_rate: f64,
    pub weighted_fulfillment_rate: f64,
}

/// Result counts by confidence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceBands {
    /// confidence > 0.8
    pub high: usize,
    /// 0.5 <= confidence <= 0.8
    pub medium: usize,
    /// confidence < 0.5
    pub low: usize,
    /// Below the applicable threshold.
    pub manual_review: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeFulfillment {
    pub total: usize,
    pub fulfilled: usize,
    pub fulfillment_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationRate {
    pub name: String,
    pub fulfillment_rate: f64,
    pub weighted_fulfillment_rate: f64,
}

/// Run-wide rate of one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionRate {
    pub dimension_id: String,
    pub dimension_name: String,
    pub fulfillment_rate: f64,
}

/// The `run_summary.json` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub catalog_identifier: String,
    pub catalog: CatalogInfo,
    pub total_organizations: usize,
    /// Organizations whose base URL was reachable.
    pub successful_organizations: usize,
    pub total_results: usize,
    pub overall_fulfillment_rate: f64,
    /// Mean confidence over every result of the run.
    pub mean_confidence: f64,
    pub organization_rates: Vec<OrganizationRate>,
    /// Highest simple rate; the earlier roster entry wins a tie.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_organization: Option<OrganizationRate>,
    pub confidence_bands: ConfidenceBands,
    /// Keyed by criterion type (`operational`, `strategic`).
    pub by_type: BTreeMap<String, TypeFulfillment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strongest_dimension: Option<DimensionRate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weakest_dimension: Option<DimensionRate>,
    /// The run was interrupted before every organization finished.
    pub cancelled: bool,
}

/// All aggregated output of a run, ready for export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub summary: RunSummary,
    /// Sorted by roster position.
    pub evaluations: Vec<OrganizationEvaluation>,
    pub organizations: Vec<OrganizationSummary>,
    pub criteria: Vec<CriterionSummary>,
    pub dimensions: Vec<DimensionSummary>,
    pub factors: Vec<FactorSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn enums_serialize_kebab_case() {
        assert_eq!(
            serde_json::to_string(&DecisionOrigin::PatternOnly).expect("serialize"),
            "\"pattern-only\""
        );
        assert_eq!(
            serde_json::to_string(&FetchStatus::HttpError).expect("serialize"),
            "\"http-error\""
        );
        assert_eq!(FetchStatus::ParseError.to_string(), "parse-error");
    }

    #[test]
    fn default_result_is_not_fulfilled() {
        let result = CriterionResult::default_for(OrgId(4), "open_data", "base URL unreachable");
        assert!(!result.fulfilled);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.origin, DecisionOrigin::Default);
        assert!(result.low_confidence);
    }

    #[test]
    fn failed_page_has_no_text() {
        let page = PageRecord::failed("https://a.example/x", 1, FetchStatus::Timeout, "timed out");
        assert!(!page.is_ok());
        assert!(page.text.is_none());
        let page = PageRecord::ok("https://a.example/", 0, "hello".into(), None);
        assert!(page.is_ok());
    }
}
