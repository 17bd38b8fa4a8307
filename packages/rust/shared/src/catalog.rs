//! Typed criteria catalog: dimension → factor → criterion.
//!
//! Built once by the YAML loader in `openness-inputs` and shared read-only
//! (behind an `Arc`) by every worker for the duration of a run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// CriterionType
// ---------------------------------------------------------------------------

/// Whether a criterion describes day-to-day practice or strategic commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CriterionType {
    Operational,
    Strategic,
}

impl CriterionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operational => "operational",
            Self::Strategic => "strategic",
        }
    }
}

impl fmt::Display for CriterionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CriterionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "operational" => Ok(Self::Operational),
            "strategic" => Ok(Self::Strategic),
            other => Err(format!(
                "unknown criterion type '{other}' (expected operational or strategic)"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Hierarchy
// ---------------------------------------------------------------------------

/// `metadata` block of a catalog document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub organization_type: String,
}

/// The unit of evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct Criterion {
    /// Catalog-unique snake_case identifier.
    pub id: String,
    pub name: String,
    pub description: String,
    pub kind: CriterionType,
    /// Keyword patterns matched against page text.
    pub text_patterns: Vec<String>,
    /// Substrings matched against page URLs.
    pub url_patterns: Vec<String>,
    /// Contribution to weighted roll-ups. Always > 0.
    pub weight: f64,
    /// Overrides the run-wide reporting threshold when set.
    pub confidence_threshold: Option<f64>,
    /// Owning dimension id.
    pub dimension_id: String,
    /// Owning factor id.
    pub factor_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Factor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub criteria: Vec<Criterion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dimension {
    pub id: String,
    pub name: String,
    pub description: String,
    pub factors: Vec<Factor>,
}

impl Dimension {
    pub fn criteria(&self) -> impl Iterator<Item = &Criterion> {
        self.factors.iter().flat_map(|f| f.criteria.iter())
    }
}

/// A validated, read-only criteria catalog.
#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    pub metadata: CatalogMetadata,
    pub dimensions: Vec<Dimension>,
    /// SHA-256 (hex) of the source document.
    pub fingerprint: String,
}

impl Catalog {
    /// All criteria in document order.
    pub fn criteria(&self) -> impl Iterator<Item = &Criterion> {
        self.dimensions.iter().flat_map(Dimension::criteria)
    }

    pub fn criterion_count(&self) -> usize {
        self.criteria().count()
    }

    pub fn criterion(&self, id: &str) -> Option<&Criterion> {
        self.criteria().find(|c| c.id == id)
    }

    /// Human-readable identifier used in run summaries (`name@version`).
    pub fn identifier(&self) -> String {
        if self.metadata.version.is_empty() {
            self.metadata.name.clone()
        } else {
            format!("{}@{}", self.metadata.name, self.metadata.version)
        }
    }

    /// Summary information without the criteria bodies.
    pub fn info(&self) -> CatalogInfo {
        CatalogInfo {
            name: self.metadata.name.clone(),
            description: self.metadata.description.clone(),
            version: self.metadata.version.clone(),
            organization_type: self.metadata.organization_type.clone(),
            dimensions: self.dimensions.len(),
            factors: self.dimensions.iter().map(|d| d.factors.len()).sum(),
            total_criteria: self.criterion_count(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

/// Basic facts about a catalog, for `openness catalog` and run summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogInfo {
    pub name: String,
    pub description: String,
    pub version: String,
    pub organization_type: String,
    pub dimensions: usize,
    pub factors: usize,
    pub total_criteria: usize,
    pub fingerprint: String,
}
