//! YAML criteria catalog loader.
//!
//! The document is walked as an untyped [`serde_yaml::Value`] so that every
//! entry can be validated on its own and file order is preserved.

use std::collections::HashSet;
use std::path::Path;

use openness_shared::{
    Catalog, CatalogMetadata, Criterion, CriterionType, Dimension, Factor, OpennessError, Result,
    ValidationIssue,
};
use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

/// Pattern groups the catalog format knows about. `logo` is accepted but unused.
const KNOWN_PATTERN_KINDS: &[&str] = &["text", "url", "logo"];

/// A validated catalog plus everything that was skipped on the way.
#[derive(Debug, Clone)]
pub struct LoadedCatalog {
    pub catalog: Catalog,
    pub issues: Vec<ValidationIssue>,
}

/// Read and validate a catalog file.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_catalog(path: &Path) -> Result<LoadedCatalog> {
    let source = std::fs::read_to_string(path).map_err(|e| {
        OpennessError::catalog(format!("cannot read {}: {e}", path.display()))
    })?;

    let loaded = parse_catalog(&source)?;
    info!(
        name = %loaded.catalog.metadata.name,
        criteria = loaded.catalog.criterion_count(),
        issues = loaded.issues.len(),
        "catalog loaded"
    );
    Ok(loaded)
}

/// SHA-256 of the catalog source, hex encoded.
pub fn catalog_fingerprint(source: &str) -> String {
    format!("{:x}", Sha256::digest(source.as_bytes()))
}

/// Validate a catalog document held in memory.
pub fn parse_catalog(source: &str) -> Result<LoadedCatalog> {
    let root: Value = serde_yaml::from_str(source)
        .map_err(|e| OpennessError::catalog(format!("malformed YAML: {e}")))?;
    let root = root
        .as_mapping()
        .ok_or_else(|| OpennessError::catalog("catalog root must be a mapping"))?;

    let metadata = parse_metadata(root.get("metadata"))?;
    let dimensions = root
        .get("dimensions")
        .ok_or_else(|| OpennessError::catalog("missing required section 'dimensions'"))?
        .as_mapping()
        .ok_or_else(|| OpennessError::catalog("'dimensions' must be a mapping"))?;

    let mut walker = CatalogWalker::default();
    let dimensions = walker.dimensions(dimensions);

    let catalog = Catalog {
        metadata,
        dimensions,
        fingerprint: catalog_fingerprint(source),
    };

    if catalog.criterion_count() == 0 {
        return Err(OpennessError::catalog(format!(
            "catalog '{}' contains no valid criteria ({} issues)",
            catalog.metadata.name,
            walker.issues.len()
        )));
    }

    for issue in &walker.issues {
        warn!(%issue, "catalog entry skipped");
    }

    Ok(LoadedCatalog {
        catalog,
        issues: walker.issues,
    })
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

fn parse_metadata(value: Option<&Value>) -> Result<CatalogMetadata> {
    let map = value
        .ok_or_else(|| OpennessError::catalog("missing required section 'metadata'"))?
        .as_mapping()
        .ok_or_else(|| OpennessError::catalog("'metadata' must be a mapping"))?;

    let missing: Vec<&str> = ["name", "organization_type"]
        .into_iter()
        .filter(|key| scalar_string(map.get(*key)).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(OpennessError::catalog(format!(
            "metadata missing: {}",
            missing.join(", ")
        )));
    }

    Ok(CatalogMetadata {
        name: scalar_string(map.get("name")).unwrap_or_default(),
        description: scalar_string(map.get("description")).unwrap_or_default(),
        version: scalar_string(map.get("version")).unwrap_or_default(),
        organization_type: scalar_string(map.get("organization_type")).unwrap_or_default(),
    })
}

// ---------------------------------------------------------------------------
// Hierarchy walk
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CatalogWalker {
    issues: Vec<ValidationIssue>,
    seen_ids: HashSet<String>,
}

impl CatalogWalker {
    fn issue(&mut self, location: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue::new(location, message));
    }

    fn dimensions(&mut self, map: &Mapping) -> Vec<Dimension> {
        let mut out = Vec::new();
        for (key, value) in map {
            let Some(id) = key_string(key) else {
                self.issue("dimensions", "dimension key must be a string");
                continue;
            };
            let location = format!("dimension {id}");
            let Some(body) = value.as_mapping() else {
                self.issue(location, "must be a mapping");
                continue;
            };
            let Some(factors) = body.get("factors").and_then(Value::as_mapping) else {
                self.issue(location, "missing 'factors' mapping");
                continue;
            };

            let factors = self.factors(&id, factors);
            if factors.is_empty() {
                self.issue(location, "no valid factors, dropped");
                continue;
            }

            out.push(Dimension {
                name: scalar_string(body.get("name")).unwrap_or_else(|| id.clone()),
                description: scalar_string(body.get("description")).unwrap_or_default(),
                id,
                factors,
            });
        }
        out
    }

    fn factors(&mut self, dimension_id: &str, map: &Mapping) -> Vec<Factor> {
        let mut out = Vec::new();
        for (key, value) in map {
            let Some(id) = key_string(key) else {
                self.issue(format!("dimension {dimension_id}"), "factor key must be a string");
                continue;
            };
            let location = format!("factor {dimension_id}.{id}");
            let Some(body) = value.as_mapping() else {
                self.issue(location, "must be a mapping");
                continue;
            };
            let Some(criteria) = body.get("criteria").and_then(Value::as_mapping) else {
                self.issue(location, "missing 'criteria' mapping");
                continue;
            };

            let criteria = self.criteria(dimension_id, &id, criteria);
            if criteria.is_empty() {
                self.issue(location, "no valid criteria, dropped");
                continue;
            }

            out.push(Factor {
                name: scalar_string(body.get("name")).unwrap_or_else(|| id.clone()),
                description: scalar_string(body.get("description")).unwrap_or_default(),
                id,
                criteria,
            });
        }
        out
    }

    fn criteria(&mut self, dimension_id: &str, factor_id: &str, map: &Mapping) -> Vec<Criterion> {
        let mut out = Vec::new();
        for (key, value) in map {
            let Some(id) = key_string(key) else {
                self.issue(
                    format!("factor {dimension_id}.{factor_id}"),
                    "criterion key must be a string",
                );
                continue;
            };
            let location = format!("criterion {id}");

            if self.seen_ids.contains(&id) {
                self.issue(location, "duplicate criterion id, later entry skipped");
                continue;
            }

            match parse_criterion(&id, value, dimension_id, factor_id, &mut self.issues) {
                Ok(criterion) => {
                    debug!(criterion = %id, "criterion accepted");
                    self.seen_ids.insert(id);
                    out.push(criterion);
                }
                Err(message) => self.issue(location, message),
            }
        }
        out
    }
}

/// Build one criterion. `Err` carries the reason it was rejected.
/// Non-fatal oddities (unknown pattern groups) are pushed to `issues`.
fn parse_criterion(
    id: &str,
    value: &Value,
    dimension_id: &str,
    factor_id: &str,
    issues: &mut Vec<ValidationIssue>,
) -> std::result::Result<Criterion, String> {
    let body = value.as_mapping().ok_or("must be a mapping")?;

    let name = scalar_string(body.get("name")).ok_or("missing 'name'")?;
    let kind = body
        .get("type")
        .and_then(Value::as_str)
        .ok_or("missing 'type'")?
        .parse::<CriterionType>()?;

    let (text_patterns, url_patterns) = match body.get("patterns") {
        None | Some(Value::Null) => (Vec::new(), Vec::new()),
        Some(Value::Mapping(groups)) => {
            for key in groups.keys() {
                let known = key
                    .as_str()
                    .is_some_and(|k| KNOWN_PATTERN_KINDS.contains(&k));
                if !known {
                    let group = scalar_string(Some(key)).unwrap_or_else(|| "?".into());
                    issues.push(ValidationIssue::new(
                        format!("criterion {id}"),
                        format!("unknown pattern group '{group}' ignored"),
                    ));
                }
            }
            (
                string_list(groups.get("text"), "patterns.text")?,
                string_list(groups.get("url"), "patterns.url")?,
            )
        }
        Some(_) => return Err("'patterns' must be a mapping".into()),
    };

    let weight = match body.get("weight") {
        None | Some(Value::Null) => 1.0,
        Some(v) => v.as_f64().ok_or("'weight' must be a number")?,
    };
    if !weight.is_finite() || weight <= 0.0 {
        return Err(format!("weight must be positive, got {weight}"));
    }

    let confidence_threshold = match body.get("confidence_threshold") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let t = v.as_f64().ok_or("'confidence_threshold' must be a number")?;
            if !(0.0..=1.0).contains(&t) {
                return Err(format!("confidence_threshold must be within [0, 1], got {t}"));
            }
            Some(t)
        }
    };

    Ok(Criterion {
        id: id.to_string(),
        name,
        description: scalar_string(body.get("description")).unwrap_or_default(),
        kind,
        text_patterns,
        url_patterns,
        weight,
        confidence_threshold,
        dimension_id: dimension_id.to_string(),
        factor_id: factor_id.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

fn key_string(key: &Value) -> Option<String> {
    scalar_string(Some(key))
}

/// Strings, numbers and booleans as trimmed text; anything else is `None`.
fn scalar_string(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn string_list(value: Option<&Value>, field: &str) -> std::result::Result<Vec<String>, String> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Sequence(items)) => Ok(items
            .iter()
            .filter_map(|item| scalar_string(Some(item)))
            .collect()),
        Some(_) => Err(format!("'{field}' must be a list")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
metadata:
  name: Research Openness
  description: Openness criteria for research institutes
  version: 1.0
  organization_type: research
dimensions:
  transparency:
    name: Transparency
    description: Public information
    factors:
      publications:
        name: Publications
        description: Publication practice
        criteria:
          open_access_policy:
            name: Open access policy
            description: The institute publishes an open access policy
            type: strategic
            patterns:
              text: ["open access policy", "open-access-policy"]
              url: ["/open-access"]
            weight: 2.0
            confidence_threshold: 0.6
          annual_report:
            name: Annual report
            description: An annual report is available
            type: operational
            patterns:
              text: ["annual report", "jahresbericht"]
  participation:
    name: Participation
    factors:
      dialogue:
        name: Dialogue
        criteria:
          contact_form:
            name: Contact form
            type: operational
            patterns:
              text: ["contact"]
"#;

    #[test]
    fn parses_hierarchy_in_file_order() {
        let loaded = parse_catalog(SAMPLE).expect("parse");
        let catalog = &loaded.catalog;

        assert!(loaded.issues.is_empty(), "issues: {:?}", loaded.issues);
        assert_eq!(catalog.metadata.version, "1.0");
        let ids: Vec<_> = catalog.criteria().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["open_access_policy", "annual_report", "contact_form"]);
        assert_eq!(catalog.dimensions[0].id, "transparency");
        assert_eq!(catalog.dimensions[1].id, "participation");

        let oa = catalog.criterion("open_access_policy").expect("criterion");
        assert_eq!(oa.kind, CriterionType::Strategic);
        assert_eq!(oa.weight, 2.0);
        assert_eq!(oa.confidence_threshold, Some(0.6));
        assert_eq!(oa.url_patterns, vec!["/open-access"]);
        assert_eq!(oa.factor_id, "publications");

        let ar = catalog.criterion("annual_report").expect("criterion");
        assert_eq!(ar.weight, 1.0);
        assert_eq!(ar.confidence_threshold, None);
    }

    #[test]
    fn fingerprint_is_sha256_of_source() {
        let loaded = parse_catalog(SAMPLE).expect("parse");
        assert_eq!(loaded.catalog.fingerprint.len(), 64);
        assert_eq!(loaded.catalog.fingerprint, catalog_fingerprint(SAMPLE));
        assert_ne!(catalog_fingerprint(SAMPLE), catalog_fingerprint("other"));
    }

    #[test]
    fn invalid_entries_become_issues() {
        let source = r#"
metadata: { name: Test, organization_type: ngo }
dimensions:
  d:
    factors:
      f:
        criteria:
          good:
            name: Good
            type: operational
          bad_type:
            name: Bad type
            type: tactical
          zero_weight:
            name: Zero weight
            type: strategic
            weight: 0
          odd_patterns:
            name: Odd patterns
            type: operational
            patterns:
              text: ["x"]
              logo: ["logo.png"]
              colour: ["blue"]
      g:
        criteria:
          good:
            name: Duplicate
            type: operational
"#;
        let loaded = parse_catalog(source).expect("parse");
        let ids: Vec<_> = loaded.catalog.criteria().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["good", "odd_patterns"]);

        let messages: Vec<String> = loaded.issues.iter().map(|i| i.to_string()).collect();
        assert!(messages.iter().any(|m| m.contains("bad_type") && m.contains("tactical")));
        assert!(messages.iter().any(|m| m.contains("zero_weight") && m.contains("positive")));
        assert!(messages.iter().any(|m| m.contains("duplicate")));
        assert!(messages.iter().any(|m| m.contains("colour")));
        assert!(!messages.iter().any(|m| m.contains("logo")));
    }

    #[test]
    fn fatal_catalog_errors() {
        let err = parse_catalog("metadata: [unclosed").unwrap_err();
        assert!(matches!(err, OpennessError::Catalog { .. }));

        let err = parse_catalog("metadata: { name: X, organization_type: y }\n").unwrap_err();
        assert!(err.to_string().contains("dimensions"));

        let err = parse_catalog("metadata: { name: X }\ndimensions: {}\n").unwrap_err();
        assert!(err.to_string().contains("organization_type"));

        let only_bad = r#"
metadata: { name: X, organization_type: y }
dimensions:
  d:
    factors:
      f:
        criteria:
          c: { name: C, type: unknown }
"#;
        let err = parse_catalog(only_bad).unwrap_err();
        assert!(err.is_run_fatal());
        assert!(err.to_string().contains("no valid criteria"));
    }

    #[test]
    fn missing_file_is_catalog_error() {
        let err = load_catalog(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(err, OpennessError::Catalog { .. }));
    }

    #[test]
    fn loads_fixture_catalog() {
        let loaded =
            load_catalog(Path::new("../../../fixtures/catalogs/sample.yaml")).expect("fixture");
        assert!(loaded.catalog.criterion("open_access_policy").is_some());
        assert!(loaded.issues.is_empty());
    }
}
