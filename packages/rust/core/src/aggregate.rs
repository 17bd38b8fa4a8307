//! Aggregation: per-organization results → summaries, roll-ups, run summary.
//!
//! Synchronous. Rates are percentages rounded to one decimal.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use openness_shared::{
    Catalog, ConfidenceBands, CriterionResult, CriterionSummary, DimensionRate, DimensionSummary,
    FactorSummary, OpennessError, OrganizationEvaluation, OrganizationRate, OrganizationSummary,
    Result, RunId, RunReport, RunSummary, TypeFulfillment,
};

/// Above this, a result counts as high confidence.
pub const HIGH_CONFIDENCE: f64 = 0.8;
/// At or above this (and not high), medium.
pub const MEDIUM_CONFIDENCE: f64 = 0.5;

/// Run-level facts the aggregator does not compute itself.
#[derive(Debug, Clone)]
pub struct RunMeta {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// Rates
// ---------------------------------------------------------------------------

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// `round(100 * fulfilled / total, 1)`; 0 when there is nothing to count.
pub fn fulfillment_rate(fulfilled: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round1(100.0 * fulfilled as f64 / total as f64)
}

/// `Σ(weight·fulfilled) / Σweight × 100`, rounded like [`fulfillment_rate`].
pub fn weighted_rate<I>(items: I) -> f64
where
    I: IntoIterator<Item = (f64, bool)>,
{
    let (hit, total) = items
        .into_iter()
        .fold((0.0, 0.0), |(hit, total), (weight, fulfilled)| {
            (hit + if fulfilled { weight } else { 0.0 }, total + weight)
        });
    if total <= 0.0 {
        return 0.0;
    }
    round1(100.0 * hit / total)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

// ---------------------------------------------------------------------------
// Completeness
// ---------------------------------------------------------------------------

/// Every (organization, criterion) pair exactly once, and nothing else.
pub fn verify_completeness(
    catalog: &Catalog,
    evaluations: &[OrganizationEvaluation],
) -> Result<()> {
    let mut seen_orgs = HashSet::new();
    for evaluation in evaluations {
        let org = &evaluation.organization;
        if !seen_orgs.insert(org.id) {
            return Err(OpennessError::aggregation(format!(
                "organization {} ('{}') evaluated more than once",
                org.id, org.name
            )));
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for result in &evaluation.results {
            if result.org_id != org.id {
                return Err(OpennessError::aggregation(format!(
                    "result for criterion '{}' filed under organization {} belongs to {}",
                    result.criterion_id, org.id, result.org_id
                )));
            }
            if catalog.criterion(&result.criterion_id).is_none() {
                return Err(OpennessError::aggregation(format!(
                    "organization {}: result for unknown criterion '{}'",
                    org.id, result.criterion_id
                )));
            }
            *counts.entry(result.criterion_id.as_str()).or_default() += 1;
        }

        for criterion in catalog.criteria() {
            match counts.get(criterion.id.as_str()).copied().unwrap_or(0) {
                1 => {}
                0 => {
                    return Err(OpennessError::aggregation(format!(
                        "organization {}: missing result for criterion '{}'",
                        org.id, criterion.id
                    )));
                }
                n => {
                    return Err(OpennessError::aggregation(format!(
                        "organization {}: {n} results for criterion '{}'",
                        org.id, criterion.id
                    )));
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Build the full report. `evaluations` must already be sorted by roster position.
#[instrument(skip_all, fields(organizations = evaluations.len()))]
pub fn aggregate(
    catalog: &Catalog,
    evaluations: Vec<OrganizationEvaluation>,
    meta: RunMeta,
) -> Result<RunReport> {
    verify_completeness(catalog, &evaluations)?;

    let organizations: Vec<OrganizationSummary> =
        evaluations.iter().map(|e| summarize_organization(catalog, e)).collect();
    let criteria = summarize_criteria(catalog, &evaluations);
    let (dimensions, factors) = roll_up(catalog, &evaluations);

    let all_results: Vec<&CriterionResult> =
        evaluations.iter().flat_map(|e| e.results.iter()).collect();
    let total_results = all_results.len();
    let fulfilled_results = all_results.iter().filter(|r| r.fulfilled).count();

    let mut confidence_bands = ConfidenceBands::default();
    let mut by_type: BTreeMap<String, TypeFulfillment> = BTreeMap::new();
    for result in &all_results {
        match result.confidence {
            c if c > HIGH_CONFIDENCE => confidence_bands.high += 1,
            c if c >= MEDIUM_CONFIDENCE => confidence_bands.medium += 1,
            _ => confidence_bands.low += 1,
        }
        if result.low_confidence {
            confidence_bands.manual_review += 1;
        }
        if let Some(criterion) = catalog.criterion(&result.criterion_id) {
            let entry = by_type.entry(criterion.kind.as_str().to_string()).or_default();
            entry.total += 1;
            entry.fulfilled += usize::from(result.fulfilled);
        }
    }
    for entry in by_type.values_mut() {
        entry.fulfillment_rate = fulfillment_rate(entry.fulfilled, entry.total);
    }

    let dimension_rates = run_dimension_rates(catalog, &evaluations);
    let strongest_dimension = dimension_rates
        .iter()
        .fold(None::<&DimensionRate>, |best, d| match best {
            Some(b) if b.fulfillment_rate >= d.fulfillment_rate => Some(b),
            _ => Some(d),
        })
        .cloned();
    let weakest_dimension = dimension_rates
        .iter()
        .fold(None::<&DimensionRate>, |worst, d| match worst {
            Some(w) if w.fulfillment_rate <= d.fulfillment_rate => Some(w),
            _ => Some(d),
        })
        .cloned();

    let organization_rates: Vec<OrganizationRate> = organizations
        .iter()
        .map(|o| OrganizationRate {
            name: o.name.clone(),
            fulfillment_rate: o.fulfillment_rate,
            weighted_fulfillment_rate: o.weighted_fulfillment_rate,
        })
        .collect();
    let top_organization = organization_rates
        .iter()
        .fold(None::<&OrganizationRate>, |best, o| match best {
            Some(b) if b.fulfillment_rate >= o.fulfillment_rate => Some(b),
            _ => Some(o),
        })
        .cloned();

    let summary = RunSummary {
        run_id: meta.run_id,
        started_at: meta.started_at,
        finished_at: meta.finished_at,
        catalog_identifier: catalog.identifier(),
        catalog: catalog.info(),
        total_organizations: evaluations.len(),
        successful_organizations: evaluations.iter().filter(|e| e.base_reachable).count(),
        total_results,
        overall_fulfillment_rate: fulfillment_rate(fulfilled_results, total_results),
        mean_confidence: mean(all_results.iter().map(|r| r.confidence)),
        organization_rates,
        top_organization,
        confidence_bands,
        by_type,
        strongest_dimension,
        weakest_dimension,
        cancelled: meta.cancelled,
    };

    debug!(
        results = total_results,
        overall_rate = summary.overall_fulfillment_rate,
        "aggregation complete"
    );

    Ok(RunReport {
        summary,
        evaluations,
        organizations,
        criteria,
        dimensions,
        factors,
    })
}

fn weight_of(catalog: &Catalog, criterion_id: &str) -> f64 {
    catalog.criterion(criterion_id).map_or(1.0, |c| c.weight)
}

fn summarize_organization(
    catalog: &Catalog,
    evaluation: &OrganizationEvaluation,
) -> OrganizationSummary {
    let results = &evaluation.results;
    let fulfilled_count = results.iter().filter(|r| r.fulfilled).count();
    OrganizationSummary {
        org_id: evaluation.organization.id,
        name: evaluation.organization.name.clone(),
        base_url: evaluation.organization.base_url.clone(),
        total_criteria: results.len(),
        fulfilled_count,
        fulfillment_rate: fulfillment_rate(fulfilled_count, results.len()),
        weighted_fulfillment_rate: weighted_rate(
            results
                .iter()
                .map(|r| (weight_of(catalog, &r.criterion_id), r.fulfilled)),
        ),
        mean_confidence: mean(results.iter().map(|r| r.confidence)),
        successful_pages: evaluation.successful_pages,
        failed_pages: evaluation.failed_pages,
        low_confidence_count: results.iter().filter(|r| r.low_confidence).count(),
    }
}

fn summarize_criteria(
    catalog: &Catalog,
    evaluations: &[OrganizationEvaluation],
) -> Vec<CriterionSummary> {
    let mut by_id: HashMap<&str, Vec<&CriterionResult>> = HashMap::new();
    for result in evaluations.iter().flat_map(|e| e.results.iter()) {
        by_id.entry(result.criterion_id.as_str()).or_default().push(result);
    }

    catalog
        .criteria()
        .map(|criterion| {
            let results = by_id.get(criterion.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            let fulfilling = results.iter().filter(|r| r.fulfilled).count();
            CriterionSummary {
                criterion_id: criterion.id.clone(),
                name: criterion.name.clone(),
                dimension_id: criterion.dimension_id.clone(),
                evaluated: results.len(),
                fulfilling,
                fulfillment_rate: fulfillment_rate(fulfilling, results.len()),
                mean_confidence: mean(results.iter().map(|r| r.confidence)),
            }
        })
        .collect()
}

/// Per organization: one row per dimension, one per factor, catalog order.
fn roll_up(
    catalog: &Catalog,
    evaluations: &[OrganizationEvaluation],
) -> (Vec<DimensionSummary>, Vec<FactorSummary>) {
    let mut dimensions = Vec::new();
    let mut factors = Vec::new();

    for evaluation in evaluations {
        let fulfilled: HashMap<&str, bool> = evaluation
            .results
            .iter()
            .map(|r| (r.criterion_id.as_str(), r.fulfilled))
            .collect();
        let is_fulfilled = |id: &str| fulfilled.get(id).copied().unwrap_or(false);

        for dimension in &catalog.dimensions {
            let items: Vec<(f64, bool)> = dimension
                .criteria()
                .map(|c| (c.weight, is_fulfilled(&c.id)))
                .collect();
            let hit = items.iter().filter(|(_, f)| *f).count();
            dimensions.push(DimensionSummary {
                org_id: evaluation.organization.id,
                organization: evaluation.organization.name.clone(),
                dimension_id: dimension.id.clone(),
                dimension_name: dimension.name.clone(),
                total: items.len(),
                fulfilled: hit,
                fulfillment_rate: fulfillment_rate(hit, items.len()),
                weighted_fulfillment_rate: weighted_rate(items.iter().copied()),
            });

            for factor in &dimension.factors {
                let items: Vec<(f64, bool)> = factor
                    .criteria
                    .iter()
                    .map(|c| (c.weight, is_fulfilled(&c.id)))
                    .collect();
                let hit = items.iter().filter(|(_, f)| *f).count();
                factors.push(FactorSummary {
                    org_id: evaluation.organization.id,
                    dimension_id: dimension.id.clone(),
                    factor_id: factor.id.clone(),
                    factor_name: factor.name.clone(),
                    total: items.len(),
                    fulfilled: hit,
                    fulfillment_rate: fulfillment_rate(hit, items.len()),
                    weighted_fulfillment_rate: weighted_rate(items.iter().copied()),
                });
            }
        }
    }

    (dimensions, factors)
}

/// Run-wide simple rate per dimension, catalog order. Empty without results.
fn run_dimension_rates(
    catalog: &Catalog,
    evaluations: &[OrganizationEvaluation],
) -> Vec<DimensionRate> {
    if evaluations.is_empty() {
        return Vec::new();
    }

    let mut dimension_of: HashMap<&str, &str> = HashMap::new();
    for criterion in catalog.criteria() {
        dimension_of.insert(criterion.id.as_str(), criterion.dimension_id.as_str());
    }

    let mut tallies: HashMap<&str, (usize, usize)> = HashMap::new();
    for result in evaluations.iter().flat_map(|e| e.results.iter()) {
        if let Some(&dimension) = dimension_of.get(result.criterion_id.as_str()) {
            let tally = tallies.entry(dimension).or_default();
            tally.0 += usize::from(result.fulfilled);
            tally.1 += 1;
        }
    }

    catalog
        .dimensions
        .iter()
        .map(|d| {
            let (hit, total) = tallies.get(d.id.as_str()).copied().unwrap_or((0, 0));
            DimensionRate {
                dimension_id: d.id.clone(),
                dimension_name: d.name.clone(),
                fulfillment_rate: fulfillment_rate(hit, total),
            }
        })
        .collect()
}
