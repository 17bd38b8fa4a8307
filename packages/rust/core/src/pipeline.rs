//! End-to-end evaluation run: roster × catalog → `RunReport`.
//!
//! Organizations are processed by a bounded pool (`buffer_unordered`). Each
//! one is crawled, matched and adjudicated inside its own `organization`
//! span; results are sorted back into roster order before aggregation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use futures::{StreamExt, future, stream};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

use openness_crawler::Crawler;
use openness_shared::{
    Catalog, CriterionResult, Organization, OrganizationEvaluation, Result, RunId, RunReport,
    RunSummary,
};

use crate::adjudicator::Adjudicator;
use crate::aggregate::{RunMeta, aggregate};
use crate::matcher::match_pages;

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called once, before any organization starts.
    fn run_started(&self, organizations: usize, criteria: usize);
    /// Called when an organization's crawl begins.
    fn organization_started(&self, organization: &Organization);
    /// Called when an organization has all of its results.
    fn organization_finished(
        &self,
        evaluation: &OrganizationEvaluation,
        completed: usize,
        total: usize,
    );
    /// Called when the run is aggregated.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn run_started(&self, _organizations: usize, _criteria: usize) {}
    fn organization_started(&self, _organization: &Organization) {}
    fn organization_finished(
        &self,
        _evaluation: &OrganizationEvaluation,
        _completed: usize,
        _total: usize,
    ) {
    }
    fn done(&self, _summary: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    crawler: Crawler,
    adjudicator: Arc<Adjudicator>,
    parallelism: usize,
}

impl Pipeline {
    pub fn new(crawler: Crawler, adjudicator: Adjudicator, parallelism: usize) -> Self {
        Self {
            crawler,
            adjudicator: Arc::new(adjudicator),
            parallelism: parallelism.max(1),
        }
    }

    pub fn adjudicator(&self) -> &Adjudicator {
        &self.adjudicator
    }

    /// Evaluate every organization against `catalog`.
    ///
    /// Per-organization failures become default results. Only an aggregation
    /// inconsistency is returned as an error. On cancellation the run still
    /// finalizes with `cancelled` set.
    pub async fn run(
        &self,
        catalog: Arc<Catalog>,
        organizations: Vec<Organization>,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let run_id = RunId::new();
        let span = info_span!("run", %run_id);

        async move {
            let started_at = Utc::now();
            let total = organizations.len();
            let completed = AtomicUsize::new(0);

            info!(
                organizations = total,
                criteria = catalog.criterion_count(),
                catalog = %catalog.identifier(),
                parallelism = self.parallelism,
                evaluator = self.adjudicator.has_evaluator(),
                "starting run"
            );
            progress.run_started(total, catalog.criterion_count());

            let mut evaluations: Vec<OrganizationEvaluation> = stream::iter(organizations)
                .map(|organization| {
                    let catalog = Arc::clone(&catalog);
                    let completed = &completed;
                    async move {
                        let evaluation = if cancel.is_cancelled() {
                            default_evaluation(
                                &catalog,
                                organization,
                                "run cancelled before organization started",
                            )
                        } else {
                            progress.organization_started(&organization);
                            let span = info_span!(
                                "organization",
                                id = %organization.id,
                                name = %organization.name
                            );
                            self.evaluate_organization(&catalog, organization, cancel)
                                .instrument(span)
                                .await
                        };
                        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                        progress.organization_finished(&evaluation, done, total);
                        evaluation
                    }
                })
                .buffer_unordered(self.parallelism)
                .collect()
                .await;

            evaluations.sort_by_key(|e| e.organization.id);

            let cancelled = cancel.is_cancelled();
            if cancelled {
                warn!("run cancelled, finalizing with partial results");
            }

            let report = aggregate(
                &catalog,
                evaluations,
                RunMeta {
                    run_id,
                    started_at,
                    finished_at: Utc::now(),
                    cancelled,
                },
            )?;

            info!(
                organizations = report.summary.total_organizations,
                reachable = report.summary.successful_organizations,
                overall_rate = report.summary.overall_fulfillment_rate,
                "run complete"
            );
            progress.done(&report.summary);
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Crawl, match and adjudicate one organization.
    pub async fn evaluate_organization(
        &self,
        catalog: &Catalog,
        organization: Organization,
        cancel: &CancellationToken,
    ) -> OrganizationEvaluation {
        if let Some(issue) = &organization.url_issue {
            warn!(%issue, "roster flagged this URL");
        }

        let outcome = self.crawler.crawl(&organization.base_url, cancel).await;
        let successful_pages = outcome.successful_pages();
        let failed_pages = outcome.failed_pages();

        if !outcome.base_reachable {
            let reason = match outcome.pages.first().and_then(|p| p.error.as_deref()) {
                Some(error) => format!("base URL unreachable: {error}"),
                None => "base URL unreachable".to_string(),
            };
            let mut evaluation = default_evaluation(catalog, organization, &reason);
            evaluation.failed_pages = failed_pages;
            return evaluation;
        }

        let candidates = match_pages(catalog, &outcome.pages);
        let empty = Vec::new();
        let results: Vec<CriterionResult> = future::join_all(catalog.criteria().map(|criterion| {
            let found = candidates.get(&criterion.id).unwrap_or(&empty);
            self.adjudicator
                .adjudicate(&organization, criterion, found, cancel)
        }))
        .await;

        let fulfilled = results.iter().filter(|r| r.fulfilled).count();
        info!(
            pages = successful_pages,
            failed_pages,
            fulfilled,
            criteria = results.len(),
            "organization evaluated"
        );

        OrganizationEvaluation {
            organization,
            base_reachable: true,
            successful_pages,
            failed_pages,
            results,
        }
    }
}

/// The evaluation of an organization that produced no evidence at all.
pub fn default_evaluation(
    catalog: &Catalog,
    organization: Organization,
    reason: &str,
) -> OrganizationEvaluation {
    let results = catalog
        .criteria()
        .map(|c| CriterionResult::default_for(organization.id, c.id.clone(), reason))
        .collect();
    OrganizationEvaluation {
        organization,
        base_reachable: false,
        successful_pages: 0,
        failed_pages: 0,
        results,
    }
}
