//! Adjudication: criterion + candidates → exactly one `CriterionResult`.
//!
//! Candidates are ranked and capped, then sent to the [`Evaluator`] under a
//! semaphore and a token bucket. Transient failures are retried with the
//! shared [`RetryPolicy`]. Anything else falls back to a pattern-only
//! decision.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use openness_shared::{
    Criterion, CriterionResult, DecisionOrigin, EvidenceCandidate, Organization, RetryPolicy,
    RunConfig,
};

use crate::llm::{EvaluationRequest, Evaluator, Verdict};
use crate::rate_limit::TokenBucket;

/// Pattern-only confidence when candidates exist.
pub const PATTERN_ONLY_FULFILLED_CONFIDENCE: f64 = 0.2;
/// Pattern-only confidence when nothing matched.
pub const PATTERN_ONLY_UNFULFILLED_CONFIDENCE: f64 = 0.05;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AdjudicatorConfig {
    /// Evaluator calls in flight at once, across all organizations.
    pub concurrency: usize,
    pub requests_per_minute: u32,
    pub retry: RetryPolicy,
    /// Used when a criterion has no threshold of its own.
    pub confidence_threshold: f64,
    pub max_evidence: usize,
}

impl Default for AdjudicatorConfig {
    fn default() -> Self {
        Self::from(&RunConfig::default())
    }
}

impl From<&RunConfig> for AdjudicatorConfig {
    fn from(config: &RunConfig) -> Self {
        Self {
            concurrency: config.llm.concurrency,
            requests_per_minute: config.llm.requests_per_minute,
            retry: config.llm.retry,
            confidence_threshold: config.confidence_threshold,
            max_evidence: config.max_evidence,
        }
    }
}

// ---------------------------------------------------------------------------
// Adjudicator
// ---------------------------------------------------------------------------

pub struct Adjudicator {
    evaluator: Option<Arc<dyn Evaluator>>,
    config: AdjudicatorConfig,
    permits: Semaphore,
    bucket: TokenBucket,
}

impl Adjudicator {
    pub fn new(evaluator: Option<Arc<dyn Evaluator>>, config: AdjudicatorConfig) -> Self {
        let permits = Semaphore::new(config.concurrency.max(1));
        let bucket = TokenBucket::per_minute(config.requests_per_minute);
        Self {
            evaluator,
            config,
            permits,
            bucket,
        }
    }

    /// An adjudicator that never calls out.
    pub fn pattern_only(config: AdjudicatorConfig) -> Self {
        Self::new(None, config)
    }

    pub fn has_evaluator(&self) -> bool {
        self.evaluator.is_some()
    }

    pub fn config(&self) -> &AdjudicatorConfig {
        &self.config
    }

    /// Decide one criterion for one organization. Never fails.
    #[instrument(skip_all, fields(criterion = %criterion.id, candidates = candidates.len()))]
    pub async fn adjudicate(
        &self,
        organization: &Organization,
        criterion: &Criterion,
        candidates: &[EvidenceCandidate],
        cancel: &CancellationToken,
    ) -> CriterionResult {
        let threshold = criterion
            .confidence_threshold
            .unwrap_or(self.config.confidence_threshold);
        let ranked = rank_candidates(candidates, self.config.max_evidence);

        let Some(evaluator) = &self.evaluator else {
            return pattern_only_result(
                organization,
                criterion,
                candidates.len(),
                &ranked,
                threshold,
                "no evaluator configured",
            );
        };

        let request = EvaluationRequest {
            organization: organization.name.clone(),
            base_url: organization.base_url.clone(),
            criterion_id: criterion.id.clone(),
            criterion_name: criterion.name.clone(),
            criterion_description: criterion.description.clone(),
            criterion_type: criterion.kind,
            evidence: ranked.clone(),
        };

        match self.call_with_retry(evaluator.as_ref(), &request, cancel).await {
            Ok(verdict) => {
                llm_result(organization, criterion, candidates.len(), &ranked, threshold, verdict)
            }
            Err(reason) => {
                let found = candidates.len();
                pattern_only_result(organization, criterion, found, &ranked, threshold, &reason)
            }
        }
    }

    /// Returns the fallback reason on failure.
    async fn call_with_retry(
        &self,
        evaluator: &dyn Evaluator,
        request: &EvaluationRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<Verdict, String> {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err("run cancelled before evaluation".into());
            }

            let outcome = {
                let _permit = tokio::select! {
                    permit = self.permits.acquire() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return Err("evaluator pool closed".into()),
                    },
                    _ = cancel.cancelled() => return Err("run cancelled before evaluation".into()),
                };
                self.bucket.take().await;
                debug!(evaluator = evaluator.name(), attempt = attempt + 1, "calling evaluator");
                evaluator.evaluate(request).await
            };

            let err = match outcome {
                Ok(verdict) => return Ok(verdict),
                Err(err) => err,
            };

            if !err.is_transient() || !self.config.retry.should_retry(attempt) {
                warn!(
                    error = %err,
                    attempts = attempt + 1,
                    "evaluation failed, falling back to pattern matching"
                );
                return Err(format!("evaluation failed: {err}"));
            }

            let backoff = self.config.retry.delay_for_attempt(attempt);
            warn!(
                error = %err,
                attempt = attempt + 1,
                backoff_ms = backoff.as_millis() as u64,
                "transient evaluation failure, retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(format!("run cancelled after: {err}")),
                _ = tokio::time::sleep(backoff) => {}
            }
            attempt += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Group by page; rank pages by distinct patterns (desc), total matches
/// (desc), depth (asc), URL (asc); take candidates in page order, offset
/// order within a page, up to `max`.
pub fn rank_candidates(candidates: &[EvidenceCandidate], max: usize) -> Vec<EvidenceCandidate> {
    struct PageGroup<'a> {
        url: &'a str,
        depth: u32,
        patterns: Vec<&'a str>,
        items: Vec<&'a EvidenceCandidate>,
    }

    let mut groups: BTreeMap<&str, PageGroup<'_>> = BTreeMap::new();
    for candidate in candidates {
        let group = groups
            .entry(candidate.source_url.as_str())
            .or_insert_with(|| PageGroup {
                url: candidate.source_url.as_str(),
                depth: candidate.page_depth,
                patterns: Vec::new(),
                items: Vec::new(),
            });
        if !group.patterns.contains(&candidate.pattern.as_str()) {
            group.patterns.push(candidate.pattern.as_str());
        }
        group.depth = group.depth.min(candidate.page_depth);
        group.items.push(candidate);
    }

    let mut pages: Vec<PageGroup<'_>> = groups.into_values().collect();
    pages.sort_by(|a, b| {
        b.patterns
            .len()
            .cmp(&a.patterns.len())
            .then_with(|| b.items.len().cmp(&a.items.len()))
            .then_with(|| a.depth.cmp(&b.depth))
            .then_with(|| a.url.cmp(b.url))
    });

    pages
        .into_iter()
        .flat_map(|mut page| {
            page.items.sort_by_key(|c| c.offset);
            page.items
        })
        .take(max)
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Result construction
// ---------------------------------------------------------------------------

/// Clamp to [0, 1]; NaN becomes 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn llm_result(
    organization: &Organization,
    criterion: &Criterion,
    evidence_count: usize,
    ranked: &[EvidenceCandidate],
    threshold: f64,
    verdict: Verdict,
) -> CriterionResult {
    let confidence = clamp_confidence(verdict.confidence);
    let top = ranked.first();
    CriterionResult {
        org_id: organization.id,
        criterion_id: criterion.id.clone(),
        fulfilled: verdict.fulfilled,
        confidence,
        justification: verdict.justification,
        source_url: verdict
            .source_url
            .or_else(|| top.map(|c| c.source_url.clone())),
        evidence_excerpt: top.map(|c| c.excerpt.clone()),
        origin: DecisionOrigin::Llm,
        low_confidence: confidence < threshold,
        evidence_count,
    }
}

/// Fulfilled iff anything matched.
pub fn pattern_only_result(
    organization: &Organization,
    criterion: &Criterion,
    evidence_count: usize,
    ranked: &[EvidenceCandidate],
    threshold: f64,
    reason: &str,
) -> CriterionResult {
    let fulfilled = evidence_count > 0;
    let confidence = if fulfilled {
        PATTERN_ONLY_FULFILLED_CONFIDENCE
    } else {
        PATTERN_ONLY_UNFULFILLED_CONFIDENCE
    };
    let top = ranked.first();
    let justification = match top {
        Some(c) => format!(
            "pattern match ({reason}): {evidence_count} match(es), strongest '{}' on {}",
            c.pattern, c.source_url
        ),
        None => format!("no pattern matched ({reason})"),
    };

    CriterionResult {
        org_id: organization.id,
        criterion_id: criterion.id.clone(),
        fulfilled,
        confidence,
        justification,
        source_url: top.map(|c| c.source_url.clone()),
        evidence_excerpt: top.map(|c| c.excerpt.clone()),
        origin: DecisionOrigin::PatternOnly,
        low_confidence: confidence < threshold,
        evidence_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use openness_shared::{CriterionType, OpennessError, OrgId, PatternKind, Result};

    fn org() -> Organization {
        Organization {
            id: OrgId(0),
            name: "Alpha".into(),
            base_url: "https://alpha.example".into(),
            url_issue: None,
        }
    }

    fn criterion(threshold: Option<f64>) -> Criterion {
        Criterion {
            id: "open_access_policy".into(),
            name: "Open access policy".into(),
            description: String::new(),
            kind: CriterionType::Strategic,
            text_patterns: vec!["open access policy".into()],
            url_patterns: vec![],
            weight: 1.0,
            confidence_threshold: threshold,
            dimension_id: "d".into(),
            factor_id: "f".into(),
        }
    }

    fn cand(url: &str, pattern: &str, depth: u32, offset: usize) -> EvidenceCandidate {
        EvidenceCandidate {
            criterion_id: "open_access_policy".into(),
            source_url: url.into(),
            pattern: pattern.into(),
            excerpt: format!("{pattern} @ {offset}"),
            kind: PatternKind::Text,
            page_depth: depth,
            offset,
        }
    }

    fn config() -> AdjudicatorConfig {
        AdjudicatorConfig {
            concurrency: 2,
            requests_per_minute: 6000,
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                multiplier: 2.0,
                max_delay: Duration::from_millis(5),
            },
            confidence_threshold: 0.5,
            max_evidence: 3,
        }
    }

    /// Fails with the given error `failures` times, then answers.
    struct Flaky {
        failures: u32,
        transient: bool,
        calls: AtomicU32,
        confidence: f64,
    }

    impl Flaky {
        fn new(failures: u32, transient: bool, confidence: f64) -> Self {
            Self {
                failures,
                transient,
                calls: AtomicU32::new(0),
                confidence,
            }
        }
    }

    #[async_trait]
    impl Evaluator for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn evaluate(&self, request: &EvaluationRequest) -> Result<Verdict> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(if self.transient {
                    OpennessError::evaluation_transient("503")
                } else {
                    OpennessError::evaluation_permanent("401")
                });
            }
            Ok(Verdict {
                fulfilled: !request.evidence.is_empty(),
                confidence: self.confidence,
                justification: "judged".into(),
                source_url: None,
            })
        }
    }

    #[test]
    fn ranking_prefers_pattern_diversity_then_volume_then_depth() {
        let candidates = vec![
            cand("https://a/deep", "p1", 2, 0),
            cand("https://a/deep", "p1", 2, 50),
            cand("https://a/deep", "p1", 2, 90),
            cand("https://a/rich", "p2", 1, 40),
            cand("https://a/rich", "p1", 1, 10),
            cand("https://a/shallow", "p1", 0, 5),
        ];
        let ranked = rank_candidates(&candidates, 3);

        assert_eq!(ranked.len(), 3);
        // Two distinct patterns win, offsets ascending within the page.
        assert_eq!(ranked[0].source_url, "https://a/rich");
        assert_eq!(ranked[0].offset, 10);
        assert_eq!(ranked[1].offset, 40);
        // Then three matches beat one.
        assert_eq!(ranked[2].source_url, "https://a/deep");
    }

    #[test]
    fn ranking_ties_break_on_depth_then_url() {
        let candidates = vec![
            cand("https://a/z", "p", 1, 0),
            cand("https://a/b", "p", 1, 0),
            cand("https://a/root", "p", 0, 0),
        ];
        let urls: Vec<String> = rank_candidates(&candidates, 10)
            .into_iter()
            .map(|c| c.source_url)
            .collect();
        assert_eq!(urls, vec!["https://a/root", "https://a/b", "https://a/z"]);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
    }

    #[tokio::test]
    async fn without_evaluator_uses_patterns() {
        let adjudicator = Adjudicator::pattern_only(config());
        let cancel = CancellationToken::new();

        let evidence = [cand("https://a/", "open access policy", 0, 3)];
        let hit = adjudicator
            .adjudicate(&org(), &criterion(None), &evidence, &cancel)
            .await;
        assert!(hit.fulfilled);
        assert_eq!(hit.confidence, PATTERN_ONLY_FULFILLED_CONFIDENCE);
        assert_eq!(hit.origin, DecisionOrigin::PatternOnly);
        assert!(hit.low_confidence);
        assert_eq!(hit.source_url.as_deref(), Some("https://a/"));

        let miss = adjudicator.adjudicate(&org(), &criterion(None), &[], &cancel).await;
        assert!(!miss.fulfilled);
        assert_eq!(miss.confidence, PATTERN_ONLY_UNFULFILLED_CONFIDENCE);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let flaky = Arc::new(Flaky::new(2, true, 0.9));
        let adjudicator = Adjudicator::new(Some(flaky.clone()), config());

        let evidence = [cand("https://a/", "p", 0, 0)];
        let result = adjudicator
            .adjudicate(&org(), &criterion(None), &evidence, &CancellationToken::new())
            .await;

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.origin, DecisionOrigin::Llm);
        assert!(result.fulfilled);
        assert!(!result.low_confidence);
        assert_eq!(result.evidence_excerpt.as_deref(), Some("p @ 0"));
    }

    #[tokio::test]
    async fn exhausted_retries_fall_back() {
        let flaky = Arc::new(Flaky::new(10, true, 0.9));
        let adjudicator = Adjudicator::new(Some(flaky.clone()), config());

        let result = adjudicator
            .adjudicate(&org(), &criterion(None), &[], &CancellationToken::new())
            .await;

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.origin, DecisionOrigin::PatternOnly);
        assert!(!result.fulfilled);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let flaky = Arc::new(Flaky::new(1, false, 0.9));
        let adjudicator = Adjudicator::new(Some(flaky.clone()), config());

        let evidence = [cand("https://a/", "p", 0, 0)];
        let result = adjudicator
            .adjudicate(&org(), &criterion(None), &evidence, &CancellationToken::new())
            .await;

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.origin, DecisionOrigin::PatternOnly);
        assert!(result.fulfilled);
    }

    #[tokio::test]
    async fn threshold_only_flags_low_confidence() {
        let adjudicator = Adjudicator::new(Some(Arc::new(Flaky::new(0, true, 0.55))), config());
        let cancel = CancellationToken::new();
        let evidence = [cand("https://a/", "p", 0, 0)];

        let global = adjudicator.adjudicate(&org(), &criterion(None), &evidence, &cancel).await;
        assert!(global.fulfilled);
        assert!(!global.low_confidence);

        let strict = adjudicator
            .adjudicate(&org(), &criterion(Some(0.7)), &evidence, &cancel)
            .await;
        assert!(strict.fulfilled);
        assert!(strict.low_confidence);
    }

    #[tokio::test]
    async fn out_of_range_confidence_is_clamped() {
        let adjudicator = Adjudicator::new(Some(Arc::new(Flaky::new(0, true, f64::NAN))), config());
        let result = adjudicator
            .adjudicate(&org(), &criterion(None), &[], &CancellationToken::new())
            .await;
        assert_eq!(result.confidence, 0.0);
        assert!(result.low_confidence);
    }

    #[tokio::test]
    async fn cancelled_run_skips_the_evaluator() {
        let flaky = Arc::new(Flaky::new(0, true, 0.9));
        let adjudicator = Adjudicator::new(Some(flaky.clone()), config());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = adjudicator
            .adjudicate(&org(), &criterion(None), &[cand("https://a/", "p", 0, 0)], &cancel)
            .await;

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.origin, DecisionOrigin::PatternOnly);
    }
}
