//! Core evaluation logic for the openness crawler.
//!
//! This crate ties crawling, pattern matching, evidence adjudication and
//! aggregation into one end-to-end run ([`Pipeline::run`]).

pub mod adjudicator;
pub mod aggregate;
pub mod llm;
pub mod matcher;
pub mod pipeline;
pub mod rate_limit;

pub use adjudicator::{Adjudicator, AdjudicatorConfig};
pub use aggregate::{RunMeta, aggregate, verify_completeness};
pub use llm::{EvaluationRequest, Evaluator, OpenAiEvaluator, Verdict};
pub use matcher::{CandidateMap, match_pages};
pub use pipeline::{Pipeline, ProgressReporter, SilentProgress, default_evaluation};
