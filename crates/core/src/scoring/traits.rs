//! Trait definitions for the scoring module.

use std::sync::Arc;

use thiserror::Error;

/// Permanent scoring failure. The task is marked failed and not retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    #[error("Scoring failed: {0}")]
    Failed(String),

    #[error("Scorer returned a non-finite score: {0}")]
    NotFinite(f64),
}

/// Computes a sentiment score for a transcript.
///
/// Each worker owns its scorer, built from a [`ScorerFactory`], so scoring
/// state is never shared between workers. Scoring may be arbitrarily slow
/// and may panic; the worker pool contains both.
pub trait Scorer: Send {
    /// Returns the name of this scorer implementation.
    fn name(&self) -> &str;

    fn score(&mut self, text: &str) -> Result<f64, ScoringError>;
}

/// Builds one scorer per worker.
pub type ScorerFactory = Arc<dyn Fn() -> Box<dyn Scorer> + Send + Sync>;

/// Factory handing each worker a clone of `scorer`.
pub fn scorer_factory<S>(scorer: S) -> ScorerFactory
where
    S: Scorer + Clone + Sync + 'static,
{
    Arc::new(move || Box::new(scorer.clone()) as Box<dyn Scorer>)
}
