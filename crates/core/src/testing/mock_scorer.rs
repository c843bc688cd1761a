//! Mock scorer for testing.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::scoring::{Scorer, ScoringError};

#[derive(Debug, Default)]
struct Script {
    score: f64,
    panics_left: usize,
    failures_left: usize,
    failure_message: String,
    /// Panic on every text containing one of these.
    poison: Vec<String>,
    delay: Option<Duration>,
    calls: Vec<String>,
}

/// Scripted implementation of the Scorer trait.
///
/// Clones share one script, so every worker built from
/// [`scorer_factory`](crate::scoring::scorer_factory) follows it and the
/// test can inspect the combined calls.
///
/// # Example
///
/// ```rust,ignore
/// use parley_core::testing::MockScorer;
///
/// let scorer = MockScorer::new(0.8);
/// scorer.panic_next(2);
/// scorer.panic_on("poison pill");
///
/// // Build the pipeline with scorer_factory(scorer.clone())...
///
/// assert_eq!(scorer.calls(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct MockScorer {
    script: Arc<Mutex<Script>>,
}

impl Default for MockScorer {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl MockScorer {
    /// Create a mock returning `score` for every text.
    pub fn new(score: f64) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                score,
                ..Script::default()
            })),
        }
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_score(&self, score: f64) {
        self.script().score = score;
    }

    /// Panic on the next `n` calls.
    pub fn panic_next(&self, n: usize) {
        self.script().panics_left = n;
    }

    /// Return a scoring error on the next `n` calls.
    pub fn fail_next(&self, n: usize, message: &str) {
        let mut script = self.script();
        script.failures_left = n;
        script.failure_message = message.to_string();
    }

    /// Panic whenever the text contains `needle`.
    pub fn panic_on(&self, needle: &str) {
        self.script().poison.push(needle.to_string());
    }

    /// Sleep this long before every score.
    pub fn set_delay(&self, delay: Duration) {
        self.script().delay = Some(delay);
    }

    /// Number of calls made so far, including ones that panicked.
    pub fn calls(&self) -> usize {
        self.script().calls.len()
    }

    /// Texts passed to the scorer, in call order.
    pub fn recorded_texts(&self) -> Vec<String> {
        self.script().calls.clone()
    }
}

impl Scorer for MockScorer {
    fn name(&self) -> &str {
        "mock"
    }

    fn score(&mut self, text: &str) -> Result<f64, ScoringError> {
        let (delay, verdict) = {
            let mut script = self.script();
            script.calls.push(text.to_string());

            let verdict = if script.panics_left > 0 {
                script.panics_left -= 1;
                None
            } else if script.poison.iter().any(|p| text.contains(p.as_str())) {
                None
            } else if script.failures_left > 0 {
                script.failures_left -= 1;
                Some(Err(ScoringError::Failed(script.failure_message.clone())))
            } else {
                Some(Ok(script.score))
            };
            (script.delay, verdict)
        };

        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        // The guard is dropped before panicking so the script stays usable.
        match verdict {
            Some(result) => result,
            None => panic!("mock scorer panic"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_behaviour() {
        let mut scorer = MockScorer::new(0.25);
        scorer.fail_next(1, "nope");

        assert_eq!(
            scorer.score("a"),
            Err(ScoringError::Failed("nope".to_string()))
        );
        assert_eq!(scorer.score("b"), Ok(0.25));
        assert_eq!(scorer.recorded_texts(), vec!["a", "b"]);
    }

    #[test]
    fn test_clones_share_script() {
        let scorer = MockScorer::new(0.5);
        let mut clone = scorer.clone();
        scorer.panic_on("bad");

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| clone.score("bad one")));
        assert!(result.is_err());
        assert_eq!(clone.score("good one"), Ok(0.5));
        assert_eq!(scorer.calls(), 2);
    }
}
