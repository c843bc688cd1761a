//! Word-list sentiment scorer.

use std::collections::HashSet;

use super::traits::{Scorer, ScoringError};

const POSITIVE: &[&str] = &[
    "appreciate",
    "awesome",
    "excellent",
    "fantastic",
    "glad",
    "good",
    "great",
    "happy",
    "helpful",
    "love",
    "perfect",
    "pleased",
    "resolved",
    "satisfied",
    "thank",
    "thanks",
    "wonderful",
];

const NEGATIVE: &[&str] = &[
    "angry",
    "awful",
    "bad",
    "broken",
    "cancel",
    "complaint",
    "disappointed",
    "frustrated",
    "hate",
    "horrible",
    "poor",
    "problem",
    "terrible",
    "unhappy",
    "upset",
    "useless",
    "worst",
];

/// Deterministic scorer counting positive and negative words.
///
/// Scores fall in `[0, 1]`: 1 when only positive words occur, 0 when only
/// negative ones do, 0.5 for neutral text.
#[derive(Debug, Clone)]
pub struct LexiconScorer {
    positive: HashSet<&'static str>,
    negative: HashSet<&'static str>,
}

impl Default for LexiconScorer {
    fn default() -> Self {
        Self {
            positive: POSITIVE.iter().copied().collect(),
            negative: NEGATIVE.iter().copied().collect(),
        }
    }
}

impl LexiconScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Positive and negative word counts in `text`.
    pub fn counts(&self, text: &str) -> (usize, usize) {
        let mut positive = 0;
        let mut negative = 0;
        for word in text
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            if self.positive.contains(word.as_str()) {
                positive += 1;
            } else if self.negative.contains(word.as_str()) {
                negative += 1;
            }
        }
        (positive, negative)
    }
}

impl Scorer for LexiconScorer {
    fn name(&self) -> &str {
        "lexicon"
    }

    fn score(&mut self, text: &str) -> Result<f64, ScoringError> {
        let (positive, negative) = self.counts(text);
        let total = positive + negative;
        if total == 0 {
            return Ok(0.5);
        }
        let balance = (positive as f64 - negative as f64) / total as f64;
        Ok(0.5 + balance / 2.0)
    }
}
