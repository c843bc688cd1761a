//! Sentiment scoring and result enrichment.
//!
//! The scoring function is opaque to the pipeline: anything implementing
//! [`Scorer`] can be plugged in. [`LexiconScorer`] is the built-in default.

mod config;
mod enrich;
mod lexicon;
mod traits;

pub use config::{ScoringConfig, TagRule};
pub use enrich::{Enricher, Enrichment};
pub use lexicon::LexiconScorer;
pub use traits::{scorer_factory, Scorer, ScorerFactory, ScoringError};
