use std::sync::Arc;

use parley_core::{Config, IngestionCoordinator, Pipeline, ResultStore};

/// Shared application state
pub struct AppState {
    config: Config,
    pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(config: Config, pipeline: Arc<Pipeline>) -> Self {
        Self { config, pipeline }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn coordinator(&self) -> &IngestionCoordinator {
        self.pipeline.coordinator()
    }

    pub fn results(&self) -> &dyn ResultStore {
        self.pipeline.results().as_ref()
    }
}
