pub mod admission;
pub mod config;
pub mod decoder;
pub mod ingest;
pub mod metrics;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod results;
pub mod scoring;
pub mod testing;
pub mod transcript;

pub use admission::{Admission, AdmissionConfig, AdmissionStatus, BackpressureController, CapacityError};
pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError};
pub use decoder::{DecodeError, Framing, RecordDecoder, RecordStream};
pub use ingest::{Accepted, IngestReport, IngestionCoordinator, Rejection, SubmitError};
pub use pipeline::{Pipeline, PipelineError, PipelineStatus};
pub use processor::{PoolStatus, ProcessorConfig, WorkerPool};
pub use queue::{ProcessingTask, QueueError, WorkQueue};
pub use results::{ResultError, ResultRecord, ResultStatus, ResultStore};
pub use scoring::{scorer_factory, LexiconScorer, Scorer, ScorerFactory, ScoringError};
pub use transcript::{RecordError, TranscriptRecord};
