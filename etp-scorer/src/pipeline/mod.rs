//! Extract-Transform-Predict pipeline
//!
//! - **Extract**: pull a batch from the stream, join with stored features
//! - **Transform**: impute, drop unsalvageable rows, derive features
//! - **Predict**: score cleaned rows with the loaded regression model
//!
//! The orchestrator sequences the three stages for one request. Every stage
//! failure is surfaced as a typed [`PipelineError`]; no stage turns a failure
//! into an empty success.

pub mod extractor;
pub mod orchestrator;
pub mod predictor;
pub mod transformer;

pub use extractor::{ExtractedBatch, ExtractionError, FeatureExtractor};
pub use orchestrator::{EtpPipeline, RunRequest};
pub use predictor::{LinearModel, ModelError, PredictionError, Predictor};
pub use transformer::{FeatureTransformer, TransformOutput, TransformationError};

use etp_common::events::Stage;
use thiserror::Error;

/// Failure of one pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Run requested before stream/store were wired
    #[error("Data resources not initialized. Call /init_data_resources first.")]
    NotReady,

    #[error("Invalid batch size: {0} (must be at least 1)")]
    InvalidBatchSize(usize),

    #[error("Extraction failed: {0}")]
    Extraction(ExtractionError),

    #[error("Transformation failed: {0}")]
    Transformation(#[from] TransformationError),

    #[error("Prediction failed: {0}")]
    Prediction(#[from] PredictionError),

    /// Scored ids and predictions disagree in length
    #[error("Prediction count {predictions} does not match scored row count {rows}")]
    Misaligned { rows: usize, predictions: usize },

    #[error("Run cancelled")]
    Cancelled,
}

impl From<ExtractionError> for PipelineError {
    fn from(e: ExtractionError) -> Self {
        match e {
            ExtractionError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::Extraction(other),
        }
    }
}

impl PipelineError {
    /// Stage the failure happened in, if any stage ran
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::NotReady | PipelineError::InvalidBatchSize(_) => None,
            PipelineError::Extraction(_) => Some(Stage::Extract),
            PipelineError::Transformation(_) => Some(Stage::Transform),
            PipelineError::Prediction(_) => Some(Stage::Predict),
            PipelineError::Misaligned { .. } => Some(Stage::Assemble),
            PipelineError::Cancelled => None,
        }
    }

    /// Stable machine-readable failure kind
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::NotReady => "resources_not_initialized",
            PipelineError::InvalidBatchSize(_) => "invalid_batch_size",
            PipelineError::Extraction(e) => e.kind(),
            PipelineError::Transformation(e) => e.kind(),
            PipelineError::Prediction(e) => e.kind(),
            PipelineError::Misaligned { .. } => "misaligned_predictions",
            PipelineError::Cancelled => "cancelled",
        }
    }
}
