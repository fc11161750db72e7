//! Regression scoring
//!
//! The model is a linear regression artifact stored as JSON:
//!
//! ```json
//! {
//!   "name": "purchase_regressor",
//!   "version": "1.0.0",
//!   "features": ["last_page_1", "..."],
//!   "coefficients": [0.1, "..."],
//!   "intercept": 2.5
//! }
//! ```
//!
//! Features may be listed in any order; each must be one the transformer
//! produces. The model is loaded once and never mutated, so one
//! [`Predictor`] is shared across requests.

use crate::types::{CleanedRow, FEATURE_COLUMNS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Failure loading the model artifact (fatal at startup)
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Cannot read model file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse model file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Model schema mismatch: {0}")]
    Schema(String),
}

#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("Cannot score an empty batch")]
    EmptyBatch,

    #[error("Row {row} has non-finite value for '{feature}'")]
    InvalidInput { row: usize, feature: &'static str },

    #[error("Model produced a non-finite score for row {0}")]
    NonFiniteScore(usize),
}

impl PredictionError {
    pub fn kind(&self) -> &'static str {
        match self {
            PredictionError::EmptyBatch => "empty_batch",
            PredictionError::InvalidInput { .. } => "invalid_input",
            PredictionError::NonFiniteScore(_) => "non_finite_score",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub name: String,
    pub version: String,
    pub features: Vec<String>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

#[derive(Debug, Clone)]
pub struct Predictor {
    model: LinearModel,
    /// Coefficient per position in [`CleanedRow::to_vector`]
    weights: [f64; FEATURE_COLUMNS.len()],
}

impl Predictor {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let text = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model: LinearModel = serde_json::from_str(&text)?;
        let predictor = Self::from_model(model)?;

        info!(
            path = %path.display(),
            name = %predictor.model.name,
            version = %predictor.model.version,
            features = predictor.model.features.len(),
            "Model loaded"
        );

        Ok(predictor)
    }

    /// Validate `model` against the transformer's feature set
    pub fn from_model(model: LinearModel) -> Result<Self, ModelError> {
        if model.features.len() != model.coefficients.len() {
            return Err(ModelError::Schema(format!(
                "{} features but {} coefficients",
                model.features.len(),
                model.coefficients.len()
            )));
        }
        if !model.intercept.is_finite() || model.coefficients.iter().any(|c| !c.is_finite()) {
            return Err(ModelError::Schema("non-finite parameter".to_string()));
        }

        let mut weights = [0.0; FEATURE_COLUMNS.len()];
        let mut seen = [false; FEATURE_COLUMNS.len()];

        for (name, coefficient) in model.features.iter().zip(&model.coefficients) {
            let index = FEATURE_COLUMNS
                .iter()
                .position(|c| *c == name.as_str())
                .ok_or_else(|| ModelError::Schema(format!("unknown feature '{}'", name)))?;
            if seen[index] {
                return Err(ModelError::Schema(format!("feature '{}' listed twice", name)));
            }
            seen[index] = true;
            weights[index] = *coefficient;
        }

        Ok(Self { model, weights })
    }

    pub fn model(&self) -> &LinearModel {
        &self.model
    }

    /// One score per row, same order
    pub fn predict(&self, rows: &[CleanedRow]) -> Result<Vec<f64>, PredictionError> {
        if rows.is_empty() {
            return Err(PredictionError::EmptyBatch);
        }

        rows.iter()
            .enumerate()
            .map(|(i, row)| {
                let values = row.to_vector();
                if let Some(j) = values.iter().position(|v| !v.is_finite()) {
                    return Err(PredictionError::InvalidInput {
                        row: i,
                        feature: FEATURE_COLUMNS[j],
                    });
                }

                let score = values
                    .iter()
                    .zip(&self.weights)
                    .fold(self.model.intercept, |acc, (v, w)| acc + v * w);

                if score.is_finite() {
                    Ok(score)
                } else {
                    Err(PredictionError::NonFiniteScore(i))
                }
            })
            .collect()
    }
}
