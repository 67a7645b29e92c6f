//! Risk estimation from extracted lab values.
//!
//! Each condition is checked against fixed clinical thresholds first; an
//! optional trained model can then flag patterns the thresholds miss.

pub mod assessor;
pub mod model;
pub mod rules;
pub mod types;

pub use assessor::{sanitize_manual_values, RiskAssessor};
pub use model::{LogisticModel, MockRiskModel, ModelRegistry, RiskModel};
#[cfg(feature = "onnx-models")]
pub use model::OnnxRiskModel;
pub use rules::{ConditionRule, Feature, RULES};
pub use types::{Condition, LabValues, Prediction, RiskLevel, RiskReport};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Cannot load model {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    #[error("Invalid model '{model}': {reason}")]
    InvalidModel { model: String, reason: String },

    #[error("Model '{model}' expects {expected} features, got {actual}")]
    FeatureMismatch {
        model: String,
        expected: usize,
        actual: usize,
    },

    #[error("Inference failed: {0}")]
    Inference(String),
}
