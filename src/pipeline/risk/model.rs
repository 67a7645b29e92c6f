use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tracing::{info, warn};

use super::rules::RULES;
use super::RiskError;

/// A trained binary classifier over one condition's feature vector.
pub trait RiskModel: Send + Sync {
    fn name(&self) -> &str;

    /// Input column names in order, when the model file declares them.
    fn feature_names(&self) -> Option<&[String]> {
        None
    }

    /// `true` when the model flags the pattern as high risk.
    fn predict(&self, features: &[f32]) -> Result<bool, RiskError>;
}

/// Logistic-regression weights exported as JSON.
///
/// ```json
/// {"features": ["glucose", "hba1c", "age", "bmi"],
///  "weights": [0.031, 0.9, 0.02, 0.05], "intercept": -12.4,
///  "scaler": {"mean": [...], "scale": [...]}, "threshold": 0.5}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct LogisticModel {
    #[serde(skip)]
    name: String,
    features: Vec<String>,
    weights: Vec<f64>,
    intercept: f64,
    #[serde(default)]
    scaler: Option<Scaler>,
    #[serde(default = "default_threshold")]
    threshold: f64,
}

/// Standardisation applied before the weights (`(x - mean) / scale`).
#[derive(Debug, Clone, Deserialize)]
pub struct Scaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

fn default_threshold() -> f64 {
    0.5
}

impl LogisticModel {
    pub fn from_json_str(name: &str, json: &str) -> Result<Self, RiskError> {
        let mut model: Self = serde_json::from_str(json).map_err(|e| RiskError::InvalidModel {
            model: name.to_string(),
            reason: e.to_string(),
        })?;
        model.name = name.to_string();
        model.validate()?;
        Ok(model)
    }

    pub fn load(name: &str, path: &Path) -> Result<Self, RiskError> {
        let json = std::fs::read_to_string(path).map_err(|e| RiskError::ModelLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(name, &json)
    }

    fn validate(&self) -> Result<(), RiskError> {
        let invalid = |reason: String| RiskError::InvalidModel {
            model: self.name.clone(),
            reason,
        };
        let n = self.features.len();
        if n == 0 {
            return Err(invalid("no features".into()));
        }
        if self.weights.len() != n {
            return Err(invalid(format!("{} weights for {n} features", self.weights.len())));
        }
        if let Some(scaler) = &self.scaler {
            if scaler.mean.len() != n || scaler.scale.len() != n {
                return Err(invalid("scaler length does not match features".into()));
            }
            if scaler.scale.iter().any(|s| *s == 0.0) {
                return Err(invalid("scaler has a zero scale".into()));
            }
        }
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(invalid(format!("threshold {} outside (0, 1)", self.threshold)));
        }
        let all_finite = self
            .weights
            .iter()
            .chain(std::iter::once(&self.intercept))
            .all(|w| w.is_finite());
        if !all_finite {
            return Err(invalid("non-finite weight".into()));
        }
        Ok(())
    }

    /// Probability of the positive class.
    pub fn probability(&self, features: &[f32]) -> Result<f64, RiskError> {
        if features.len() != self.weights.len() {
            return Err(RiskError::FeatureMismatch {
                model: self.name.clone(),
                expected: self.weights.len(),
                actual: features.len(),
            });
        }
        let mut z = self.intercept;
        for (i, (&x, &w)) in features.iter().zip(&self.weights).enumerate() {
            let mut x = f64::from(x);
            if !x.is_finite() {
                return Err(RiskError::Inference(format!(
                    "non-finite value for {}",
                    self.features[i]
                )));
            }
            if let Some(scaler) = &self.scaler {
                x = (x - scaler.mean[i]) / scaler.scale[i];
            }
            z += w * x;
        }
        Ok(1.0 / (1.0 + (-z).exp()))
    }
}

impl RiskModel for LogisticModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn feature_names(&self) -> Option<&[String]> {
        Some(&self.features)
    }

    fn predict(&self, features: &[f32]) -> Result<bool, RiskError> {
        Ok(self.probability(features)? >= self.threshold)
    }
}

#[cfg(feature = "onnx-models")]
mod onnx {
    use super::{RiskError, RiskModel};
    use ort::session::Session;
    use std::path::Path;
    use std::sync::Mutex;

    /// Classifier exported to ONNX (e.g. via skl2onnx), first output = label.
    ///
    /// Uses interior mutability (Mutex) because ort::Session::run requires `&mut self`
    /// but the RiskModel trait exposes `&self` for shared usage across requests.
    pub struct OnnxRiskModel {
        name: String,
        session: Mutex<Session>,
    }

    impl OnnxRiskModel {
        pub fn load(name: &str, path: &Path) -> Result<Self, RiskError> {
            let load_err = |reason: String| RiskError::ModelLoad {
                path: path.to_path_buf(),
                reason,
            };
            let session = Session::builder()
                .map_err(|e: ort::Error| load_err(e.to_string()))?
                .with_intra_threads(1)
                .map_err(|e: ort::Error| load_err(e.to_string()))?
                .commit_from_file(path)
                .map_err(|e: ort::Error| load_err(format!("ONNX load failed: {e}")))?;

            tracing::info!(model = name, path = %path.display(), "ONNX risk model loaded");
            Ok(Self {
                name: name.to_string(),
                session: Mutex::new(session),
            })
        }
    }

    impl RiskModel for OnnxRiskModel {
        fn name(&self) -> &str {
            &self.name
        }

        fn predict(&self, features: &[f32]) -> Result<bool, RiskError> {
            use ort::value::TensorRef;

            let input = ndarray::Array2::from_shape_vec((1, features.len()), features.to_vec())
                .map_err(|e| RiskError::Inference(e.to_string()))?;
            let tensor = TensorRef::from_array_view(&input)
                .map_err(|e| RiskError::Inference(e.to_string()))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| RiskError::Inference("Session lock poisoned".to_string()))?;
            let outputs = session
                .run(ort::inputs![tensor])
                .map_err(|e| RiskError::Inference(format!("ONNX inference failed: {e}")))?;

            if let Ok((_, labels)) = outputs[0].try_extract_tensor::<i64>() {
                return labels
                    .first()
                    .map(|label| *label == 1)
                    .ok_or_else(|| RiskError::Inference("empty label output".into()));
            }
            let (_, scores) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| RiskError::Inference(format!("Output extraction: {e}")))?;
            scores
                .first()
                .map(|score| *score >= 0.5)
                .ok_or_else(|| RiskError::Inference("empty score output".into()))
        }
    }
}

#[cfg(feature = "onnx-models")]
pub use onnx::OnnxRiskModel;

/// Scripted model for tests; records the last feature vector it saw.
pub struct MockRiskModel {
    name: String,
    outcome: Result<bool, String>,
    last_features: Mutex<Option<Vec<f32>>>,
}

impl MockRiskModel {
    pub fn flagging(name: &str) -> Self {
        Self::with_outcome(name, Ok(true))
    }

    pub fn clear(name: &str) -> Self {
        Self::with_outcome(name, Ok(false))
    }

    pub fn failing(name: &str, reason: &str) -> Self {
        Self::with_outcome(name, Err(reason.to_string()))
    }

    fn with_outcome(name: &str, outcome: Result<bool, String>) -> Self {
        Self {
            name: name.to_string(),
            outcome,
            last_features: Mutex::new(None),
        }
    }

    pub fn last_features(&self) -> Option<Vec<f32>> {
        self.last_features.lock().ok().and_then(|f| f.clone())
    }
}

impl RiskModel for MockRiskModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, features: &[f32]) -> Result<bool, RiskError> {
        if let Ok(mut last) = self.last_features.lock() {
            *last = Some(features.to_vec());
        }
        self.outcome.clone().map_err(RiskError::Inference)
    }
}

/// Loaded models by name. Read-only after start-up.
#[derive(Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, Arc<dyn RiskModel>>,
}

impl ModelRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: Arc<dyn RiskModel>) -> Self {
        self.models.insert(model.name().to_string(), model);
        self
    }

    /// Load `{name}_model.onnx` (with the `onnx-models` feature) or
    /// `{name}_model.json` for every condition from `dir`.
    ///
    /// A missing or unreadable model is logged and skipped; that condition
    /// is then assessed by thresholds alone.
    pub fn load(dir: &Path) -> Self {
        let mut registry = Self::empty();
        if !dir.is_dir() {
            info!(dir = %dir.display(), "Model directory not found, threshold rules only");
            return registry;
        }

        for rule in &RULES {
            match load_model(dir, rule.model_name) {
                Ok(Some(model)) => {
                    if let Some(names) = model.feature_names() {
                        if !names.iter().map(String::as_str).eq(rule.feature_names()) {
                            warn!(
                                model = rule.model_name,
                                declared = ?names,
                                "Model feature order does not match, skipping"
                            );
                            continue;
                        }
                    }
                    info!(model = rule.model_name, "Risk model loaded");
                    registry.models.insert(rule.model_name.to_string(), model);
                }
                Ok(None) => {
                    info!(model = rule.model_name, "No model file, threshold rules only");
                }
                Err(e) => {
                    warn!(model = rule.model_name, error = %e, "Risk model failed to load");
                }
            }
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn RiskModel>> {
        self.models.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

fn load_model(dir: &Path, name: &str) -> Result<Option<Arc<dyn RiskModel>>, RiskError> {
    #[cfg(feature = "onnx-models")]
    {
        let onnx_path = dir.join(format!("{name}_model.onnx"));
        if onnx_path.is_file() {
            return Ok(Some(Arc::new(OnnxRiskModel::load(name, &onnx_path)?)));
        }
    }

    let json_path = dir.join(format!("{name}_model.json"));
    if json_path.is_file() {
        return Ok(Some(Arc::new(LogisticModel::load(name, &json_path)?)));
    }
    Ok(None)
}
