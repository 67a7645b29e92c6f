use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{info, warn};

use super::model::ModelRegistry;
use super::rules::{ConditionRule, RULES};
use super::types::{LabValues, Prediction, RiskLevel, RiskReport};
use crate::pipeline::fields::FieldDictionary;

const INSUFFICIENT_DATA: &str = "Insufficient Data";
const MODEL_FAILED: &str = "Insufficient data for this assessment";

const NO_DATA_SUGGESTION: &str =
    "ℹ️ No readable data found. Please enter values manually or upload a clearer file.";
const HEALTHY_SUGGESTION: &str =
    "🎉 Great News: Your vitals look healthy! Keep up the good lifestyle.";

/// Runs threshold rules and optional models over lab values.
pub struct RiskAssessor {
    registry: Arc<ModelRegistry>,
}

impl RiskAssessor {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn assess(&self, values: &LabValues) -> RiskReport {
        let mut suggestions = Vec::new();
        let predictions: Vec<Prediction> = RULES
            .iter()
            .map(|rule| self.assess_condition(rule, values, &mut suggestions))
            .collect();

        let assessed = predictions
            .iter()
            .filter(|p| p.risk != RiskLevel::Unknown)
            .count();
        if assessed == 0 {
            suggestions = vec![NO_DATA_SUGGESTION.to_string()];
        } else if suggestions.is_empty() {
            suggestions.push(HEALTHY_SUGGESTION.to_string());
        }

        let report = RiskReport {
            predictions,
            suggestions,
            ignored_fields: Vec::new(),
        };
        info!(
            fields = values.len(),
            assessed,
            flagged = report.flagged(),
            "Risk assessment complete"
        );
        report
    }

    fn assess_condition(
        &self,
        rule: &ConditionRule,
        values: &LabValues,
        suggestions: &mut Vec<String>,
    ) -> Prediction {
        if !rule.is_assessable(values) {
            return Prediction::new(rule.condition, RiskLevel::Unknown, INSUFFICIENT_DATA);
        }

        if let Some(reason) = rule.threshold_flag(values) {
            suggestions.push(rule.rule_suggestion.to_string());
            return Prediction::new(rule.condition, RiskLevel::HighRisk, reason);
        }

        let Some(model) = self.registry.get(rule.model_name) else {
            return Prediction::new(rule.condition, RiskLevel::Healthy, rule.normal_reason);
        };

        match model.predict(&rule.feature_vector(values)) {
            Ok(true) => {
                suggestions.push(rule.model_suggestion.to_string());
                Prediction::new(rule.condition, RiskLevel::HighRisk, rule.model_reason)
            }
            Ok(false) => Prediction::new(rule.condition, RiskLevel::Healthy, rule.normal_reason),
            Err(e) => {
                warn!(
                    condition = rule.condition.as_str(),
                    model = rule.model_name,
                    error = %e,
                    "Risk model failed, condition left unassessed"
                );
                Prediction::new(rule.condition, RiskLevel::Unknown, MODEL_FAILED)
            }
        }
    }
}

/// Validate manually entered values.
///
/// Keys may be canonical names or any dictionary synonym. Numbers and
/// numeric strings are accepted; blanks and nulls count as "not entered".
/// Everything else, and values outside the field's plausible range, end up
/// in the second list by key.
pub fn sanitize_manual_values(
    dictionary: &FieldDictionary,
    raw: &Map<String, Value>,
) -> (LabValues, Vec<String>) {
    let mut values = LabValues::new();
    let mut ignored = Vec::new();

    for (key, value) in raw {
        let number = match value {
            Value::Null => continue,
            Value::Number(n) => n.as_f64(),
            Value::String(s) if s.trim().is_empty() => continue,
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };

        let name = resolve_key(dictionary, key);
        match (name, number) {
            (Some(name), Some(v)) if v.is_finite() && dictionary.is_plausible(&name, v) => {
                values.insert(name, v);
            }
            _ => ignored.push(key.clone()),
        }
    }

    (values, ignored)
}

fn resolve_key(dictionary: &FieldDictionary, key: &str) -> Option<String> {
    let lowered = key.trim().to_lowercase();
    if dictionary.field(&lowered).is_some() {
        return Some(lowered);
    }
    dictionary
        .resolve_label(&lowered, 1.0)
        .filter(|m| !m.fuzzy)
        .and_then(|m| dictionary.fields.get(m.field))
        .map(|spec| spec.name.clone())
}
