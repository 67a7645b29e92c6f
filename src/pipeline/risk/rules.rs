use super::types::{Condition, LabValues};

/// A model input with the population value used when it was not measured.
#[derive(Debug, Clone, Copy)]
pub struct Feature {
    pub name: &'static str,
    pub default: f64,
}

const fn feature(name: &'static str, default: f64) -> Feature {
    Feature { name, default }
}

/// How one condition is assessed.
///
/// A condition is only assessed when at least one `primary` field is
/// present. Other model inputs are imputed from `Feature::default`.
pub struct ConditionRule {
    pub condition: Condition,
    /// Model file stem: `{model_name}_model.json` / `.onnx`.
    pub model_name: &'static str,
    pub primary: &'static [&'static str],
    /// Model inputs in training column order.
    pub features: &'static [Feature],
    threshold: fn(&LabValues) -> Option<String>,
    pub normal_reason: &'static str,
    pub rule_suggestion: &'static str,
    pub model_reason: &'static str,
    pub model_suggestion: &'static str,
}

impl ConditionRule {
    pub fn is_assessable(&self, values: &LabValues) -> bool {
        self.primary.iter().any(|name| values.contains_key(*name))
    }

    /// Reason text when a clinical threshold is crossed.
    pub fn threshold_flag(&self, values: &LabValues) -> Option<String> {
        (self.threshold)(values)
    }

    pub fn feature_vector(&self, values: &LabValues) -> Vec<f32> {
        self.features
            .iter()
            .map(|f| values.get(f.name).copied().unwrap_or(f.default) as f32)
            .collect()
    }

    pub fn feature_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.features.iter().map(|f| f.name)
    }
}

fn above(values: &LabValues, name: &str, limit: f64) -> bool {
    values.get(name).is_some_and(|v| *v > limit)
}

fn diabetes_threshold(values: &LabValues) -> Option<String> {
    (above(values, "glucose", 140.0) || above(values, "hba1c", 6.5))
        .then(|| "Elevated Glucose/A1C".to_string())
}

fn heart_threshold(values: &LabValues) -> Option<String> {
    (above(values, "cholesterol", 240.0) || above(values, "ldl", 160.0))
        .then(|| "High Cholesterol/LDL".to_string())
}

fn anemia_threshold(values: &LabValues) -> Option<String> {
    values
        .get("hemoglobin")
        .filter(|hb| **hb < 13.0)
        .map(|hb| format!("Low Hemoglobin ({hb})"))
}

const AGE: Feature = feature("age", 45.0);

/// The assessed conditions, in report order.
pub static RULES: [ConditionRule; 3] = [
    ConditionRule {
        condition: Condition::Diabetes,
        model_name: "diabetes",
        primary: &["glucose", "hba1c"],
        features: &[
            feature("glucose", 100.0),
            feature("hba1c", 5.5),
            AGE,
            feature("bmi", 25.0),
        ],
        threshold: diabetes_threshold,
        normal_reason: "Normal Levels",
        rule_suggestion: "⚠️ Diabetes: Consult a Diabetologist. Reduce sugar intake and monitor blood glucose.",
        model_reason: "AI Pattern Detection",
        model_suggestion: "⚠️ Diabetes Pattern: AI detects subtle patterns. Consider a preventive checkup.",
    },
    ConditionRule {
        condition: Condition::Heart,
        model_name: "cardio",
        primary: &["cholesterol", "ldl"],
        features: &[
            feature("cholesterol", 180.0),
            feature("ldl", 100.0),
            feature("hdl", 50.0),
            feature("triglycerides", 150.0),
            AGE,
        ],
        threshold: heart_threshold,
        normal_reason: "Normal Lipid Profile",
        rule_suggestion: "❤️ Heart: Limit saturated fats (red meat, fried food). Consider cardio exercises.",
        model_reason: "AI Anomaly Detected",
        model_suggestion: "❤️ Heart Pattern: AI found potential risks. Monitor blood pressure and lipids.",
    },
    ConditionRule {
        condition: Condition::Anemia,
        model_name: "anemia",
        primary: &["hemoglobin"],
        features: &[
            feature("hemoglobin", 13.5),
            feature("red_blood_cells", 4.5),
            AGE,
        ],
        threshold: anemia_threshold,
        normal_reason: "Normal Levels",
        rule_suggestion: "🩸 Anemia: Increase iron-rich foods (spinach, dates, red meat). Consult a doctor.",
        model_reason: "AI Flagged",
        model_suggestion: "🩸 Anemia Pattern: AI suggests further investigation despite normal levels.",
    },
];

pub fn rule_for(condition: Condition) -> &'static ConditionRule {
    match condition {
        Condition::Diabetes => &RULES[0],
        Condition::Heart => &RULES[1],
        Condition::Anemia => &RULES[2],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, f64)]) -> LabValues {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn diabetes_thresholds_are_strict() {
        let rule = rule_for(Condition::Diabetes);
        assert!(rule.threshold_flag(&values(&[("glucose", 140.0)])).is_none());
        assert!(rule.threshold_flag(&values(&[("glucose", 140.5)])).is_some());
        assert!(rule.threshold_flag(&values(&[("hba1c", 6.5)])).is_none());
        assert_eq!(
            rule.threshold_flag(&values(&[("hba1c", 7.1)])).as_deref(),
            Some("Elevated Glucose/A1C")
        );
    }

    #[test]
    fn heart_thresholds() {
        let rule = rule_for(Condition::Heart);
        assert!(rule.threshold_flag(&values(&[("cholesterol", 240.0), ("ldl", 160.0)])).is_none());
        assert!(rule.threshold_flag(&values(&[("cholesterol", 241.0)])).is_some());
        assert!(rule.threshold_flag(&values(&[("ldl", 161.0)])).is_some());
    }

    #[test]
    fn anemia_threshold_reports_value() {
        let rule = rule_for(Condition::Anemia);
        assert_eq!(
            rule.threshold_flag(&values(&[("hemoglobin", 11.2)])).as_deref(),
            Some("Low Hemoglobin (11.2)")
        );
        assert!(rule.threshold_flag(&values(&[("hemoglobin", 13.0)])).is_none());
    }

    #[test]
    fn assessable_needs_primary_field() {
        let rule = rule_for(Condition::Heart);
        assert!(!rule.is_assessable(&values(&[("hdl", 50.0), ("age", 60.0)])));
        assert!(rule.is_assessable(&values(&[("ldl", 120.0)])));
    }

    #[test]
    fn feature_vector_imputes_in_training_order() {
        let rule = rule_for(Condition::Heart);
        let v = rule.feature_vector(&values(&[("ldl", 130.0), ("age", 62.0)]));
        assert_eq!(v, vec![180.0, 130.0, 50.0, 150.0, 62.0]);

        let diabetes = rule_for(Condition::Diabetes);
        let v = diabetes.feature_vector(&values(&[("glucose", 120.0)]));
        assert_eq!(v, vec![120.0, 5.5, 45.0, 25.0]);
    }

    #[test]
    fn rules_cover_every_condition_once() {
        for condition in [Condition::Diabetes, Condition::Heart, Condition::Anemia] {
            assert_eq!(rule_for(condition).condition, condition);
        }
    }
}
