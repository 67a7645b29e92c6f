use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical field name → value, as produced by extraction or entered by hand.
pub type LabValues = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    Diabetes,
    Heart,
    Anemia,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Diabetes => "Diabetes",
            Self::Heart => "Heart",
            Self::Anemia => "Anemia",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "High Risk")]
    HighRisk,
    Healthy,
    Unknown,
}

/// Outcome for one condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub condition: Condition,
    pub risk: RiskLevel,
    pub reason: String,
}

impl Prediction {
    pub fn new(condition: Condition, risk: RiskLevel, reason: impl Into<String>) -> Self {
        Self {
            condition,
            risk,
            reason: reason.into(),
        }
    }
}

/// Full assessment returned to the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    pub predictions: Vec<Prediction>,
    pub suggestions: Vec<String>,
    /// Manually entered fields that were dropped (unknown name, not a
    /// number, or outside the plausible range).
    #[serde(default)]
    pub ignored_fields: Vec<String>,
}

impl RiskReport {
    pub fn prediction(&self, condition: Condition) -> Option<&Prediction> {
        self.predictions.iter().find(|p| p.condition == condition)
    }

    pub fn flagged(&self) -> usize {
        self.predictions
            .iter()
            .filter(|p| p.risk == RiskLevel::HighRisk)
            .count()
    }
}
