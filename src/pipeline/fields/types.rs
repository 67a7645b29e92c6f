use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::dictionary::FieldDictionary;

/// Where a report's text came from. Drives which scans run and how much
/// the numbers are trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Image,
    Pdf,
    Csv,
    Json,
    Text,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Pdf => "pdf",
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Text => "text",
        }
    }

    /// Text produced by an OCR engine rather than read from the file.
    pub fn is_ocr(&self) -> bool {
        matches!(self, Self::Image)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a value was located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Keyword,
    FuzzyKeyword,
    Column,
    RowLabel,
    StructuredKey,
}

/// A recognised lab value. `value` is always finite, in the canonical unit,
/// and within the field's plausible range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabValue {
    pub name: String,
    pub label: String,
    pub unit: String,
    pub value: f64,
    pub provenance: Provenance,
    /// Label text the value was anchored to.
    pub matched_text: String,
    pub confidence: f32,
}

/// Recognised values in dictionary order. Fields not found are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub source: Option<SourceKind>,
    pub values: Vec<LabValue>,
    pub missing: Vec<String>,
}

impl ExtractionResult {
    pub fn get(&self, name: &str) -> Option<&LabValue> {
        self.values.iter().find(|v| v.name == name)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.get(name).map(|v| v.value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Dictionary fields that were not found.
    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    /// Plain `name → value` view.
    pub fn as_map(&self) -> BTreeMap<String, f64> {
        self.values
            .iter()
            .map(|v| (v.name.clone(), v.value))
            .collect()
    }
}

/// A plausible value offered by one of the scans.
///
/// `rank` orders candidates for the same field: lower wins. Scans encode
/// their own preference into it (proximity for free text, mode and row for
/// tables).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Candidate {
    pub field: usize,
    pub value: f64,
    pub provenance: Provenance,
    pub matched_text: String,
    pub confidence: f32,
    pub rank: (usize, usize, usize),
}

/// Best candidate per field index.
#[derive(Debug, Default)]
pub(crate) struct CandidateSet {
    best: BTreeMap<usize, Candidate>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `candidate` if its field has none yet or it ranks better.
    pub fn offer(&mut self, candidate: Candidate) {
        match self.best.get(&candidate.field) {
            Some(current) if current.rank <= candidate.rank => {}
            _ => {
                self.best.insert(candidate.field, candidate);
            }
        }
    }

    /// Add fields from a lower-priority scan without touching found ones.
    pub fn fill_missing(&mut self, other: CandidateSet) {
        for (field, candidate) in other.best {
            self.best.entry(field).or_insert(candidate);
        }
    }

    pub fn into_result(self, dictionary: &FieldDictionary, source: SourceKind) -> ExtractionResult {
        let mut values = Vec::with_capacity(self.best.len());
        let mut missing = Vec::new();

        for (index, spec) in dictionary.fields.iter().enumerate() {
            match self.best.get(&index) {
                Some(c) if spec.is_plausible(c.value) => values.push(LabValue {
                    name: spec.name.clone(),
                    label: spec.label.clone(),
                    unit: spec.unit.clone(),
                    value: round_value(c.value),
                    provenance: c.provenance,
                    matched_text: c.matched_text.clone(),
                    confidence: c.confidence.clamp(0.0, 1.0),
                }),
                _ => missing.push(spec.name.clone()),
            }
        }

        ExtractionResult {
            source: Some(source),
            values,
            missing,
        }
    }
}

/// Converted values are rounded to 4 decimals so `5.5 mmol/L` reads as
/// `99.088` rather than `99.08800000000001`.
fn round_value(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
