//! Structured scan over JSON uploads.
//!
//! Handles both shapes seen in exported lab results:
//! `{"glucose": 95}` where the key names the field, and
//! `{"test": "Glucose", "value": "95 mg/dL"}` where a string value names the
//! field and a sibling holds the number. The walk is depth-first and the
//! first plausible value per field wins.

use serde_json::{Map, Value};

use super::dictionary::{FieldDictionary, FieldSpec};
use super::extractor::ExtractionSettings;
use super::normalize::{normalize_line, number_tokens, parse_number, ParsedNumber};
use super::types::{Candidate, CandidateSet, Provenance};

const KEY_CONFIDENCE: f32 = 0.95;
const FUZZY_FACTOR: f32 = 0.9;

pub(crate) fn scan_json(
    document: &Value,
    dictionary: &FieldDictionary,
    settings: &ExtractionSettings,
) -> CandidateSet {
    let mut walker = Walker {
        dictionary,
        settings,
        candidates: CandidateSet::new(),
        order: 0,
    };
    walker.visit(document);
    walker.candidates
}

struct Walker<'a> {
    dictionary: &'a FieldDictionary,
    settings: &'a ExtractionSettings,
    candidates: CandidateSet,
    order: usize,
}

impl Walker<'_> {
    fn visit(&mut self, value: &Value) {
        match value {
            Value::Object(map) => self.visit_object(map),
            Value::Array(items) => {
                for item in items {
                    self.visit(item);
                }
            }
            _ => {}
        }
    }

    fn visit_object(&mut self, map: &Map<String, Value>) {
        let unit = sibling_unit(map);

        for (key, value) in map {
            if self.is_ignored_key(key) {
                continue;
            }

            if let Some(label) = self.dictionary.resolve_label(key, self.settings.fuzzy_cutoff) {
                let spec = &self.dictionary.fields[label.field];
                let found = match value {
                    Value::Object(inner) => self.first_plausible(spec, inner, None),
                    other => plausible(spec, scalar(other), unit.as_deref()),
                };
                if let Some(v) = found {
                    self.offer(label.field, v, key, label.fuzzy);
                }
            }

            if let Value::String(text) = value {
                if !has_number(text) {
                    if let Some(label) =
                        self.dictionary.resolve_label(text, self.settings.fuzzy_cutoff)
                    {
                        let spec = &self.dictionary.fields[label.field];
                        if let Some(v) = self.first_plausible(spec, map, Some(key)) {
                            self.offer(label.field, v, text, label.fuzzy);
                        }
                    }
                }
            }

            if value.is_object() || value.is_array() {
                self.visit(value);
            }
        }
    }

    /// First plausible number among the entries of `map`, skipping `except`,
    /// ignored keys and keys that name a field themselves.
    fn first_plausible(
        &self,
        spec: &FieldSpec,
        map: &Map<String, Value>,
        except: Option<&str>,
    ) -> Option<f64> {
        let unit = sibling_unit(map);
        map.iter()
            .filter(|(key, _)| Some(key.as_str()) != except)
            .filter(|(key, _)| !self.is_ignored_key(key))
            .filter(|(key, _)| {
                self.dictionary
                    .resolve_label(key, self.settings.fuzzy_cutoff)
                    .is_none()
            })
            .find_map(|(_, value)| plausible(spec, scalar(value), unit.as_deref()))
    }

    fn is_ignored_key(&self, key: &str) -> bool {
        self.dictionary
            .is_ignored(&normalize_line(&key.replace('_', " ")))
    }

    fn offer(&mut self, field: usize, value: f64, matched: &str, fuzzy: bool) {
        let confidence = if fuzzy {
            KEY_CONFIDENCE * FUZZY_FACTOR
        } else {
            KEY_CONFIDENCE
        };
        self.candidates.offer(Candidate {
            field,
            value,
            provenance: Provenance::StructuredKey,
            matched_text: matched.to_string(),
            confidence,
            rank: (0, self.order, 0),
        });
        self.order += 1;
    }
}

fn scalar(value: &Value) -> Option<ParsedNumber> {
    match value {
        Value::Number(n) => n.as_f64().map(|value| ParsedNumber { value, unit: None }),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

fn plausible(spec: &FieldSpec, parsed: Option<ParsedNumber>, fallback_unit: Option<&str>) -> Option<f64> {
    let parsed = parsed?;
    let unit = parsed.unit.as_deref().or(fallback_unit);
    let value = spec.to_canonical(parsed.value, unit);
    spec.is_plausible(value).then_some(value)
}

/// Unit declared by a `unit` / `units` entry of the same object.
fn sibling_unit(map: &Map<String, Value>) -> Option<String> {
    map.iter()
        .find(|(key, _)| matches!(key.to_lowercase().as_str(), "unit" | "units"))
        .and_then(|(_, value)| value.as_str())
        .map(|unit| unit.trim().to_lowercase())
}

fn has_number(text: &str) -> bool {
    !number_tokens(&normalize_line(text)).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fields::types::SourceKind;
    use crate::pipeline::fields::ExtractionResult;
    use serde_json::json;

    fn scan(document: Value) -> ExtractionResult {
        let dictionary = FieldDictionary::builtin();
        scan_json(&document, &dictionary, &ExtractionSettings::default())
            .into_result(&dictionary, SourceKind::Json)
    }

    #[test]
    fn keys_name_fields() {
        let result = scan(json!({"glucose": 95, "Cholesterol": "210 mg/dL"}));
        assert_eq!(result.value("glucose"), Some(95.0));
        assert_eq!(result.value("cholesterol"), Some(210.0));
        assert_eq!(
            result.get("glucose").unwrap().provenance,
            Provenance::StructuredKey
        );
    }

    #[test]
    fn test_value_sibling_pattern() {
        let result = scan(json!({
            "results": [
                {"test": "Glucose", "value": "95 mg/dL"},
                {"test": "HbA1c", "value": 6.1, "unit": "%"}
            ]
        }));
        assert_eq!(result.value("glucose"), Some(95.0));
        assert_eq!(result.value("hba1c"), Some(6.1));
    }

    #[test]
    fn nested_value_object_with_unit() {
        let result = scan(json!({
            "patient": {"age": 52},
            "labs": {"Hemoglobin": {"value": 135, "unit": "g/L"}}
        }));
        assert_eq!(result.value("age"), Some(52.0));
        assert_eq!(result.value("hemoglobin"), Some(13.5));
    }

    #[test]
    fn sibling_unit_converts_keyed_value() {
        let result = scan(json!({"glucose": 5.5, "unit": "mmol/L"}));
        assert_eq!(result.value("glucose"), Some(99.088));
    }

    #[test]
    fn implausible_values_are_dropped() {
        assert!(scan(json!({"glucose": 9999})).is_empty());
        assert!(scan(json!({"glucose": "pending"})).is_empty());
    }

    #[test]
    fn ignored_keys_are_not_values() {
        let result = scan(json!({"glucose_ref_max": 110, "glucose": 95}));
        assert_eq!(result.value("glucose"), Some(95.0));

        let result = scan(json!({"reference_range": {"glucose": 100}}));
        assert!(result.is_empty());
    }

    #[test]
    fn snake_case_keys() {
        let result = scan(json!({"red_blood_cells": 4.8, "total_cholesterol": 180}));
        assert_eq!(result.value("red_blood_cells"), Some(4.8));
        assert_eq!(result.value("cholesterol"), Some(180.0));
    }
}
