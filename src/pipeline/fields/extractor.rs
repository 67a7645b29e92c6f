use std::sync::Arc;

use super::dictionary::FieldDictionary;
use super::normalize::normalize_text;
use super::structure::scan_json;
use super::table::{scan_table, sniff_table, CSV_DELIMITERS, TEXT_DELIMITERS};
use super::text::scan_lines;
use super::types::{CandidateSet, ExtractionResult, SourceKind};
use crate::config::ExtractionConfig;

/// Tuning knobs for the scans.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionSettings {
    /// Maximum characters between a keyword and its value in free text.
    pub proximity_window: usize,
    /// Minimum similarity for fuzzy keyword and label matches.
    pub fuzzy_cutoff: f64,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            proximity_window: 40,
            fuzzy_cutoff: 0.80,
        }
    }
}

impl From<&ExtractionConfig> for ExtractionSettings {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            proximity_window: config.proximity_window,
            fuzzy_cutoff: config.fuzzy_cutoff,
        }
    }
}

/// Turns raw report text into recognised lab values.
///
/// Stateless after construction: `extract` takes `&self`, so one instance
/// is shared by every request.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    dictionary: Arc<FieldDictionary>,
    settings: ExtractionSettings,
}

impl FieldExtractor {
    pub fn new(dictionary: Arc<FieldDictionary>, settings: ExtractionSettings) -> Self {
        Self {
            dictionary,
            settings,
        }
    }

    /// Extractor over the bundled dictionary with default settings.
    pub fn builtin() -> Self {
        Self::new(Arc::new(FieldDictionary::builtin()), ExtractionSettings::default())
    }

    pub fn dictionary(&self) -> &FieldDictionary {
        &self.dictionary
    }

    pub fn settings(&self) -> &ExtractionSettings {
        &self.settings
    }

    /// Extract every recognisable value from `text`.
    ///
    /// Never fails: malformed input yields whatever subset could be
    /// identified, possibly nothing.
    pub fn extract(&self, text: &str, source: SourceKind) -> ExtractionResult {
        let candidates = match source {
            SourceKind::Csv => {
                let mut found = self.scan_tabular(text, CSV_DELIMITERS, 1);
                found.fill_missing(self.scan_free_text(text, source));
                found
            }
            SourceKind::Json => match serde_json::from_str::<serde_json::Value>(text) {
                Ok(document) => scan_json(&document, &self.dictionary, &self.settings),
                Err(e) => {
                    tracing::debug!(error = %e, "JSON upload did not parse, using free-text rules");
                    self.scan_free_text(text, source)
                }
            },
            SourceKind::Image | SourceKind::Pdf | SourceKind::Text => {
                let mut found = self.scan_tabular(text, TEXT_DELIMITERS, 2);
                found.fill_missing(self.scan_free_text(text, source));
                found
            }
        };

        let result = candidates.into_result(&self.dictionary, source);
        tracing::info!(
            source = %source,
            fields = result.len(),
            missing = result.missing().len(),
            "Field extraction complete"
        );
        result
    }

    fn scan_tabular(&self, text: &str, delimiters: &[u8], min_rows: usize) -> CandidateSet {
        match sniff_table(text, delimiters, min_rows) {
            Some(table) => {
                tracing::debug!(
                    delimiter = %(table.delimiter as char).escape_default(),
                    rows = table.rows.len(),
                    "Scanning table"
                );
                scan_table(&table, &self.dictionary, &self.settings)
            }
            None => CandidateSet::new(),
        }
    }

    fn scan_free_text(&self, text: &str, source: SourceKind) -> CandidateSet {
        let lines = normalize_text(text);
        scan_lines(&lines, &self.dictionary, &self.settings, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fields::Provenance;
    use proptest::prelude::*;

    fn extractor() -> FieldExtractor {
        FieldExtractor::builtin()
    }

    #[test]
    fn free_text_example() {
        let result = extractor().extract("Glucose: 95 mg/dL, Chol 210", SourceKind::Text);
        assert_eq!(result.len(), 2);
        assert_eq!(result.value("glucose"), Some(95.0));
        assert_eq!(result.value("cholesterol"), Some(210.0));
    }

    #[test]
    fn implausible_example_is_empty() {
        let result = extractor().extract("Glucose: 9999 mg/dL", SourceKind::Text);
        assert!(result.is_empty());
        assert!(result.missing().contains(&"glucose".to_string()));
    }

    #[test]
    fn csv_example_matches_free_text() {
        let e = extractor();
        let csv = e.extract("glucose,cholesterol\n95,210", SourceKind::Csv);
        let text = e.extract("Glucose: 95 mg/dL, Chol 210", SourceKind::Text);
        assert_eq!(csv.as_map(), text.as_map());
    }

    #[test]
    fn empty_and_garbage_input() {
        let e = extractor();
        for source in [
            SourceKind::Image,
            SourceKind::Pdf,
            SourceKind::Csv,
            SourceKind::Json,
            SourceKind::Text,
        ] {
            assert!(e.extract("", source).is_empty());
            assert!(e.extract("\u{0}\u{1}%%%,,,;;;|||", source).is_empty());
        }
    }

    #[test]
    fn missing_lists_every_absent_field() {
        let result = extractor().extract("Hb 14.2", SourceKind::Image);
        assert_eq!(result.value("hemoglobin"), Some(14.2));
        assert_eq!(result.missing().len(), extractor().dictionary().len() - 1);
    }

    #[test]
    fn csv_free_text_fills_gaps() {
        let csv = "glucose,note\n95,\"HDL 48 mg/dL\"";
        let result = extractor().extract(csv, SourceKind::Csv);
        assert_eq!(result.value("glucose"), Some(95.0));
        assert_eq!(result.value("hdl"), Some(48.0));
        assert_eq!(result.get("hdl").unwrap().provenance, Provenance::Keyword);
    }

    #[test]
    fn invalid_json_falls_back_to_free_text() {
        let result = extractor().extract("{\"glucose\": 95, oops", SourceKind::Json);
        assert_eq!(result.value("glucose"), Some(95.0));
    }

    #[test]
    fn pipe_table_in_ocr_text() {
        let text = "CITY LAB\nTest | Result | Unit | Range\n\
                    Glucose | 99 | mg/dL | 70-110\n\
                    Triglycerides | 1,320 | mg/dL | <150";
        let result = extractor().extract(text, SourceKind::Image);
        assert_eq!(result.value("glucose"), Some(99.0));
        assert_eq!(result.value("triglycerides"), Some(1320.0));
        assert_eq!(result.get("glucose").unwrap().provenance, Provenance::RowLabel);
    }

    #[test]
    fn messy_scan() {
        let text = "PATIENT: J. DOE    Age: 58 yrs\n\
                    Collected 12/03/2024 08:30\n\
                    FASTING BLOOD SUGAR ..... 1O8 mg/dl (70 - 110)\n\
                    HbA1c:: 6.9 %\n\
                    Haemoglobin 11.8 g/dL   Ref 13.0-17.0\n\
                    LDL-C 172   HDL-C 38";
        let result = extractor().extract(text, SourceKind::Image);
        assert_eq!(result.value("age"), Some(58.0));
        assert_eq!(result.value("glucose"), Some(108.0));
        assert_eq!(result.value("hba1c"), Some(6.9));
        assert_eq!(result.value("hemoglobin"), Some(11.8));
        assert_eq!(result.value("ldl"), Some(172.0));
        assert_eq!(result.value("hdl"), Some(38.0));
    }

    #[test]
    fn custom_window_setting() {
        let settings = ExtractionSettings {
            proximity_window: 5,
            ..ExtractionSettings::default()
        };
        let e = FieldExtractor::new(Arc::new(FieldDictionary::builtin()), settings);
        assert!(e.extract("Glucose measured at 95", SourceKind::Text).is_empty());
        assert_eq!(e.extract("Glucose 95", SourceKind::Text).value("glucose"), Some(95.0));
    }

    const CSV_VALUES: &[(&str, f64)] = &[
        ("glucose", 95.0),
        ("hba1c", 5.9),
        ("hemoglobin", 13.5),
        ("cholesterol", 210.0),
        ("ldl", 120.0),
        ("hdl", 48.0),
        ("triglycerides", 150.0),
        ("red_blood_cells", 4.7),
        ("age", 45.0),
    ];

    fn csv_of(columns: &[(&str, f64)]) -> String {
        let header: Vec<_> = columns.iter().map(|(n, _)| n.to_string()).collect();
        let row: Vec<_> = columns.iter().map(|(_, v)| v.to_string()).collect();
        format!("{}\n{}", header.join(","), row.join(","))
    }

    /// `12345.6` → `12,345.6`.
    fn with_thousands(number: &str) -> String {
        let (int, frac) = number.split_once('.').unwrap_or((number, ""));
        let mut grouped = String::new();
        for (i, c) in int.chars().enumerate() {
            if i > 0 && (int.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(c);
        }
        if frac.is_empty() {
            grouped
        } else {
            format!("{grouped}.{frac}")
        }
    }

    #[test]
    fn thousands_in_free_text() {
        let e = extractor();
        let result = e.extract("Triglycerides: 1,320 mg/dL", SourceKind::Text);
        assert_eq!(result.value("triglycerides"), Some(1320.0));
        assert!(e.extract("Glucose: 1,200 mg/dL", SourceKind::Text).is_empty());
        assert_eq!(with_thousands("12345.6"), "12,345.6");
        assert_eq!(with_thousands("95.0"), "95.0");
    }

    fn columns_and_permutation() -> impl Strategy<Value = (Vec<(&'static str, f64)>, Vec<(&'static str, f64)>)> {
        proptest::sample::subsequence(CSV_VALUES.to_vec(), 1..=CSV_VALUES.len())
            .prop_flat_map(|subset| (Just(subset.clone()), Just(subset).prop_shuffle()))
    }

    proptest! {
        #[test]
        fn extraction_is_idempotent(text in ".{0,300}") {
            let e = extractor();
            for source in [SourceKind::Text, SourceKind::Csv, SourceKind::Json] {
                prop_assert_eq!(e.extract(&text, source), e.extract(&text, source));
            }
        }

        #[test]
        fn csv_column_order_does_not_matter((columns, shuffled) in columns_and_permutation()) {
            let e = extractor();
            let original = e.extract(&csv_of(&columns), SourceKind::Csv);
            let permuted = e.extract(&csv_of(&shuffled), SourceKind::Csv);
            prop_assert_eq!(original.len(), columns.len());
            prop_assert_eq!(original, permuted);
        }

        #[test]
        fn plausible_pair_is_found(
            index in 0usize..9,
            fraction in 0.0f64..=1.0,
            grouped in any::<bool>(),
        ) {
            let e = extractor();
            let spec = &e.dictionary().fields[index];
            let value = spec.min + fraction * (spec.max - spec.min);
            let formatted = format!("{value:.1}");
            let expected: f64 = formatted.parse().unwrap();
            prop_assume!(spec.is_plausible(expected));

            let written = if grouped { with_thousands(&formatted) } else { formatted };
            let result = e.extract(&format!("{}: {}", spec.label, written), SourceKind::Text);
            prop_assert_eq!(result.value(&spec.name), Some(expected));
        }

        #[test]
        fn implausible_pair_is_omitted(
            index in 0usize..9,
            excess in 1.0f64..10_000.0,
            grouped in any::<bool>(),
        ) {
            let e = extractor();
            let spec = &e.dictionary().fields[index];
            let formatted = format!("{:.1}", spec.max + excess);
            let written = if grouped { with_thousands(&formatted) } else { formatted };
            let result = e.extract(&format!("{}: {}", spec.label, written), SourceKind::Text);
            prop_assert_eq!(result.value(&spec.name), None);
        }
    }
}
