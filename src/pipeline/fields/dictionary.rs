//! Lab field dictionary: canonical names, synonyms, units and plausible ranges.
//!
//! The dictionary is data, not code. The bundled version lives in
//! `resources/lab_fields.toml`; deployments can point
//! `extraction.dictionary_path` at their own TOML or JSON file.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const BUILTIN_TOML: &str = include_str!("../../../resources/lab_fields.toml");

static BUILTIN: LazyLock<FieldDictionary> = LazyLock::new(|| {
    FieldDictionary::from_toml_str(BUILTIN_TOML).expect("bundled lab_fields.toml is valid")
});

/// Labels shorter than this are never fuzzy-matched.
const MIN_FUZZY_LEN: usize = 4;

/// Free-text words shorter than this are never fuzzy anchors.
const MIN_FUZZY_WORD_LEN: usize = 6;

#[derive(Error, Debug)]
pub enum DictionaryError {
    #[error("Failed to read dictionary {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse dictionary {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Invalid dictionary: {0}")]
    Invalid(String),
}

/// Unit accepted for a field and the factor converting it to the canonical unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConversion {
    pub unit: String,
    pub factor: f64,
}

/// One recognisable lab field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub label: String,
    pub unit: String,
    pub synonyms: Vec<String>,
    /// Synonyms written after the value (`45 years`).
    #[serde(default)]
    pub suffix_synonyms: Vec<String>,
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub conversions: Vec<UnitConversion>,
}

impl FieldSpec {
    pub fn is_plausible(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }

    /// Convert a value read with `unit` to the canonical unit.
    /// Unknown or missing units leave the value unchanged.
    pub fn to_canonical(&self, value: f64, unit: Option<&str>) -> f64 {
        let Some(unit) = unit else { return value };
        let unit = unit.to_lowercase().replace('µ', "u");
        self.conversions
            .iter()
            .find(|c| c.unit.eq_ignore_ascii_case(&unit))
            .map(|c| value * c.factor)
            .unwrap_or(value)
    }

    /// Whether `unit` is the canonical unit or one with a conversion.
    pub fn accepts_unit(&self, unit: &str) -> bool {
        let unit = unit.to_lowercase().replace('µ', "u");
        self.unit.eq_ignore_ascii_case(&unit)
            || self.conversions.iter().any(|c| c.unit.eq_ignore_ascii_case(&unit))
    }
}

/// A synonym occurrence inside a line.
#[derive(Debug, Clone, PartialEq)]
pub struct Anchor {
    pub field: usize,
    pub start: usize,
    pub end: usize,
    /// Value is written before the anchor (`45 years`).
    pub suffix: bool,
    pub fuzzy: bool,
}

/// Result of resolving a table header, row label or JSON key.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMatch {
    pub field: usize,
    pub fuzzy: bool,
    /// Byte span of the matched synonym inside the normalised label.
    pub span: Option<(usize, usize)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDictionary {
    pub version: u32,
    #[serde(default)]
    pub ignore_keywords: Vec<String>,
    /// Test names that contain a synonym but measure something else
    /// (`non-hdl cholesterol`). Nothing anchors inside them.
    #[serde(default)]
    pub excluded_terms: Vec<String>,
    pub fields: Vec<FieldSpec>,
}

impl FieldDictionary {
    /// The bundled dictionary.
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    pub fn from_toml_str(content: &str) -> Result<Self, DictionaryError> {
        let dictionary: FieldDictionary =
            toml::from_str(content).map_err(|e| DictionaryError::Parse {
                path: "<string>".into(),
                reason: e.to_string(),
            })?;
        dictionary.prepared()
    }

    /// Load from a `.toml` or `.json` file.
    pub fn load(path: &Path) -> Result<Self, DictionaryError> {
        let content = std::fs::read_to_string(path).map_err(|e| DictionaryError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let dictionary: FieldDictionary = if is_json {
            serde_json::from_str(&content).map_err(|e| DictionaryError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
        } else {
            toml::from_str(&content).map_err(|e| DictionaryError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
        };

        let dictionary = dictionary.prepared()?;
        tracing::info!(
            path = %path.display(),
            version = dictionary.version,
            fields = dictionary.fields.len(),
            "Loaded field dictionary"
        );
        Ok(dictionary)
    }

    /// Lower-case all matching text and validate.
    fn prepared(mut self) -> Result<Self, DictionaryError> {
        for field in &mut self.fields {
            field.name = field.name.trim().to_lowercase();
            for list in [&mut field.synonyms, &mut field.suffix_synonyms] {
                for synonym in list.iter_mut() {
                    *synonym = synonym.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
                }
                list.retain(|s| !s.is_empty());
            }
            for conversion in &mut field.conversions {
                conversion.unit = conversion.unit.trim().to_lowercase().replace('µ', "u");
            }
        }
        for keyword in &mut self.ignore_keywords {
            *keyword = keyword.trim().to_lowercase();
        }
        self.ignore_keywords.retain(|k| !k.is_empty());
        for term in &mut self.excluded_terms {
            *term = term.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        }
        self.excluded_terms.retain(|t| !t.is_empty());

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), DictionaryError> {
        if self.fields.is_empty() {
            return Err(DictionaryError::Invalid("no fields defined".into()));
        }

        let mut names = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(DictionaryError::Invalid("field with empty name".into()));
            }
            if !names.insert(field.name.as_str()) {
                return Err(DictionaryError::Invalid(format!(
                    "duplicate field '{}'",
                    field.name
                )));
            }
            if field.synonyms.is_empty() {
                return Err(DictionaryError::Invalid(format!(
                    "field '{}' has no synonyms",
                    field.name
                )));
            }
            if !(field.min.is_finite() && field.max.is_finite() && field.min < field.max) {
                return Err(DictionaryError::Invalid(format!(
                    "field '{}' has an invalid range {}..{}",
                    field.name, field.min, field.max
                )));
            }
            if field.conversions.iter().any(|c| !(c.factor.is_finite() && c.factor > 0.0)) {
                return Err(DictionaryError::Invalid(format!(
                    "field '{}' has a non-positive conversion factor",
                    field.name
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_plausible(&self, name: &str, value: f64) -> bool {
        self.field(name).is_some_and(|f| f.is_plausible(value))
    }

    /// Whether a normalised label contains an ignore keyword as a whole word.
    pub fn is_ignored(&self, label: &str) -> bool {
        self.ignore_keywords
            .iter()
            .any(|k| !find_bounded(label, k).is_empty())
    }

    /// Byte spans of excluded terms in a normalised line.
    fn excluded_spans(&self, line: &str) -> Vec<(usize, usize)> {
        self.excluded_terms
            .iter()
            .flat_map(|term| {
                find_bounded(line, term)
                    .into_iter()
                    .map(move |start| (start, start + term.len()))
            })
            .collect()
    }

    /// Every synonym occurrence in a normalised line.
    ///
    /// Overlaps are resolved longest-first, then earliest, so
    /// `hdl cholesterol` anchors HDL rather than cholesterol and `hba1c`
    /// never anchors hemoglobin. With `fuzzy_cutoff`, words not covered by an
    /// exact anchor are compared against single-word synonyms. Nothing
    /// anchors inside an excluded term.
    pub fn find_anchors(&self, line: &str, fuzzy_cutoff: Option<f64>) -> Vec<Anchor> {
        let mut found: Vec<Anchor> = Vec::new();

        for (index, field) in self.fields.iter().enumerate() {
            for (synonyms, suffix) in [(&field.synonyms, false), (&field.suffix_synonyms, true)] {
                for synonym in synonyms {
                    for start in find_bounded(line, synonym) {
                        found.push(Anchor {
                            field: index,
                            start,
                            end: start + synonym.len(),
                            suffix,
                            fuzzy: false,
                        });
                    }
                }
            }
        }

        found.sort_by(|a, b| {
            (b.end - b.start)
                .cmp(&(a.end - a.start))
                .then(a.start.cmp(&b.start))
                .then(a.field.cmp(&b.field))
        });

        let excluded = self.excluded_spans(line);
        let in_excluded =
            |start: usize, end: usize| excluded.iter().any(|&(s, e)| start < e && s < end);

        let mut accepted: Vec<Anchor> = Vec::new();
        for anchor in found {
            if in_excluded(anchor.start, anchor.end) {
                continue;
            }
            if !accepted.iter().any(|a| overlaps(a, &anchor)) {
                accepted.push(anchor);
            }
        }

        if let Some(cutoff) = fuzzy_cutoff {
            for (start, word) in words(line) {
                if word.len() < MIN_FUZZY_WORD_LEN {
                    continue;
                }
                let end = start + word.len();
                if in_excluded(start, end)
                    || accepted.iter().any(|a| a.start < end && start < a.end)
                {
                    continue;
                }
                if let Some((field, suffix)) = self.fuzzy_word(word, cutoff) {
                    accepted.push(Anchor {
                        field,
                        start,
                        end,
                        suffix,
                        fuzzy: true,
                    });
                }
            }
        }

        accepted.sort_by_key(|a| a.start);
        accepted
    }

    /// Resolve a header cell, row label or JSON key to a field.
    ///
    /// Labels holding an ignore keyword (`Reference Range`, `glucose_unit`)
    /// never resolve. The longest contained synonym wins; otherwise the
    /// whole label is fuzzy-matched and must have a unique best field.
    pub fn resolve_label(&self, raw: &str, fuzzy_cutoff: f64) -> Option<LabelMatch> {
        let label = raw
            .replace('_', " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if label.is_empty()
            || self.is_ignored(&label)
            || !self.excluded_spans(&label).is_empty()
        {
            return None;
        }

        if let Some(best) = self
            .find_anchors(&label, None)
            .into_iter()
            .filter(|a| !a.suffix)
            .max_by(|a, b| {
                (a.end - a.start)
                    .cmp(&(b.end - b.start))
                    .then(b.start.cmp(&a.start))
            })
        {
            return Some(LabelMatch {
                field: best.field,
                fuzzy: false,
                span: Some((best.start, best.end)),
            });
        }

        if label.len() < MIN_FUZZY_LEN {
            return None;
        }

        let mut best: Option<(usize, f64)> = None;
        let mut ambiguous = false;
        for (index, field) in self.fields.iter().enumerate() {
            let score = field
                .synonyms
                .iter()
                .map(|s| similarity(&label, s))
                .fold(0.0_f64, f64::max);
            if score < fuzzy_cutoff {
                continue;
            }
            match best {
                Some((_, current)) if score > current => {
                    best = Some((index, score));
                    ambiguous = false;
                }
                Some((_, current)) if score == current => ambiguous = true,
                Some(_) => {}
                None => best = Some((index, score)),
            }
        }

        match best {
            Some((field, _)) if !ambiguous => Some(LabelMatch {
                field,
                fuzzy: true,
                span: None,
            }),
            _ => None,
        }
    }

    fn fuzzy_word(&self, word: &str, cutoff: f64) -> Option<(usize, bool)> {
        let mut best: Option<(usize, bool, f64)> = None;
        let mut ambiguous = false;

        for (index, field) in self.fields.iter().enumerate() {
            let candidates = field
                .synonyms
                .iter()
                .map(|s| (s, false))
                .chain(field.suffix_synonyms.iter().map(|s| (s, true)));
            for (synonym, suffix) in candidates {
                if synonym.contains(' ') || synonym.len() < MIN_FUZZY_WORD_LEN {
                    continue;
                }
                let score = similarity(word, synonym);
                if score < cutoff {
                    continue;
                }
                match best {
                    Some((_, _, current)) if score > current => {
                        ambiguous = false;
                        best = Some((index, suffix, score));
                    }
                    Some((current_field, _, current)) if score == current => {
                        if current_field != index {
                            ambiguous = true;
                        }
                    }
                    Some(_) => {}
                    None => best = Some((index, suffix, score)),
                }
            }
        }

        match best {
            Some((field, suffix, _)) if !ambiguous => Some((field, suffix)),
            _ => None,
        }
    }
}

fn overlaps(a: &Anchor, b: &Anchor) -> bool {
    a.start < b.end && b.start < a.end
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric()
}

/// Start offsets of `needle` in `haystack` where both ends sit on a word boundary.
fn find_bounded(haystack: &str, needle: &str) -> Vec<usize> {
    if needle.is_empty() {
        return Vec::new();
    }
    haystack
        .match_indices(needle)
        .filter(|(start, _)| {
            let end = start + needle.len();
            let before_ok = haystack[..*start]
                .chars()
                .next_back()
                .map_or(true, |c| !is_word_char(c));
            let after_ok = haystack[end..]
                .chars()
                .next()
                .map_or(true, |c| !is_word_char(c));
            before_ok && after_ok
        })
        .map(|(start, _)| start)
        .collect()
}

/// Alphabetic words with their byte offsets.
fn words(line: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in line.char_indices() {
        match (c.is_alphabetic(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                out.push((s, &line[s..i]));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push((s, &line[s..]));
    }
    out
}

/// Normalised edit-distance similarity in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - edit_distance(a, b) as f64 / longest as f64
}

/// Levenshtein edit distance between two strings.
fn edit_distance(a: &str, b: &str) -> u32 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let m = a_chars.len();
    let n = b_chars.len();

    if m == 0 { return n as u32; }
    if n == 0 { return m as u32; }

    let mut prev: Vec<u32> = (0..=n as u32).collect();
    let mut curr = vec![0u32; n + 1];

    for (i, &a_ch) in a_chars.iter().enumerate() {
        curr[0] = (i + 1) as u32;
        for (j, &b_ch) in b_chars.iter().enumerate() {
            let cost = if a_ch == b_ch { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1)
                .min(curr[j] + 1)
                .min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict() -> FieldDictionary {
        FieldDictionary::builtin()
    }

    fn anchor_fields(line: &str) -> Vec<String> {
        let d = dict();
        d.find_anchors(line, None)
            .into_iter()
            .map(|a| d.fields[a.field].name.clone())
            .collect()
    }

    #[test]
    fn builtin_dictionary_is_valid() {
        let d = dict();
        assert_eq!(d.version, 1);
        assert!(d.validate().is_ok());
        for name in [
            "glucose", "hba1c", "hemoglobin", "cholesterol", "ldl", "hdl",
            "triglycerides", "red_blood_cells", "age",
        ] {
            assert!(d.field(name).is_some(), "missing {name}");
        }
    }

    #[test]
    fn glucose_range_rejects_implausible_values() {
        let d = dict();
        assert!(d.is_plausible("glucose", 95.0));
        assert!(d.is_plausible("glucose", 20.0));
        assert!(!d.is_plausible("glucose", 9999.0));
        assert!(!d.is_plausible("glucose", f64::NAN));
        assert!(!d.is_plausible("unknown", 1.0));
    }

    #[test]
    fn anchors_respect_word_boundaries() {
        assert_eq!(anchor_fields("page 2 average"), Vec::<String>::new());
        assert_eq!(anchor_fields("glucose 95"), vec!["glucose"]);
        assert_eq!(anchor_fields("glucometer"), Vec::<String>::new());
    }

    #[test]
    fn longest_synonym_wins_overlaps() {
        assert_eq!(anchor_fields("hba1c 6.5"), vec!["hba1c"]);
        assert_eq!(anchor_fields("hdl cholesterol 45"), vec!["hdl"]);
        assert_eq!(anchor_fields("hemoglobin a1c 6.1"), vec!["hba1c"]);
        assert_eq!(anchor_fields("total cholesterol 190 ldl 120"), vec!["cholesterol", "ldl"]);
    }

    #[test]
    fn excluded_terms_block_anchors() {
        assert_eq!(anchor_fields("non-hdl cholesterol 160"), Vec::<String>::new());
        assert_eq!(anchor_fields("non hdl 160"), Vec::<String>::new());
        assert_eq!(anchor_fields("non-hdl 160 hdl 45"), vec!["hdl"]);

        let d = dict();
        assert_eq!(d.resolve_label("Non-HDL Cholesterol", 0.8), None);
        assert!(d.find_anchors("non-hdl-c 150", Some(0.8)).is_empty());
    }

    #[test]
    fn suffix_synonyms_are_flagged() {
        let d = dict();
        let anchors = d.find_anchors("45 years old", None);
        assert_eq!(anchors.len(), 1);
        assert!(anchors[0].suffix);
        assert_eq!(d.fields[anchors[0].field].name, "age");
    }

    #[test]
    fn fuzzy_anchor_catches_ocr_misspelling() {
        let d = dict();
        let anchors = d.find_anchors("glucoze 95", Some(0.8));
        assert_eq!(anchors.len(), 1);
        assert!(anchors[0].fuzzy);
        assert_eq!(d.fields[anchors[0].field].name, "glucose");

        assert!(d.find_anchors("glucoze 95", None).is_empty());
    }

    #[test]
    fn resolve_label_maps_headers() {
        let d = dict();
        let name = |label: &str| {
            d.resolve_label(label, 0.8)
                .map(|m| d.fields[m.field].name.clone())
        };
        assert_eq!(name("Glucose").as_deref(), Some("glucose"));
        assert_eq!(name("GLU").as_deref(), Some("glucose"));
        assert_eq!(name("Fasting Blood Sugar").as_deref(), Some("glucose"));
        assert_eq!(name("red_blood_cells").as_deref(), Some("red_blood_cells"));
        assert_eq!(name("Cholestrol").as_deref(), Some("cholesterol"));
        assert_eq!(name("Result"), None);
    }

    #[test]
    fn resolve_label_skips_ignore_keywords() {
        let d = dict();
        assert!(d.resolve_label("Glucose Reference Range", 0.8).is_none());
        assert!(d.resolve_label("glucose_unit", 0.8).is_none());
        assert!(d.resolve_label("Collection Date", 0.8).is_none());
    }

    #[test]
    fn unit_conversion_to_canonical() {
        let d = dict();
        let glucose = d.field("glucose").unwrap();
        assert!((glucose.to_canonical(5.5, Some("mmol/l")) - 99.088).abs() < 1e-6);
        assert_eq!(glucose.to_canonical(95.0, Some("mg/dl")), 95.0);
        assert_eq!(glucose.to_canonical(95.0, None), 95.0);
        assert!(glucose.accepts_unit("mg/dl"));
        assert!(glucose.accepts_unit("mmol/L"));
        assert!(!glucose.accepts_unit("g/l"));
    }

    #[test]
    fn custom_dictionary_from_toml() {
        let toml = r#"
            version = 7
            [[fields]]
            name = "Ferritin"
            label = "Ferritin"
            unit = "ng/mL"
            synonyms = ["Ferritin", "FERR"]
            min = 1.0
            max = 5000.0
        "#;
        let d = FieldDictionary::from_toml_str(toml).unwrap();
        assert_eq!(d.version, 7);
        assert_eq!(d.fields[0].name, "ferritin");
        assert_eq!(d.fields[0].synonyms, vec!["ferritin", "ferr"]);
    }

    #[test]
    fn invalid_range_is_rejected() {
        let toml = r#"
            version = 1
            [[fields]]
            name = "x"
            label = "X"
            unit = "u"
            synonyms = ["x"]
            min = 10.0
            max = 1.0
        "#;
        assert!(matches!(
            FieldDictionary::from_toml_str(toml),
            Err(DictionaryError::Invalid(_))
        ));
    }

    #[test]
    fn duplicate_fields_are_rejected() {
        let toml = r#"
            version = 1
            [[fields]]
            name = "x"
            label = "X"
            unit = "u"
            synonyms = ["x"]
            min = 1.0
            max = 2.0
            [[fields]]
            name = "X"
            label = "X again"
            unit = "u"
            synonyms = ["xx"]
            min = 1.0
            max = 2.0
        "#;
        assert!(FieldDictionary::from_toml_str(toml).is_err());
    }

    #[test]
    fn load_json_dictionary_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fields.json");
        let json = serde_json::to_string(&dict()).unwrap();
        std::fs::write(&path, json).unwrap();

        let loaded = FieldDictionary::load(&path).unwrap();
        assert_eq!(loaded.len(), dict().len());
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = FieldDictionary::load(Path::new("/nonexistent/fields.toml")).unwrap_err();
        assert!(matches!(err, DictionaryError::Read { .. }));
    }

    #[test]
    fn similarity_basic() {
        assert_eq!(similarity("glucose", "glucose"), 1.0);
        assert!(similarity("glucoze", "glucose") > 0.85);
        assert!(similarity("hb", "hgb") < 0.8);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
    }
}
