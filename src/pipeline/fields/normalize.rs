//! Text normalisation for noisy OCR / PDF / CSV report text.
//!
//! Every line goes through the same steps so that keyword anchoring and
//! numeric matching see a stable shape:
//! control characters removed → OCR digit confusions repaired → lower-cased →
//! repeated punctuation collapsed → whitespace collapsed → non-value
//! numerics masked (reference ranges, comparator bounds, dates, times).
//!
//! Masking replaces a span with `#` of the same byte length, so a masked
//! number can never become a candidate value.

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Characters OCR engines commonly emit in place of digits.
const DIGIT_CONFUSIONS: &[(char, char)] = &[('o', '0'), ('O', '0'), ('l', '1'), ('I', '1')];

/// Punctuation collapsed when repeated (`::`, `..`, `--`).
const COLLAPSIBLE_PUNCT: &[char] = &[':', ';', '.', ',', '-', '=', '_', '*', '~'];

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{1,4}[/.\-]\d{1,2}[/.\-]\d{1,4}\b").expect("valid date regex")
});

/// Ranges written without spaces (`70-110`). Masked before spaced ranges so
/// `95 - 70-110` keeps the value and drops the bounds.
static TIGHT_RANGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d+(?:[.,]\d+)?[-–—]\d+(?:[.,]\d+)?").expect("valid range regex")
});

static RANGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d+(?:[.,]\d+)?(?:\s*[-–—]\s*|\s+to\s+)\d+(?:[.,]\d+)?")
        .expect("valid range regex")
});

static COMPARATOR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[<>≤≥]\s*=?\s*\d+(?:[.,]\d+)?").expect("valid comparator regex")
});

static TIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{1,2}:\d{2}(?::\d{2})?\b").expect("valid time regex")
});

/// A numeric token found in a normalised line.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberToken {
    /// Byte offset of the first digit.
    pub start: usize,
    /// Byte offset one past the last digit.
    pub end: usize,
    pub value: f64,
    /// Unit text directly following the number, lower-cased.
    pub unit: Option<String>,
}

/// A single value parsed out of a table cell or structured field.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNumber {
    pub value: f64,
    pub unit: Option<String>,
}

/// Normalise a full report into non-empty lines.
pub fn normalize_text(text: &str) -> Vec<String> {
    text.lines()
        .map(normalize_line)
        .filter(|l| !l.is_empty())
        .collect()
}

/// Normalise one line of report text.
pub fn normalize_line(line: &str) -> String {
    let cleaned: String = line
        .chars()
        .map(|c| if c == '\t' { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect();

    let repaired = repair_ocr_digits(&cleaned).to_lowercase();
    let collapsed = collapse_repeated_punctuation(&repaired);
    let spaced = collapsed.split_whitespace().collect::<Vec<_>>().join(" ");
    mask_non_values(&spaced)
}

/// Map letters OCR mistook for digits inside numeric-looking tokens.
///
/// A token qualifies when it contains at least one ASCII digit and every
/// other character is either a known confusion or a decimal separator.
/// `hba1c`, `mg/dL` and `B12` are left untouched.
pub fn repair_ocr_digits(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut token = String::new();

    let flush = |token: &mut String, out: &mut String| {
        if token_is_confused_number(token) {
            out.extend(token.chars().map(|c| {
                DIGIT_CONFUSIONS
                    .iter()
                    .find(|(from, _)| *from == c)
                    .map(|(_, to)| *to)
                    .unwrap_or(c)
            }));
        } else {
            out.push_str(token);
        }
        token.clear();
    };

    for c in line.chars() {
        if c.is_alphanumeric() || c == '.' || c == ',' {
            token.push(c);
        } else {
            flush(&mut token, &mut out);
            out.push(c);
        }
    }
    flush(&mut token, &mut out);
    out
}

fn token_is_confused_number(token: &str) -> bool {
    let has_digit = token.chars().any(|c| c.is_ascii_digit());
    let has_confusion = token
        .chars()
        .any(|c| DIGIT_CONFUSIONS.iter().any(|(from, _)| *from == c));
    has_digit
        && has_confusion
        && token.chars().all(|c| {
            c.is_ascii_digit()
                || c == '.'
                || c == ','
                || DIGIT_CONFUSIONS.iter().any(|(from, _)| *from == c)
        })
}

fn collapse_repeated_punctuation(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut prev: Option<char> = None;
    for c in line.chars() {
        if prev == Some(c) && COLLAPSIBLE_PUNCT.contains(&c) {
            continue;
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

/// Replace reference ranges, comparator bounds, dates and times with `#`.
pub fn mask_non_values(line: &str) -> String {
    let mask = |caps: &Captures| "#".repeat(caps[0].len());
    let line = DATE_PATTERN.replace_all(line, mask);
    let line = TIGHT_RANGE_PATTERN.replace_all(&line, mask);
    let line = RANGE_PATTERN.replace_all(&line, mask);
    let line = COMPARATOR_PATTERN.replace_all(&line, mask);
    TIME_PATTERN.replace_all(&line, mask).into_owned()
}

/// Scan a normalised line for numeric tokens.
///
/// Digits glued to a preceding letter (`a1c`) are not values. A comma
/// followed by exactly three digits groups thousands (`1,320`) when the
/// leading run is at most three digits; a comma followed by one or two
/// digits is a decimal comma; any other comma ends the number.
pub fn number_tokens(line: &str) -> Vec<NumberToken> {
    let bytes = line.as_bytes();
    let len = bytes.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < len {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }

        let start = i;
        let glued = line[..start]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_alphanumeric() || c == '.' || c == '#');

        while i < len && bytes[i].is_ascii_digit() {
            i += 1;
        }

        let mut grouped = false;
        if i - start <= 3 {
            while thousands_group_at(bytes, i) {
                i += 4;
                grouped = true;
            }
        }

        if i + 1 < len && (bytes[i] == b'.' || bytes[i] == b',') && bytes[i + 1].is_ascii_digit() {
            let mut j = i + 1;
            while j < len && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if bytes[i] == b'.' || (!grouped && j - (i + 1) <= 2) {
                i = j;
            }
        }

        if glued {
            continue;
        }

        let end = i;
        let digits = if grouped {
            line[start..end].replace(',', "")
        } else {
            line[start..end].replace(',', ".")
        };
        let Ok(value) = digits.parse::<f64>() else {
            continue;
        };
        if !value.is_finite() {
            continue;
        }

        tokens.push(NumberToken {
            start,
            end,
            value,
            unit: read_unit(line, end),
        });
    }

    tokens
}

/// `,ddd` at `at`, not followed by a further digit.
fn thousands_group_at(bytes: &[u8], at: usize) -> bool {
    bytes.get(at) == Some(&b',')
        && bytes.len() >= at + 4
        && bytes[at + 1..at + 4].iter().all(u8::is_ascii_digit)
        && !bytes.get(at + 4).is_some_and(u8::is_ascii_digit)
}

/// Read a unit token (`mg/dl`, `%`, `mmol/l`) starting at `from`.
fn read_unit(line: &str, from: usize) -> Option<String> {
    let rest = line[from..].trim_start();
    let first = rest.chars().next()?;
    if !(first.is_alphabetic() || first == '%' || first == 'µ') {
        return None;
    }

    let unit: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || matches!(c, '/' | '%' | '^' | 'µ' | '.'))
        .collect();
    let unit = unit.trim_end_matches('.');
    if unit.is_empty() {
        None
    } else {
        Some(unit.to_string())
    }
}

/// Parse a cell that should hold exactly one value.
///
/// Cells with no number or with several numbers yield `None`.
pub fn parse_number(cell: &str) -> Option<ParsedNumber> {
    let line = normalize_line(cell);
    let tokens = number_tokens(&line);
    match tokens.as_slice() {
        [only] => Some(ParsedNumber {
            value: only.value,
            unit: only.unit.clone(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(line: &str) -> Vec<f64> {
        number_tokens(&normalize_line(line))
            .into_iter()
            .map(|t| t.value)
            .collect()
    }

    #[test]
    fn lowercases_and_collapses_whitespace() {
        assert_eq!(normalize_line("  GLUCOSE   Fasting\t95  "), "glucose fasting 95");
    }

    #[test]
    fn strips_control_characters() {
        assert_eq!(normalize_line("Hb\x00 13.5\x07"), "hb 13.5");
    }

    #[test]
    fn collapses_repeated_punctuation() {
        assert_eq!(normalize_line("Glucose::: 95"), "glucose: 95");
        assert_eq!(normalize_line("HbA1c 6..5"), "hba1c 6.5");
    }

    #[test]
    fn repairs_letter_o_and_l_in_numbers() {
        assert_eq!(repair_ocr_digits("Glucose 9O mg"), "Glucose 90 mg");
        assert_eq!(repair_ocr_digits("Chol l2O"), "Chol 120");
        assert_eq!(repair_ocr_digits("Hb 1o.5"), "Hb 10.5");
    }

    #[test]
    fn leaves_real_words_alone() {
        assert_eq!(repair_ocr_digits("HbA1c 6.5"), "HbA1c 6.5");
        assert_eq!(repair_ocr_digits("Vitamin B12 low"), "Vitamin B12 low");
        assert_eq!(repair_ocr_digits("Total Cholesterol"), "Total Cholesterol");
    }

    #[test]
    fn masks_reference_ranges() {
        assert_eq!(values("Glucose 95 mg/dL 70-110"), vec![95.0]);
        assert_eq!(values("Glucose 95 (70 – 110)"), vec![95.0]);
        assert_eq!(values("Hb 13.5 12.0 to 16.0"), vec![13.5]);
    }

    #[test]
    fn dash_column_before_tight_range_keeps_value() {
        assert_eq!(values("Glucose 95 - 70-110"), vec![95.0]);
        assert_eq!(values("Glucose 95 – 70–110"), vec![95.0]);
    }

    #[test]
    fn masks_comparators_dates_and_times() {
        assert_eq!(values("Cholesterol 210 desirable <200"), vec![210.0]);
        assert_eq!(values("Collected 12/03/2024 08:30 Glucose 101"), vec![101.0]);
        assert_eq!(values("Date: 2024-03-12 HDL 45"), vec![45.0]);
    }

    #[test]
    fn digits_glued_to_letters_are_not_values() {
        assert_eq!(values("HbA1c 6.5 %"), vec![6.5]);
    }

    #[test]
    fn decimal_comma_is_decimal() {
        assert_eq!(values("HbA1c 6,5 %"), vec![6.5]);
    }

    #[test]
    fn thousands_separators_in_free_text() {
        assert_eq!(values("Triglycerides: 1,320 mg/dL"), vec![1320.0]);
        assert_eq!(values("Platelets 1,234,567"), vec![1_234_567.0]);
        assert_eq!(values("1,320.5"), vec![1320.5]);
    }

    #[test]
    fn comma_with_space_or_long_group_splits_numbers() {
        assert_eq!(values("95, 210"), vec![95.0, 210.0]);
        assert_eq!(values("95,2100"), vec![95.0, 2100.0]);
        assert_eq!(values("1200,345"), vec![1200.0, 345.0]);
    }

    #[test]
    fn captures_unit_after_number() {
        let tokens = number_tokens(&normalize_line("Glucose 5.5 mmol/L"));
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].unit.as_deref(), Some("mmol/l"));

        let glued = number_tokens(&normalize_line("Glucose 95mg/dL"));
        assert_eq!(glued[0].value, 95.0);
        assert_eq!(glued[0].unit.as_deref(), Some("mg/dl"));
    }

    #[test]
    fn parse_number_handles_flags_and_units() {
        assert_eq!(parse_number("95 mg/dL").map(|p| p.value), Some(95.0));
        assert_eq!(parse_number("H 160").map(|p| p.value), Some(160.0));
        assert_eq!(parse_number("  6.5% ").map(|p| p.value), Some(6.5));
        assert_eq!(parse_number("1,200").map(|p| p.value), Some(1200.0));
    }

    #[test]
    fn parse_number_rejects_ambiguous_cells() {
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("Glucose"), None);
        assert_eq!(parse_number("70-110"), None);
        assert_eq!(parse_number("<200"), None);
        assert_eq!(parse_number("95 210"), None);
    }

    #[test]
    fn normalize_text_drops_blank_lines() {
        let lines = normalize_text("Glucose 95\n\n   \nHb 13");
        assert_eq!(lines, vec!["glucose 95".to_string(), "hb 13".to_string()]);
    }
}
