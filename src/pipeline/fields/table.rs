//! Table scan for CSV uploads and delimited report text.
//!
//! Two ways a table can carry lab values:
//! - header mode: a header cell names the field, the value sits below it
//!   (`glucose,cholesterol\n95,210`);
//! - row-label mode: a cell names the field, the value sits to its right
//!   (`Glucose,95,mg/dL,70-110`).
//!
//! Header matches outrank row-label matches. Within a mode the first row wins.

use super::dictionary::{FieldDictionary, FieldSpec};
use super::extractor::ExtractionSettings;
use super::normalize::{normalize_line, number_tokens, parse_number};
use super::types::{Candidate, CandidateSet, Provenance};

/// Delimiters tried for CSV uploads, in preference order.
pub(crate) const CSV_DELIMITERS: &[u8] = &[b',', b';', b'\t', b'|'];

/// Delimiters that make plain report text look tabular. Commas and
/// semicolons are ordinary punctuation in prose.
pub(crate) const TEXT_DELIMITERS: &[u8] = &[b'\t', b'|'];

const HEADER_MODE: usize = 0;
const ROW_LABEL_MODE: usize = 1;

const HEADER_CONFIDENCE: f32 = 0.95;
const ROW_LABEL_CONFIDENCE: f32 = 0.9;
const FUZZY_FACTOR: f32 = 0.9;

/// A parsed table: rows of trimmed cells.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Table {
    pub delimiter: u8,
    pub rows: Vec<Vec<String>>,
}

/// Pick the delimiter giving the most rows with a consistent column count.
///
/// `min_rows` is how many consistent multi-column rows are required before
/// the text counts as a table at all. With `min_rows <= 1` a single-column
/// file (`glucose\n95`) is still read as a table.
pub(crate) fn sniff_table(text: &str, delimiters: &[u8], min_rows: usize) -> Option<Table> {
    let mut best: Option<(usize, Table)> = None;

    for &delimiter in delimiters {
        let rows = read_rows(text, delimiter);
        let score = consistency(&rows);
        if score < min_rows.max(1) {
            continue;
        }
        if best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((score, Table { delimiter, rows }));
        }
    }

    if best.is_none() && min_rows <= 1 {
        let delimiter = *delimiters.first()?;
        let rows = read_rows(text, delimiter);
        return (!rows.is_empty()).then_some(Table { delimiter, rows });
    }

    best.map(|(_, table)| table)
}

fn read_rows(text: &str, delimiter: u8) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    reader
        .records()
        .filter_map(Result::ok)
        .map(|record| record.iter().map(str::to_string).collect::<Vec<_>>())
        .filter(|cells: &Vec<String>| cells.iter().any(|c| !c.is_empty()))
        .collect()
}

/// Number of rows sharing the most common column count (ignoring
/// single-column rows).
fn consistency(rows: &[Vec<String>]) -> usize {
    let mut counts = std::collections::BTreeMap::<usize, usize>::new();
    for row in rows.iter().filter(|r| r.len() >= 2) {
        *counts.entry(row.len()).or_default() += 1;
    }
    counts.values().copied().max().unwrap_or(0)
}

/// Scan a table for values in both modes.
pub(crate) fn scan_table(
    table: &Table,
    dictionary: &FieldDictionary,
    settings: &ExtractionSettings,
) -> CandidateSet {
    let mut candidates = CandidateSet::new();
    scan_header_mode(table, dictionary, settings, &mut candidates);
    scan_row_label_mode(table, dictionary, settings, &mut candidates);
    candidates
}

fn scan_header_mode(
    table: &Table,
    dictionary: &FieldDictionary,
    settings: &ExtractionSettings,
    candidates: &mut CandidateSet,
) {
    let Some((header_index, header)) = header_row(table) else {
        return;
    };

    for (col, cell) in header.iter().enumerate() {
        if has_number(cell) {
            continue;
        }
        let Some(label) = dictionary.resolve_label(cell, settings.fuzzy_cutoff) else {
            continue;
        };
        let spec = &dictionary.fields[label.field];
        let header_unit = unit_in_label(spec, cell);

        let found = table.rows.iter().enumerate().skip(header_index + 1).find_map(|(row_no, row)| {
            let parsed = parse_number(row.get(col)?)?;
            let unit = parsed.unit.or_else(|| header_unit.clone());
            let value = spec.to_canonical(parsed.value, unit.as_deref());
            spec.is_plausible(value).then_some((row_no, value))
        });

        if let Some((row_no, value)) = found {
            candidates.offer(Candidate {
                field: label.field,
                value,
                provenance: Provenance::Column,
                matched_text: cell.clone(),
                confidence: confidence(HEADER_CONFIDENCE, label.fuzzy),
                rank: (HEADER_MODE, row_no, 0),
            });
        }
    }
}

fn scan_row_label_mode(
    table: &Table,
    dictionary: &FieldDictionary,
    settings: &ExtractionSettings,
    candidates: &mut CandidateSet,
) {
    let ignored_columns = ignored_columns(table, dictionary);

    for (row_no, row) in table.rows.iter().enumerate() {
        for (col, cell) in row.iter().enumerate() {
            if has_number(cell) {
                continue;
            }
            let Some(label) = dictionary.resolve_label(cell, settings.fuzzy_cutoff) else {
                continue;
            };
            let spec = &dictionary.fields[label.field];

            let found = row.iter().enumerate().find_map(|(other, value_cell)| {
                if other == col || ignored_columns.contains(&other) {
                    return None;
                }
                if dictionary
                    .resolve_label(value_cell, settings.fuzzy_cutoff)
                    .is_some()
                {
                    return None;
                }
                let parsed = parse_number(value_cell)?;
                let unit = parsed.unit.or_else(|| {
                    row.get(other + 1)
                        .map(|u| u.trim().to_lowercase())
                        .filter(|u| spec.accepts_unit(u))
                });
                let value = spec.to_canonical(parsed.value, unit.as_deref());
                spec.is_plausible(value).then_some(value)
            });

            if let Some(value) = found {
                candidates.offer(Candidate {
                    field: label.field,
                    value,
                    provenance: Provenance::RowLabel,
                    matched_text: cell.clone(),
                    confidence: confidence(ROW_LABEL_CONFIDENCE, label.fuzzy),
                    rank: (ROW_LABEL_MODE, row_no, 0),
                });
            }
        }
    }
}

/// The first multi-column row, or row 0 of a single-column table. Title
/// lines above an OCR'd table are skipped this way.
fn header_row(table: &Table) -> Option<(usize, &Vec<String>)> {
    table
        .rows
        .iter()
        .enumerate()
        .find(|(_, row)| row.len() >= 2)
        .or_else(|| table.rows.first().map(|row| (0, row)))
}

/// Columns whose header names a reference range, unit, date or similar.
/// The header row only counts when it holds no numbers.
fn ignored_columns(table: &Table, dictionary: &FieldDictionary) -> Vec<usize> {
    let Some((_, header)) = header_row(table) else {
        return Vec::new();
    };
    if header.iter().any(|c| has_number(c)) {
        return Vec::new();
    }
    header
        .iter()
        .enumerate()
        .filter(|(_, cell)| dictionary.is_ignored(&normalize_line(&cell.replace('_', " "))))
        .map(|(col, _)| col)
        .collect()
}

fn has_number(cell: &str) -> bool {
    !number_tokens(&normalize_line(cell)).is_empty()
}

/// A convertible unit named inside a header, e.g. `Glucose (mmol/L)`.
fn unit_in_label(spec: &FieldSpec, label: &str) -> Option<String> {
    let label = label.to_lowercase();
    spec.conversions
        .iter()
        .find(|c| label.contains(&c.unit))
        .map(|c| c.unit.clone())
}

fn confidence(base: f32, fuzzy: bool) -> f32 {
    if fuzzy {
        base * FUZZY_FACTOR
    } else {
        base
    }
}
