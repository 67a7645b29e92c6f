//! Field extraction: noisy report text → recognised lab values.
//!
//! The dictionary says what to look for; the scans decide where:
//! `table` for CSV and delimited text, `structure` for JSON, `text` for
//! free-form OCR and PDF output. Every scan feeds a `CandidateSet` and the
//! best plausible candidate per field survives.

pub mod dictionary;
pub mod extractor;
pub mod normalize;
mod structure;
mod table;
mod text;
pub mod types;

pub use dictionary::{DictionaryError, FieldDictionary, FieldSpec, UnitConversion};
pub use extractor::{ExtractionSettings, FieldExtractor};
pub use types::{ExtractionResult, LabValue, Provenance, SourceKind};
