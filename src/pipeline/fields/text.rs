//! Free-text rules: keyword anchor followed by a nearby number.

use super::dictionary::{Anchor, FieldDictionary};
use super::extractor::ExtractionSettings;
use super::normalize::{number_tokens, NumberToken};
use super::types::{Candidate, CandidateSet, Provenance, SourceKind};

/// Confidence for a number right next to its keyword.
const NEAR_CONFIDENCE: f32 = 0.95;
/// Confidence at the far edge of the proximity window.
const FAR_CONFIDENCE: f32 = 0.6;
/// Distance still considered "right next to".
const NEAR_DISTANCE: usize = 3;
/// Penalty applied to OCR text and to fuzzy anchors.
const UNCERTAIN_FACTOR: f32 = 0.9;

/// Scan normalised lines for `keyword … number` pairs.
pub(crate) fn scan_lines(
    lines: &[String],
    dictionary: &FieldDictionary,
    settings: &ExtractionSettings,
    source: SourceKind,
) -> CandidateSet {
    let mut candidates = CandidateSet::new();

    for (line_no, line) in lines.iter().enumerate() {
        let anchors = dictionary.find_anchors(line, Some(settings.fuzzy_cutoff));
        if anchors.is_empty() {
            continue;
        }
        let tokens = number_tokens(line);
        if tokens.is_empty() {
            continue;
        }

        for (i, anchor) in anchors.iter().enumerate() {
            let (lo, hi) = window(&anchors, i, line.len(), settings.proximity_window);
            let spec = &dictionary.fields[anchor.field];

            for token in tokens.iter().filter(|t| in_window(anchor, t, lo, hi)) {
                let gap = if anchor.suffix {
                    &line[token.end..anchor.start]
                } else {
                    &line[anchor.end..token.start]
                };
                if dictionary.is_ignored(gap) {
                    continue;
                }

                let value = spec.to_canonical(token.value, token.unit.as_deref());
                if !spec.is_plausible(value) {
                    tracing::debug!(
                        field = %spec.name,
                        value,
                        line = line_no,
                        "Discarded implausible value"
                    );
                    continue;
                }

                let distance = gap.len();
                let mut confidence = proximity_confidence(distance, settings.proximity_window);
                if anchor.fuzzy {
                    confidence *= UNCERTAIN_FACTOR;
                }
                if source.is_ocr() {
                    confidence *= UNCERTAIN_FACTOR;
                }

                candidates.offer(Candidate {
                    field: anchor.field,
                    value,
                    provenance: if anchor.fuzzy {
                        Provenance::FuzzyKeyword
                    } else {
                        Provenance::Keyword
                    },
                    matched_text: line[anchor.start..anchor.end].to_string(),
                    confidence,
                    rank: (distance, line_no, token.start),
                });
            }
        }
    }

    candidates
}

/// Byte bounds a value for `anchors[i]` may occupy. Forward anchors look
/// right up to the next anchor; suffix anchors look left down to the
/// previous one.
fn window(anchors: &[Anchor], i: usize, line_len: usize, proximity: usize) -> (usize, usize) {
    let anchor = &anchors[i];
    if anchor.suffix {
        let prev_end = if i > 0 { anchors[i - 1].end } else { 0 };
        (anchor.start.saturating_sub(proximity).max(prev_end), anchor.start)
    } else {
        let next_start = anchors.get(i + 1).map_or(line_len, |a| a.start);
        (anchor.end, (anchor.end + proximity).min(next_start).min(line_len))
    }
}

fn in_window(anchor: &Anchor, token: &NumberToken, lo: usize, hi: usize) -> bool {
    if anchor.suffix {
        token.start >= lo && token.end <= hi
    } else {
        token.start >= lo && token.start < hi
    }
}

fn proximity_confidence(distance: usize, window: usize) -> f32 {
    if distance <= NEAR_DISTANCE || window <= NEAR_DISTANCE {
        return NEAR_CONFIDENCE;
    }
    let span = (window - NEAR_DISTANCE) as f32;
    let t = ((distance - NEAR_DISTANCE) as f32 / span).min(1.0);
    NEAR_CONFIDENCE - (NEAR_CONFIDENCE - FAR_CONFIDENCE) * t
}
