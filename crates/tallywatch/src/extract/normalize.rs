//! Cell text normalisation.
//!
//! `Normalizer::normalize` never fails. Anything it cannot read comes back as
//! `CellState::Unreadable` with zero confidence and a review flag.

use serde::{Deserialize, Serialize};

use super::marks::{Mark, MarkTable};
use crate::macros::str_enum;

/// Confidence assigned to a value that needed OCR confusion repairs.
pub const DEFAULT_REPAIR_CONFIDENCE: f64 = 0.7;

/// Longest digit run accepted as a count. Anything longer is an OCR artefact.
const MAX_DIGITS: usize = 7;

str_enum! {
    pub enum CellState {
        /// Nothing written. Distinct from a written zero.
        Empty => "empty",
        Numeric => "numeric",
        Marked => "marked",
        Unreadable => "unreadable",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedCell {
    pub state: CellState,
    pub value: Option<i64>,
    pub mark: Option<Mark>,
    pub confidence: f64,
    pub needs_review: bool,
    /// Digit confusions were repaired (`O`→0 and friends).
    pub repaired: bool,
}

impl NormalizedCell {
    pub fn is_empty(&self) -> bool {
        self.state == CellState::Empty
    }

    pub fn is_marked(&self) -> bool {
        self.state == CellState::Marked
    }

    fn empty() -> Self {
        Self {
            state: CellState::Empty,
            value: None,
            mark: None,
            confidence: 1.0,
            needs_review: false,
            repaired: false,
        }
    }

    fn unreadable() -> Self {
        Self {
            state: CellState::Unreadable,
            value: None,
            mark: None,
            confidence: 0.0,
            needs_review: true,
            repaired: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    marks: MarkTable,
    repair_confidence: f64,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(MarkTable::default())
    }
}

impl Normalizer {
    pub fn new(marks: MarkTable) -> Self {
        Self {
            marks,
            repair_confidence: DEFAULT_REPAIR_CONFIDENCE,
        }
    }

    pub fn with_repair_confidence(mut self, confidence: f64) -> Self {
        self.repair_confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn marks(&self) -> &MarkTable {
        &self.marks
    }

    pub fn normalize(&self, raw: &str) -> NormalizedCell {
        let text = raw.trim();

        // A mark wins over any digits written next to it.
        if let Some(mark) = self.marks.detect(text) {
            return NormalizedCell {
                state: CellState::Marked,
                value: None,
                mark: Some(mark),
                confidence: 0.0,
                needs_review: true,
                repaired: false,
            };
        }

        if text.is_empty() || matches!(text, "-" | "–" | "—") {
            return NormalizedCell::empty();
        }

        let mut digits = String::with_capacity(text.len());
        let mut repaired = false;
        for c in text.chars() {
            match c {
                '0'..='9' => digits.push(c),
                c if c.is_whitespace() => {}
                '.' | ',' | '\'' | '’' => {}
                _ => match repair_digit(c) {
                    Some(d) => {
                        digits.push(d);
                        repaired = true;
                    }
                    None => return NormalizedCell::unreadable(),
                },
            }
        }

        // Separators alone ("." or ",,") are not a number.
        if digits.is_empty() || digits.len() > MAX_DIGITS {
            return NormalizedCell::unreadable();
        }

        match digits.parse::<i64>() {
            Ok(value) => NormalizedCell {
                state: CellState::Numeric,
                value: Some(value),
                mark: None,
                confidence: if repaired { self.repair_confidence } else { 1.0 },
                needs_review: false,
                repaired,
            },
            Err(_) => NormalizedCell::unreadable(),
        }
    }
}

fn repair_digit(c: char) -> Option<char> {
    match c {
        'O' | 'o' | 'D' | 'Q' => Some('0'),
        'l' | 'I' | 'i' | '|' => Some('1'),
        'Z' | 'z' => Some('2'),
        'S' | 's' => Some('5'),
        'G' | 'b' => Some('6'),
        'B' => Some('8'),
        'g' | 'q' => Some('9'),
        _ => None,
    }
}
