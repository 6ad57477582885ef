//! Handwritten marks in vote-count cells.
//!
//! Scrutineers write runs of asterisks (or similar glyphs) instead of digits
//! to record a non-numeric state. How many glyphs map to which meaning is
//! set by electoral authority guidance, so the table is configuration.

use serde::{Deserialize, Serialize};

use crate::macros::str_enum;

str_enum! {
    pub enum MarkMeaning {
        Blank => "blank",
        Illegible => "illegible",
        Void => "void",
        Contested => "contested",
        Unrecognized => "unrecognized",
    }
}

/// A mark found in a cell, in canonical form (`*` repeated per glyph).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mark {
    pub symbol: String,
    pub meaning: MarkMeaning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkEntry {
    pub symbol: String,
    pub meaning: MarkMeaning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkTable {
    /// Characters counted as one mark glyph each.
    #[serde(default = "default_glyphs")]
    pub glyphs: Vec<char>,
    #[serde(default = "default_entries")]
    pub entries: Vec<MarkEntry>,
}

fn default_glyphs() -> Vec<char> {
    vec!['*', '＊', '∗', '✱', '⁎', 'x', 'X']
}

fn default_entries() -> Vec<MarkEntry> {
    vec![
        MarkEntry {
            symbol: "*".to_string(),
            meaning: MarkMeaning::Blank,
        },
        MarkEntry {
            symbol: "**".to_string(),
            meaning: MarkMeaning::Illegible,
        },
        MarkEntry {
            symbol: "***".to_string(),
            meaning: MarkMeaning::Void,
        },
    ]
}

impl Default for MarkTable {
    fn default() -> Self {
        Self {
            glyphs: default_glyphs(),
            entries: default_entries(),
        }
    }
}

impl MarkTable {
    pub fn is_glyph(&self, c: char) -> bool {
        self.glyphs.contains(&c)
    }

    /// Finds a mark anywhere in the cell text. Glyphs need not be adjacent:
    /// "* * *" is read as `***`.
    pub fn detect(&self, text: &str) -> Option<Mark> {
        let count = text.chars().filter(|c| self.is_glyph(*c)).count();
        if count == 0 {
            return None;
        }
        let symbol = "*".repeat(count);
        let meaning = self
            .entries
            .iter()
            .find(|e| e.symbol == symbol)
            .map(|e| e.meaning)
            .unwrap_or(MarkMeaning::Unrecognized);
        Some(Mark { symbol, meaning })
    }
}
