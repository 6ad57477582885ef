//! Table-code cross-validation.
//!
//! The code printed on the form and the header digits read by OCR are two
//! independent sources for the table identifier. A missing or unreadable
//! code degrades the result; it is never an error.

pub mod decode;
pub mod reconcile;

pub use decode::{decode, DecodedCode, ParseStatus, TableComponents};
pub use reconcile::{cross_validate, CrossValidationResult, Discrepancy, MatchStatus, OcrHeader};
