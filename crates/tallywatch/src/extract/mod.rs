//! Field extraction: raw provider cells to typed, reviewable fields.

pub mod extractor;
pub mod field;
pub mod marks;
pub mod normalize;

pub use extractor::{FieldExtractor, DEFAULT_REVIEW_THRESHOLD};
pub use field::{
    Alternative, CorrectionSource, ExtractedField, FieldCorrection, FieldRole, HeaderComponent,
};
pub use marks::{Mark, MarkEntry, MarkMeaning, MarkTable};
pub use normalize::{CellState, NormalizedCell, Normalizer, DEFAULT_REPAIR_CONFIDENCE};
