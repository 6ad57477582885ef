//! Validation and reconciliation rules.

pub mod engine;
pub mod finding;

pub use engine::{ValidationEngine, ValidationRules};
pub use finding::{RuleId, Severity, ValidationFinding};
