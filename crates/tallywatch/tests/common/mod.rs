//! Shared test utilities for tallywatch integration tests.
//!
//! This module provides:
//! - `TestHarness` for running documents through a pipeline backed by a
//!   temporary database, a manual clock and a scripted provider
//! - Builders for configurations, tally-sheet readings and input files

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
