//! Post-hoc analysis of finished test runs.

pub mod analyzer;
pub mod compliance;

pub use analyzer::{AnalysisError, Analyzer};
pub use compliance::{review, ReviewReport};
