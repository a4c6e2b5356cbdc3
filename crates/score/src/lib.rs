//! Converts package findings into one explainable 0..=100 score.

pub mod engine;
pub mod metrics;
pub mod vulnerabilities;

pub use engine::{ScoreEngine, ScoreInput, VULNERABLE_DEPENDENCY_THRESHOLD};
pub use metrics::{derive_metrics, publisher_trust_score};
