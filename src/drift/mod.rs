//! Drift detection on plan output.
//!
//! This module provides:
//! - A tokenizer turning plan text into typed events
//! - The classifier partitioning change lines into real and exempted drift
//! - Report types and stateless plan scrapers

mod classifier;
mod report;
mod tokenizer;

pub use classifier::{classify, DriftClassifier};
pub use report::{
    affected_modules, scrape_plan_summary, DriftLine, DriftReport, ExemptedLine, PlanChangeRecord,
};
pub use tokenizer::{
    split_address, tokenize_line, ChangeKind, ChangeMarker, PlanEvent, PlanSummary, PlanTokenizer,
};
