//! External tool execution.
//!
//! This module provides:
//! - Invocation descriptions for the infrastructure and migration tools
//! - Subprocess execution with rate-limit retry and deadlines
//! - Credential redaction of all captured output

mod invocation;
mod process;
mod sanitize;

pub use invocation::{Invocation, Verb};
pub use process::{
    CommandOutput, ProcessRunner, RateLimitDetector, RateLimitSignal, ToolRunner,
    DEFAULT_MAX_RETRIES, DEFAULT_PARALLELISM,
};
pub use sanitize::{OutputSanitizer, REDACTION_MARKER};

#[cfg(test)]
pub use process::MockToolRunner;
