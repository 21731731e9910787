// ============================================================================
// Linting
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::panic)]
#![warn(clippy::print_stdout)]
#![warn(clippy::todo)]
#![warn(clippy::unimplemented)]
#![warn(clippy::redundant_clone)]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # tf-migrate-e2e
//!
//! End-to-end validation of infrastructure-as-code provider migrations.
//!
//! ## Overview
//!
//! A run takes an old-version configuration tree and proves that the
//! migrated tree describes the same infrastructure:
//!
//! 1. Apply the old-version tree and capture its state
//! 2. Run the migration tool over configuration and state
//! 3. Plan the migrated tree against the migrated state
//! 4. Apply it and plan again to prove stability
//!
//! Every plan is classified line by line. Changes the provider computes on
//! its own are absorbed by exemption rules; anything left is real drift and
//! fails the run.
//!
//! ## Modules
//!
//! - [`config`]: Harness configuration parsing and validation
//! - [`runner`]: Sanitized, retrying subprocess execution
//! - [`exemptions`]: Layered exemption rule loading and merging
//! - [`drift`]: Plan tokenizing and drift classification
//! - [`imports`]: Import annotation scanning and directive rendering
//! - [`migrate`]: The external migration tool
//! - [`orchestrator`]: The phase state machine and final report
//! - [`artifacts`]: Owner-only artifact persistence
//! - [`cli`]: Command-line interface
//!
//! ## Exemption file
//!
//! ```yaml
//! settings:
//!   apply_exemptions: true
//!   warn_unused: true
//!
//! exemptions:
//!   - name: zone-name-servers
//!     description: Name servers are assigned by the provider
//!     resource_types: [cloudflare_zone]
//!     patterns: ["name_servers"]
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod artifacts;
pub mod cli;
pub mod config;
pub mod drift;
pub mod error;
pub mod exemptions;
pub mod imports;
pub mod migrate;
pub mod orchestrator;
pub mod runner;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, HarnessConfig};
pub use drift::{classify, DriftClassifier, DriftReport};
pub use error::{HarnessError, Result};
pub use exemptions::{ExemptionConfig, ExemptionRuleStore};
pub use imports::{ImportResolver, ImportSpec};
pub use migrate::{ExternalMigrationTool, MigrationTool};
pub use orchestrator::{RunContext, ValidationOrchestrator, ValidationReport, Verdict};
pub use runner::{OutputSanitizer, ProcessRunner, ToolRunner};
