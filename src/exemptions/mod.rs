//! Layered drift exemption rules.
//!
//! This module provides:
//! - The YAML rule file schema
//! - Loading and merging of global and resource-scoped files
//! - The compiled, immutable rule set consumed by the classifier

mod file;
mod rules;
mod store;

pub use file::{RuleFile, RuleSpec, SettingsSpec};
pub use rules::{
    builtin_specs, is_builtin_name, ExemptionConfig, ExemptionRule, ExemptionSettings,
    RuleSource, BUILTIN_RULE_NAMES, STATUS_BECOMES_ACTIVE,
};
pub use store::{merge, ExemptionRuleStore, RuleLayer};
