//! Output formatting for CLI commands.
//!
//! Every formatter returns a string; printing is left to the caller.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::drift::DriftReport;
use crate::error::{HarnessError, Result};
use crate::exemptions::{ExemptionConfig, ExemptionRule};
use crate::imports::ImportSpec;
use crate::orchestrator::{PhaseStatus, ValidationReport, Verdict};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Drift line row for table display.
#[derive(Tabled)]
struct DriftRow {
    #[tabled(rename = "Line")]
    line_no: usize,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Change")]
    change: String,
    #[tabled(rename = "Rule")]
    rule: String,
}

/// Phase row for table display.
#[derive(Tabled)]
struct PhaseRow {
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Exemption rule row for table display.
#[derive(Tabled)]
struct RuleRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Types")]
    types: String,
    #[tabled(rename = "Patterns")]
    patterns: String,
    #[tabled(rename = "Allows")]
    allows: String,
    #[tabled(rename = "Enabled")]
    enabled: String,
}

/// Import annotation row for table display.
#[derive(Tabled)]
struct ImportRow {
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Import ID")]
    id: String,
    #[tabled(rename = "Location")]
    location: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a drift report.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn format_drift(&self, report: &DriftReport) -> Result<String> {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => Ok(Self::format_drift_text(report)),
        }
    }

    fn format_drift_text(report: &DriftReport) -> String {
        if report.no_changes {
            return format!("{} No changes in plan.\n", "✓".green());
        }

        let mut output = String::new();

        if let Some(summary) = &report.summary {
            let _ = writeln!(output, "Plan summary: {summary}");
        }

        let mut rows: Vec<DriftRow> = report
            .real_drift
            .iter()
            .map(|d| DriftRow {
                line_no: d.line_no,
                resource: d.address.clone().unwrap_or_default(),
                change: truncate(&d.line, 60),
                rule: "-".red().to_string(),
            })
            .collect();
        rows.extend(report.exempted_drift.iter().map(|e| DriftRow {
            line_no: e.drift.line_no,
            resource: e.drift.address.clone().unwrap_or_default(),
            change: truncate(&e.drift.line, 60),
            rule: e.rule.dimmed().to_string(),
        }));
        rows.sort_by_key(|r| r.line_no);

        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let _ = writeln!(
            output,
            "\n{} real, {} exempted, {} computed",
            report.real_drift.len().to_string().red(),
            report.exempted_drift.len().to_string().yellow(),
            report.computed_lines
        );

        for (rule, count) in &report.triggered_exemptions {
            let _ = writeln!(output, "   {rule}: {count} line(s)");
        }
        for rule in &report.unused_exemptions {
            let _ = writeln!(output, "{} Exemption '{rule}' never matched", "⚠".yellow());
        }

        if report.only_computed_changes {
            let _ = writeln!(output, "{} Only computed or exempted changes.", "✓".green());
        } else {
            let _ = writeln!(output, "{} Real drift detected.", "✗".red());
        }

        output
    }

    /// Formats a validation report.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn format_report(&self, report: &ValidationReport) -> Result<String> {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => Ok(Self::format_report_text(report)),
        }
    }

    fn format_report_text(report: &ValidationReport) -> String {
        let mut output = String::new();

        let _ = writeln!(output, "\nValidation run {} on {}", report.run_id, report.host);
        if !report.targets.is_empty() {
            let _ = writeln!(output, "   Modules: {}", report.targets.join(", "));
        }
        output.push('\n');

        let rows: Vec<PhaseRow> = report
            .phases
            .iter()
            .map(|p| PhaseRow {
                phase: p.phase.to_string(),
                status: format_phase_status(p.status),
                duration: match (p.started_at, p.finished_at) {
                    (Some(start), Some(end)) => {
                        format!("{:.1}s", (end - start).num_milliseconds() as f64 / 1000.0)
                    }
                    _ => String::from("-"),
                },
                message: p.message.as_deref().map(|m| truncate(m, 50)).unwrap_or_default(),
            })
            .collect();
        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        for checkpoint in &report.checkpoints {
            let _ = writeln!(
                output,
                "\nCheckpoint {}: {} real, {} exempted, {} computed",
                checkpoint.checkpoint,
                checkpoint.report.real_drift.len(),
                checkpoint.report.exempted_drift.len(),
                checkpoint.report.computed_lines
            );
            for line in &checkpoint.report.real_drift {
                let _ = writeln!(output, "   {} {}", "✗".red(), line.line);
            }
        }

        if let Some(renames) = &report.renames {
            let _ = writeln!(output, "\nRenamed resource types:");
            for rename in renames {
                let _ = writeln!(output, "   {} -> {}", rename.from, rename.to);
            }
        }

        if !report.warnings.is_empty() {
            let _ = writeln!(output, "\nWarnings:");
            for warning in &report.warnings {
                let _ = writeln!(output, "   {} {warning}", "⚠".yellow());
            }
        }

        if let Some(error) = &report.error {
            let _ = writeln!(output, "\n{} {error}", "Error:".red().bold());
        }
        if report.state_pushed && !report.verdict.is_success() {
            let _ = writeln!(
                output,
                "{} Migrated state was pushed; clean up the backend manually.",
                "⚠".yellow()
            );
        }

        let _ = writeln!(output, "\nVerdict: {}", format_verdict(report.verdict));
        output
    }

    /// Formats the effective rule set.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn format_rules(&self, config: &ExemptionConfig) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                let rules: Vec<RuleJson> = config.rules().map(RuleJson::from).collect();
                to_json(&serde_json::json!({
                    "settings": {
                        "apply_exemptions": config.settings().apply_exemptions,
                        "verbose": config.settings().verbose,
                        "warn_unused": config.settings().warn_unused,
                        "load_resource_scoped": config.settings().load_resource_scoped,
                    },
                    "rules": rules,
                }))
            }
            OutputFormat::Text => Ok(Self::format_rules_text(config)),
        }
    }

    fn format_rules_text(config: &ExemptionConfig) -> String {
        let mut output = String::new();
        if !config.settings().apply_exemptions {
            let _ = writeln!(
                output,
                "{} Exemptions disabled: only builtin rules apply.",
                "⚠".yellow()
            );
        }

        let rows: Vec<RuleRow> = config
            .rules()
            .map(|r| RuleRow {
                name: r.name.clone(),
                source: r.source.label(),
                types: if r.resource_types.is_empty() {
                    String::from("*")
                } else {
                    r.resource_types.iter().cloned().collect::<Vec<_>>().join(", ")
                },
                patterns: truncate(&r.pattern_sources().collect::<Vec<_>>().join(" | "), 40),
                allows: format_allows(r),
                enabled: if r.enabled {
                    "yes".green().to_string()
                } else {
                    "no".dimmed().to_string()
                },
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');
        output
    }

    /// Formats import annotations found in a tree.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn format_imports(&self, specs: &[ImportSpec]) -> Result<String> {
        match self.format {
            OutputFormat::Json => to_json(&specs),
            OutputFormat::Text => {
                if specs.is_empty() {
                    return Ok(String::from("No import annotations found.\n"));
                }
                let rows: Vec<ImportRow> = specs
                    .iter()
                    .map(|s| ImportRow {
                        address: s.resource_address.clone(),
                        id: s.import_address_template.clone(),
                        location: format!("{}:{}", s.source_file.display(), s.line),
                    })
                    .collect();
                Ok(format!("{}\n", Table::new(rows)))
            }
        }
    }
}

#[derive(Serialize)]
struct RuleJson<'a> {
    name: &'a str,
    description: &'a str,
    source: String,
    resource_types: Vec<&'a str>,
    resource_name_patterns: Vec<&'a str>,
    patterns: Vec<&'a str>,
    allow_create: bool,
    allow_destroy: bool,
    allow_replace: bool,
    enabled: bool,
}

impl<'a> From<&'a ExemptionRule> for RuleJson<'a> {
    fn from(rule: &'a ExemptionRule) -> Self {
        Self {
            name: &rule.name,
            description: &rule.description,
            source: rule.source.label(),
            resource_types: rule.resource_types.iter().map(String::as_str).collect(),
            resource_name_patterns: rule.resource_name_patterns.iter().map(regex::Regex::as_str).collect(),
            patterns: rule.pattern_sources().collect(),
            allow_create: rule.allow_create,
            allow_destroy: rule.allow_destroy,
            allow_replace: rule.allow_replace,
            enabled: rule.enabled,
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| HarnessError::internal(format!("Failed to serialize output: {e}")))
}

fn format_phase_status(status: PhaseStatus) -> String {
    let label = status.to_string();
    match status {
        PhaseStatus::Succeeded => label.green().to_string(),
        PhaseStatus::Skipped => label.dimmed().to_string(),
        PhaseStatus::Running => label.yellow().to_string(),
        PhaseStatus::Failed | PhaseStatus::TimedOut | PhaseStatus::Cancelled => {
            label.red().to_string()
        }
    }
}

fn format_verdict(verdict: Verdict) -> String {
    let label = verdict.to_string();
    match verdict {
        Verdict::Pass => label.green().bold().to_string(),
        Verdict::Warn => label.yellow().bold().to_string(),
        Verdict::Fail | Verdict::Error => label.red().bold().to_string(),
    }
}

fn format_allows(rule: &ExemptionRule) -> String {
    let allows: Vec<&str> = [
        (rule.allow_create, "create"),
        (rule.allow_destroy, "destroy"),
        (rule.allow_replace, "replace"),
    ]
    .iter()
    .filter(|(allowed, _)| *allowed)
    .map(|(_, kind)| *kind)
    .collect();

    if allows.is_empty() {
        String::from("-")
    } else {
        allows.join(", ")
    }
}

/// Truncates a string to at most `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drift::{ChangeKind, DriftLine, ExemptedLine};

    fn report() -> DriftReport {
        let mut report = DriftReport::default();
        report.real_drift.push(DriftLine {
            address: Some(String::from("module.zone.cloudflare_zone.primary")),
            change_kind: ChangeKind::Update,
            line: String::from("~ plan = \"free\" -> \"pro\""),
            line_no: 3,
        });
        report.exempted_drift.push(ExemptedLine {
            drift: DriftLine {
                address: Some(String::from("module.zone.cloudflare_zone.primary")),
                change_kind: ChangeKind::Update,
                line: String::from("~ name_servers = [] -> [\"a\"]"),
                line_no: 2,
            },
            rule: String::from("zone-specific"),
            whole_resource: false,
        });
        report.triggered_exemptions.insert(String::from("zone-specific"), 1);
        report
    }

    #[test]
    fn test_drift_text_lists_lines() {
        colored::control::set_override(false);
        let text = OutputFormatter::new(OutputFormat::Text)
            .format_drift(&report())
            .expect("formats");
        assert!(text.contains("plan = \"free\" -> \"pro\""));
        assert!(text.contains("zone-specific: 1 line(s)"));
        assert!(text.contains("Real drift detected."));
    }

    #[test]
    fn test_drift_json_is_parseable() {
        let json = OutputFormatter::new(OutputFormat::Json)
            .format_drift(&report())
            .expect("formats");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value["real_drift"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn test_rules_json_includes_builtin() {
        let config = ExemptionConfig::legacy().expect("builtins compile");
        let json = OutputFormatter::new(OutputFormat::Json)
            .format_rules(&config)
            .expect("formats");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value["settings"]["apply_exemptions"], false);
        assert_eq!(value["rules"][0]["name"], crate::exemptions::STATUS_BECOMES_ACTIVE);
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("é".repeat(12).as_str(), 8), format!("{}...", "é".repeat(5)));
    }
}
