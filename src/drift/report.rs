//! Drift report types and stateless plan scrapers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::tokenizer::{tokenize_line, ChangeKind, PlanEvent, PlanSummary};

/// A detected change line with its resource context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriftLine {
    /// Address of the enclosing resource, if a header preceded the line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Change kind of the enclosing resource.
    pub change_kind: ChangeKind,
    /// Trimmed change line.
    pub line: String,
    /// 1-based line number within the plan text.
    pub line_no: usize,
}

/// A detected change line that a rule exempted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExemptedLine {
    /// The change line.
    #[serde(flatten)]
    pub drift: DriftLine,
    /// Rule that matched.
    pub rule: String,
    /// The match was a whole-resource exemption.
    pub whole_resource: bool,
}

/// Per-resource view of a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanChangeRecord {
    /// Full resource address.
    pub resource_address: String,
    /// Resource type.
    pub resource_type: String,
    /// Resource name.
    pub resource_name: String,
    /// What will happen to the resource.
    pub change_kind: ChangeKind,
    /// Attribute change lines under the header, computed ones included.
    pub lines: Vec<String>,
}

/// Result of classifying one plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriftReport {
    /// True iff no real drift survived the rules.
    pub only_computed_changes: bool,
    /// Match counts per rule, for rules that matched at least once.
    pub triggered_exemptions: BTreeMap<String, usize>,
    /// Unexempted change lines, in plan order.
    pub real_drift: Vec<DriftLine>,
    /// Exempted change lines, in plan order.
    pub exempted_drift: Vec<ExemptedLine>,
    /// Lines whose only change is a value known after apply.
    pub computed_lines: usize,
    /// Enabled rules that never matched, when unused warnings are on.
    pub unused_exemptions: Vec<String>,
    /// Scraped `Plan:` line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<PlanSummary>,
    /// The tool reported no changes at all.
    pub no_changes: bool,
    /// Resources seen in the plan.
    pub records: Vec<PlanChangeRecord>,
}

impl DriftReport {
    /// A report for a plan with no changes.
    #[must_use]
    pub fn clean() -> Self {
        Self {
            only_computed_changes: true,
            no_changes: true,
            ..Self::default()
        }
    }

    /// Returns true if real drift was found.
    #[must_use]
    pub fn has_real_drift(&self) -> bool {
        !self.real_drift.is_empty()
    }

    /// Returns true if any change was exempted.
    #[must_use]
    pub fn has_exemptions(&self) -> bool {
        !self.exempted_drift.is_empty()
    }

    /// Total number of detected change lines.
    #[must_use]
    pub fn detected_lines(&self) -> usize {
        self.real_drift.len() + self.exempted_drift.len()
    }
}

/// Returns the counts of the last `Plan:` line in `text`.
#[must_use]
pub fn scrape_plan_summary(text: &str) -> Option<PlanSummary> {
    text.lines()
        .rev()
        .find_map(|line| match tokenize_line(line) {
            PlanEvent::PlanSummary(summary) => Some(summary),
            _ => None,
        })
}

/// Returns the distinct `module.X` names of resource headers, in order of
/// first appearance.
#[must_use]
pub fn affected_modules(text: &str) -> Vec<String> {
    let mut modules: Vec<String> = Vec::new();
    for line in text.lines() {
        let PlanEvent::ResourceHeader { address, .. } = tokenize_line(line) else {
            continue;
        };
        let Some(rest) = address.strip_prefix("module.") else {
            continue;
        };
        let name = rest
            .split(['.', '['])
            .next()
            .unwrap_or_default()
            .to_string();
        if !name.is_empty() && !modules.contains(&name) {
            modules.push(name);
        }
    }
    modules
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
  # module.zone.cloudflare_zone.primary will be updated in-place
  ~ resource "cloudflare_zone" "primary" {
      ~ plan = "free" -> "pro"
    }

  # module.dns.cloudflare_record.records["www"] will be created
  + resource "cloudflare_record" "records" {
      + id = (known after apply)
    }

  # module.zone.cloudflare_zone_setting.ssl will be created

Plan: 2 to add, 1 to change, 0 to destroy.
"#;

    #[test]
    fn test_scrape_summary() {
        let summary = scrape_plan_summary(PLAN).expect("summary present");
        assert_eq!(summary.add, 2);
        assert_eq!(summary.change, 1);
        assert_eq!(summary.to_string(), "2 to add, 1 to change, 0 to destroy");
        assert!(scrape_plan_summary("nothing here").is_none());
    }

    #[test]
    fn test_affected_modules_in_order() {
        assert_eq!(affected_modules(PLAN), vec!["zone", "dns"]);
        assert!(affected_modules("# cloudflare_zone.a will be created").is_empty());
    }

    #[test]
    fn test_clean_report() {
        let report = DriftReport::clean();
        assert!(report.only_computed_changes);
        assert!(!report.has_real_drift());
        assert_eq!(report.detected_lines(), 0);
    }
}
