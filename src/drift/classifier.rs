//! Drift classification over the plan event stream.
//!
//! Classification is a pure function of the plan text, an immutable rule
//! set and an optional resource filter. Match counters live only for the
//! duration of one call, so classifying the same text twice yields the
//! same report.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::exemptions::{is_builtin_name, ExemptionConfig, ExemptionRule};

use super::report::{DriftLine, DriftReport, ExemptedLine, PlanChangeRecord};
use super::tokenizer::{ChangeKind, PlanEvent, PlanTokenizer};

/// Resource context established by the most recent header.
#[derive(Debug, Clone)]
struct ResourceContext {
    address: String,
    resource_type: String,
    resource_name: String,
    change_kind: ChangeKind,
}

/// A rule that exempted a line.
struct Exemption<'r> {
    rule: &'r ExemptionRule,
    whole_resource: bool,
}

/// Classifies plan output into real and exempted drift.
#[derive(Debug, Clone)]
pub struct DriftClassifier {
    /// Merged rule set.
    config: Arc<ExemptionConfig>,
    /// Line tokenizer.
    tokenizer: PlanTokenizer,
}

impl DriftClassifier {
    /// Creates a classifier over the given rule set.
    #[must_use]
    pub const fn new(config: Arc<ExemptionConfig>) -> Self {
        Self {
            config,
            tokenizer: PlanTokenizer::new(),
        }
    }

    /// Returns the rule set.
    #[must_use]
    pub fn config(&self) -> &ExemptionConfig {
        &self.config
    }

    /// Classifies plan text.
    ///
    /// With a `filter`, only resources inside `module.<filter>`, or whose
    /// type or name equals the filter, are considered.
    #[must_use]
    pub fn classify(&self, plan: &str, filter: Option<&str>) -> DriftReport {
        let settings = *self.config.settings();
        let mut report = DriftReport::default();
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut current: Option<ResourceContext> = None;
        let mut in_scope = filter.is_none();

        for (idx, event) in self.tokenizer.tokenize(plan).enumerate() {
            let detected = event.is_detected_change();
            match event {
                PlanEvent::ResourceHeader {
                    address,
                    resource_type,
                    resource_name,
                    change_kind,
                } => {
                    let context = ResourceContext {
                        address,
                        resource_type,
                        resource_name,
                        change_kind,
                    };
                    in_scope = filter.is_none_or(|f| context.matches_filter(f));
                    if in_scope {
                        report.records.push(PlanChangeRecord {
                            resource_address: context.address.clone(),
                            resource_type: context.resource_type.clone(),
                            resource_name: context.resource_name.clone(),
                            change_kind: context.change_kind,
                            lines: Vec::new(),
                        });
                    }
                    current = Some(context);
                }
                PlanEvent::PlanSummary(summary) => report.summary = Some(summary),
                PlanEvent::NoChanges => report.no_changes = true,
                PlanEvent::AttributeChange { text, computed, .. } => {
                    if !in_scope {
                        continue;
                    }
                    if current.is_some() {
                        if let Some(record) = report.records.last_mut() {
                            record.lines.push(text.clone());
                        }
                    }
                    if computed {
                        report.computed_lines += 1;
                        continue;
                    }
                    if !detected {
                        continue;
                    }

                    let drift = DriftLine {
                        address: current.as_ref().map(|c| c.address.clone()),
                        change_kind: current.as_ref().map_or(ChangeKind::Unknown, |c| c.change_kind),
                        line: text.clone(),
                        line_no: idx + 1,
                    };

                    match self.find_exemption(current.as_ref(), &text) {
                        Some(Exemption {
                            rule,
                            whole_resource,
                        }) => {
                            *counts.entry(rule.name.clone()).or_insert(0) += 1;
                            if settings.verbose {
                                info!("Exempted by '{}': {}", rule.name, drift.line);
                            }
                            report.exempted_drift.push(ExemptedLine {
                                drift,
                                rule: rule.name.clone(),
                                whole_resource,
                            });
                        }
                        None => {
                            debug!("Real drift at line {}: {}", drift.line_no, drift.line);
                            report.real_drift.push(drift);
                        }
                    }
                }
                PlanEvent::BlockDeclaration { .. } | PlanEvent::Other => {}
            }
        }

        if settings.apply_exemptions && settings.warn_unused {
            report.unused_exemptions = self
                .config
                .enabled_rules()
                .filter(|r| !r.is_builtin() && !counts.contains_key(&r.name))
                .map(|r| r.name.clone())
                .collect();
        }

        report.only_computed_changes = report.real_drift.is_empty();
        report.triggered_exemptions = counts;
        report
    }

    /// Finds the first rule that exempts a detected change line.
    fn find_exemption(
        &self,
        context: Option<&ResourceContext>,
        line: &str,
    ) -> Option<Exemption<'_>> {
        let settings = self.config.settings();
        let (address, resource_type) =
            context.map_or(("", ""), |c| (c.address.as_str(), c.resource_type.as_str()));

        if !settings.apply_exemptions {
            return self
                .config
                .enabled_rules()
                .filter(|r| is_builtin_name(&r.name))
                .find(|r| r.applies_to(address, resource_type) && r.matches_line(line))
                .map(|rule| Exemption {
                    rule,
                    whole_resource: false,
                });
        }

        if let Some(context) = context {
            let whole = self.config.enabled_rules().find(|r| {
                r.allows_kind(context.change_kind) && r.applies_to(address, resource_type)
            });
            if let Some(rule) = whole {
                return Some(Exemption {
                    rule,
                    whole_resource: true,
                });
            }
        }

        self.config
            .enabled_rules()
            .find(|r| r.applies_to(address, resource_type) && r.matches_line(line))
            .map(|rule| Exemption {
                rule,
                whole_resource: false,
            })
    }
}

impl ResourceContext {
    fn matches_filter(&self, filter: &str) -> bool {
        let module = format!("module.{filter}");
        let in_module = self.address.strip_prefix(&module).is_some_and(|rest| {
            rest.starts_with('.') || rest.starts_with('[')
        });
        in_module || self.resource_type == filter || self.resource_name == filter
    }
}

/// Classifies plan text against a rule set.
#[must_use]
pub fn classify(plan: &str, config: &ExemptionConfig, filter: Option<&str>) -> DriftReport {
    DriftClassifier::new(Arc::new(config.clone())).classify(plan, filter)
}
