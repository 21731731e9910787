//! Loading and merging of layered rule files.
//!
//! Layers are applied in order: builtin rules, the global file, then one
//! file per targeted resource. A later entry replaces an earlier entry of
//! the same name; every other entry passes through. Patterns are compiled
//! only after the merge, so an overridden global rule with a bad pattern
//! never reaches the compiler, and any surviving bad pattern fails the load.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::ExemptionPaths;
use crate::error::{ConfigError, HarnessError, Result};

use super::file::{RuleFile, RuleSpec};
use super::rules::{builtin_specs, ExemptionConfig, ExemptionRule, ExemptionSettings, RuleSource};

/// One layer of rule entries.
#[derive(Debug, Clone)]
pub struct RuleLayer {
    /// Where the entries came from.
    pub source: RuleSource,
    /// The entries.
    pub rules: Vec<RuleSpec>,
}

/// Loads layered rule files into an [`ExemptionConfig`].
#[derive(Debug, Clone)]
pub struct ExemptionRuleStore {
    /// Global rule file.
    global_file: PathBuf,
    /// Directory of `<resource>.yaml` files.
    resource_dir: PathBuf,
}

impl ExemptionRuleStore {
    /// Creates a store reading from the given locations.
    #[must_use]
    pub fn new(global_file: impl Into<PathBuf>, resource_dir: impl Into<PathBuf>) -> Self {
        Self {
            global_file: global_file.into(),
            resource_dir: resource_dir.into(),
        }
    }

    /// Creates a store from harness configuration.
    #[must_use]
    pub fn from_paths(paths: &ExemptionPaths) -> Self {
        Self::new(&paths.global_file, &paths.resource_dir)
    }

    /// Path of the resource-scoped file for `resource`.
    #[must_use]
    pub fn resource_file(&self, resource: &str) -> PathBuf {
        self.resource_dir.join(format!("{resource}.yaml"))
    }

    /// Loads, merges and compiles the rule set for the targeted resources.
    ///
    /// A missing global file yields a disabled rule set holding only the
    /// builtin rules; resource files are not read in that case.
    ///
    /// # Errors
    ///
    /// Returns an error if a file is malformed, a resource name is not a
    /// plain file name, or any surviving pattern fails to compile.
    pub fn load<S: AsRef<str>>(&self, resources: &[S]) -> Result<ExemptionConfig> {
        let builtin = RuleLayer {
            source: RuleSource::Builtin,
            rules: builtin_specs(),
        };

        let Some(global) = RuleFile::load(&self.global_file)? else {
            info!(
                "No exemption file at {}, exemptions disabled",
                self.global_file.display()
            );
            return compile(merge(vec![builtin]), ExemptionSettings::disabled());
        };

        let settings: ExemptionSettings = global.settings.unwrap_or_default().into();
        let mut layers = vec![
            builtin,
            RuleLayer {
                source: RuleSource::Global(self.global_file.clone()),
                rules: global.exemptions,
            },
        ];

        if settings.load_resource_scoped {
            for resource in resources {
                let resource = resource.as_ref();
                check_resource_name(resource)?;
                let path = self.resource_file(resource);

                match RuleFile::load(&path)? {
                    Some(file) => {
                        if file.settings.is_some() {
                            debug!("Ignoring settings block in {}", path.display());
                        }
                        debug!(
                            "Loaded {} resource-scoped exemption(s) from {}",
                            file.exemptions.len(),
                            path.display()
                        );
                        layers.push(RuleLayer {
                            source: RuleSource::Resource {
                                resource: resource.to_string(),
                                path,
                            },
                            rules: file.exemptions,
                        });
                    }
                    None => debug!("No resource exemptions at {}", path.display()),
                }
            }
        }

        let config = compile(merge(layers), settings)?;
        info!(
            "Loaded {} exemption rule(s), apply_exemptions={}",
            config.len(),
            config.settings().apply_exemptions
        );
        Ok(config)
    }
}

/// Merges layers by rule name; later layers replace earlier same-named entries.
#[must_use]
pub fn merge(layers: Vec<RuleLayer>) -> BTreeMap<String, (RuleSpec, RuleSource)> {
    let mut merged = BTreeMap::new();
    for layer in layers {
        for rule in layer.rules {
            if let Some((_, previous)) = merged.get(&rule.name) {
                debug!("Exemption '{}' from {} overrides {previous}", rule.name, layer.source);
            }
            merged.insert(rule.name.clone(), (rule, layer.source.clone()));
        }
    }
    merged
}

fn compile(
    merged: BTreeMap<String, (RuleSpec, RuleSource)>,
    settings: ExemptionSettings,
) -> Result<ExemptionConfig> {
    let rules = merged
        .into_values()
        .map(|(spec, source)| ExemptionRule::compile(&spec, source))
        .collect::<Result<Vec<_>>>()?;
    Ok(ExemptionConfig::new(rules, settings))
}

fn check_resource_name(resource: &str) -> Result<()> {
    let is_plain = !resource.is_empty()
        && Path::new(resource).file_name().is_some_and(|n| n == resource)
        && resource != "..";
    if is_plain {
        Ok(())
    } else {
        Err(HarnessError::Config(ConfigError::validation(
            format!("Invalid resource name '{resource}'"),
            "resource",
        )))
    }
}
