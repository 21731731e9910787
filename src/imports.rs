//! Import annotations in module-scoped configuration.
//!
//! A line comment `# tf-migrate:import-address=<template>` directly above a
//! `resource` block marks a resource that must be imported under its new
//! address instead of being recreated. The template may embed `${var.NAME}`
//! placeholders. Annotations can be rendered as declarative `import` blocks
//! or executed through the tool.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::artifacts::write_private;
use crate::error::{HarnessError, ImportError, Result};
use crate::runner::{Invocation, ToolRunner, Verb};

/// File the rendered directives are written to in the new-version root.
pub const DIRECTIVES_FILE: &str = "tf-migrate-imports.tf";

static ANNOTATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:#|//)\s*tf-migrate:import-address=(?P<template>.+?)\s*$")
        .expect("annotation pattern is valid")
});

static RESOURCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*resource\s+"(?P<type>[^"]+)"\s+"(?P<name>[^"]+)""#)
        .expect("resource pattern is valid")
});

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{var\.(?P<name>[A-Za-z_][A-Za-z0-9_-]*)\}").expect("placeholder pattern is valid")
});

static BARE_REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:var|local)\.[A-Za-z_][A-Za-z0-9_-]*$").expect("reference pattern is valid")
});

const ALREADY_MANAGED_MARKERS: &[&str] = &["Resource already managed", "already exists"];

/// One annotated resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportSpec {
    /// Resource type.
    pub resource_type: String,
    /// Resource name.
    pub resource_name: String,
    /// Address in the root module, `module.<m>.<type>.<name>`.
    pub resource_address: String,
    /// Raw import id template.
    pub import_address_template: String,
    /// Module directory name.
    pub module_name: String,
    /// File holding the annotation.
    pub source_file: PathBuf,
    /// 1-based line of the annotation.
    pub line: usize,
}

/// Result of an executed import.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportOutcome {
    /// The resource was imported.
    Imported,
    /// The resource was already in state.
    AlreadyManaged,
}

/// Scans annotations and resolves their placeholders.
#[derive(Debug, Clone, Default)]
pub struct ImportResolver {
    /// Run-time variables.
    variables: BTreeMap<String, String>,
}

impl ImportResolver {
    /// Creates a resolver with the given variables.
    #[must_use]
    pub const fn new(variables: BTreeMap<String, String>) -> Self {
        Self { variables }
    }

    /// Creates a resolver from configured variables overlaid by
    /// `TF_VAR_<NAME>` environment values.
    #[must_use]
    pub fn from_env(configured: &BTreeMap<String, String>) -> Self {
        Self::with_env(configured, std::env::vars())
    }

    /// Like [`from_env`](Self::from_env) with an explicit environment.
    #[must_use]
    pub fn with_env<I>(configured: &BTreeMap<String, String>, env: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut variables = configured.clone();
        for (key, value) in env {
            if let Some(name) = key.strip_prefix("TF_VAR_") {
                if !name.is_empty() {
                    variables.insert(name.to_string(), value);
                }
            }
        }
        Self { variables }
    }

    /// Scans every `*.tf` file in each immediate subdirectory of `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed or a file read.
    pub fn scan(root: &Path) -> Result<Vec<ImportSpec>> {
        let scan_error = |message: String| {
            HarnessError::Import(ImportError::ScanFailed {
                path: root.to_path_buf(),
                message,
            })
        };

        let pattern = format!("{}/*/*.tf", glob::Pattern::escape(&root.display().to_string()));
        let mut files = glob::glob(&pattern)
            .map_err(|e| scan_error(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| scan_error(e.to_string()))?;
        files.sort();

        let mut specs = Vec::new();
        for file in files {
            let Some(module) = file
                .parent()
                .and_then(Path::file_name)
                .map(|m| m.to_string_lossy().into_owned())
            else {
                continue;
            };
            let content = std::fs::read_to_string(&file)?;
            let found = scan_source(&content, &module, &file);
            if !found.is_empty() {
                debug!("Found {} import annotation(s) in {}", found.len(), file.display());
            }
            specs.extend(found);
        }

        info!("Found {} import annotation(s) under {}", specs.len(), root.display());
        Ok(specs)
    }

    /// Substitutes known placeholders, leaving unknown ones in place.
    #[must_use]
    pub fn resolve(&self, template: &str) -> String {
        PLACEHOLDER_RE
            .replace_all(template, |caps: &Captures<'_>| {
                self.variables
                    .get(&caps["name"])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Substitutes every placeholder.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::UnresolvedVariable`] for the first unknown name.
    pub fn resolve_strict(&self, spec: &ImportSpec) -> Result<String> {
        if let Some(caps) = PLACEHOLDER_RE
            .captures_iter(&spec.import_address_template)
            .find(|caps| !self.variables.contains_key(&caps["name"]))
        {
            return Err(HarnessError::Import(ImportError::UnresolvedVariable {
                name: caps["name"].to_string(),
                address: spec.resource_address.clone(),
            }));
        }
        Ok(self.resolve(&spec.import_address_template))
    }

    /// Renders the `id` expression of a directive.
    ///
    /// A bare variable reference is emitted unquoted; anything else becomes a
    /// quoted string in which unresolved placeholders stay interpolations.
    #[must_use]
    pub fn render_id(&self, template: &str) -> String {
        let resolved = self.resolve(template.trim());

        if let Some(caps) = PLACEHOLDER_RE.captures(&resolved) {
            if caps.get(0).is_some_and(|m| m.as_str() == resolved) {
                return format!("var.{}", &caps["name"]);
            }
        }
        if BARE_REFERENCE_RE.is_match(&resolved) {
            return resolved;
        }

        format!("\"{}\"", resolved.replace('\\', "\\\\").replace('"', "\\\""))
    }

    /// Renders one `import` block.
    #[must_use]
    pub fn render_directive(&self, spec: &ImportSpec) -> String {
        format!(
            "import {{\n  to = {}\n  id = {}\n}}\n",
            spec.resource_address,
            self.render_id(&spec.import_address_template)
        )
    }

    /// Renders all directives as one file body.
    #[must_use]
    pub fn render_all(&self, specs: &[ImportSpec]) -> String {
        specs
            .iter()
            .map(|s| self.render_directive(s))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Writes the directives file into `root`. Nothing is written when there
    /// are no annotations.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn write_directives(&self, specs: &[ImportSpec], root: &Path) -> Result<Option<PathBuf>> {
        if specs.is_empty() {
            return Ok(None);
        }
        let path = root.join(DIRECTIVES_FILE);
        write_private(&path, self.render_all(specs).as_bytes()).await?;
        info!("Wrote {} import directive(s) to {}", specs.len(), path.display());
        Ok(Some(path))
    }

    /// Executes imports through the tool, with `env` applied to every
    /// import command.
    ///
    /// A resource the tool reports as already managed counts as imported.
    ///
    /// # Errors
    ///
    /// Returns an error for an unresolved placeholder or a failed import.
    pub async fn execute<R>(
        &self,
        runner: &R,
        binary: &str,
        working_dir: &Path,
        env: &BTreeMap<String, String>,
        specs: &[ImportSpec],
    ) -> Result<Vec<(String, ImportOutcome)>>
    where
        R: ToolRunner + ?Sized,
    {
        let mut outcomes = Vec::with_capacity(specs.len());

        for spec in specs {
            let id = self.resolve_strict(spec)?;
            let invocation = Invocation::tool(binary, Verb::Import, working_dir)
                .envs(env.clone())
                .arg(spec.resource_address.clone())
                .arg(id);

            let outcome = match runner.run(&invocation).await {
                Ok(_) => ImportOutcome::Imported,
                Err(err) if err.captured_output().is_some_and(is_already_managed) => {
                    debug!("{} is already managed", spec.resource_address);
                    ImportOutcome::AlreadyManaged
                }
                Err(err) => return Err(err),
            };

            info!("Import {}: {outcome:?}", spec.resource_address);
            outcomes.push((spec.resource_address.clone(), outcome));
        }

        Ok(outcomes)
    }
}

fn is_already_managed(output: &str) -> bool {
    ALREADY_MANAGED_MARKERS.iter().any(|m| output.contains(m))
}

/// Extracts annotations from one file. An annotation not directly followed
/// by a resource declaration is dropped.
#[must_use]
pub fn scan_source(content: &str, module: &str, file: &Path) -> Vec<ImportSpec> {
    let lines: Vec<&str> = content.lines().collect();
    let mut specs = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let Some(annotation) = ANNOTATION_RE.captures(line) else {
            continue;
        };
        let Some(resource) = lines.get(idx + 1).and_then(|next| RESOURCE_RE.captures(next)) else {
            debug!("Dropping annotation at {}:{} without a resource", file.display(), idx + 1);
            continue;
        };

        let resource_type = resource["type"].to_string();
        let resource_name = resource["name"].to_string();
        specs.push(ImportSpec {
            resource_address: format!("module.{module}.{resource_type}.{resource_name}"),
            resource_type,
            resource_name,
            import_address_template: annotation["template"].to_string(),
            module_name: module.to_string(),
            source_file: file.to_path_buf(),
            line: idx + 1,
        });
    }

    specs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SubprocessError;
    use crate::runner::{CommandOutput, MockToolRunner};

    const ZONE_TF: &str = r#"
# tf-migrate:import-address=${var.zone_id}
resource "cloudflare_zone_setting" "ssl" {
  zone_id = var.zone_id
}

// tf-migrate:import-address=${var.zone_id}/${var.record_id}
resource "cloudflare_dns_record" "www" {
}

# tf-migrate:import-address=orphan

resource "cloudflare_ruleset" "never" {
}
"#;

    fn spec(template: &str) -> ImportSpec {
        ImportSpec {
            resource_type: String::from("cloudflare_dns_record"),
            resource_name: String::from("www"),
            resource_address: String::from("module.zone.cloudflare_dns_record.www"),
            import_address_template: template.to_string(),
            module_name: String::from("zone"),
            source_file: PathBuf::from("zone/main.tf"),
            line: 1,
        }
    }

    fn resolver(vars: &[(&str, &str)]) -> ImportResolver {
        ImportResolver::new(
            vars.iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_scan_source_requires_adjacent_resource() {
        let specs = scan_source(ZONE_TF, "zone", Path::new("zone/main.tf"));
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].resource_address, "module.zone.cloudflare_zone_setting.ssl");
        assert_eq!(specs[0].import_address_template, "${var.zone_id}");
        assert_eq!(specs[0].line, 2);
        assert_eq!(specs[1].resource_type, "cloudflare_dns_record");
        assert_eq!(specs[1].import_address_template, "${var.zone_id}/${var.record_id}");
    }

    #[test]
    fn test_scan_uses_module_directories() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        std::fs::create_dir_all(dir.path().join("zone")).expect("module dir");
        std::fs::write(dir.path().join("zone/main.tf"), ZONE_TF).expect("write");
        // Root-level files are not module-scoped.
        std::fs::write(dir.path().join("main.tf"), ZONE_TF).expect("write");

        let specs = ImportResolver::scan(dir.path()).expect("scan ok");
        assert_eq!(specs.len(), 2);
        assert!(specs.iter().all(|s| s.module_name == "zone"));
    }

    #[test]
    fn test_render_bare_variable_unquoted() {
        let directive = resolver(&[]).render_directive(&spec("${var.zone_id}"));
        assert_eq!(
            directive,
            "import {\n  to = module.zone.cloudflare_dns_record.www\n  id = var.zone_id\n}\n"
        );
    }

    #[test]
    fn test_render_composite_id_quoted() {
        let r = resolver(&[("zone_id", "z123")]);
        assert_eq!(r.render_id("${var.zone_id}/${var.record_id}"), "\"z123/${var.record_id}\"");
        assert_eq!(r.render_id("${var.zone_id}"), "\"z123\"");
        assert_eq!(r.render_id("local.zone_id"), "local.zone_id");
    }

    #[test]
    fn test_env_overlays_configured_variables() {
        let configured = BTreeMap::from([(String::from("zone_id"), String::from("from-config"))]);
        let env = vec![
            (String::from("TF_VAR_zone_id"), String::from("from-env")),
            (String::from("OTHER"), String::from("x")),
        ];
        let r = ImportResolver::with_env(&configured, env);
        assert_eq!(r.resolve("${var.zone_id}"), "from-env");
    }

    #[test]
    fn test_strict_resolution_reports_missing_variable() {
        let err = resolver(&[("zone_id", "z")])
            .resolve_strict(&spec("${var.zone_id}/${var.record_id}"))
            .expect_err("record_id missing");
        assert!(matches!(
            err,
            HarnessError::Import(ImportError::UnresolvedVariable { ref name, .. }) if name == "record_id"
        ));
    }

    #[tokio::test]
    async fn test_execute_treats_already_managed_as_success() {
        let mut runner = MockToolRunner::new();
        runner
            .expect_run()
            .withf(|inv| inv.args.contains(&String::from("z1/r1")))
            .times(1)
            .returning(|inv| {
                Err(HarnessError::Subprocess(SubprocessError::NonZeroExit {
                    command: inv.command_line(),
                    exit_code: Some(1),
                    output: String::from("Error: Resource already managed by Terraform"),
                }))
            });

        let r = resolver(&[("zone_id", "z1"), ("record_id", "r1")]);
        let outcomes = r
            .execute(
                &runner,
                "terraform",
                Path::new("/tmp"),
                &BTreeMap::new(),
                &[spec("${var.zone_id}/${var.record_id}")],
            )
            .await
            .expect("already managed is success");
        assert_eq!(outcomes[0].1, ImportOutcome::AlreadyManaged);
    }

    #[tokio::test]
    async fn test_execute_passes_address_and_id() {
        let mut runner = MockToolRunner::new();
        runner
            .expect_run()
            .withf(|inv| {
                inv.verb == Some(Verb::Import)
                    && inv.args.ends_with(&[
                        String::from("module.zone.cloudflare_dns_record.www"),
                        String::from("z1"),
                    ])
            })
            .times(1)
            .returning(|_| Ok(CommandOutput::from_stdout("Import successful!")));

        let outcomes = resolver(&[("zone_id", "z1")])
            .execute(&runner, "terraform", Path::new("/tmp"), &BTreeMap::new(), &[spec("${var.zone_id}")])
            .await
            .expect("import succeeds");
        assert_eq!(outcomes[0].1, ImportOutcome::Imported);
    }

    #[tokio::test]
    async fn test_execute_carries_run_environment() {
        let mut runner = MockToolRunner::new();
        runner
            .expect_run()
            .withf(|inv| {
                inv.env.get("TF_VAR_zone_id").map(String::as_str) == Some("z1")
                    && inv.env.get("CLOUDFLARE_ACCOUNT_ID").map(String::as_str) == Some("acct")
            })
            .times(1)
            .returning(|_| Ok(CommandOutput::from_stdout("Import successful!")));

        let env: BTreeMap<String, String> = [
            (String::from("TF_VAR_zone_id"), String::from("z1")),
            (String::from("CLOUDFLARE_ACCOUNT_ID"), String::from("acct")),
        ]
        .into_iter()
        .collect();
        let outcomes = resolver(&[("zone_id", "z1")])
            .execute(&runner, "terraform", Path::new("/tmp"), &env, &[spec("${var.zone_id}")])
            .await
            .expect("import succeeds");
        assert_eq!(outcomes[0].1, ImportOutcome::Imported);
    }

    #[tokio::test]
    async fn test_execute_propagates_real_failures() {
        let mut runner = MockToolRunner::new();
        runner.expect_run().returning(|inv| {
            Err(HarnessError::Subprocess(SubprocessError::NonZeroExit {
                command: inv.command_line(),
                exit_code: Some(1),
                output: String::from("Error: Cannot import non-existent remote object"),
            }))
        });

        let result = resolver(&[("zone_id", "z1")])
            .execute(&runner, "terraform", Path::new("/tmp"), &BTreeMap::new(), &[spec("${var.zone_id}")])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_write_directives_skips_empty() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let written = resolver(&[]).write_directives(&[], dir.path()).await.expect("ok");
        assert!(written.is_none());

        let written = resolver(&[])
            .write_directives(&[spec("${var.zone_id}")], dir.path())
            .await
            .expect("ok")
            .expect("file written");
        let body = std::fs::read_to_string(written).expect("read back");
        assert!(body.contains("id = var.zone_id"));
    }
}
