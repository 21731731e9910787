//! Validation run orchestration.
//!
//! [`ValidationOrchestrator`] drives a run through its phases strictly in
//! order: credentials, old-version apply, migration, new-version plan,
//! new-version apply, stability re-plan, aggregation. A failed phase stops
//! the run; everything recorded so far stays in the [`RunContext`] and a
//! partial report is persisted next to the logs.

mod context;
mod phases;
mod report;

pub use context::{CheckpointResult, PhaseRecord, RunContext};
pub use phases::{Checkpoint, Phase, PhaseStatus};
pub use report::{ValidationReport, Verdict};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::artifacts::{fingerprint, restrict_private, write_private, ArtifactKind};
use crate::config::{check_required_with, HarnessConfig, ImportMode};
use crate::drift::{tokenize_line, DriftClassifier, DriftReport, PlanEvent};
use crate::error::{HarnessError, OrchestratorError, Result, SubprocessError};
use crate::exemptions::ExemptionConfig;
use crate::imports::ImportResolver;
use crate::migrate::MigrationTool;
use crate::runner::{CommandOutput, Invocation, ToolRunner, Verb};

/// State file placed into the new-version tree for the migration tool.
const MIGRATED_STATE_FILE: &str = "terraform.tfstate";

/// File name of the persisted report inside the run directory.
pub const REPORT_FILE: &str = "report.json";

type CredentialLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Sequential state machine for one validation run.
pub struct ValidationOrchestrator<'a, R: ToolRunner, M: MigrationTool> {
    /// Harness configuration.
    config: &'a HarnessConfig,
    /// Executes every external command.
    runner: &'a R,
    /// The migration tool.
    migration: &'a M,
    /// Classifier over the merged rule set.
    classifier: DriftClassifier,
    /// Import annotation handling.
    imports: ImportResolver,
    /// Credential lookup, the process environment by default.
    credential_lookup: CredentialLookup,
}

impl<'a, R: ToolRunner, M: MigrationTool> ValidationOrchestrator<'a, R, M> {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(
        config: &'a HarnessConfig,
        runner: &'a R,
        migration: &'a M,
        rules: Arc<ExemptionConfig>,
    ) -> Self {
        Self {
            config,
            runner,
            migration,
            classifier: DriftClassifier::new(rules),
            imports: ImportResolver::from_env(&config.variables),
            credential_lookup: Box::new(|name| std::env::var(name).ok()),
        }
    }

    /// Replaces the credential lookup.
    #[must_use]
    pub fn with_credential_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.credential_lookup = Box::new(lookup);
        self
    }

    /// Replaces the import resolver.
    #[must_use]
    pub fn with_import_resolver(mut self, imports: ImportResolver) -> Self {
        self.imports = imports;
        self
    }

    /// Runs every phase in order and returns the report.
    ///
    /// Drift is reported through the verdict, not as an error. The report is
    /// persisted under the run's artifacts directory even when a phase fails.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing phase.
    pub async fn run(&self, ctx: &mut RunContext) -> Result<ValidationReport> {
        info!(
            "Starting validation run {} ({} -> {})",
            ctx.run_id,
            ctx.old_dir.display(),
            ctx.new_dir.display()
        );
        fs::create_dir_all(&ctx.artifacts_dir).await?;

        let outcome = self.run_phases(ctx).await;
        let report =
            ValidationReport::from_context(ctx, outcome.as_ref().err().map(ToString::to_string));

        match outcome {
            Ok(()) => {
                persist_report(ctx, &report).await?;
                info!("Run {} finished: {}", ctx.run_id, report.verdict);
                Ok(report)
            }
            Err(err) => {
                error!("Run {} aborted: {err}", ctx.run_id);
                if let Err(persist_err) = persist_report(ctx, &report).await {
                    warn!("Failed to persist partial report: {persist_err}");
                }
                Err(err)
            }
        }
    }

    async fn run_phases(&self, ctx: &mut RunContext) -> Result<()> {
        for phase in Phase::ALL {
            if phase == Phase::ApplyOld && !self.config.workspace.apply_old {
                info!("Skipping {phase}: disabled by configuration");
                ctx.skip(phase, "workspace.apply_old is false");
                continue;
            }
            self.run_phase(phase, ctx).await?;
        }
        Ok(())
    }

    /// Runs one phase under its deadline and records the outcome.
    async fn run_phase(&self, phase: Phase, ctx: &mut RunContext) -> Result<()> {
        info!("Phase {phase}: starting");
        ctx.begin(phase);

        let result = match self.config.timeouts.for_phase(phase.key()) {
            Some(secs) => {
                match tokio::time::timeout(Duration::from_secs(secs), self.execute(phase, ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(HarnessError::Orchestrator(OrchestratorError::PhaseTimedOut {
                        phase: phase.key().to_string(),
                        timeout_secs: secs,
                    })),
                }
            }
            None => self.execute(phase, ctx).await,
        };

        match &result {
            Ok(()) => {
                ctx.finish(phase, PhaseStatus::Succeeded, None);
                info!("Phase {phase}: done");
            }
            Err(err) => {
                let status = match err {
                    HarnessError::Orchestrator(OrchestratorError::PhaseTimedOut { .. })
                    | HarnessError::Subprocess(SubprocessError::TimedOut { .. }) => {
                        PhaseStatus::TimedOut
                    }
                    _ => PhaseStatus::Failed,
                };
                error!("Phase {phase}: {status}: {err}");
                ctx.finish(phase, status, Some(err.to_string()));
            }
        }

        result
    }

    async fn execute(&self, phase: Phase, ctx: &mut RunContext) -> Result<()> {
        match phase {
            Phase::Credentials => self.check_credentials(),
            Phase::ApplyOld => self.apply_old(ctx).await,
            Phase::Migrate => self.migrate(ctx).await,
            Phase::PlanNew => self.plan_new(ctx).await,
            Phase::ApplyNew => self.apply_new(ctx).await,
            Phase::Stability => self.stability(ctx).await,
            Phase::Aggregate => {
                self.aggregate(ctx);
                Ok(())
            }
        }
    }

    fn check_credentials(&self) -> Result<()> {
        check_required_with(&self.config.credentials.required, |name| (self.credential_lookup)(name))?;
        debug!(
            "All {} required credential(s) present",
            self.config.credentials.required.len()
        );
        Ok(())
    }

    async fn apply_old(&self, ctx: &mut RunContext) -> Result<()> {
        let old = ctx.old_dir.clone();
        check_tree(&old).await?;

        self.init(ctx, Phase::ApplyOld, &old).await?;

        let apply = self
            .tool(Verb::Apply, &old, ctx)
            .arg("-auto-approve")
            .targets(&ctx.targets);
        self.step(ctx, Phase::ApplyOld, "apply", &apply).await?;

        let snapshot = self.snapshot(ctx, &old, "old-state.json").await?;
        ctx.old_state = Some(snapshot);
        Ok(())
    }

    async fn migrate(&self, ctx: &mut RunContext) -> Result<()> {
        let old = ctx.old_dir.clone();
        let new = ctx.new_dir.clone();
        check_tree(&old).await?;

        if ctx.old_state.is_none() {
            info!("No old-version snapshot from this run, pulling current state");
            self.init(ctx, Phase::Migrate, &old).await?;
        }

        let copied = copy_tree(&old, &new).await?;
        debug!("Copied {copied} configuration file(s) into {}", new.display());

        // The migrated and pushed state is the tool's raw output; only the
        // run-directory snapshot is sanitized.
        let state = new.join(MIGRATED_STATE_FILE);
        let pull = self.tool(Verb::StatePull, &old, ctx);
        let output = self.runner.capture(&pull, &state).await?;
        debug!("Captured old-version state into {}", state.display());

        if ctx.old_state.is_none() {
            let snapshot = save_snapshot(ctx, "old-state.json", &output).await?;
            ctx.old_state = Some(snapshot);
        }

        let invocation = self
            .migration
            .invocation(&old, &new, &state)
            .envs(ctx.env.clone());
        self.step(ctx, Phase::Migrate, "tool", &invocation).await?;

        match self.migration.renames(&new).await? {
            Some(renames) => {
                info!("{} reported {} resource rename(s)", self.migration.name(), renames.len());
                for rename in &renames {
                    debug!("Renamed {} -> {}", rename.from, rename.to);
                }
                ctx.renames = Some(renames);
            }
            None => info!("{} does not report resource renames", self.migration.name()),
        }

        if self.config.imports.mode == ImportMode::Directives {
            let specs = ImportResolver::scan(&new)?;
            ctx.directives_file = self.imports.write_directives(&specs, &new).await?;
        }

        Ok(())
    }

    async fn plan_new(&self, ctx: &mut RunContext) -> Result<()> {
        let new = ctx.new_dir.clone();
        check_tree(&new).await?;

        self.init(ctx, Phase::PlanNew, &new).await?;

        if self.config.workspace.push_state {
            let push = self
                .tool(Verb::StatePush, &new, ctx)
                .arg(new.join(MIGRATED_STATE_FILE).display().to_string());
            self.step(ctx, Phase::PlanNew, "state-push", &push).await?;
            ctx.state_pushed = true;
            info!("Pushed migrated state");
        }

        if self.config.imports.mode == ImportMode::Execute {
            let specs = ImportResolver::scan(&new)?;
            let outcomes = self
                .imports
                .execute(self.runner, &self.config.tool.binary, &new, &ctx.env, &specs)
                .await?;
            ctx.imports.extend(outcomes);
        }

        let plan_file = ctx.artifacts_dir.join("new.tfplan");
        let plan = self
            .tool(Verb::Plan, &new, ctx)
            .out_file(&plan_file)
            .targets(&ctx.targets);
        let output = self.step(ctx, Phase::PlanNew, "plan", &plan).await?;
        restrict_private(&plan_file).await?;
        ctx.record_artifact(ArtifactKind::PlanFile, &plan_file, None);
        ctx.plan_file = Some(plan_file);

        let log = ctx.log_path(Phase::PlanNew, "plan");
        self.checkpoint(ctx, Checkpoint::Initial, &output, log);
        Ok(())
    }

    async fn apply_new(&self, ctx: &mut RunContext) -> Result<()> {
        let new = ctx.new_dir.clone();
        let plan_file = ctx
            .plan_file
            .clone()
            .ok_or_else(|| HarnessError::internal("no saved plan to apply"))?;

        let apply = self
            .tool(Verb::Apply, &new, ctx)
            .arg(plan_file.display().to_string());
        self.step(ctx, Phase::ApplyNew, "apply", &apply).await?;

        let snapshot = self.snapshot(ctx, &new, "new-state.json").await?;
        ctx.new_state = Some(snapshot);
        Ok(())
    }

    async fn stability(&self, ctx: &mut RunContext) -> Result<()> {
        let new = ctx.new_dir.clone();
        let plan = self.tool(Verb::Plan, &new, ctx).targets(&ctx.targets);
        let output = self.step(ctx, Phase::Stability, "plan", &plan).await?;

        let log = ctx.log_path(Phase::Stability, "plan");
        self.checkpoint(ctx, Checkpoint::PostApply, &output, log);
        Ok(())
    }

    fn aggregate(&self, ctx: &RunContext) {
        for result in &ctx.checkpoints {
            let report = &result.report;
            if report.has_real_drift() {
                error!(
                    "{} real drift line(s) at the {} checkpoint",
                    report.real_drift.len(),
                    result.checkpoint
                );
            }
            if self.classifier.config().settings().warn_unused {
                for rule in &report.unused_exemptions {
                    warn!("Exemption '{rule}' never matched at the {} checkpoint", result.checkpoint);
                }
            }
        }
        info!("Verdict: {}", Verdict::from_checkpoints(&ctx.checkpoints));
    }

    /// Classifies plan output and records the checkpoint.
    fn checkpoint(
        &self,
        ctx: &mut RunContext,
        checkpoint: Checkpoint,
        output: &CommandOutput,
        plan_log: PathBuf,
    ) {
        let text = output.combined();
        let report = if reports_no_changes(&text) {
            DriftReport::clean()
        } else {
            self.classifier.classify(&text, ctx.filter())
        };

        info!(
            "Checkpoint {checkpoint}: {} real, {} exempted, {} computed",
            report.real_drift.len(),
            report.exempted_drift.len(),
            report.computed_lines
        );

        ctx.checkpoints.push(CheckpointResult {
            checkpoint,
            report,
            plan_log,
        });
    }

    /// Builds a tool invocation with the run's environment.
    fn tool(&self, verb: Verb, dir: &Path, ctx: &RunContext) -> Invocation {
        Invocation::tool(&self.config.tool.binary, verb, dir).envs(ctx.env.clone())
    }

    async fn init(&self, ctx: &mut RunContext, phase: Phase, dir: &Path) -> Result<()> {
        let init = self
            .tool(Verb::Init, dir, ctx)
            .backend_config(self.config.tool.backend_config.as_deref());
        self.step(ctx, phase, "init", &init).await.map(|_| ())
    }

    /// Runs one command, persisting its sanitized output to the phase log.
    async fn step(
        &self,
        ctx: &mut RunContext,
        phase: Phase,
        step: &str,
        invocation: &Invocation,
    ) -> Result<CommandOutput> {
        let log = ctx.log_path(phase, step);
        let result = self.runner.run_to_file(invocation, &log).await;
        ctx.record_artifact(ArtifactKind::Log, &log, None);
        result
    }

    /// Pulls state in `dir` and saves it owner-only under the run directory.
    async fn snapshot(&self, ctx: &mut RunContext, dir: &Path, name: &str) -> Result<PathBuf> {
        let pull = self.tool(Verb::StatePull, dir, ctx);
        let output = self.runner.run(&pull).await?;
        save_snapshot(ctx, name, &output).await
    }
}

/// Writes `report` owner-only as [`REPORT_FILE`] in the run directory and
/// records it as an artifact. Also used for runs interrupted from outside
/// the orchestrator.
///
/// # Errors
///
/// Returns an error if the report cannot be serialized or written.
pub async fn persist_report(ctx: &mut RunContext, report: &ValidationReport) -> Result<PathBuf> {
    let json = serde_json::to_vec_pretty(report)
        .map_err(|e| HarnessError::internal(format!("Failed to serialize report: {e}")))?;
    let path = ctx.artifacts_dir.join(REPORT_FILE);
    write_private(&path, &json).await?;
    ctx.record_artifact(ArtifactKind::Report, &path, Some(fingerprint(&json)));
    info!("Saved report to {}", path.display());
    Ok(path)
}

/// Saves sanitized pull output as a state snapshot artifact.
async fn save_snapshot(ctx: &mut RunContext, name: &str, output: &CommandOutput) -> Result<PathBuf> {
    let path = ctx.artifacts_dir.join(name);
    write_private(&path, output.stdout.as_bytes()).await?;
    ctx.record_artifact(
        ArtifactKind::StateSnapshot,
        &path,
        Some(fingerprint(output.stdout.as_bytes())),
    );
    info!("Saved state snapshot to {}", path.display());
    Ok(path)
}

fn reports_no_changes(text: &str) -> bool {
    text.lines()
        .any(|line| matches!(tokenize_line(line), PlanEvent::NoChanges))
}

async fn check_tree(dir: &Path) -> Result<()> {
    match fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(HarnessError::Orchestrator(OrchestratorError::InvalidWorkingTree {
            path: dir.to_path_buf(),
            reason: String::from("not a directory"),
        })),
        Err(e) => Err(HarnessError::Orchestrator(OrchestratorError::InvalidWorkingTree {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })),
    }
}

/// Copies configuration files from `src` into `dst`, recursing into module
/// directories. Hidden entries, state files and the dependency lock file
/// are left behind.
async fn copy_tree(src: &Path, dst: &Path) -> Result<usize> {
    let mut pending = vec![(src.to_path_buf(), dst.to_path_buf())];
    let mut copied = 0;

    while let Some((from, to)) = pending.pop() {
        fs::create_dir_all(&to).await?;
        let mut entries = fs::read_dir(&from).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if name_str.starts_with('.') || path == dst {
                continue;
            }

            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push((path, to.join(&name)));
            } else if file_type.is_file() && !name_str.contains(".tfstate") {
                fs::copy(&path, to.join(&name)).await?;
                copied += 1;
            }
        }
    }

    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SanitizerConfig;
    use crate::error::EnvironmentError;
    use crate::runner::{OutputSanitizer, REDACTION_MARKER};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const DRIFT_PLAN: &str = r#"
  # module.zone.cloudflare_zone.primary will be updated in-place
  ~ resource "cloudflare_zone" "primary" {
      ~ plan = "free" -> "pro"
    }

Plan: 0 to add, 1 to change, 0 to destroy.
"#;

    const NO_CHANGES: &str = "No changes. Your infrastructure matches the configuration.";

    /// State as the tool prints it, secret-bearing attributes included.
    const RAW_STATE: &str =
        r#"{"version":4,"serial":7,"resources":[{"attributes":{"api_token":"realtoken123"}}]}"#;

    /// Answers tool invocations from a script and records every call.
    /// Output is sanitized the way the real runner does it.
    struct ScriptedRunner {
        calls: Mutex<Vec<Invocation>>,
        plans: Mutex<Vec<String>>,
        fail_verb: Option<Verb>,
        hang_verb: Option<Verb>,
        sanitizer: OutputSanitizer,
    }

    impl ScriptedRunner {
        fn new(plans: &[&str]) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                plans: Mutex::new(plans.iter().rev().map(|p| (*p).to_string()).collect()),
                fail_verb: None,
                hang_verb: None,
                sanitizer: OutputSanitizer::new(&SanitizerConfig::default()).expect("sanitizer"),
            }
        }

        /// Raw stdout of one scripted command.
        async fn respond(&self, invocation: &Invocation) -> Result<String> {
            self.calls.lock().expect("lock").push(invocation.clone());

            if invocation.verb.is_some() && invocation.verb == self.hang_verb {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if invocation.verb.is_some() && invocation.verb == self.fail_verb {
                return Err(HarnessError::Subprocess(SubprocessError::NonZeroExit {
                    command: invocation.command_line(),
                    exit_code: Some(1),
                    output: String::from("Error: zone not found"),
                }));
            }

            let stdout = match invocation.verb {
                Some(Verb::StatePull) => String::from(RAW_STATE),
                Some(Verb::Plan) => {
                    if let Some(out) = invocation.args.iter().find_map(|a| a.strip_prefix("-out=")) {
                        write_tool_file(Path::new(out), "binary plan");
                    }
                    self.plans
                        .lock()
                        .expect("lock")
                        .pop()
                        .unwrap_or_else(|| String::from(NO_CHANGES))
                }
                _ => String::from("ok"),
            };
            Ok(stdout)
        }

        fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().expect("lock").clone()
        }

        fn verbs(&self) -> Vec<String> {
            self.calls()
                .iter()
                .map(|c| c.verb.map_or_else(|| c.program.clone(), |v| v.to_string()))
                .collect()
        }
    }

    #[async_trait]
    impl ToolRunner for ScriptedRunner {
        async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
            let raw = self.respond(invocation).await?;
            Ok(CommandOutput::from_stdout(self.sanitizer.sanitize(&raw)))
        }

        async fn capture(&self, invocation: &Invocation, path: &Path) -> Result<CommandOutput> {
            let raw = self.respond(invocation).await?;
            write_private(path, raw.as_bytes()).await?;
            Ok(CommandOutput::from_stdout(self.sanitizer.sanitize(&raw)))
        }
    }

    /// Writes a file the way an external tool would, with its default mode.
    fn write_tool_file(path: &Path, content: &str) {
        std::fs::write(path, content).expect("tool writes file");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
                .expect("default mode");
        }
    }

    struct FakeMigration;

    #[async_trait]
    impl MigrationTool for FakeMigration {
        fn name(&self) -> &str {
            "fake-migrate"
        }

        fn invocation(&self, source: &Path, target: &Path, state: &Path) -> Invocation {
            Invocation::external(
                "fake-migrate",
                [
                    source.display().to_string(),
                    target.display().to_string(),
                    state.display().to_string(),
                ],
                target,
            )
        }
    }

    struct Fixture {
        _dir: TempDir,
        config: HarnessConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().expect("temp dir");
            let old = dir.path().join("v4");
            std::fs::create_dir_all(old.join("zone")).expect("module dir");
            std::fs::create_dir_all(old.join(".terraform")).expect("hidden dir");
            std::fs::write(old.join("main.tf"), "module \"zone\" { source = \"./zone\" }\n")
                .expect("write root");
            std::fs::write(old.join("terraform.tfstate"), "{}").expect("write state");
            std::fs::write(
                old.join("zone/main.tf"),
                "# tf-migrate:import-address=${var.zone_id}\nresource \"cloudflare_zone_setting\" \"ssl\" {\n}\n",
            )
            .expect("write module");

            let mut config = HarnessConfig::default();
            config.workspace.old_dir = old;
            config.workspace.new_dir = dir.path().join("v5");
            config.workspace.artifacts_dir = Some(dir.path().join("artifacts"));
            Self { _dir: dir, config }
        }

        fn context(&self) -> RunContext {
            RunContext::new(&self.config, Vec::new())
        }
    }

    fn orchestrator<'a>(
        fixture: &'a Fixture,
        runner: &'a ScriptedRunner,
    ) -> ValidationOrchestrator<'a, ScriptedRunner, FakeMigration> {
        static MIGRATION: FakeMigration = FakeMigration;
        ValidationOrchestrator::new(
            &fixture.config,
            runner,
            &MIGRATION,
            Arc::new(ExemptionConfig::legacy().expect("builtins compile")),
        )
        .with_credential_lookup(|_| Some(String::from("set")))
        .with_import_resolver(ImportResolver::default())
    }

    #[tokio::test]
    async fn test_clean_run_passes_through_every_phase() {
        let fixture = Fixture::new();
        let runner = ScriptedRunner::new(&[NO_CHANGES, NO_CHANGES]);
        let mut ctx = fixture.context();

        let report = orchestrator(&fixture, &runner).run(&mut ctx).await.expect("run succeeds");

        assert_eq!(report.verdict, Verdict::Pass);
        assert!(Phase::ALL
            .iter()
            .all(|p| ctx.status(*p) == Some(PhaseStatus::Succeeded)));
        assert_eq!(
            runner.verbs(),
            vec![
                "init", "apply", "state pull", "state pull", "fake-migrate", "init", "state push",
                "plan", "apply", "state pull", "plan"
            ]
        );
        assert!(ctx.state_pushed);
        assert_eq!(report.checkpoints.len(), 2);
        assert!(ctx.artifacts_dir.join(REPORT_FILE).exists());
    }

    #[tokio::test]
    async fn test_migrated_tree_is_prepared() {
        let fixture = Fixture::new();
        let runner = ScriptedRunner::new(&[]);
        let mut ctx = fixture.context();
        orchestrator(&fixture, &runner).run(&mut ctx).await.expect("run succeeds");

        let new = &fixture.config.workspace.new_dir;
        assert!(new.join("main.tf").exists());
        assert!(new.join("zone/main.tf").exists());
        assert!(!new.join(".terraform").exists());

        let state = std::fs::read_to_string(new.join(MIGRATED_STATE_FILE)).expect("state placed");
        assert!(state.contains("\"serial\":7"));

        let directives = std::fs::read_to_string(new.join(crate::imports::DIRECTIVES_FILE))
            .expect("directives written");
        assert!(directives.contains("to = module.zone.cloudflare_zone_setting.ssl"));
        assert_eq!(ctx.directives_file, Some(new.join(crate::imports::DIRECTIVES_FILE)));
    }

    #[tokio::test]
    async fn test_migrated_state_keeps_secret_attributes() {
        let fixture = Fixture::new();
        let runner = ScriptedRunner::new(&[]);
        let mut ctx = fixture.context();
        orchestrator(&fixture, &runner).run(&mut ctx).await.expect("run succeeds");

        let migrated = fixture.config.workspace.new_dir.join(MIGRATED_STATE_FILE);
        assert_eq!(std::fs::read_to_string(&migrated).expect("state placed"), RAW_STATE);

        let push = runner
            .calls()
            .into_iter()
            .find(|c| c.verb == Some(Verb::StatePush))
            .expect("state pushed");
        assert_eq!(push.args.last(), Some(&migrated.display().to_string()));

        for name in ["old-state.json", "new-state.json"] {
            let snapshot = std::fs::read_to_string(ctx.artifacts_dir.join(name)).expect("snapshot");
            assert!(!snapshot.contains("realtoken123"), "{name}");
            assert!(snapshot.contains(REDACTION_MARKER), "{name}");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_state_snapshots_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let fixture = Fixture::new();
        let runner = ScriptedRunner::new(&[]);
        let mut ctx = fixture.context();
        orchestrator(&fixture, &runner).run(&mut ctx).await.expect("run succeeds");

        let state_bearing: Vec<_> = ctx
            .artifacts
            .iter()
            .filter(|a| matches!(a.kind, ArtifactKind::StateSnapshot | ArtifactKind::PlanFile))
            .collect();
        assert_eq!(state_bearing.len(), 3);
        for artifact in state_bearing {
            let mode = std::fs::metadata(&artifact.path).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "{}", artifact.path.display());
            if artifact.kind == ArtifactKind::StateSnapshot {
                assert!(artifact.sha256.is_some());
            }
        }

        let migrated = fixture.config.workspace.new_dir.join(MIGRATED_STATE_FILE);
        let mode = std::fs::metadata(migrated).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_interrupted_run_report_is_persisted() {
        let fixture = Fixture::new();
        let mut ctx = fixture.context();
        std::fs::create_dir_all(&ctx.artifacts_dir).expect("run dir");
        ctx.begin(Phase::Credentials);
        ctx.finish(Phase::Credentials, PhaseStatus::Succeeded, None);
        ctx.begin(Phase::PlanNew);
        ctx.state_pushed = true;
        ctx.mark_cancelled();

        let cancelled = HarnessError::Orchestrator(OrchestratorError::Cancelled {
            phase: Phase::PlanNew.to_string(),
        });
        let report = ValidationReport::from_context(&ctx, Some(cancelled.to_string()));
        let path = persist_report(&mut ctx, &report).await.expect("report written");

        assert_eq!(path, ctx.artifacts_dir.join(REPORT_FILE));
        let saved: ValidationReport =
            serde_json::from_slice(&std::fs::read(&path).expect("read back")).expect("valid json");
        assert_eq!(saved.verdict, Verdict::Error);
        assert!(saved.state_pushed);
        assert_eq!(
            saved.phases.iter().find(|p| p.phase == Phase::PlanNew).map(|p| p.status),
            Some(PhaseStatus::Cancelled)
        );
        assert!(ctx.artifacts.iter().any(|a| a.kind == ArtifactKind::Report));
    }

    #[tokio::test]
    async fn test_drift_fails_verdict_without_error() {
        let fixture = Fixture::new();
        let runner = ScriptedRunner::new(&[NO_CHANGES, DRIFT_PLAN]);
        let mut ctx = fixture.context();

        let report = orchestrator(&fixture, &runner).run(&mut ctx).await.expect("run completes");
        assert_eq!(report.verdict, Verdict::Fail);
        assert_eq!(report.real_drift_count(), 1);
        let post = ctx.checkpoint(Checkpoint::PostApply).expect("post-apply recorded");
        assert!(post.report.has_real_drift());
        assert!(ctx.checkpoint(Checkpoint::Initial).is_some_and(|c| c.report.no_changes));
    }

    #[tokio::test]
    async fn test_missing_credentials_abort_before_any_call() {
        let fixture = Fixture::new();
        let runner = ScriptedRunner::new(&[]);
        let mut ctx = fixture.context();

        let err = orchestrator(&fixture, &runner)
            .with_credential_lookup(|name| (name != "CLOUDFLARE_ZONE_ID").then(|| String::from("x")))
            .run(&mut ctx)
            .await
            .expect_err("credentials missing");

        match err {
            HarnessError::Environment(EnvironmentError::MissingVariables { names }) => {
                assert_eq!(names, vec![String::from("CLOUDFLARE_ZONE_ID")]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(runner.calls().is_empty());
        assert_eq!(ctx.status(Phase::Credentials), Some(PhaseStatus::Failed));
        assert_eq!(ctx.status(Phase::ApplyOld), None);
    }

    #[tokio::test]
    async fn test_failed_phase_never_advances() {
        let fixture = Fixture::new();
        let mut runner = ScriptedRunner::new(&[]);
        runner.fail_verb = Some(Verb::Apply);
        let mut ctx = fixture.context();

        let err = orchestrator(&fixture, &runner).run(&mut ctx).await.expect_err("apply fails");
        assert!(matches!(err, HarnessError::Subprocess(SubprocessError::NonZeroExit { .. })));

        assert_eq!(runner.verbs(), vec!["init", "apply"]);
        assert_eq!(ctx.status(Phase::ApplyOld), Some(PhaseStatus::Failed));
        assert_eq!(ctx.status(Phase::Migrate), None);

        let log = std::fs::read_to_string(ctx.log_path(Phase::ApplyOld, "apply")).expect("log kept");
        assert!(log.contains("zone not found"));

        let report: ValidationReport = serde_json::from_slice(
            &std::fs::read(ctx.artifacts_dir.join(REPORT_FILE)).expect("partial report"),
        )
        .expect("valid json");
        assert_eq!(report.verdict, Verdict::Error);
    }

    #[tokio::test]
    async fn test_skipped_old_apply_pulls_existing_state() {
        let mut fixture = Fixture::new();
        fixture.config.workspace.apply_old = false;
        fixture.config.workspace.push_state = false;
        let runner = ScriptedRunner::new(&[]);
        let mut ctx = fixture.context();

        orchestrator(&fixture, &runner).run(&mut ctx).await.expect("run succeeds");

        assert_eq!(ctx.status(Phase::ApplyOld), Some(PhaseStatus::Skipped));
        let verbs = runner.verbs();
        assert_eq!(&verbs[..3], &["init", "state pull", "fake-migrate"]);
        assert!(!verbs.contains(&String::from("state push")));
        assert!(!ctx.state_pushed);
    }

    #[tokio::test]
    async fn test_phase_deadline_records_timeout() {
        let mut fixture = Fixture::new();
        fixture.config.timeouts.apply_new = Some(1);
        let mut runner = ScriptedRunner::new(&[]);
        runner.hang_verb = Some(Verb::Apply);
        fixture.config.workspace.apply_old = false;
        let mut ctx = fixture.context();

        let err = orchestrator(&fixture, &runner).run(&mut ctx).await.expect_err("deadline hit");
        assert!(matches!(
            err,
            HarnessError::Orchestrator(OrchestratorError::PhaseTimedOut { timeout_secs: 1, .. })
        ));
        assert_eq!(ctx.status(Phase::ApplyNew), Some(PhaseStatus::TimedOut));
        assert!(ctx.state_pushed);
        assert_eq!(ctx.status(Phase::Stability), None);
    }

    #[tokio::test]
    async fn test_targets_reach_plan_and_apply() {
        let fixture = Fixture::new();
        let runner = ScriptedRunner::new(&[]);
        let mut ctx = RunContext::new(&fixture.config, vec![String::from("zone")]);

        orchestrator(&fixture, &runner).run(&mut ctx).await.expect("run succeeds");

        let targeted: Vec<Invocation> = runner
            .calls()
            .into_iter()
            .filter(|c| c.args.contains(&String::from("-target=module.zone")))
            .collect();
        // Old apply, new plan and stability plan; the saved plan apply takes no targets.
        assert_eq!(targeted.len(), 3);
    }
}
