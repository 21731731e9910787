//! Subprocess execution with retry and credential-safe capture.
//!
//! [`ProcessRunner`] executes one external command per call. Plan and apply
//! commands get a bounded `-parallelism` flag, rate-limited failures are
//! retried with linear backoff, and all captured text is sanitized before
//! it leaves this module. The one exception is [`ToolRunner::capture`],
//! whose raw stdout goes only to an owner-only file.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, trace, warn};

use crate::artifacts::write_private;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result, SubprocessError};

use super::invocation::Invocation;
use super::sanitize::OutputSanitizer;

/// Default cap on concurrent operations inside one plan/apply.
pub const DEFAULT_PARALLELISM: u32 = 5;

/// Default retries of a rate-limited command after its first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff base.
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(5);

/// Captured result of a successful command. All text is sanitized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Sanitized standard output.
    pub stdout: String,
    /// Sanitized standard error.
    pub stderr: String,
    /// Exit code.
    pub exit_code: Option<i32>,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Wall-clock time of the final attempt.
    pub duration: Duration,
}

impl CommandOutput {
    /// Creates an output holding only stdout, as produced by scripted runners.
    #[must_use]
    pub fn from_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            attempts: 1,
            duration: Duration::ZERO,
        }
    }

    /// Returns stdout followed by stderr.
    #[must_use]
    pub fn combined(&self) -> String {
        join_streams(&self.stdout, &self.stderr)
    }
}

/// Executes external tool invocations.
///
/// This is the seam the orchestrator and import resolver are written
/// against; [`ProcessRunner`] is the real implementation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Runs one invocation to completion.
    ///
    /// A rate-limited failure is retried up to the configured number of
    /// retries after the first attempt, so the command runs at most
    /// `retries + 1` times.
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Runs one invocation, writing its raw stdout owner-only to `path`.
    ///
    /// The file receives stdout exactly as the tool printed it; only the
    /// returned output is sanitized. State that must round-trip through
    /// another tool is captured this way.
    async fn capture(&self, invocation: &Invocation, path: &Path) -> Result<CommandOutput>;

    /// Runs one invocation and persists its sanitized output to `path`.
    ///
    /// Output is written even when the command fails; the original error
    /// is returned afterwards.
    async fn run_to_file(&self, invocation: &Invocation, path: &Path) -> Result<CommandOutput> {
        let result = self.run(invocation).await;

        let text = match &result {
            Ok(output) => output.combined(),
            Err(err) => err
                .captured_output()
                .map_or_else(|| format!("{err}\n"), str::to_string),
        };

        if let Err(write_err) = write_private(path, text.as_bytes()).await {
            if result.is_ok() {
                return Err(write_err);
            }
            warn!("Failed to persist output to {}: {write_err}", path.display());
        }

        result
    }
}

/// How a rate-limited failure was recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitSignal {
    /// A JSON diagnostic from the tool reported HTTP 429.
    Structured,
    /// A configured marker substring appeared in the output.
    Marker,
}

/// Recognizes rate-limited failures in captured output.
#[derive(Debug, Clone)]
pub struct RateLimitDetector {
    /// Literal substrings that identify rate limiting.
    markers: Vec<String>,
}

impl Default for RateLimitDetector {
    fn default() -> Self {
        Self::new(vec![String::from("Rate limited"), String::from("429 Too Many Requests")])
    }
}

impl RateLimitDetector {
    /// Creates a detector with the given literal markers.
    #[must_use]
    pub const fn new(markers: Vec<String>) -> Self {
        Self { markers }
    }

    /// Inspects combined output.
    ///
    /// Structured diagnostics from `-json` output are preferred; the literal
    /// markers are only consulted when no structured signal is present.
    #[must_use]
    pub fn detect(&self, output: &str) -> Option<RateLimitSignal> {
        if output.lines().any(is_rate_limit_diagnostic) {
            return Some(RateLimitSignal::Structured);
        }

        self.markers
            .iter()
            .any(|m| !m.is_empty() && output.contains(m.as_str()))
            .then_some(RateLimitSignal::Marker)
    }
}

/// Returns true for a JSON log line carrying a 429 diagnostic.
fn is_rate_limit_diagnostic(line: &str) -> bool {
    let line = line.trim();
    if !line.starts_with('{') {
        return false;
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
        return false;
    };
    let Some(diagnostic) = value.get("diagnostic") else {
        return false;
    };

    ["summary", "detail"].iter().any(|field| {
        diagnostic
            .get(*field)
            .and_then(serde_json::Value::as_str)
            .is_some_and(|text| text.contains("429") || text.to_lowercase().contains("rate limit"))
    })
}

/// Executes external commands for the harness.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    /// Sanitizer applied to all captured output.
    sanitizer: Arc<OutputSanitizer>,
    /// Parallelism injected into plan/apply commands.
    parallelism: u32,
    /// Retries of a rate-limited command after the first attempt.
    max_retries: u32,
    /// Linear backoff base.
    backoff_base: Duration,
    /// Rate limit recognition.
    detector: RateLimitDetector,
    /// Environment applied to every command, below per-invocation overrides.
    base_env: BTreeMap<String, String>,
}

/// Result of one attempt. Text is sanitized; `raw_stdout` is not.
struct Attempt {
    raw_stdout: Vec<u8>,
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
    success: bool,
    duration: Duration,
}

impl ProcessRunner {
    /// Creates a runner with default policy.
    #[must_use]
    pub fn new(sanitizer: Arc<OutputSanitizer>) -> Self {
        let mut base_env = BTreeMap::new();
        base_env.insert(String::from("TF_IN_AUTOMATION"), String::from("1"));
        base_env.insert(String::from("CHECKPOINT_DISABLE"), String::from("1"));

        Self {
            sanitizer,
            parallelism: DEFAULT_PARALLELISM,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            detector: RateLimitDetector::default(),
            base_env,
        }
    }

    /// Creates a runner from harness configuration.
    #[must_use]
    pub fn from_config(config: &HarnessConfig, sanitizer: Arc<OutputSanitizer>) -> Self {
        let mut runner = Self::new(sanitizer)
            .with_parallelism(config.runner.parallelism)
            .with_retry(
                config.runner.max_retries,
                Duration::from_millis(config.runner.backoff_base_ms),
            )
            .with_detector(RateLimitDetector::new(config.runner.rate_limit_markers.clone()));

        if let Some(file) = &config.tool.provider_override {
            runner = runner.with_env("TF_CLI_CONFIG_FILE", file.display().to_string());
        }

        runner
    }

    /// Sets the parallelism cap.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: u32) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Sets the retry policy. Zero retries runs every command once.
    #[must_use]
    pub fn with_retry(mut self, max_retries: u32, backoff_base: Duration) -> Self {
        self.max_retries = max_retries;
        self.backoff_base = backoff_base;
        self
    }

    /// Sets the rate limit detector.
    #[must_use]
    pub fn with_detector(mut self, detector: RateLimitDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Adds an environment variable applied to every command.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.base_env.insert(key.into(), value.into());
        self
    }

    /// Returns the sanitizer used by this runner.
    #[must_use]
    pub fn sanitizer(&self) -> &OutputSanitizer {
        &self.sanitizer
    }

    /// Applies runner policy to an invocation: the parallelism cap and the
    /// base environment beneath the invocation's own overrides.
    #[must_use]
    pub fn prepare(&self, invocation: &Invocation) -> Invocation {
        let mut prepared = invocation.clone();

        if prepared.verb.is_some_and(|v| v.takes_parallelism()) && !prepared.has_parallelism_flag() {
            prepared.insert_flag(format!("-parallelism={}", self.parallelism));
        }

        let mut env = self.base_env.clone();
        env.extend(invocation.env.clone());
        prepared.env = env;

        prepared
    }

    /// Delay before retry number `retry` (1-based).
    fn backoff(&self, retry: u32) -> Duration {
        self.backoff_base.saturating_mul(retry)
    }

    /// Runs a single attempt.
    async fn attempt(&self, invocation: &Invocation, command_line: &str) -> Result<Attempt> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let spawn_error = |e: std::io::Error| {
            HarnessError::Subprocess(SubprocessError::SpawnFailed {
                command: command_line.to_string(),
                message: e.to_string(),
            })
        };

        let started = Instant::now();
        let child = command.spawn().map_err(spawn_error)?;
        let wait = child.wait_with_output();

        let output = match invocation.timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                HarnessError::Subprocess(SubprocessError::TimedOut {
                    command: command_line.to_string(),
                    timeout_secs: limit.as_secs(),
                })
            })?,
            None => wait.await,
        }
        .map_err(spawn_error)?;

        let stdout = self.sanitizer.sanitize(&String::from_utf8_lossy(&output.stdout)).into_owned();
        let stderr = self.sanitizer.sanitize(&String::from_utf8_lossy(&output.stderr)).into_owned();

        Ok(Attempt {
            raw_stdout: output.stdout,
            stdout,
            stderr,
            exit_code: output.status.code(),
            success: output.status.success(),
            duration: started.elapsed(),
        })
    }

    /// Runs the retry loop, returning the sanitized output together with the
    /// raw stdout of the successful attempt.
    async fn execute(&self, invocation: &Invocation) -> Result<(CommandOutput, Vec<u8>)> {
        let prepared = self.prepare(invocation);
        let command_line = self.sanitizer.sanitize(&prepared.command_line()).into_owned();
        let max_attempts = self.max_retries.saturating_add(1);

        let mut attempt_no = 1;
        loop {
            debug!(
                "Running ({attempt_no}/{max_attempts}) in {}: {command_line}",
                prepared.working_dir.display()
            );

            let attempt = self.attempt(&prepared, &command_line).await?;

            if attempt.success {
                trace!("Command succeeded in {:?}", attempt.duration);
                let output = CommandOutput {
                    stdout: attempt.stdout,
                    stderr: attempt.stderr,
                    exit_code: attempt.exit_code,
                    attempts: attempt_no,
                    duration: attempt.duration,
                };
                return Ok((output, attempt.raw_stdout));
            }

            let combined = join_streams(&attempt.stdout, &attempt.stderr);

            let Some(signal) = self.detector.detect(&combined) else {
                return Err(HarnessError::Subprocess(SubprocessError::NonZeroExit {
                    command: command_line,
                    exit_code: attempt.exit_code,
                    output: combined,
                }));
            };

            if attempt_no >= max_attempts {
                warn!("Rate limited after {attempt_no} attempts: {command_line}");
                return Err(HarnessError::Subprocess(SubprocessError::RateLimited {
                    command: command_line,
                    attempts: attempt_no,
                    output: combined,
                }));
            }

            let delay = self.backoff(attempt_no);
            warn!(
                "Rate limited ({signal:?}) on attempt {attempt_no}/{max_attempts}, retrying in {delay:?}"
            );
            tokio::time::sleep(delay).await;
            attempt_no += 1;
        }
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.execute(invocation).await.map(|(output, _)| output)
    }

    async fn capture(&self, invocation: &Invocation, path: &Path) -> Result<CommandOutput> {
        let (output, raw) = self.execute(invocation).await?;
        write_private(path, &raw).await?;
        debug!("Captured {} raw byte(s) to {}", raw.len(), path.display());
        Ok(output)
    }
}

fn join_streams(stdout: &str, stderr: &str) -> String {
    match (stdout.is_empty(), stderr.is_empty()) {
        (_, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) => {
            let mut combined = String::with_capacity(stdout.len() + stderr.len() + 1);
            combined.push_str(stdout);
            if !stdout.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(stderr);
            combined
        }
    }
}
