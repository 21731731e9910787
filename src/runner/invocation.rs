//! Invocation descriptions for external tools.
//!
//! An [`Invocation`] is a fully described command: program, arguments,
//! working directory, environment overrides and an optional deadline. The
//! infrastructure tool's verbs get their standard non-interactive flags here;
//! runner-level policy such as the parallelism cap is applied by
//! [`ProcessRunner`](super::ProcessRunner).

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Verbs of the infrastructure tool used by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// `init`
    Init,
    /// `plan`
    Plan,
    /// `apply`
    Apply,
    /// `show`
    Show,
    /// `state pull`
    StatePull,
    /// `state push`
    StatePush,
    /// `import`
    Import,
}

impl Verb {
    /// Leading argument tokens for the verb.
    #[must_use]
    pub const fn tokens(self) -> &'static [&'static str] {
        match self {
            Self::Init => &["init"],
            Self::Plan => &["plan"],
            Self::Apply => &["apply"],
            Self::Show => &["show"],
            Self::StatePull => &["state", "pull"],
            Self::StatePush => &["state", "push"],
            Self::Import => &["import"],
        }
    }

    /// Whether the verb accepts `-parallelism=N`.
    #[must_use]
    pub const fn takes_parallelism(self) -> bool {
        matches!(self, Self::Plan | Self::Apply)
    }

    /// Whether the verb accepts `-no-color`.
    #[must_use]
    pub const fn takes_no_color(self) -> bool {
        !matches!(self, Self::StatePull | Self::StatePush)
    }

    /// Whether the verb accepts `-input=false`.
    #[must_use]
    pub const fn takes_input_flag(self) -> bool {
        matches!(self, Self::Init | Self::Plan | Self::Apply | Self::Import)
    }

    /// Short name used in artifact file names.
    #[must_use]
    pub const fn slug(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Show => "show",
            Self::StatePull => "state-pull",
            Self::StatePush => "state-push",
            Self::Import => "import",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens().join(" "))
    }
}

/// A single external command to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program name or path.
    pub program: String,
    /// Arguments after the program.
    pub args: Vec<String>,
    /// Working directory.
    pub working_dir: PathBuf,
    /// Environment overrides merged over the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Deadline after which the process is killed.
    pub timeout: Option<Duration>,
    /// Tool verb, `None` for non-tool programs such as the migration tool.
    pub verb: Option<Verb>,
    /// Number of leading arguments that spell the verb; flags go after them.
    verb_len: usize,
}

impl Invocation {
    /// Creates an invocation of the infrastructure tool with the verb's
    /// standard non-interactive flags.
    #[must_use]
    pub fn tool(program: impl Into<String>, verb: Verb, working_dir: impl Into<PathBuf>) -> Self {
        let tokens = verb.tokens();
        let mut args: Vec<String> = tokens.iter().map(|t| (*t).to_string()).collect();
        if verb.takes_no_color() {
            args.push(String::from("-no-color"));
        }
        if verb.takes_input_flag() {
            args.push(String::from("-input=false"));
        }

        Self {
            program: program.into(),
            args,
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
            timeout: None,
            verb: Some(verb),
            verb_len: tokens.len(),
        }
    }

    /// Creates an invocation of an arbitrary program.
    #[must_use]
    pub fn external<I, S>(program: impl Into<String>, args: I, working_dir: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
            timeout: None,
            verb: None,
            verb_len: 0,
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds `-target=module.<name>` for each module.
    #[must_use]
    pub fn targets<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for module in modules {
            self.args.push(format!("-target=module.{}", module.as_ref()));
        }
        self
    }

    /// Adds `-backend-config=FILE` when a file is given.
    #[must_use]
    pub fn backend_config(mut self, file: Option<&Path>) -> Self {
        if let Some(file) = file {
            self.args.push(format!("-backend-config={}", file.display()));
        }
        self
    }

    /// Adds `-out=FILE`.
    #[must_use]
    pub fn out_file(mut self, file: &Path) -> Self {
        self.args.push(format!("-out={}", file.display()));
        self
    }

    /// Sets an environment override.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets several environment overrides.
    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets a deadline.
    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns true if a `-parallelism` flag is already present.
    #[must_use]
    pub fn has_parallelism_flag(&self) -> bool {
        self.args
            .iter()
            .any(|a| a == "-parallelism" || a.starts_with("-parallelism="))
    }

    /// Inserts a flag right after the verb tokens, ahead of positional
    /// arguments such as a saved plan file.
    pub fn insert_flag(&mut self, flag: impl Into<String>) {
        let at = self.verb_len.min(self.args.len());
        self.args.insert(at, flag.into());
    }

    /// Renders the command line for logs and error messages.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push('\'');
                line.push_str(arg);
                line.push('\'');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_gets_non_interactive_flags() {
        let inv = Invocation::tool("terraform", Verb::Plan, "/tmp/v5");
        assert_eq!(inv.args, vec!["plan", "-no-color", "-input=false"]);
        assert_eq!(inv.verb, Some(Verb::Plan));
    }

    #[test]
    fn test_state_pull_has_no_flags() {
        let inv = Invocation::tool("terraform", Verb::StatePull, "/tmp/v5");
        assert_eq!(inv.args, vec!["state", "pull"]);
    }

    #[test]
    fn test_inserted_flag_precedes_plan_file() {
        let mut inv = Invocation::tool("terraform", Verb::Apply, "/tmp").arg("v5.tfplan");
        inv.insert_flag("-parallelism=5");
        assert_eq!(
            inv.args,
            vec!["apply", "-parallelism=5", "-no-color", "-input=false", "v5.tfplan"]
        );
    }

    #[test]
    fn test_targets_and_backend_config() {
        let inv = Invocation::tool("terraform", Verb::Plan, "/tmp")
            .targets(["zone", "dns_record"])
            .backend_config(Some(Path::new("backend.hcl")));
        assert!(inv.args.contains(&String::from("-target=module.zone")));
        assert!(inv.args.contains(&String::from("-target=module.dns_record")));
        assert!(inv.args.contains(&String::from("-backend-config=backend.hcl")));
    }

    #[test]
    fn test_parallelism_detection() {
        let inv = Invocation::tool("terraform", Verb::Apply, "/tmp").arg("-parallelism=2");
        assert!(inv.has_parallelism_flag());
        let inv = Invocation::tool("terraform", Verb::Apply, "/tmp");
        assert!(!inv.has_parallelism_flag());
    }

    #[test]
    fn test_command_line_quotes_spaces() {
        let inv = Invocation::external("tf-migrate", ["--config-dir", "/tmp/my dir"], "/tmp");
        assert_eq!(inv.command_line(), "tf-migrate --config-dir '/tmp/my dir'");
    }
}
