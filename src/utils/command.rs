/// Command execution utilities shared by the git, gcloud, kubectl and helm wrappers
use anyhow::{Context, Result};
use futures::future::join_all;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Typed failures from external commands
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{tool} is not installed or not in PATH. Please install from {install_url}")]
    NotInstalled { tool: String, install_url: String },

    #[error("missing required tools:\n{}", format_missing(.0))]
    MissingTools(Vec<CommandError>),

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

fn format_missing(errors: &[CommandError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Result from command execution with captured output
pub struct CommandOutput {
    pub program: String,
    pub stdout: String,
    pub stderr: String,
    pub status: std::process::ExitStatus,
    pub success: bool,
}

impl CommandOutput {
    fn from_output(program: String, output: std::process::Output) -> Self {
        Self {
            program,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status: output.status,
            success: output.status.success(),
        }
    }

    /// Return stdout if successful, otherwise a `CommandError::Failed` with stderr
    pub fn into_result(self) -> Result<String> {
        if self.success {
            Ok(self.stdout)
        } else {
            Err(CommandError::Failed {
                program: self.program,
                status: self.status.to_string(),
                stderr: self.stderr.trim().to_string(),
            }
            .into())
        }
    }

    /// True when the command failed because the target does not exist
    pub fn is_not_found(&self) -> bool {
        !self.success && (self.stderr.contains("NotFound") || self.stderr.contains("not found"))
    }
}

/// Builder for executing external commands with common patterns
pub struct CommandBuilder {
    program: String,
    args: Vec<String>,
    command: Command,
    context_msg: Option<String>,
}

impl CommandBuilder {
    /// Create a new command builder
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        let mut command = Command::new(program.as_ref());
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Self {
            program: program.as_ref().to_string_lossy().to_string(),
            args: Vec::new(),
            command,
            context_msg: None,
        }
    }

    /// Add a single argument
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().to_string());
        self.command.arg(arg);
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    /// Set an environment variable
    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.command.env(key, val);
        self
    }

    /// Set KUBECONFIG environment variable
    pub fn kubeconfig(self, path: &Path) -> Self {
        self.env("KUBECONFIG", path)
    }

    /// Run the command from another directory
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.command.current_dir(dir);
        self
    }

    /// Set context message for error reporting
    pub fn context<S: Into<String>>(mut self, msg: S) -> Self {
        self.context_msg = Some(msg.into());
        self
    }

    /// Command line as it will be executed, for logging
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Execute and return raw output
    pub async fn output(mut self) -> Result<CommandOutput> {
        debug!("exec: {}", self.display());
        let output = match &self.context_msg {
            Some(ctx) => self.command.output().await.context(ctx.clone())?,
            None => self
                .command
                .output()
                .await
                .with_context(|| format!("Failed to execute {}", self.program))?,
        };
        Ok(CommandOutput::from_output(self.program, output))
    }

    /// Execute and return stdout on success, error on failure
    pub async fn run(self) -> Result<String> {
        let ctx = self.context_msg.clone();
        let result = self.output().await?.into_result();
        match ctx {
            Some(ctx) => result.context(ctx),
            None => result,
        }
    }

    /// Execute and ignore output (just check success)
    pub async fn run_silent(self) -> Result<()> {
        self.run().await.map(|_| ())
    }
}

/// External tools the deployment relies on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Gcloud,
    Kubectl,
    Helm,
    Git,
}

impl Tool {
    pub fn program(&self) -> &'static str {
        match self {
            Tool::Gcloud => "gcloud",
            Tool::Kubectl => "kubectl",
            Tool::Helm => "helm",
            Tool::Git => "git",
        }
    }

    fn version_args(&self) -> &'static [&'static str] {
        match self {
            Tool::Gcloud => &["version"],
            Tool::Kubectl => &["version", "--client"],
            Tool::Helm => &["version", "--short"],
            Tool::Git => &["--version"],
        }
    }

    fn install_url(&self) -> &'static str {
        match self {
            Tool::Gcloud => "https://cloud.google.com/sdk/docs/install",
            Tool::Kubectl => "https://kubernetes.io/docs/tasks/tools/",
            Tool::Helm => "https://helm.sh/docs/intro/install/",
            Tool::Git => "https://git-scm.com/downloads",
        }
    }

    /// Check that this tool is installed
    pub async fn check(&self) -> std::result::Result<(), CommandError> {
        check_tool_installed(self.program(), self.version_args(), self.install_url()).await
    }
}

/// Check if a command-line tool is installed
pub async fn check_tool_installed(
    tool_name: &str,
    version_args: &[&str],
    install_url: &str,
) -> std::result::Result<(), CommandError> {
    let output = CommandBuilder::new(tool_name)
        .args(version_args)
        .output()
        .await;

    match output {
        Ok(out) if out.success => Ok(()),
        _ => Err(CommandError::NotInstalled {
            tool: tool_name.to_string(),
            install_url: install_url.to_string(),
        }),
    }
}

/// Check all given tools concurrently, reporting every missing one
pub async fn check_tools(tools: &[Tool]) -> std::result::Result<(), CommandError> {
    let results = join_all(tools.iter().map(|tool| tool.check())).await;
    let missing: Vec<CommandError> = results.into_iter().filter_map(|r| r.err()).collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(CommandError::MissingTools(missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_builder_basic() {
        let result = CommandBuilder::new("echo")
            .arg("test")
            .context("Testing echo command")
            .output()
            .await;

        assert!(result.is_ok());
        let output = result.unwrap();
        assert!(output.success);
        assert!(output.stdout.contains("test"));
    }

    #[tokio::test]
    async fn test_command_builder_env() {
        let result = CommandBuilder::new("sh")
            .arg("-c")
            .arg("echo $TEST_VAR")
            .env("TEST_VAR", "test_value")
            .output()
            .await;

        let output = result.unwrap();
        assert!(output.success);
        assert!(output.stdout.contains("test_value"));
    }

    #[tokio::test]
    async fn test_command_builder_current_dir() {
        let dir = tempfile::tempdir().unwrap();
        let stdout = CommandBuilder::new("pwd")
            .current_dir(dir.path())
            .run()
            .await
            .unwrap();

        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(
            std::path::Path::new(stdout.trim()).canonicalize().unwrap(),
            expected
        );
    }

    #[tokio::test]
    async fn test_failed_command_carries_stderr() {
        let err = CommandBuilder::new("sh")
            .args(["-c", "echo boom >&2; exit 3"])
            .run()
            .await
            .unwrap_err();

        let failed = err.downcast_ref::<CommandError>().unwrap();
        match failed {
            CommandError::Failed { program, stderr, .. } => {
                assert_eq!(program, "sh");
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_display_joins_program_and_args() {
        let builder = CommandBuilder::new("helm").args(["repo", "update"]);
        assert_eq!(builder.display(), "helm repo update");
    }

    #[tokio::test]
    async fn test_missing_tool_reports_install_url() {
        let err = check_tool_installed(
            "shopstack-definitely-missing-tool",
            &["--version"],
            "https://example.com/install",
        )
        .await
        .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("shopstack-definitely-missing-tool"));
        assert!(msg.contains("https://example.com/install"));
    }

    #[test]
    fn test_missing_tools_lists_every_tool() {
        let err = CommandError::MissingTools(vec![
            CommandError::NotInstalled {
                tool: "helm".into(),
                install_url: "a".into(),
            },
            CommandError::NotInstalled {
                tool: "git".into(),
                install_url: "b".into(),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("helm is not installed"));
        assert!(msg.contains("git is not installed"));
    }
}
