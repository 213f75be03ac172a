//! Container runtime wrapper.
//!
//! Keeps the `docker` CLI integration isolated so the vault client and the
//! acquirer stay testable: the binary path is injectable and every
//! invocation is bounded by one RPC timeout. Output parsing happens in the
//! callers — this module only runs commands and collects their output.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::RuntimeError;

/// Bound on every container runtime invocation. A slow or wedged runtime
/// counts as unavailable, never as a seal state.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Collected output of one runtime invocation.
///
/// Non-zero exits are data, not errors — `vault status` exits 2 when the
/// vault is sealed, so callers interpret the status themselves.
#[derive(Debug)]
pub struct CommandOutput {
    /// Process exit code, `-1` if terminated by signal.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Wrapper around the container runtime CLI.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    binary: PathBuf,
    timeout: Duration,
}

impl ContainerRuntime {
    /// Use the `docker` binary from `PATH` with the default RPC timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use a specific runtime binary. Tests point this at a nonexistent
    /// path to simulate an absent runtime.
    #[must_use]
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: RPC_TIMEOUT,
        }
    }

    /// Check whether a container with exactly this name exists (running
    /// or stopped).
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the runtime CLI cannot be invoked.
    pub async fn container_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        let out = self
            .run(&[
                "ps".into(),
                "-a".into(),
                "--filter".into(),
                format!("name=^{name}$").into(),
                "--format".into(),
                "{{.Names}}".into(),
            ])
            .await?;
        if out.status != 0 {
            return Err(RuntimeError::Unavailable {
                reason: format!("'ps' exited with {}: {}", out.status, out.stderr.trim()),
            });
        }
        Ok(out.stdout.lines().any(|line| line.trim() == name))
    }

    /// Read the full historical log of a container, stdout and stderr
    /// combined.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the runtime CLI cannot be invoked or
    /// the container does not exist.
    pub async fn logs(&self, name: &str) -> Result<String, RuntimeError> {
        let out = self.run(&["logs".into(), name.into()]).await?;
        if out.status != 0 {
            return Err(RuntimeError::Unavailable {
                reason: format!(
                    "'logs {name}' exited with {}: {}",
                    out.status,
                    out.stderr.trim()
                ),
            });
        }
        // Container programs write init output to either stream.
        let mut combined = out.stdout;
        combined.push_str(&out.stderr);
        Ok(combined)
    }

    /// Execute a command inside a container and collect its output.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] only for runtime-level failures (spawn,
    /// timeout). The executed command's own exit status is returned in
    /// [`CommandOutput`].
    pub async fn exec(&self, name: &str, args: &[&str]) -> Result<CommandOutput, RuntimeError> {
        let mut full: Vec<OsString> = vec!["exec".into(), name.into()];
        full.extend(args.iter().map(OsString::from));
        self.run(&full).await
    }

    async fn run(&self, args: &[OsString]) -> Result<CommandOutput, RuntimeError> {
        let command_desc = args
            .first()
            .map(|a| a.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| RuntimeError::Unavailable {
            reason: format!("cannot run {}: {e}", self.binary.display()),
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| RuntimeError::Timeout {
                command: command_desc.clone(),
                timeout: self.timeout,
            })?
            .map_err(|e| RuntimeError::Unavailable {
                reason: format!("{command_desc}: {e}"),
            })?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

impl Default for ContainerRuntime {
    fn default() -> Self {
        Self::new()
    }
}
