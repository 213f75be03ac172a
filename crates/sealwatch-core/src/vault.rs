//! Vault control client and seal status probe.
//!
//! The [`VaultControl`] trait is the seam between the orchestration logic
//! and the real vault: the monitor and the unseal orchestrator only ever
//! talk to this trait, so tests script a vault without any container
//! runtime. [`DockerVaultClient`] is the production implementation — it
//! drives the vault CLI inside the target container.

use serde::Deserialize;

use crate::error::UnsealError;
use crate::runtime::ContainerRuntime;

/// Sealed/unsealed state of the vault, derived fresh on every poll.
///
/// Never cached beyond one poll interval, never persisted. Anything
/// ambiguous — transport failure, missing container, unparseable output,
/// timeout — is `Unknown`, deliberately distinct from `Sealed` so the
/// monitor never unseals on guesswork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealState {
    Sealed,
    Unsealed,
    Unknown,
}

/// Control surface of the external vault.
///
/// Implementations must be safe to share across async tasks.
#[async_trait::async_trait]
pub trait VaultControl: Send + Sync + 'static {
    /// Query the vault's seal status. Infallible by design: every failure
    /// mode maps to [`SealState::Unknown`]. Bounded by one RPC timeout.
    async fn seal_status(&self) -> SealState;

    /// Apply one unseal key share. Returns the vault-reported count of
    /// shares accepted so far in the current unseal attempt.
    ///
    /// # Errors
    ///
    /// - [`UnsealError::ShareRejected`] if the vault refused the share.
    /// - [`UnsealError::Runtime`] if the vault could not be reached.
    async fn apply_share(&self, index: usize, share: &str) -> Result<u8, UnsealError>;
}

/// `vault status -format=json` response. Unknown fields ignored.
#[derive(Debug, Deserialize)]
struct StatusResponse {
    sealed: bool,
}

/// `vault operator unseal -format=json` response. Unknown fields ignored.
#[derive(Debug, Deserialize)]
struct UnsealResponse {
    #[serde(default)]
    progress: u8,
}

/// Production [`VaultControl`] driving the vault CLI inside a container.
#[derive(Debug, Clone)]
pub struct DockerVaultClient {
    runtime: ContainerRuntime,
    container: String,
}

impl DockerVaultClient {
    /// Create a client for the vault running in `container`.
    #[must_use]
    pub fn new(runtime: ContainerRuntime, container: impl Into<String>) -> Self {
        Self {
            runtime,
            container: container.into(),
        }
    }
}

#[async_trait::async_trait]
impl VaultControl for DockerVaultClient {
    async fn seal_status(&self) -> SealState {
        // `vault status` exits 2 when sealed, so the exit code is not a
        // failure signal — only the parsed JSON decides.
        let out = match self
            .runtime
            .exec(&self.container, &["vault", "status", "-format=json"])
            .await
        {
            Ok(out) => out,
            Err(e) => {
                tracing::debug!(container = %self.container, error = %e, "status probe failed");
                return SealState::Unknown;
            }
        };

        match parse_status(&out.stdout) {
            Some(true) => SealState::Sealed,
            Some(false) => SealState::Unsealed,
            None => {
                tracing::debug!(
                    container = %self.container,
                    status = out.status,
                    "status probe returned no parseable sealed field"
                );
                SealState::Unknown
            }
        }
    }

    async fn apply_share(&self, index: usize, share: &str) -> Result<u8, UnsealError> {
        let out = self
            .runtime
            .exec(
                &self.container,
                &["vault", "operator", "unseal", "-format=json", share],
            )
            .await?;

        if out.status != 0 {
            return Err(UnsealError::ShareRejected {
                index,
                reason: if out.stderr.trim().is_empty() {
                    format!("exit code {}", out.status)
                } else {
                    out.stderr.trim().to_owned()
                },
            });
        }

        Ok(parse_unseal_progress(&out.stdout).unwrap_or(0))
    }
}

/// Extract the `sealed` field from a status response, if any.
fn parse_status(stdout: &str) -> Option<bool> {
    serde_json::from_str::<StatusResponse>(stdout)
        .ok()
        .map(|r| r.sealed)
}

/// Extract the accepted-share count from an unseal response, if any.
fn parse_unseal_progress(stdout: &str) -> Option<u8> {
    serde_json::from_str::<UnsealResponse>(stdout)
        .ok()
        .map(|r| r.progress)
}
