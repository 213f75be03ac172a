//! Error types for `sealwatch-core`.
//!
//! Each variant carries enough context to diagnose the problem without a
//! debugger. Messages never include key material — only share indices,
//! container names, and tool diagnostics.

use std::time::Duration;

use sealwatch_store::StoreError;

/// Fatal configuration errors, raised only at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The poll interval must be a positive number of seconds.
    #[error("poll interval must be at least 1 second")]
    InvalidPollInterval,

    /// The target container name is empty.
    #[error("target container name must not be empty")]
    EmptyContainer,

    /// A required external binary is not installed.
    #[error("required external tool not found: {name}")]
    MissingTool { name: String },
}

/// Errors from the container runtime wrapper.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The runtime CLI could not be invoked or failed outright.
    #[error("container runtime unavailable: {reason}")]
    Unavailable { reason: String },

    /// A runtime invocation exceeded the RPC timeout.
    #[error("'{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

/// Errors from unseal key acquisition. Fatal to the one-time
/// initialization step — the process exits rather than loops, since there
/// is nothing to monitor without keys.
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    /// The initialization container or its log cannot be read.
    #[error("initialization source unavailable: {reason}")]
    SourceUnavailable { reason: String },

    /// Fewer than the threshold number of labeled key lines were found.
    #[error("incomplete key set: found {found} labeled unseal keys, need {need}")]
    IncompleteKeySet { found: usize, need: usize },

    /// The operator entered a blank value at the interactive prompt.
    #[error("empty input for unseal key {index}")]
    EmptyInput { index: usize },

    /// The interactive prompt itself failed.
    #[error("unseal key prompt failed: {reason}")]
    Prompt { reason: String },
}

/// Errors from one unseal attempt. All recoverable — the monitor loop
/// logs them and retries on the next poll.
#[derive(Debug, thiserror::Error)]
pub enum UnsealError {
    /// The key store failed; the store error is surfaced unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The container runtime failed while talking to the vault.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// The vault rejected one of the shares. Application stops at the
    /// first rejection; already-accepted shares are retained by the vault.
    #[error("vault rejected unseal share {index}: {reason}")]
    ShareRejected { index: usize, reason: String },

    /// Every share was applied but the post-check did not report an
    /// unsealed vault.
    #[error("vault still sealed after {applied} accepted shares")]
    VerificationFailed { applied: usize },
}

/// Errors from one-time startup initialization.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// Key acquisition failed.
    #[error(transparent)]
    Acquire(#[from] AcquireError),

    /// The key store failed during the existence check or the write.
    #[error(transparent)]
    Store(#[from] StoreError),
}
