//! Monitor configuration.
//!
//! One immutable value constructed at startup and passed explicitly into
//! every component — there is no global mutable configuration. Validation
//! happens here, once, at the boundary.

use std::time::Duration;

use crate::error::ConfigError;

/// Where the unseal key shares come from during one-time initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// Scrape the labeled key lines from the initialization container's log.
    InitLog,
    /// Prompt the operator interactively with echo suppressed.
    Prompt,
}

/// Which secure key store backend holds the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Volatile kernel keyring — cleared on reboot, no privilege needed.
    Keyring,
    /// Durable TPM-sealed storage — survives reboots, needs TPM access.
    Tpm,
}

/// Immutable daemon configuration, fixed at process start.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Source of the unseal keys for one-time initialization.
    pub key_source: KeySource,
    /// Active key store backend. Exactly one per process; switching
    /// backends requires explicit re-initialization.
    pub backend: BackendKind,
    /// Sleep between polls of the vault's seal status.
    pub poll_interval: Duration,
    /// Name of the container running the target vault.
    pub container: String,
    /// Container whose log holds the one-time initialization output, when
    /// it differs from the target vault container.
    pub init_container: Option<String>,
    /// Observe and log seal state only; never initialize or unseal.
    pub monitor_only: bool,
}

impl MonitorConfig {
    /// Validate and build the configuration.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidPollInterval`] if `poll_interval_secs` is zero.
    /// - [`ConfigError::EmptyContainer`] if the target container name is blank.
    pub fn new(
        key_source: KeySource,
        backend: BackendKind,
        poll_interval_secs: u64,
        container: impl Into<String>,
        init_container: Option<String>,
        monitor_only: bool,
    ) -> Result<Self, ConfigError> {
        if poll_interval_secs == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        let container = container.into();
        if container.trim().is_empty() {
            return Err(ConfigError::EmptyContainer);
        }
        Ok(Self {
            key_source,
            backend,
            poll_interval: Duration::from_secs(poll_interval_secs),
            container,
            init_container,
            monitor_only,
        })
    }

    /// The container whose log is scraped for initialization output.
    #[must_use]
    pub fn log_source_container(&self) -> &str {
        self.init_container.as_deref().unwrap_or(&self.container)
    }
}
