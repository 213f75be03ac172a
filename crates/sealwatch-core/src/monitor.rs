//! Monitor loop — the top-level scheduler.
//!
//! One logical thread of control: sleep, probe, react, forever.
//! Acquisition, storage, probing, and unsealing never run concurrently
//! inside one process, so no internal locking is needed. The loop is built
//! to run indefinitely under `Restart=always`-style supervision: nothing in
//! steady state terminates the process, and shutdown arrives over a watch
//! channel signalled from SIGINT/SIGTERM.

use std::sync::Arc;

use sealwatch_store::SecretStore;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::acquire;
use crate::config::{KeySource, MonitorConfig};
use crate::error::InitError;
use crate::runtime::ContainerRuntime;
use crate::unseal;
use crate::vault::{SealState, VaultControl};

/// The polling monitor.
pub struct Monitor {
    config: MonitorConfig,
    vault: Arc<dyn VaultControl>,
    store: Arc<dyn SecretStore>,
    runtime: ContainerRuntime,
}

impl Monitor {
    /// Wire up the monitor. The configuration is immutable from here on.
    #[must_use]
    pub fn new(
        config: MonitorConfig,
        vault: Arc<dyn VaultControl>,
        store: Arc<dyn SecretStore>,
        runtime: ContainerRuntime,
    ) -> Self {
        Self {
            config,
            vault,
            store,
            runtime,
        }
    }

    /// One-time startup initialization, run exactly once per process
    /// lifetime, before the loop starts.
    ///
    /// Checks whether the key store already holds a bundle; if not,
    /// acquires the keys from the configured source and stores them.
    /// Monitor-only mode never initializes.
    ///
    /// # Errors
    ///
    /// Returns [`InitError`] on acquisition or store failure. Initialization
    /// failures are fatal — without keys there is nothing to monitor.
    pub async fn initialize(&self) -> Result<(), InitError> {
        if self.config.monitor_only {
            debug!("monitor-only mode; skipping key initialization");
            return Ok(());
        }

        if self.store.exists().await? {
            info!("unseal keys already in secure storage");
            return Ok(());
        }

        info!(source = ?self.config.key_source, "acquiring unseal keys");
        let bundle = match self.config.key_source {
            KeySource::InitLog => {
                acquire::from_init_log(&self.runtime, self.config.log_source_container()).await?
            }
            KeySource::Prompt => acquire::from_prompt().await?,
        };
        self.store.store(&bundle).await?;
        info!("unseal keys stored");
        Ok(())
    }

    /// One polling cycle: probe, and unseal if needed. Every failure is
    /// logged and absorbed — the next cycle retries.
    pub async fn poll_once(&self) {
        match self.vault.seal_status().await {
            SealState::Unsealed => {
                debug!(container = %self.config.container, "vault unsealed; nothing to do");
            }
            SealState::Unknown => {
                // Ambiguous state: do not unseal on guesswork. Also covers
                // an absent container — the loop carries on regardless.
                warn!(
                    container = %self.config.container,
                    "seal status unknown; skipping this cycle"
                );
            }
            SealState::Sealed if self.config.monitor_only => {
                warn!(
                    container = %self.config.container,
                    "vault is sealed (monitor-only mode; not unsealing)"
                );
            }
            SealState::Sealed => {
                info!(container = %self.config.container, "vault is sealed; applying stored keys");
                match unseal::unseal(self.vault.as_ref(), self.store.as_ref()).await {
                    Ok(()) => {}
                    Err(e) => {
                        warn!(error = %e, "unseal attempt failed; will retry next interval");
                    }
                }
            }
        }
    }

    /// Run the polling loop until `shutdown` is signalled.
    ///
    /// Each cycle sleeps the full configured interval, then probes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            container = %self.config.container,
            monitor_only = self.config.monitor_only,
            "seal monitor started"
        );

        loop {
            tokio::select! {
                () = tokio::time::sleep(self.config.poll_interval) => {
                    self.poll_once().await;
                }
                _ = shutdown.changed() => {
                    info!("seal monitor shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use sealwatch_store::{KeyBundle, MemoryStore};

    use super::*;
    use crate::config::BackendKind;
    use crate::error::{AcquireError, UnsealError};

    struct ScriptedVault {
        status: Mutex<SealState>,
        applications: AtomicUsize,
        accept_all: bool,
        /// Status to report once all shares have been applied.
        status_after_unseal: SealState,
    }

    impl ScriptedVault {
        fn sealed_accepting() -> Self {
            Self {
                status: Mutex::new(SealState::Sealed),
                applications: AtomicUsize::new(0),
                accept_all: true,
                status_after_unseal: SealState::Unsealed,
            }
        }

        fn with_status(status: SealState) -> Self {
            Self {
                status: Mutex::new(status),
                applications: AtomicUsize::new(0),
                accept_all: true,
                status_after_unseal: status,
            }
        }

        fn applications(&self) -> usize {
            self.applications.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl VaultControl for ScriptedVault {
        async fn seal_status(&self) -> SealState {
            *self.status.lock().unwrap()
        }

        async fn apply_share(&self, index: usize, _share: &str) -> Result<u8, UnsealError> {
            let applied = self.applications.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.accept_all {
                return Err(UnsealError::ShareRejected {
                    index,
                    reason: "scripted rejection".to_owned(),
                });
            }
            if applied == 3 {
                *self.status.lock().unwrap() = self.status_after_unseal;
            }
            #[allow(clippy::cast_possible_truncation)]
            Ok(applied as u8)
        }
    }

    fn config(monitor_only: bool) -> MonitorConfig {
        MonitorConfig::new(
            KeySource::InitLog,
            BackendKind::Keyring,
            1,
            "vault",
            None,
            monitor_only,
        )
        .unwrap()
    }

    fn absent_runtime() -> ContainerRuntime {
        ContainerRuntime::with_binary("/nonexistent/container-runtime")
    }

    fn bundle() -> KeyBundle {
        KeyBundle::new(["AAA".to_owned(), "BBB".to_owned(), "CCC".to_owned()])
    }

    fn monitor(
        monitor_only: bool,
        vault: Arc<ScriptedVault>,
        store: MemoryStore,
    ) -> Monitor {
        Monitor::new(config(monitor_only), vault, Arc::new(store), absent_runtime())
    }

    #[tokio::test]
    async fn sealed_vault_gets_unsealed_on_poll() {
        let vault = Arc::new(ScriptedVault::sealed_accepting());
        let store = MemoryStore::new();
        store.store(&bundle()).await.unwrap();

        let m = monitor(false, Arc::clone(&vault), store);
        m.poll_once().await;

        assert_eq!(vault.applications(), 3);
        assert_eq!(vault.seal_status().await, SealState::Unsealed);
    }

    #[tokio::test]
    async fn monitor_only_never_unseals_a_sealed_vault() {
        let vault = Arc::new(ScriptedVault::with_status(SealState::Sealed));
        let store = MemoryStore::new();
        store.store(&bundle()).await.unwrap();

        let m = monitor(true, Arc::clone(&vault), store);
        m.poll_once().await;

        assert_eq!(vault.applications(), 0);
        assert_eq!(vault.seal_status().await, SealState::Sealed);
    }

    #[tokio::test]
    async fn unknown_state_triggers_no_unseal() {
        let vault = Arc::new(ScriptedVault::with_status(SealState::Unknown));
        let store = MemoryStore::new();
        store.store(&bundle()).await.unwrap();

        let m = monitor(false, Arc::clone(&vault), store);
        m.poll_once().await;

        assert_eq!(vault.applications(), 0);
    }

    #[tokio::test]
    async fn unsealed_vault_is_left_alone() {
        let vault = Arc::new(ScriptedVault::with_status(SealState::Unsealed));
        let store = MemoryStore::new();
        store.store(&bundle()).await.unwrap();

        let m = monitor(false, Arc::clone(&vault), store);
        m.poll_once().await;

        assert_eq!(vault.applications(), 0);
    }

    #[tokio::test]
    async fn missing_keys_during_poll_is_absorbed_not_fatal() {
        let vault = Arc::new(ScriptedVault::with_status(SealState::Sealed));
        let store = MemoryStore::new(); // nothing stored

        let m = monitor(false, Arc::clone(&vault), store);
        // Must not panic or propagate; the loop would retry next cycle.
        m.poll_once().await;
        assert_eq!(vault.applications(), 0);
    }

    #[tokio::test]
    async fn initialize_skips_acquisition_when_keys_exist() {
        let vault = Arc::new(ScriptedVault::with_status(SealState::Unsealed));
        let store = MemoryStore::new();
        store.store(&bundle()).await.unwrap();

        // Runtime is absent — initialize must succeed without touching it.
        let m = monitor(false, vault, store);
        m.initialize().await.unwrap();
    }

    #[tokio::test]
    async fn initialize_is_a_noop_in_monitor_only_mode() {
        let vault = Arc::new(ScriptedVault::with_status(SealState::Sealed));
        let store = MemoryStore::new();
        let m = monitor(true, vault, store.clone());
        m.initialize().await.unwrap();
        // Still nothing stored.
        assert!(!SecretStore::exists(&store).await.unwrap());
    }

    #[tokio::test]
    async fn initialize_without_source_fails_fatally() {
        let vault = Arc::new(ScriptedVault::with_status(SealState::Sealed));
        let store = MemoryStore::new();
        let m = monitor(false, vault, store);
        let err = m.initialize().await.unwrap_err();
        assert!(matches!(
            err,
            InitError::Acquire(AcquireError::SourceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let vault = Arc::new(ScriptedVault::with_status(SealState::Unsealed));
        let store = MemoryStore::new();
        let m = monitor(false, vault, store);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { m.run(rx).await });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
