//! In-memory key store for testing.
//!
//! Holds the bundle behind an `RwLock`. Nothing persists — all data is lost
//! when the process exits. Use this in unit and integration tests where a
//! real store is needed without touching the kernel keyring or a TPM.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{KeyBundle, SecretStore, StoreError, UNSEAL_THRESHOLD};

/// An in-memory [`SecretStore`] holding at most one bundle.
///
/// Thread-safe and async-compatible. Cloning shares the underlying slot,
/// matching the semantics of a shared external store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Arc<RwLock<Option<KeyBundle>>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SecretStore for MemoryStore {
    async fn store(&self, bundle: &KeyBundle) -> Result<(), StoreError> {
        let mut slot = self.slot.write().await;
        *slot = Some(bundle.clone());
        Ok(())
    }

    async fn retrieve(&self) -> Result<KeyBundle, StoreError> {
        let slot = self.slot.read().await;
        let bundle = slot.as_ref().ok_or(StoreError::NotFound)?;
        if bundle.iter().any(str::is_empty) {
            return Err(StoreError::Corrupt {
                reason: format!("expected {UNSEAL_THRESHOLD} non-empty shares"),
            });
        }
        Ok(bundle.clone())
    }

    async fn exists(&self) -> Result<bool, StoreError> {
        Ok(self.slot.read().await.is_some())
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let mut slot = self.slot.write().await;
        Ok(usize::from(slot.take().is_some()))
    }
}
