//! Secure key store abstraction for sealwatch.
//!
//! This crate defines the [`SecretStore`] trait — custody of one unseal
//! [`KeyBundle`] as an indivisible unit. It knows nothing about the vault,
//! containers, or the monitor loop; it only stores, retrieves, and erases
//! the bundle.
//!
//! Three implementations are provided:
//!
//! - [`KeyringStore`] — volatile, backed by the kernel keyring. Cleared on
//!   reboot, needs no elevated privilege.
//! - [`TpmStore`] — durable, each share sealed under a TPM-resident primary
//!   key via `tpm2-tools`. Survives reboots, requires TPM access.
//! - [`MemoryStore`] — in-memory, for testing only.
//!
//! Exactly one backend is active per process; there is no migration path
//! between them — switching backends means re-initializing key custody.

mod bundle;
mod error;
mod keyring_store;
mod memory;
mod tpm;

pub use bundle::{KeyBundle, UNSEAL_THRESHOLD};
pub use error::StoreError;
pub use keyring_store::KeyringStore;
pub use memory::MemoryStore;
pub use tpm::TpmStore;

/// Custody of the unseal key bundle.
///
/// The bundle is always handled as a unit: stored together, retrieved
/// together, cleared together. Implementations must be safe to share across
/// async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait SecretStore: Send + Sync + 'static {
    /// Persist the bundle, atomically replacing any previously stored one
    /// under the same logical name. Last write wins.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BackendUnavailable`] if the underlying
    /// primitive cannot be reached or written.
    async fn store(&self, bundle: &KeyBundle) -> Result<(), StoreError>;

    /// Retrieve the stored bundle.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if no bundle has been stored.
    /// - [`StoreError::Corrupt`] if the stored data does not decode into
    ///   exactly [`UNSEAL_THRESHOLD`] non-empty shares.
    /// - [`StoreError::BackendUnavailable`] if the underlying primitive
    ///   cannot be reached or requires different privileges.
    async fn retrieve(&self) -> Result<KeyBundle, StoreError>;

    /// Check whether a bundle is stored. Must not mutate any state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BackendUnavailable`] if the underlying
    /// primitive cannot be reached.
    async fn exists(&self) -> Result<bool, StoreError>;

    /// Best-effort secure erasure of the stored bundle. Idempotent —
    /// clearing an empty store succeeds. Returns the number of items
    /// removed.
    ///
    /// Scoped strictly to this store's one logical bundle name; never
    /// sweeps unrelated entries sharing the same backend.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BackendUnavailable`] if erasure fails.
    async fn clear(&self) -> Result<usize, StoreError>;
}
