//! Store error types.
//!
//! Each variant carries enough context to diagnose the problem without a
//! debugger. Error messages never include key material — only backend
//! identifiers and operation descriptions.

/// Errors from secure key store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No key bundle has been stored under this store's logical name.
    #[error("no unseal key bundle stored")]
    NotFound,

    /// Stored data exists but does not decode into exactly the threshold
    /// number of non-empty shares.
    #[error("stored unseal key bundle is corrupt: {reason}")]
    Corrupt { reason: String },

    /// The underlying primitive (kernel keyring session, TPM) cannot be
    /// reached, or requires different process privileges than held.
    #[error("key store backend unavailable: {reason}")]
    BackendUnavailable { reason: String },
}
