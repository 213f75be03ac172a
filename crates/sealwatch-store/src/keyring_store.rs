//! Kernel keyring key store.
//!
//! Volatile custody: the bundle lives in the kernel keyring and disappears
//! on reboot. No elevated privilege is required. All three shares are packed
//! into one opaque blob under a single logical entry name, delimited by a
//! character guaranteed absent from the base64 and hex alphabets, so the
//! bundle is stored and replaced atomically as one item.
//!
//! The `keyring` crate's operations are blocking syscalls, so every trait
//! method hops to a blocking task.

use keyring::Entry;
use tokio::task;
use zeroize::Zeroizing;

use crate::{KeyBundle, SecretStore, StoreError, UNSEAL_THRESHOLD};

/// Delimiter between packed shares. Not part of the base64 or hex
/// alphabets, so it cannot collide with key material.
const DELIMITER: char = ':';

/// Volatile [`SecretStore`] backed by the kernel keyring.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
    name: String,
}

impl KeyringStore {
    /// Default service namespace for sealwatch entries.
    pub const DEFAULT_SERVICE: &'static str = "sealwatch";
    /// Default logical name of the unseal key bundle entry.
    pub const DEFAULT_NAME: &'static str = "unseal-keys";

    /// Create a store addressing the default bundle entry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_entry(Self::DEFAULT_SERVICE, Self::DEFAULT_NAME)
    }

    /// Create a store addressing a specific `(service, name)` entry.
    #[must_use]
    pub fn with_entry(service: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            name: name.into(),
        }
    }

    fn entry(service: &str, name: &str) -> Result<Entry, StoreError> {
        Entry::new(service, name).map_err(|e| StoreError::BackendUnavailable {
            reason: format!("cannot address keyring entry: {e}"),
        })
    }

    /// Run a blocking keyring operation on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> Result<T, StoreError> + Send + 'static,
    {
        let service = self.service.clone();
        let name = self.name.clone();
        task::spawn_blocking(move || op(Self::entry(&service, &name)?))
            .await
            .map_err(|e| StoreError::BackendUnavailable {
                reason: format!("keyring task failed: {e}"),
            })?
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SecretStore for KeyringStore {
    async fn store(&self, bundle: &KeyBundle) -> Result<(), StoreError> {
        let packed = pack_shares(bundle)?;
        self.blocking(move |entry| {
            // Invalidate any pre-existing bundle under the same logical
            // name before writing — last write wins, no append semantics.
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => {
                    return Err(StoreError::BackendUnavailable {
                        reason: format!("cannot evict previous keyring entry: {e}"),
                    });
                }
            }
            entry
                .set_password(&packed)
                .map_err(|e| StoreError::BackendUnavailable {
                    reason: format!("cannot write keyring entry: {e}"),
                })
        })
        .await
    }

    async fn retrieve(&self) -> Result<KeyBundle, StoreError> {
        self.blocking(|entry| {
            let packed = Zeroizing::new(match entry.get_password() {
                Ok(p) => p,
                Err(keyring::Error::NoEntry) => return Err(StoreError::NotFound),
                Err(e) => {
                    return Err(StoreError::BackendUnavailable {
                        reason: format!("cannot read keyring entry: {e}"),
                    });
                }
            });
            unpack_shares(&packed)
        })
        .await
    }

    async fn exists(&self) -> Result<bool, StoreError> {
        self.blocking(|entry| match entry.get_password() {
            Ok(packed) => {
                drop(Zeroizing::new(packed));
                Ok(true)
            }
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(StoreError::BackendUnavailable {
                reason: format!("cannot probe keyring entry: {e}"),
            }),
        })
        .await
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        self.blocking(|entry| match entry.delete_credential() {
            Ok(()) => Ok(1),
            Err(keyring::Error::NoEntry) => Ok(0),
            Err(e) => Err(StoreError::BackendUnavailable {
                reason: format!("cannot revoke keyring entry: {e}"),
            }),
        })
        .await
    }
}

/// Pack the bundle into a single delimiter-joined blob.
fn pack_shares(bundle: &KeyBundle) -> Result<Zeroizing<String>, StoreError> {
    for (i, share) in bundle.iter().enumerate() {
        if share.contains(DELIMITER) {
            return Err(StoreError::Corrupt {
                reason: format!("share {} contains the '{DELIMITER}' delimiter", i + 1),
            });
        }
    }
    let mut packed = String::with_capacity(bundle.iter().map(str::len).sum::<usize>() + 2);
    for (i, share) in bundle.iter().enumerate() {
        if i > 0 {
            packed.push(DELIMITER);
        }
        packed.push_str(share);
    }
    Ok(Zeroizing::new(packed))
}

/// Decode a packed blob back into a bundle of exactly
/// [`UNSEAL_THRESHOLD`] non-empty shares.
fn unpack_shares(packed: &str) -> Result<KeyBundle, StoreError> {
    let parts: Vec<&str> = packed.split(DELIMITER).collect();
    if parts.len() != UNSEAL_THRESHOLD {
        return Err(StoreError::Corrupt {
            reason: format!(
                "expected {UNSEAL_THRESHOLD} shares, found {}",
                parts.len()
            ),
        });
    }
    if parts.iter().any(|p| p.is_empty()) {
        return Err(StoreError::Corrupt {
            reason: "bundle contains an empty share".to_owned(),
        });
    }
    let shares: [String; UNSEAL_THRESHOLD] = [
        parts[0].to_owned(),
        parts[1].to_owned(),
        parts[2].to_owned(),
    ];
    Ok(KeyBundle::new(shares))
}
