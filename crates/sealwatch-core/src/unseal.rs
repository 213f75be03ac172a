//! Unseal orchestrator.
//!
//! One unseal attempt: retrieve the bundle, apply the shares strictly in
//! order, verify the result. No retries happen here — retry is the monitor
//! loop's job on the next poll. Partial application state is owned by the
//! vault itself, which tolerates partial share submission.

use sealwatch_store::SecretStore;
use tracing::{debug, info, warn};

use crate::error::UnsealError;
use crate::vault::{SealState, VaultControl};

/// Apply the stored key bundle to a sealed vault and verify the outcome.
///
/// Shares are applied in the fixed order 1, 2, 3 — irrelevant to the
/// vault's threshold scheme, but determinism aids log correlation.
/// Application stops at the first rejection. An empty share is skipped
/// with a warning rather than treated as fatal; if skipping drops the
/// applied count below the threshold the post-check surfaces it as
/// [`UnsealError::VerificationFailed`].
///
/// # Errors
///
/// - Store errors ([`sealwatch_store::StoreError`]) propagate unchanged.
/// - [`UnsealError::ShareRejected`] on the first share the vault refuses.
/// - [`UnsealError::VerificationFailed`] if the post-check does not
///   report an unsealed vault.
pub async fn unseal(
    vault: &dyn VaultControl,
    store: &dyn SecretStore,
) -> Result<(), UnsealError> {
    let bundle = store.retrieve().await?;

    let mut applied = 0_usize;
    for (i, share) in bundle.iter().enumerate() {
        let index = i + 1;
        if share.is_empty() {
            warn!(share = index, "skipping empty unseal share");
            continue;
        }
        let progress = vault.apply_share(index, share).await?;
        applied += 1;
        debug!(share = index, progress, "unseal share applied");
    }

    // Re-query rather than trusting the last response: the post-check is
    // the only thing that counts as success.
    match vault.seal_status().await {
        SealState::Unsealed => {
            info!(applied, "vault unsealed");
            Ok(())
        }
        SealState::Sealed | SealState::Unknown => {
            Err(UnsealError::VerificationFailed { applied })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use sealwatch_store::{KeyBundle, MemoryStore, StoreError};

    use super::*;

    /// Vault double with scripted per-share verdicts and status responses.
    struct ScriptedVault {
        /// Verdict per application attempt, in order. `true` = accepted.
        verdicts: Vec<bool>,
        /// Status responses, consumed per probe; the last one repeats.
        statuses: Mutex<Vec<SealState>>,
        applications: AtomicUsize,
    }

    impl ScriptedVault {
        fn new(verdicts: Vec<bool>, statuses: Vec<SealState>) -> Self {
            Self {
                verdicts,
                statuses: Mutex::new(statuses),
                applications: AtomicUsize::new(0),
            }
        }

        fn applications(&self) -> usize {
            self.applications.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl VaultControl for ScriptedVault {
        async fn seal_status(&self) -> SealState {
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                statuses.remove(0)
            } else {
                statuses.first().copied().unwrap_or(SealState::Unknown)
            }
        }

        async fn apply_share(&self, index: usize, _share: &str) -> Result<u8, UnsealError> {
            let attempt = self.applications.fetch_add(1, Ordering::SeqCst);
            let accepted = self.verdicts.get(attempt).copied().unwrap_or(false);
            if accepted {
                #[allow(clippy::cast_possible_truncation)]
                Ok((attempt + 1) as u8)
            } else {
                Err(UnsealError::ShareRejected {
                    index,
                    reason: "scripted rejection".to_owned(),
                })
            }
        }
    }

    /// Store double that returns a fixed bundle without validation, for
    /// exercising the empty-share path real backends reject earlier.
    struct FixedStore {
        bundle: KeyBundle,
    }

    #[async_trait::async_trait]
    impl SecretStore for FixedStore {
        async fn store(&self, _bundle: &KeyBundle) -> Result<(), StoreError> {
            Ok(())
        }
        async fn retrieve(&self) -> Result<KeyBundle, StoreError> {
            Ok(self.bundle.clone())
        }
        async fn exists(&self) -> Result<bool, StoreError> {
            Ok(true)
        }
        async fn clear(&self) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    fn bundle() -> KeyBundle {
        KeyBundle::new(["AAA".to_owned(), "BBB".to_owned(), "CCC".to_owned()])
    }

    async fn stored() -> MemoryStore {
        let store = MemoryStore::new();
        store.store(&bundle()).await.unwrap();
        store
    }

    #[tokio::test]
    async fn all_shares_accepted_and_verified_unsealed() {
        let vault = ScriptedVault::new(vec![true, true, true], vec![SealState::Unsealed]);
        let store = stored().await;
        unseal(&vault, &store).await.unwrap();
        assert_eq!(vault.applications(), 3);
    }

    #[tokio::test]
    async fn stops_at_first_rejected_share() {
        // Accepts shares 1 and 2, rejects share 3.
        let vault = ScriptedVault::new(vec![true, true, false], vec![SealState::Sealed]);
        let store = stored().await;
        let err = unseal(&vault, &store).await.unwrap_err();
        assert!(matches!(err, UnsealError::ShareRejected { index: 3, .. }));
        // Exactly three applications — never a fourth.
        assert_eq!(vault.applications(), 3);
    }

    #[tokio::test]
    async fn rejection_of_first_share_stops_immediately() {
        let vault = ScriptedVault::new(vec![false], vec![SealState::Sealed]);
        let store = stored().await;
        let err = unseal(&vault, &store).await.unwrap_err();
        assert!(matches!(err, UnsealError::ShareRejected { index: 1, .. }));
        assert_eq!(vault.applications(), 1);
    }

    #[tokio::test]
    async fn still_sealed_after_all_shares_is_verification_failed() {
        let vault = ScriptedVault::new(vec![true, true, true], vec![SealState::Sealed]);
        let store = stored().await;
        let err = unseal(&vault, &store).await.unwrap_err();
        assert!(matches!(err, UnsealError::VerificationFailed { applied: 3 }));
    }

    #[tokio::test]
    async fn unknown_post_check_is_verification_failed() {
        let vault = ScriptedVault::new(vec![true, true, true], vec![SealState::Unknown]);
        let store = stored().await;
        let err = unseal(&vault, &store).await.unwrap_err();
        assert!(matches!(err, UnsealError::VerificationFailed { .. }));
    }

    #[tokio::test]
    async fn missing_bundle_propagates_not_found_unchanged() {
        let vault = ScriptedVault::new(vec![], vec![SealState::Sealed]);
        let store = MemoryStore::new();
        let err = unseal(&vault, &store).await.unwrap_err();
        assert!(matches!(err, UnsealError::Store(StoreError::NotFound)));
        assert_eq!(vault.applications(), 0);
    }

    #[tokio::test]
    async fn empty_share_is_skipped_not_fatal() {
        let vault = ScriptedVault::new(vec![true, true], vec![SealState::Sealed]);
        let store = FixedStore {
            bundle: KeyBundle::new(["AAA".to_owned(), String::new(), "CCC".to_owned()]),
        };
        let err = unseal(&vault, &store).await.unwrap_err();
        // Two shares applied, post-check naturally fails below threshold.
        assert!(matches!(err, UnsealError::VerificationFailed { applied: 2 }));
        assert_eq!(vault.applications(), 2);
    }
}
