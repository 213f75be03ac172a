//! The unseal key bundle.
//!
//! Shares are opaque strings handed to the vault's unseal API verbatim — no
//! internal structure is interpreted here. The bundle is zeroized on drop
//! and its `Debug` output is redacted so key material can never reach a log
//! line through a formatting shortcut.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Number of distinct shares required to unseal the vault.
pub const UNSEAL_THRESHOLD: usize = 3;

/// The set of exactly [`UNSEAL_THRESHOLD`] unseal key shares, in the order
/// they were produced at vault initialization.
///
/// Treated as a unit throughout: stored together, retrieved together,
/// cleared together. Created once (from the init log or operator input) and
/// read repeatedly without mutation.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyBundle {
    shares: [String; UNSEAL_THRESHOLD],
}

impl KeyBundle {
    /// Create a bundle from exactly [`UNSEAL_THRESHOLD`] shares.
    ///
    /// Share content is not validated here — the producing boundary (the
    /// key acquirer, or a store backend decoding persisted data) is
    /// responsible for rejecting empty or malformed shares.
    #[must_use]
    pub fn new(shares: [String; UNSEAL_THRESHOLD]) -> Self {
        Self { shares }
    }

    /// The shares in application order.
    #[must_use]
    pub fn shares(&self) -> &[String; UNSEAL_THRESHOLD] {
        &self.shares
    }

    /// Iterate over the shares in application order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.shares.iter().map(String::as_str)
    }
}

impl<'a> IntoIterator for &'a KeyBundle {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.shares.iter()
    }
}

impl std::fmt::Debug for KeyBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyBundle")
            .field("shares", &"[redacted]")
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn bundle() -> KeyBundle {
        KeyBundle::new(["AAA".to_owned(), "BBB".to_owned(), "CCC".to_owned()])
    }

    #[test]
    fn shares_keep_order() {
        let b = bundle();
        let shares: Vec<&str> = b.iter().collect();
        assert_eq!(shares, vec!["AAA", "BBB", "CCC"]);
    }

    #[test]
    fn debug_does_not_leak_shares() {
        let b = bundle();
        let debug = format!("{b:?}");
        assert!(debug.contains("redacted"));
        assert!(!debug.contains("AAA"));
    }

    #[test]
    fn equality_compares_content() {
        assert_eq!(bundle(), bundle());
        let other = KeyBundle::new(["AAA".to_owned(), "BBB".to_owned(), "XXX".to_owned()]);
        assert_ne!(bundle(), other);
    }
}
