//! Bandwidth policies consulted before and during transfers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Decides whether transfers may currently use the network.
///
/// Polled by the fetcher once per read buffer, so implementations must be cheap.
pub trait BandwidthPolicy: Send + Sync {
    fn is_transfer_allowed(&self) -> bool;
}

impl<F> BandwidthPolicy for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_transfer_allowed(&self) -> bool {
        self()
    }
}

/// Policy that never blocks
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl BandwidthPolicy for AllowAll {
    fn is_transfer_allowed(&self) -> bool {
        true
    }
}

/// "Wi-Fi only" style policy driven by two shared flags.
///
/// The embedding application flips `on_unmetered` as the network changes and
/// `unmetered_only` when the user changes the setting; clones share both flags.
#[derive(Debug, Clone)]
pub struct SwitchPolicy {
    unmetered_only: Arc<AtomicBool>,
    on_unmetered: Arc<AtomicBool>,
}

impl SwitchPolicy {
    pub fn new(unmetered_only: bool, on_unmetered: bool) -> Self {
        Self {
            unmetered_only: Arc::new(AtomicBool::new(unmetered_only)),
            on_unmetered: Arc::new(AtomicBool::new(on_unmetered)),
        }
    }

    pub fn set_unmetered_only(&self, value: bool) {
        self.unmetered_only.store(value, Ordering::SeqCst);
    }

    pub fn set_on_unmetered(&self, value: bool) {
        self.on_unmetered.store(value, Ordering::SeqCst);
    }
}

impl Default for SwitchPolicy {
    fn default() -> Self {
        Self::new(false, true)
    }
}

impl BandwidthPolicy for SwitchPolicy {
    fn is_transfer_allowed(&self) -> bool {
        !self.unmetered_only.load(Ordering::SeqCst) || self.on_unmetered.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_policy_blocks_metered_networks_when_required() {
        let policy = SwitchPolicy::new(true, false);
        assert!(!policy.is_transfer_allowed());

        let shared = policy.clone();
        shared.set_on_unmetered(true);
        assert!(policy.is_transfer_allowed());

        policy.set_on_unmetered(false);
        policy.set_unmetered_only(false);
        assert!(shared.is_transfer_allowed());
    }

    #[test]
    fn closures_are_policies() {
        let policy: Arc<dyn BandwidthPolicy> = Arc::new(|| false);
        assert!(!policy.is_transfer_allowed());
        assert!(AllowAll.is_transfer_allowed());
    }
}
