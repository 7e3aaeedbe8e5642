//! Set of services already under watch.

use crate::types::ServiceKey;
use std::collections::HashSet;

/// Tracks which services hold a live registry subscription.
///
/// Owned by the reconciler and only touched from the scheduler thread, so
/// it carries no lock. Entries are never removed: a subscription lasts
/// until the process ends.
#[derive(Debug, Default)]
pub struct SubscriptionLedger {
    keys: HashSet<ServiceKey>,
}

impl SubscriptionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &ServiceKey) -> bool {
        self.keys.contains(key)
    }

    /// Record a key as subscribed. Returns false if it was already present.
    pub fn mark(&mut self, key: ServiceKey) -> bool {
        self.keys.insert(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceKey> {
        self.keys.iter()
    }
}
