//! # Subscription Registry
//!
//! ## Purpose
//! Message type id → set of subscribed modules, plus a separate wildcard set for
//! modules subscribed to [`ALL_MESSAGE_TYPES`]. A reverse index makes removing a
//! module O(its subscriptions) instead of O(all types).
//!
//! ## Wildcard Exclusivity
//!
//! A wildcard subscriber holds no individual entries. Subscribing to the wildcard
//! clears them, and individual subscribe/unsubscribe calls are no-ops until the
//! wildcard is dropped again.
//!
//! Pause and resume are plain unsubscribe and subscribe; the "paused" distinction
//! is tracked only by clients.

use std::collections::{BTreeSet, HashMap, HashSet};

use types::ALL_MESSAGE_TYPES;

use crate::modules::ModuleHandle;

/// Outcome of a subscription change, used for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionChange {
    Added,
    Removed,
    /// Already in the requested state, or masked by the wildcard
    Unchanged,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    by_type: HashMap<i32, BTreeSet<ModuleHandle>>,
    wildcard: BTreeSet<ModuleHandle>,
    by_module: HashMap<ModuleHandle, HashSet<i32>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, handle: ModuleHandle, msg_type: i32) -> SubscriptionChange {
        if msg_type == ALL_MESSAGE_TYPES {
            if let Some(types) = self.by_module.remove(&handle) {
                for msg_type in types {
                    self.detach(handle, msg_type);
                }
            }
            return if self.wildcard.insert(handle) {
                SubscriptionChange::Added
            } else {
                SubscriptionChange::Unchanged
            };
        }

        if self.wildcard.contains(&handle) {
            return SubscriptionChange::Unchanged;
        }

        let added = self.by_type.entry(msg_type).or_default().insert(handle);
        self.by_module.entry(handle).or_default().insert(msg_type);
        if added {
            SubscriptionChange::Added
        } else {
            SubscriptionChange::Unchanged
        }
    }

    pub fn unsubscribe(&mut self, handle: ModuleHandle, msg_type: i32) -> SubscriptionChange {
        if msg_type == ALL_MESSAGE_TYPES {
            return if self.wildcard.remove(&handle) {
                SubscriptionChange::Removed
            } else {
                SubscriptionChange::Unchanged
            };
        }

        if self.wildcard.contains(&handle) {
            return SubscriptionChange::Unchanged;
        }

        let removed = self.detach(handle, msg_type);
        if let Some(types) = self.by_module.get_mut(&handle) {
            types.remove(&msg_type);
            if types.is_empty() {
                self.by_module.remove(&handle);
            }
        }
        if removed {
            SubscriptionChange::Removed
        } else {
            SubscriptionChange::Unchanged
        }
    }

    /// Drop every subscription held by `handle`
    pub fn remove_module(&mut self, handle: ModuleHandle) {
        self.wildcard.remove(&handle);
        if let Some(types) = self.by_module.remove(&handle) {
            for msg_type in types {
                self.detach(handle, msg_type);
            }
        }
    }

    /// Modules subscribed to `msg_type` individually or through the wildcard
    pub fn subscribers(&self, msg_type: i32) -> impl Iterator<Item = ModuleHandle> + '_ {
        self.by_type
            .get(&msg_type)
            .into_iter()
            .flatten()
            .chain(self.wildcard.iter())
            .copied()
    }

    pub fn is_subscribed(&self, handle: ModuleHandle, msg_type: i32) -> bool {
        self.wildcard.contains(&handle)
            || self
                .by_type
                .get(&msg_type)
                .is_some_and(|set| set.contains(&handle))
    }

    pub fn is_wildcard(&self, handle: ModuleHandle) -> bool {
        self.wildcard.contains(&handle)
    }

    /// Individually subscribed types of `handle`
    pub fn types_of(&self, handle: ModuleHandle) -> Vec<i32> {
        let mut types: Vec<i32> = self
            .by_module
            .get(&handle)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        types.sort_unstable();
        types
    }

    fn detach(&mut self, handle: ModuleHandle, msg_type: i32) -> bool {
        let Some(set) = self.by_type.get_mut(&msg_type) else {
            return false;
        };
        let removed = set.remove(&handle);
        if set.is_empty() {
            self.by_type.remove(&msg_type);
        }
        removed
    }
}
