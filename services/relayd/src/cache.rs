//! Last known device state
//!
//! Readers get an `Arc` to an immutable snapshot; every update swaps in a new
//! snapshot. Mutators are crate-private and called only from the serializer
//! worker.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use relay_modbus::{InputState, RelayState};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Immutable view of relay and input states
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub relays: Vec<RelayState>,
    pub inputs: Vec<InputState>,
    /// When the device was last read successfully
    pub updated_at: Option<DateTime<Utc>>,
}

impl DeviceSnapshot {
    pub fn relay(&self, relay_id: u16) -> Option<&RelayState> {
        self.relays.iter().find(|r| r.relay_id() == relay_id)
    }

    pub fn input(&self, input_id: u16) -> Option<&InputState> {
        self.inputs.iter().find(|i| i.input_id() == input_id)
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    snapshot: Arc<DeviceSnapshot>,
    last_command: Option<Instant>,
}

/// Shared state cache
#[derive(Debug, Default)]
pub struct StateCache {
    inner: RwLock<CacheInner>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<DeviceSnapshot> {
        Arc::clone(&self.inner.read().snapshot)
    }

    /// Completion time of the most recent command
    pub fn last_command(&self) -> Option<Instant> {
        self.inner.read().last_command
    }

    pub(crate) fn mark_command(&self, at: Instant) {
        self.inner.write().last_command = Some(at);
    }

    /// Full refresh after a successful poll
    pub(crate) fn replace(&self, relays: Vec<RelayState>, inputs: Vec<InputState>) {
        let snapshot = DeviceSnapshot {
            relays,
            inputs,
            updated_at: Some(Utc::now()),
        };
        self.inner.write().snapshot = Arc::new(snapshot);
    }

    pub(crate) fn replace_relays(&self, relays: Vec<RelayState>) {
        let mut inner = self.inner.write();
        let snapshot = DeviceSnapshot {
            relays,
            inputs: inner.snapshot.inputs.clone(),
            updated_at: Some(Utc::now()),
        };
        inner.snapshot = Arc::new(snapshot);
    }

    pub(crate) fn replace_inputs(&self, inputs: Vec<InputState>) {
        let mut inner = self.inner.write();
        let snapshot = DeviceSnapshot {
            relays: inner.snapshot.relays.clone(),
            inputs,
            updated_at: Some(Utc::now()),
        };
        inner.snapshot = Arc::new(snapshot);
    }

    /// Overlay written relay states by id, keeping the rest.
    ///
    /// `updated_at` is left alone: it tracks reads, not writes.
    pub(crate) fn merge_relays(&self, written: &[RelayState]) {
        let mut inner = self.inner.write();
        let mut relays = inner.snapshot.relays.clone();
        for state in written {
            match relays
                .iter_mut()
                .find(|r| r.relay_id() == state.relay_id())
            {
                Some(slot) => *slot = *state,
                None => relays.push(*state),
            }
        }
        relays.sort_by_key(RelayState::relay_id);
        let snapshot = DeviceSnapshot {
            relays,
            inputs: inner.snapshot.inputs.clone(),
            updated_at: inner.snapshot.updated_at,
        };
        inner.snapshot = Arc::new(snapshot);
    }

    /// Overlay single input reads by id, keeping the rest
    pub(crate) fn merge_inputs(&self, read: &[InputState]) {
        let mut inner = self.inner.write();
        let mut inputs = inner.snapshot.inputs.clone();
        for state in read {
            match inputs.iter_mut().find(|i| i.input_id() == state.input_id()) {
                Some(slot) => *slot = *state,
                None => inputs.push(*state),
            }
        }
        inputs.sort_by_key(InputState::input_id);
        let snapshot = DeviceSnapshot {
            relays: inner.snapshot.relays.clone(),
            inputs,
            updated_at: inner.snapshot.updated_at,
        };
        inner.snapshot = Arc::new(snapshot);
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use relay_modbus::DeviceLayout;

    fn layout() -> DeviceLayout {
        DeviceLayout::new(1, 4, 2, 0, 0).unwrap()
    }

    #[test]
    fn test_empty_cache() {
        let cache = StateCache::new();
        let snap = cache.snapshot();
        assert!(snap.relays.is_empty());
        assert!(snap.updated_at.is_none());
        assert!(cache.last_command().is_none());
    }

    #[test]
    fn test_replace_swaps_snapshot() {
        let cache = StateCache::new();
        let layout = layout();
        let before = cache.snapshot();
        cache.replace(
            layout.relay_states(&[true, false, false, true]),
            layout.input_states(&[false, true]),
        );
        let after = cache.snapshot();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(before.relays.is_empty());
        assert!(after.relay(4).unwrap().state());
        assert!(after.input(2).unwrap().state());
        assert!(after.updated_at.is_some());
    }

    #[test]
    fn test_merge_relays_overlays_by_id() {
        let cache = StateCache::new();
        let layout = layout();
        cache.replace(layout.relay_states(&[false; 4]), layout.input_states(&[false; 2]));
        let polled_at = cache.snapshot().updated_at;

        cache.merge_relays(&[layout.relay_state(2, true).unwrap()]);
        let snap = cache.snapshot();
        assert!(snap.relay(2).unwrap().state());
        assert!(!snap.relay(1).unwrap().state());
        assert_eq!(snap.relays.len(), 4);
        assert_eq!(snap.inputs.len(), 2);
        assert_eq!(snap.updated_at, polled_at);
    }

    #[test]
    fn test_merge_into_empty_cache_sorts() {
        let cache = StateCache::new();
        let layout = layout();
        cache.merge_relays(&[
            layout.relay_state(3, true).unwrap(),
            layout.relay_state(1, false).unwrap(),
        ]);
        let ids: Vec<u16> = cache.snapshot().relays.iter().map(|r| r.relay_id()).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_replace_inputs_keeps_relays() {
        let cache = StateCache::new();
        let layout = layout();
        cache.replace_relays(layout.relay_states(&[true; 4]));
        cache.replace_inputs(layout.input_states(&[true, true]));
        let snap = cache.snapshot();
        assert_eq!(snap.relays.len(), 4);
        assert_eq!(snap.inputs.len(), 2);
    }

    #[test]
    fn test_merge_inputs_overlays_by_id() {
        let cache = StateCache::new();
        let layout = layout();
        cache.replace(layout.relay_states(&[true; 4]), layout.input_states(&[false; 2]));

        cache.merge_inputs(&[layout.input_state(2, true).unwrap()]);
        let snap = cache.snapshot();
        assert!(snap.input(2).unwrap().state());
        assert!(!snap.input(1).unwrap().state());
        assert_eq!(snap.relays.len(), 4);
    }

    #[tokio::test]
    async fn test_mark_command() {
        let cache = StateCache::new();
        let now = Instant::now();
        cache.mark_command(now);
        assert_eq!(cache.last_command(), Some(now));
    }
}
