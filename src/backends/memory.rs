use super::{advance, BackendError, BackendKind, RateBackend, RateWindow};
use crate::rate_limiter::Decision;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// In-process window store.
///
/// The read-check-write cycle runs under the map's entry lock, which
/// serializes requests for the same key without blocking unrelated keys in
/// other shards. State is lost on restart and not shared between processes.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    windows: Arc<DashMap<String, RateWindow>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of windows currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl RateBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn check_and_consume(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
        now: u64,
    ) -> Result<Decision, BackendError> {
        let transition = match self.windows.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                let transition = advance(Some(*slot.get()), limit, window_secs, now);
                if let Some(window) = transition.to_store() {
                    slot.insert(window);
                }
                transition
            }
            Entry::Vacant(slot) => {
                let transition = advance(None, limit, window_secs, now);
                if let Some(window) = transition.to_store() {
                    slot.insert(window);
                }
                transition
            }
        };

        Ok(transition.decision(limit, now, window_secs))
    }

    async fn purge_expired(&self, now: u64, window_secs: u64) -> Result<usize, BackendError> {
        let before = self.windows.len();
        self.windows
            .retain(|_, window| !window.is_expired(now, window_secs));
        Ok(before.saturating_sub(self.windows.len()))
    }
}
