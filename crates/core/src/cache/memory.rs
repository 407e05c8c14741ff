//! In-process LRU tier with a byte budget.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::warn;

use super::CachePayload;

struct Slot {
    payload: Arc<CachePayload>,
    size: usize,
    expires_at: DateTime<Utc>,
    tick: u64,
}

#[derive(Default)]
struct State {
    slots: HashMap<String, Slot>,
    /// Access tick -> key, oldest first.
    recency: BTreeMap<u64, String>,
    used: usize,
    next_tick: u64,
}

impl State {
    fn touch(&mut self, key: &str) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(slot) = self.slots.get_mut(key) {
            self.recency.remove(&slot.tick);
            slot.tick = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.slots.remove(key) {
            Some(slot) => {
                self.recency.remove(&slot.tick);
                self.used -= slot.size;
                true
            }
            None => false,
        }
    }
}

/// Result of a tier write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TierWrite {
    pub stored: bool,
    pub evicted: usize,
}

pub struct MemoryTier {
    budget: usize,
    state: Mutex<State>,
}

impl MemoryTier {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Memory cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<Arc<CachePayload>> {
        let mut state = self.lock();
        let expired = state.slots.get(key)?.expires_at <= now;
        if expired {
            state.remove(key);
            return None;
        }
        state.touch(key);
        state.slots.get(key).map(|slot| slot.payload.clone())
    }

    /// Store an entry, evicting least-recently-used entries to make room.
    /// Entries larger than the whole budget are refused.
    pub fn put(
        &self,
        key: &str,
        payload: Arc<CachePayload>,
        size: usize,
        expires_at: DateTime<Utc>,
    ) -> TierWrite {
        if size > self.budget {
            return TierWrite::default();
        }

        let mut state = self.lock();
        state.remove(key);

        let mut evicted = 0;
        while state.used + size > self.budget {
            let Some((_, oldest)) = state.recency.pop_first() else {
                break;
            };
            if let Some(slot) = state.slots.remove(&oldest) {
                state.used -= slot.size;
                evicted += 1;
            }
        }

        let tick = state.next_tick;
        state.next_tick += 1;
        state.recency.insert(tick, key.to_string());
        state.slots.insert(
            key.to_string(),
            Slot {
                payload,
                size,
                expires_at,
                tick,
            },
        );
        state.used += size;

        TierWrite {
            stored: true,
            evicted,
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key)
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let expired: Vec<String> = state
            .slots
            .iter()
            .filter(|(_, slot)| slot.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn used_bytes(&self) -> usize {
        self.lock().used
    }
}
