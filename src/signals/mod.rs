pub mod action;
pub mod score;

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::config::RiskConfig;
use crate::core::window::KeyWindow;
use crate::core::{AggregationKey, RiskEvent, Signal};

/// Sliding-window risk scorer, one independent window per aggregation key.
///
/// The map is sharded, and each key owns its own mutex: the shard lock is
/// only held long enough to fetch the key's handle, so updates for one key
/// are strictly serialized while unrelated keys proceed in parallel.
pub struct RiskAggregator {
    window: Duration,
    max_entries: usize,
    keys: DashMap<AggregationKey, Arc<Mutex<KeyWindow>>>,
}

impl RiskAggregator {
    pub fn new(window: Duration, max_entries: usize) -> Self {
        Self {
            window,
            max_entries: max_entries.max(1),
            keys: DashMap::new(),
        }
    }

    pub fn from_config(config: &RiskConfig) -> Self {
        Self::new(config.window(), config.max_entries_per_key)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn process(&self, signal: Signal) -> RiskEvent {
        self.process_at(signal, Utc::now())
    }

    /// Fold a signal into its key's window and score the result as of `now`.
    pub fn process_at(&self, signal: Signal, now: DateTime<Utc>) -> RiskEvent {
        let key = signal.key();
        let handle = self.handle(&key);

        let (risk_score, contributors) = {
            let mut window = handle.lock().unwrap_or_else(PoisonError::into_inner);
            window.push(signal, now);
            window.prune(now, self.window);
            window.truncate_oldest(self.max_entries);
            score::aggregate(window.signals())
        };

        RiskEvent {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now,
            country: key.country,
            region: key.region,
            commodity: key.commodity,
            risk_score,
            window_minutes: self.window.num_minutes(),
            contributors,
            recommended_action: action::recommended_action(risk_score).to_string(),
        }
    }

    fn handle(&self, key: &AggregationKey) -> Arc<Mutex<KeyWindow>> {
        if let Some(existing) = self.keys.get(key) {
            return Arc::clone(existing.value());
        }
        Arc::clone(self.keys.entry(key.clone()).or_default().value())
    }

    /// Forget keys with nothing left in their window. A key is only removed
    /// while no caller holds its handle, so in-flight updates are never lost.
    pub fn reclaim_idle(&self, now: DateTime<Utc>) -> usize {
        let before = self.keys.len();
        self.keys.retain(|_, handle| {
            if Arc::strong_count(handle) > 1 {
                return true;
            }
            let window = handle.lock().unwrap_or_else(PoisonError::into_inner);
            !window.is_stale(now, self.window)
        });
        before.saturating_sub(self.keys.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.keys.len()
    }

    #[cfg(test)]
    pub fn window_len(&self, key: &AggregationKey) -> usize {
        self.keys
            .get(key)
            .map(|h| h.lock().unwrap_or_else(PoisonError::into_inner).len())
            .unwrap_or(0)
    }
}
