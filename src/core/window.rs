use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use super::Signal;

/// A signal held in a key's window, with its effective timestamp resolved.
#[derive(Debug, Clone)]
pub struct WindowEntry {
    pub signal: Signal,
    pub at: DateTime<Utc>,
}

/// Recent signals for one aggregation key, oldest first.
#[derive(Debug, Default)]
pub struct KeyWindow {
    entries: VecDeque<WindowEntry>,
}

impl KeyWindow {
    /// Append a signal. Signals without a timestamp are stamped with `now`.
    pub fn push(&mut self, signal: Signal, now: DateTime<Utc>) {
        let at = signal.timestamp.unwrap_or(now);
        self.entries.push_back(WindowEntry { signal, at });
    }

    /// Drop every entry at or before `now - window`.
    pub fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        let cutoff = now - window;
        self.entries.retain(|e| e.at > cutoff);
    }

    /// Keep only the newest `max` entries.
    pub fn truncate_oldest(&mut self, max: usize) {
        while self.len() > max {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Latest effective timestamp in the window.
    pub fn newest_at(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().map(|e| e.at).max()
    }

    /// True when nothing in the window can still contribute at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.is_empty() || self.newest_at().is_some_and(|at| at <= now - window)
    }

    pub fn signals(&self) -> impl Iterator<Item = &Signal> {
        self.entries.iter().map(|e| &e.signal)
    }
}
