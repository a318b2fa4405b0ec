//! Alert deduplication.
//!
//! A risk event raises an alert only when its score reaches the threshold
//! and no open or acknowledged alert for the same key was created within the
//! cooldown. The final existence check and insert happen inside the store
//! ([`AlertStore::insert_alert_unless_covered`]) so two events racing for the
//! same key cannot both raise.

use chrono::{DateTime, Duration, Utc};

use crate::config::AlertConfig;
use crate::core::{AggregationKey, Alert, AlertSeverity, AlertStatus, RiskEvent};
use crate::error::StoreError;

/// Persisted alert history consulted by the deduplicator.
pub trait AlertStore {
    /// Any open/acknowledged alert for `key` created at or after `since`.
    fn has_open_alert(&self, key: &AggregationKey, since: DateTime<Utc>) -> Result<bool, StoreError>;

    fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError>;

    /// Insert unless an active alert created at or after `since` already
    /// covers the key. Returns whether the alert was inserted.
    ///
    /// The default is a plain check-then-insert; stores that can should
    /// override it with an atomic version.
    fn insert_alert_unless_covered(&self, alert: &Alert, since: DateTime<Utc>) -> Result<bool, StoreError> {
        if self.has_open_alert(&alert.key(), since)? {
            return Ok(false);
        }
        self.insert_alert(alert)?;
        Ok(true)
    }

    /// Operator status change. Unknown ids yield [`StoreError::NotFound`].
    fn update_status(&self, id: &str, status: AlertStatus, now: DateTime<Utc>) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SuppressReason {
    BelowThreshold { score: f64, threshold: f64 },
    /// An active alert for the key already exists inside the cooldown.
    Covered,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertDecision {
    Raise(Alert),
    Suppressed(SuppressReason),
}

pub struct Deduplicator {
    threshold: f64,
    cooldown: Duration,
}

impl Deduplicator {
    pub fn new(threshold: f64, cooldown: Duration) -> Self {
        Self { threshold, cooldown }
    }

    pub fn from_config(config: &AlertConfig) -> Self {
        Self::new(config.threshold, config.cooldown())
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Decide whether `event` needs a new alert as of `now`. Events below the
    /// threshold are rejected without touching the store.
    pub fn should_alert<S: AlertStore + ?Sized>(
        &self,
        event: &RiskEvent,
        store: &S,
        now: DateTime<Utc>,
    ) -> Result<AlertDecision, StoreError> {
        if event.risk_score < self.threshold {
            return Ok(AlertDecision::Suppressed(SuppressReason::BelowThreshold {
                score: event.risk_score,
                threshold: self.threshold,
            }));
        }

        if store.has_open_alert(&event.key(), now - self.cooldown)? {
            return Ok(AlertDecision::Suppressed(SuppressReason::Covered));
        }

        Ok(AlertDecision::Raise(build_alert(event, now)))
    }

    /// Persist an alert produced by [`Self::should_alert`]. Returns
    /// `Suppressed(Covered)` if another alert for the key landed first.
    pub fn commit<S: AlertStore + ?Sized>(&self, alert: Alert, store: &S) -> Result<AlertDecision, StoreError> {
        let since = alert.created_at - self.cooldown;
        if store.insert_alert_unless_covered(&alert, since)? {
            Ok(AlertDecision::Raise(alert))
        } else {
            Ok(AlertDecision::Suppressed(SuppressReason::Covered))
        }
    }
}

pub fn build_alert(event: &RiskEvent, now: DateTime<Utc>) -> Alert {
    Alert {
        id: uuid::Uuid::new_v4().to_string(),
        risk_event_id: event.id.clone(),
        country: event.country.clone(),
        region: event.region.clone(),
        commodity: event.commodity.clone(),
        title: format!("High disruption risk for {}", event.commodity),
        description: format!(
            "{}/{} scored {:.2}. {}",
            event.country, event.region, event.risk_score, event.recommended_action
        ),
        risk_score: event.risk_score,
        severity: AlertSeverity::from_score(event.risk_score),
        status: AlertStatus::Open,
        created_at: now,
        updated_at: now,
    }
}
