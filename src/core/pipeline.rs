use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::alerts::{AlertDecision, AlertStore, Deduplicator, SuppressReason};
use crate::core::{InboundMessage, RiskEvent, Signal};
use crate::error::{DecodeError, StoreError, TransportError};
use crate::notifications::DesktopNotifier;
use crate::signals::RiskAggregator;

/// Append-only risk event history.
pub trait RiskEventStore {
    /// No-op for an id that is already stored. Returns whether a row was written.
    fn insert_risk_event(&self, event: &RiskEvent) -> Result<bool, StoreError>;
}

/// Downstream destination for scored risk events.
pub trait RiskSink: Send + Sync {
    fn name(&self) -> &str;
    fn publish(&self, routing_key: &str, event: &RiskEvent) -> Result<(), TransportError>;
}

/// Hands risk events to an in-process consumer (the alert stage).
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<RiskEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<RiskEvent>) -> Self {
        Self { tx }
    }
}

impl RiskSink for ChannelSink {
    fn name(&self) -> &str {
        "alert-stage"
    }

    fn publish(&self, _routing_key: &str, event: &RiskEvent) -> Result<(), TransportError> {
        self.tx.send(event.clone()).map_err(|_| TransportError::Closed)
    }
}

/// What happened to one message.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Undecodable payload, dropped without retry.
    Dropped,
    Emitted {
        event_id: String,
        risk_score: f64,
        persisted: bool,
        published: usize,
    },
    Raised { alert_id: String },
    Suppressed(SuppressReason),
    /// Store failure; logged and skipped.
    Failed,
}

/// Per-stage counters, logged on shutdown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageStats {
    pub received: u64,
    pub dropped: u64,
    pub emitted: u64,
    pub store_failures: u64,
    pub publish_failures: u64,
    pub raised: u64,
    pub suppressed: u64,
}

pub fn decode_signal(payload: &[u8]) -> Result<Signal, DecodeError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Signal consumer / risk producer: decode, aggregate, persist, publish.
pub struct RiskStage {
    aggregator: Arc<RiskAggregator>,
    store: Arc<dyn RiskEventStore + Send + Sync>,
    sinks: Vec<Box<dyn RiskSink>>,
    stats: StageStats,
}

impl RiskStage {
    pub fn new(
        aggregator: Arc<RiskAggregator>,
        store: Arc<dyn RiskEventStore + Send + Sync>,
        sinks: Vec<Box<dyn RiskSink>>,
    ) -> Self {
        Self {
            aggregator,
            store,
            sinks,
            stats: StageStats::default(),
        }
    }

    pub fn handle(&mut self, msg: &InboundMessage) -> StageOutcome {
        self.stats.received += 1;

        let mut signal = match decode_signal(&msg.payload) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(routing_key = ?msg.routing_key, "Dropping undecodable signal: {e}");
                self.stats.dropped += 1;
                return StageOutcome::Dropped;
            }
        };
        signal.timestamp.get_or_insert_with(Utc::now);

        let event = self.aggregator.process(signal);

        // Each external call stands alone: a failed insert doesn't stop the publish.
        let persisted = match self.store.insert_risk_event(&event) {
            Ok(_) => true,
            Err(e) => {
                warn!(event_id = %event.id, "Failed to store risk event: {e}");
                self.stats.store_failures += 1;
                false
            }
        };

        let routing_key = event.key().routing_key();
        let mut published = 0;
        for sink in &self.sinks {
            match sink.publish(&routing_key, &event) {
                Ok(()) => published += 1,
                Err(e) => {
                    warn!(sink = sink.name(), event_id = %event.id, "Failed to publish risk event: {e}");
                    self.stats.publish_failures += 1;
                }
            }
        }

        self.stats.emitted += 1;
        debug!(
            event_id = %event.id,
            key = %event.key(),
            score = event.risk_score,
            contributors = event.contributors.len(),
            "Risk event emitted"
        );

        StageOutcome::Emitted {
            event_id: event.id,
            risk_score: event.risk_score,
            persisted,
            published,
        }
    }

    /// Consume until the channel closes or shutdown is signalled.
    pub async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) -> StageStats {
        info!(
            window_minutes = self.aggregator.window().num_minutes(),
            "Risk stage started, waiting for signals..."
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            let msg = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => {
                        info!("Signal channel closed");
                        break;
                    }
                },
            };

            self.handle(&msg);

            if self.stats.received % 1000 == 0 {
                info!(
                    "Risk stage processed {} signals ({} dropped, {} tracked keys)",
                    self.stats.received,
                    self.stats.dropped,
                    self.aggregator.tracked_keys()
                );
            }
        }

        info!(stats = ?self.stats, "Risk stage shutting down");
        self.stats
    }
}

/// Risk consumer: deduplicate and persist alerts.
pub struct AlertStage {
    dedup: Deduplicator,
    store: Arc<dyn AlertStore + Send + Sync>,
    notifier: Option<DesktopNotifier>,
    stats: StageStats,
}

impl AlertStage {
    pub fn new(dedup: Deduplicator, store: Arc<dyn AlertStore + Send + Sync>, notifier: Option<DesktopNotifier>) -> Self {
        Self {
            dedup,
            store,
            notifier,
            stats: StageStats::default(),
        }
    }

    pub fn handle(&mut self, event: &RiskEvent, now: DateTime<Utc>) -> StageOutcome {
        self.stats.received += 1;

        let decision = self
            .dedup
            .should_alert(event, &*self.store, now)
            .and_then(|decision| match decision {
                AlertDecision::Raise(alert) => self.dedup.commit(alert, &*self.store),
                suppressed => Ok(suppressed),
            });

        match decision {
            Ok(AlertDecision::Raise(alert)) => {
                info!(
                    alert_id = %alert.id,
                    key = %alert.key(),
                    score = alert.risk_score,
                    severity = %alert.severity,
                    "Alert created"
                );
                if let Some(notifier) = &self.notifier {
                    notifier.alert_raised(&alert);
                }
                self.stats.raised += 1;
                StageOutcome::Raised { alert_id: alert.id }
            }
            Ok(AlertDecision::Suppressed(reason)) => {
                debug!(event_id = %event.id, ?reason, "Alert suppressed");
                self.stats.suppressed += 1;
                StageOutcome::Suppressed(reason)
            }
            Err(e) => {
                warn!(event_id = %event.id, key = %event.key(), "Alert deduplication failed: {e}");
                self.stats.store_failures += 1;
                StageOutcome::Failed
            }
        }
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RiskEvent>, mut shutdown: watch::Receiver<bool>) -> StageStats {
        info!(threshold = self.dedup.threshold(), "Alert stage started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let event = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => {
                        info!("Risk event channel closed");
                        break;
                    }
                },
            };
            self.handle(&event, Utc::now());
        }

        info!(stats = ?self.stats, "Alert stage shutting down");
        self.stats
    }
}
