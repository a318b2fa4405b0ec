pub mod pipeline;
pub mod window;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A raw message pulled off the signal transport, not yet decoded.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub routing_key: Option<String>,
    pub payload: Vec<u8>,
}

/// Where a signal came from. Unknown names are kept verbatim so they
/// survive a decode/encode round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SignalSource {
    ShippingLane,
    PortCongestion,
    Weather,
    PriceSpike,
    #[default]
    News,
    Other(String),
}

impl SignalSource {
    pub const ALL: [SignalSource; 5] = [
        SignalSource::ShippingLane,
        SignalSource::PortCongestion,
        SignalSource::Weather,
        SignalSource::PriceSpike,
        SignalSource::News,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            SignalSource::ShippingLane => "shipping_lane",
            SignalSource::PortCongestion => "port_congestion",
            SignalSource::Weather => "weather",
            SignalSource::PriceSpike => "price_spike",
            SignalSource::News => "news",
            SignalSource::Other(name) => name,
        }
    }
}

impl From<String> for SignalSource {
    fn from(value: String) -> Self {
        match value.as_str() {
            "shipping_lane" => SignalSource::ShippingLane,
            "port_congestion" => SignalSource::PortCongestion,
            "weather" => SignalSource::Weather,
            "price_spike" => SignalSource::PriceSpike,
            "news" | "" => SignalSource::News,
            _ => SignalSource::Other(value),
        }
    }
}

impl From<SignalSource> for String {
    fn from(value: SignalSource) -> Self {
        match value {
            SignalSource::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A time-stamped disruption signal. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Signal {
    pub id: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    pub source: SignalSource,
    pub country: String,
    pub region: String,
    pub commodity: String,
    pub metric_name: String,
    pub metric_value: f64,
    pub severity: i32,
    pub confidence: f64,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// `0001-01-01T00:00:00Z`, the zero time some producers send for "unset".
const UNSET_TIMESTAMP_SECS: i64 = -62_135_596_800;

fn deserialize_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    let at = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(at.filter(|t| t.timestamp() != UNSET_TIMESTAMP_SECS || t.timestamp_subsec_nanos() != 0))
}

impl Signal {
    pub fn key(&self) -> AggregationKey {
        AggregationKey {
            country: self.country.clone(),
            region: self.region.clone(),
            commodity: self.commodity.clone(),
        }
    }

    /// Fill defaults and canonicalize fields the way upstream producers do
    /// before a signal is published.
    pub fn normalize(&mut self, now: DateTime<Utc>) {
        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
        if self.timestamp.is_none() {
            self.timestamp = Some(now);
        }
        self.country = self.country.trim().to_uppercase();
        self.region = self.region.trim().to_string();
        if self.region.is_empty() {
            self.region = "global".into();
        }
        self.commodity = self.commodity.trim().to_lowercase();
        self.severity = self.severity.clamp(1, 10);
        if self.confidence <= 0.0 {
            self.confidence = 0.6;
        }
        if self.confidence > 1.0 {
            self.confidence = 1.0;
        }
        if self.metric_name.is_empty() {
            self.metric_name = "composite_signal".into();
        }
    }
}

/// Identifies one independent scoring window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregationKey {
    pub country: String,
    pub region: String,
    pub commodity: String,
}

impl AggregationKey {
    pub fn new(country: &str, region: &str, commodity: &str) -> Self {
        Self {
            country: country.to_string(),
            region: region.to_string(),
            commodity: commodity.to_string(),
        }
    }

    /// Partition key used when fanning risk events out downstream.
    pub fn routing_key(&self) -> String {
        format!("{}|{}", self.country, self.commodity)
    }
}

impl fmt::Display for AggregationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.country, self.region, self.commodity)
    }
}

/// One signal's scored contribution, kept for explainability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contributor {
    pub source: SignalSource,
    pub metric_name: String,
    pub metric_value: f64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub country: String,
    pub region: String,
    pub commodity: String,
    pub risk_score: f64, // 0-100, two decimals
    pub window_minutes: i64,
    pub contributors: Vec<Contributor>,
    pub recommended_action: String,
}

impl RiskEvent {
    pub fn key(&self) -> AggregationKey {
        AggregationKey::new(&self.country, &self.region, &self.commodity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,      // <60
    Medium,   // ≥60
    High,     // ≥75
    Critical, // ≥90
}

impl AlertSeverity {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            AlertSeverity::Critical
        } else if score >= 75.0 {
            AlertSeverity::High
        } else if score >= 60.0 {
            AlertSeverity::Medium
        } else {
            AlertSeverity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            AlertSeverity::Critical => "🔴",
            AlertSeverity::High => "🟠",
            AlertSeverity::Medium => "🟡",
            AlertSeverity::Low => "⚪",
        }
    }
}

impl FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(AlertSeverity::Low),
            "medium" => Ok(AlertSeverity::Medium),
            "high" => Ok(AlertSeverity::High),
            "critical" => Ok(AlertSeverity::Critical),
            other => Err(format!("unknown severity {other:?}")),
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "open",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        }
    }

    /// Statuses that still cover their key during the cooldown.
    pub fn is_active(&self) -> bool {
        matches!(self, AlertStatus::Open | AlertStatus::Acknowledged)
    }

    /// Operator workflow: open → acknowledged → resolved, open → resolved.
    /// Re-applying the current status is allowed.
    pub fn can_transition_to(&self, next: AlertStatus) -> bool {
        use AlertStatus::*;
        matches!(
            (self, next),
            (Open, Acknowledged) | (Open, Resolved) | (Acknowledged, Resolved)
        ) || *self == next
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(AlertStatus::Open),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            "resolved" => Ok(AlertStatus::Resolved),
            other => Err(format!("unknown status {other:?}")),
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub risk_event_id: String,
    pub country: String,
    pub region: String,
    pub commodity: String,
    pub title: String,
    pub description: String,
    pub risk_score: f64,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    pub fn key(&self) -> AggregationKey {
        AggregationKey::new(&self.country, &self.region, &self.commodity)
    }
}
