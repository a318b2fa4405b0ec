use chrono::Duration;
use serde::Deserialize;
use std::path::Path;

/// Upper bound for the scoring window and the alert cooldown: one week.
pub const MAX_PERIOD_MINUTES: i64 = 7 * 24 * 60;

/// `value` minutes if it is in `1..=MAX_PERIOD_MINUTES`, else `default`.
fn period_or_default(name: &str, value: i64, default: i64) -> i64 {
    if (1..=MAX_PERIOD_MINUTES).contains(&value) {
        value
    } else {
        tracing::warn!("{name} = {value} is outside 1..={MAX_PERIOD_MINUTES}, using {default}");
        default
    }
}

fn minutes(value: i64) -> Duration {
    Duration::try_minutes(value).unwrap_or(Duration::zero())
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub risk: RiskConfig,
    pub alerts: AlertConfig,
    pub database: DatabaseConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TransportConfig {
    /// Upstream signal publisher; the pipeline connects a SUB socket here.
    pub signals_endpoint: String,
    pub signals_topic: String,
    /// The pipeline binds a PUB socket here for risk event fan-out.
    pub risk_endpoint: String,
    pub risk_topic: String,
    pub poll_timeout_ms: u64,
    pub read_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RiskConfig {
    pub window_minutes: i64,
    pub max_entries_per_key: usize,
    pub reclaim_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AlertConfig {
    pub threshold: f64,
    pub cooldown_minutes: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub min_score: f64,
    pub cooldown_seconds: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            signals_endpoint: "tcp://127.0.0.1:5561".into(),
            signals_topic: "signals.raw".into(),
            risk_endpoint: "tcp://127.0.0.1:5562".into(),
            risk_topic: "risk.scored".into(),
            poll_timeout_ms: 250,
            read_backoff_ms: 500,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            window_minutes: 30,
            max_entries_per_key: 150,
            reclaim_interval_seconds: 60,
        }
    }
}

impl RiskConfig {
    /// Validated scoring window.
    pub fn window(&self) -> Duration {
        let minutes_ok = period_or_default("risk.window_minutes", self.window_minutes, Self::default().window_minutes);
        minutes(minutes_ok)
    }
}

impl AlertConfig {
    /// Validated dedup cooldown.
    pub fn cooldown(&self) -> Duration {
        let minutes_ok = period_or_default(
            "alerts.cooldown_minutes",
            self.cooldown_minutes,
            Self::default().cooldown_minutes,
        );
        minutes(minutes_ok)
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            threshold: 72.0,
            cooldown_minutes: 30,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/supplyshock.db".into(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_score: 85.0,
            cooldown_seconds: 30,
        }
    }
}

impl Config {
    /// Load config from a TOML file. Falls back to defaults if file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Config loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Load from file, then let the process environment override it.
    pub fn load_with_env(path: impl AsRef<Path>) -> Self {
        let mut config = Self::load(path);
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.sanitize();
        config
    }

    /// Replace out-of-range periods with their defaults, logging each one.
    pub fn sanitize(&mut self) {
        self.risk.window_minutes = period_or_default(
            "risk.window_minutes",
            self.risk.window_minutes,
            RiskConfig::default().window_minutes,
        );
        self.alerts.cooldown_minutes = period_or_default(
            "alerts.cooldown_minutes",
            self.alerts.cooldown_minutes,
            AlertConfig::default().cooldown_minutes,
        );
    }

    /// Apply deployment overrides. Blank or unparsable values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("ALERT_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.alerts.threshold = v;
        }
        if let Some(v) = get("ALERT_COOLDOWN_MINUTES").and_then(|v| v.parse().ok()) {
            self.alerts.cooldown_minutes = v;
        }
        if let Some(v) = get("RISK_WINDOW_MINUTES").and_then(|v| v.parse().ok()) {
            self.risk.window_minutes = v;
        }
        if let Some(v) = get("DATABASE_PATH") {
            self.database.path = v;
        }
        if let Some(v) = get("SIGNALS_ENDPOINT") {
            self.transport.signals_endpoint = v;
        }
        if let Some(v) = get("RISK_ENDPOINT") {
            self.transport.risk_endpoint = v;
        }
    }
}
