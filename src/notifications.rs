use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::NotificationConfig;
use crate::core::Alert;

/// Desktop popups for newly raised alerts. One popup per cooldown period
/// across all keys, and only for alerts at or above `min_score`.
pub struct DesktopNotifier {
    min_score: f64,
    quiet_period: Duration,
    last_popup: Mutex<Option<Instant>>,
}

impl DesktopNotifier {
    /// `None` when notifications are switched off in config.
    pub fn from_config(config: &NotificationConfig) -> Option<Self> {
        config.enabled.then(|| Self {
            min_score: config.min_score,
            quiet_period: Duration::from_secs(config.cooldown_seconds),
            last_popup: Mutex::new(None),
        })
    }

    /// Show a popup for `alert` unless it is below the score floor or the
    /// quiet period is still running. Returns whether a popup was shown.
    pub fn alert_raised(&self, alert: &Alert) -> bool {
        if alert.risk_score < self.min_score || !self.claim_slot(Instant::now()) {
            return false;
        }
        show_popup(popup_text(alert));
        true
    }

    /// Take the popup slot at `now` if the quiet period has passed.
    fn claim_slot(&self, now: Instant) -> bool {
        let mut last = self.last_popup.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(prev) if now.saturating_duration_since(prev) < self.quiet_period => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

fn popup_text(alert: &Alert) -> (String, String) {
    let summary = format!("{} Supply risk: {}", alert.severity.emoji(), alert.severity);
    let body = format!(
        "{}/{} {} | score {:.2}",
        alert.country, alert.region, alert.commodity, alert.risk_score
    );
    (summary, body)
}

fn show_popup((summary, body): (String, String)) {
    // The desktop bus can stall; keep it off the alert stage
    std::thread::spawn(move || {
        let shown = notify_rust::Notification::new().summary(&summary).body(&body).show();
        if let Err(e) = shown {
            tracing::debug!("Desktop notification failed: {e}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AlertSeverity, AlertStatus};
    use chrono::Utc;

    fn alert(score: f64) -> Alert {
        let now = Utc::now();
        Alert {
            id: "a1".into(),
            risk_event_id: "e1".into(),
            country: "US".into(),
            region: "east".into(),
            commodity: "diesel".into(),
            title: "High disruption risk for diesel".into(),
            description: String::new(),
            risk_score: score,
            severity: AlertSeverity::from_score(score),
            status: AlertStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    fn notifier(quiet_seconds: u64) -> DesktopNotifier {
        DesktopNotifier::from_config(&NotificationConfig {
            enabled: true,
            min_score: 85.0,
            cooldown_seconds: quiet_seconds,
        })
        .unwrap()
    }

    #[test]
    fn disabled_config_builds_nothing() {
        let config = NotificationConfig { enabled: false, ..Default::default() };
        assert!(DesktopNotifier::from_config(&config).is_none());
    }

    #[test]
    fn quiet_period_blocks_then_reopens() {
        let n = notifier(30);
        let t0 = Instant::now();
        assert!(n.claim_slot(t0));
        assert!(!n.claim_slot(t0 + Duration::from_secs(29)));
        assert!(n.claim_slot(t0 + Duration::from_secs(30)));
    }

    #[test]
    fn zero_quiet_period_never_blocks() {
        let n = notifier(0);
        let t0 = Instant::now();
        assert!(n.claim_slot(t0));
        assert!(n.claim_slot(t0));
    }

    #[test]
    fn low_score_does_not_take_the_slot() {
        let n = notifier(30);
        assert!(!n.alert_raised(&alert(80.0)));
        assert!(n.claim_slot(Instant::now()));
    }

    #[test]
    fn popup_text_names_key_and_severity() {
        let (summary, body) = popup_text(&alert(92.0));
        assert_eq!(summary, "🔴 Supply risk: critical");
        assert_eq!(body, "US/east diesel | score 92.00");
    }
}
