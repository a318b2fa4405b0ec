//! Narrative urgency attached to every risk event.
//!
//! These bands (85/70/50) are independent of the alert severity bands
//! (90/75/60) in [`crate::core::AlertSeverity`]. The text is frozen into the
//! event when it is created.

pub const IMMEDIATE_INTERVENTION: &str =
    "Immediate intervention: pre-position inventory and activate cross-border backup routes.";
pub const HIGH_RISK: &str =
    "High risk: increase safety stock and notify regional distributors within 2 hours.";
pub const MODERATE_RISK: &str = "Moderate risk: monitor hourly and prepare route alternatives.";
pub const LOW_RISK: &str = "Low risk: continue monitoring with standard cadence.";

pub fn recommended_action(score: f64) -> &'static str {
    if score >= 85.0 {
        IMMEDIATE_INTERVENTION
    } else if score >= 70.0 {
        HIGH_RISK
    } else if score >= 50.0 {
        MODERATE_RISK
    } else {
        LOW_RISK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands() {
        assert_eq!(recommended_action(92.0), IMMEDIATE_INTERVENTION);
        assert_eq!(recommended_action(85.0), IMMEDIATE_INTERVENTION);
        assert_eq!(recommended_action(84.99), HIGH_RISK);
        assert_eq!(recommended_action(70.0), HIGH_RISK);
        assert_eq!(recommended_action(50.0), MODERATE_RISK);
        assert_eq!(recommended_action(49.99), LOW_RISK);
        assert_eq!(recommended_action(0.0), LOW_RISK);
    }

    #[test]
    fn differs_from_severity_banding() {
        use crate::core::AlertSeverity;
        // 86 is "immediate" narratively but only "high" for operators
        assert_eq!(recommended_action(86.0), IMMEDIATE_INTERVENTION);
        assert_eq!(AlertSeverity::from_score(86.0), AlertSeverity::High);
    }
}
