use crate::core::{Contributor, Signal, SignalSource};

/// Contributors kept on a risk event.
pub const MAX_CONTRIBUTORS: usize = 5;

pub fn source_weight(source: &SignalSource) -> f64 {
    match source {
        SignalSource::PortCongestion => 1.30,
        SignalSource::ShippingLane => 1.25,
        SignalSource::Weather => 1.20,
        SignalSource::PriceSpike => 1.10,
        SignalSource::News => 1.00,
        SignalSource::Other(_) => 1.00,
    }
}

/// Contribution (0-100) of a single signal.
pub fn score_signal(signal: &Signal) -> f64 {
    let severity = (signal.severity as f64).clamp(0.0, 10.0) * 5.0;
    let confidence = signal.confidence.clamp(0.0, 1.0) * 20.0;
    let value = (signal.metric_value.clamp(0.0, 100.0) / 100.0) * 40.0;

    ((severity + confidence + value) * source_weight(&signal.source)).clamp(0.0, 100.0)
}

/// Mean score of the window members plus the top contributors, highest first.
pub fn aggregate<'a>(signals: impl IntoIterator<Item = &'a Signal>) -> (f64, Vec<Contributor>) {
    let mut scored: Vec<Contributor> = signals
        .into_iter()
        .map(|s| Contributor {
            source: s.source.clone(),
            metric_name: s.metric_name.clone(),
            metric_value: s.metric_value,
            score: score_signal(s),
        })
        .collect();

    if scored.is_empty() {
        return (0.0, scored);
    }

    let total: f64 = scored.iter().map(|c| c.score).sum();
    let mean = (total / scored.len() as f64).clamp(0.0, 100.0);

    // stable: equal scores keep arrival order
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(MAX_CONTRIBUTORS);

    (round2(mean), scored)
}

/// Round half away from zero to two decimals.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_signal(source: SignalSource, severity: i32, confidence: f64, value: f64) -> Signal {
        Signal {
            source,
            severity,
            confidence,
            metric_name: "anomaly_index".into(),
            metric_value: value,
            ..Signal::default()
        }
    }

    #[test]
    fn port_congestion_is_clamped_to_100() {
        // (40 + 18 + 32) * 1.30 = 117
        let s = make_signal(SignalSource::PortCongestion, 8, 0.9, 80.0);
        assert_eq!(score_signal(&s), 100.0);
    }

    #[test]
    fn news_signal_unweighted() {
        let s = make_signal(SignalSource::News, 4, 0.5, 50.0);
        // 20 + 10 + 20
        assert!((score_signal(&s) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn weather_weight_applied() {
        let s = make_signal(SignalSource::Weather, 2, 0.5, 25.0);
        // (10 + 10 + 10) * 1.2
        assert!((score_signal(&s) - 36.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_source_uses_unit_weight() {
        let s = make_signal(SignalSource::Other("rail".into()), 4, 0.5, 50.0);
        assert!((score_signal(&s) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_inputs_clamped() {
        let s = make_signal(SignalSource::News, -5, -1.0, -30.0);
        assert_eq!(score_signal(&s), 0.0);
        let s = make_signal(SignalSource::News, 50, 4.0, 1e6);
        assert_eq!(score_signal(&s), 100.0);
    }

    #[test]
    fn monotonic_in_each_input() {
        let base = make_signal(SignalSource::PriceSpike, 3, 0.3, 20.0);
        let mut prev = score_signal(&base);
        for sev in 4..=12 {
            let s = Signal { severity: sev, ..base.clone() };
            let next = score_signal(&s);
            assert!(next >= prev, "severity {sev}: {next} < {prev}");
            prev = next;
        }

        let mut prev = score_signal(&base);
        for step in 1..=15 {
            let s = Signal { confidence: 0.3 + step as f64 * 0.1, ..base.clone() };
            let next = score_signal(&s);
            assert!(next >= prev);
            prev = next;
        }

        let mut prev = score_signal(&base);
        for step in 1..=20 {
            let s = Signal { metric_value: 20.0 + step as f64 * 10.0, ..base.clone() };
            let next = score_signal(&s);
            assert!(next >= prev);
            prev = next;
        }
    }

    #[test]
    fn aggregate_empty() {
        let (score, contributors) = aggregate(std::iter::empty());
        assert_eq!(score, 0.0);
        assert!(contributors.is_empty());
    }

    #[test]
    fn aggregate_is_rounded_mean() {
        let signals = vec![
            make_signal(SignalSource::News, 4, 0.5, 50.0),   // 50
            make_signal(SignalSource::News, 1, 0.1, 10.0),   // 5 + 2 + 4 = 11
            make_signal(SignalSource::News, 2, 0.333, 0.0),  // 10 + 6.66 = 16.66
        ];
        let (score, _) = aggregate(&signals);
        // 77.66 / 3 = 25.8866..
        assert_eq!(score, 25.89);
    }

    #[test]
    fn contributors_sorted_and_truncated() {
        let signals: Vec<Signal> = (0..8)
            .map(|i| make_signal(SignalSource::News, i, 0.5, 10.0))
            .collect();
        let (_, contributors) = aggregate(&signals);
        assert_eq!(contributors.len(), MAX_CONTRIBUTORS);
        for pair in contributors.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        // severity 7 → 35 + 10 + 4
        assert!((contributors[0].score - 49.0).abs() < 1e-9);
    }

    #[test]
    fn equal_scores_keep_arrival_order() {
        let mut a = make_signal(SignalSource::News, 5, 0.5, 50.0);
        a.metric_name = "first".into();
        let mut b = a.clone();
        b.metric_name = "second".into();
        let (_, contributors) = aggregate(&[a, b]);
        assert_eq!(contributors[0].metric_name, "first");
        assert_eq!(contributors[1].metric_name, "second");
    }

    #[test]
    fn round2_half_away_from_zero() {
        assert_eq!(round2(72.125), 72.13);
        assert_eq!(round2(0.004), 0.0);
        assert_eq!(round2(100.0), 100.0);
    }
}
