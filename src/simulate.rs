//! Synthetic signal publisher for local runs.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::info;

use crate::config::TransportConfig;
use crate::core::{Signal, SignalSource};
use crate::error::TransportError;
use crate::transport::ZmqPublisher;

const COUNTRIES: &[&str] = &["US", "DE", "IN", "BR", "ZA", "ID", "JP", "NG"];
const REGIONS: &[&str] = &["north", "south", "west", "east", "metro", "coastal"];
const COMMODITIES: &[&str] = &["insulin", "diesel", "wheat", "rice", "antibiotics"];

/// Build one normalized signal with random dimensions and metrics.
pub fn random_signal<R: Rng>(rng: &mut R) -> Signal {
    let pick = |rng: &mut R, pool: &[&str]| pool.choose(rng).copied().unwrap_or_default().to_string();

    let mut signal = Signal {
        source: SignalSource::ALL.choose(rng).cloned().unwrap_or_default(),
        country: pick(rng, COUNTRIES),
        region: pick(rng, REGIONS),
        commodity: pick(rng, COMMODITIES),
        metric_name: "anomaly_index".into(),
        metric_value: rng.gen_range(15.0..100.0),
        severity: rng.gen_range(2..=10),
        confidence: rng.gen_range(0.4..=1.0),
        ..Default::default()
    };
    signal.normalize(Utc::now());
    signal
}

/// Publish `count` random signals on the configured signal endpoint.
/// Returns how many were sent.
pub fn run_simulator(config: &TransportConfig, count: usize, interval: Duration) -> Result<usize, TransportError> {
    let ctx = zmq::Context::new();
    let publisher = ZmqPublisher::bind(&ctx, &config.signals_endpoint, &config.signals_topic)?;

    // Slow joiner: give subscribers time to connect before the first send
    std::thread::sleep(Duration::from_millis(500));

    let mut rng = rand::thread_rng();
    for n in 0..count {
        let signal = random_signal(&mut rng);
        publisher.send_json(&signal.key().to_string(), &signal)?;
        info!(
            n = n + 1,
            key = %signal.key(),
            source = %signal.source,
            value = signal.metric_value,
            "Published signal"
        );
        if n + 1 < count {
            std::thread::sleep(interval);
        }
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_signals_are_normalized_and_in_range() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let s = random_signal(&mut rng);
            assert!(!s.id.is_empty());
            assert!(s.timestamp.is_some());
            assert!(COUNTRIES.contains(&s.country.as_str()));
            assert!(REGIONS.contains(&s.region.as_str()));
            assert!(COMMODITIES.contains(&s.commodity.as_str()));
            assert!(SignalSource::ALL.contains(&s.source));
            assert_eq!(s.metric_name, "anomaly_index");
            assert!((15.0..100.0).contains(&s.metric_value));
            assert!((2..=10).contains(&s.severity));
            assert!((0.4..=1.0).contains(&s.confidence));
        }
    }

    #[test]
    fn random_signal_round_trips_through_decoder() {
        let mut rng = rand::thread_rng();
        let s = random_signal(&mut rng);
        let bytes = serde_json::to_vec(&s).unwrap();
        let decoded = crate::core::pipeline::decode_signal(&bytes).unwrap();
        assert_eq!(decoded.id, s.id);
        assert_eq!(decoded.key(), s.key());
        assert_eq!(decoded.source, s.source);
        assert_eq!(decoded.severity, s.severity);
    }

    #[test]
    fn zero_count_sends_nothing() {
        let config = TransportConfig {
            signals_endpoint: "inproc://simulator-zero".into(),
            ..Default::default()
        };
        assert_eq!(run_simulator(&config, 0, Duration::ZERO).unwrap(), 0);
    }
}
