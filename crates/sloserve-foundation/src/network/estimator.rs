//! Round-trip time and bandwidth estimation.
//!
//! Both estimates are exponential moving averages,
//! `estimate = alpha * old + (1 - alpha) * sample`, kept together under one
//! lock so readers always see a consistent pair.

use std::time::Duration;

use parking_lot::RwLock;
use sloserve_kernel::config::NetworkConfig;
use tokio::time::Instant;

/// Current view of the network.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkState {
    /// Round-trip time in seconds
    pub rtt: f64,
    /// Bytes per second
    pub bandwidth: f64,
    pub rtt_updated: Option<Instant>,
    pub bandwidth_updated: Option<Instant>,
}

/// Thread-safe RTT/bandwidth estimator.
#[derive(Debug)]
pub struct NetworkEstimator {
    alpha: f64,
    rtt_ttl: Duration,
    state: RwLock<NetworkState>,
}

fn ema(alpha: f64, old: f64, sample: f64) -> f64 {
    alpha * old + (1.0 - alpha) * sample
}

impl NetworkEstimator {
    pub fn new(alpha: f64, rtt_ttl: Duration, initial_bandwidth: f64) -> Self {
        Self {
            alpha,
            rtt_ttl,
            state: RwLock::new(NetworkState {
                rtt: 0.0,
                bandwidth: initial_bandwidth,
                rtt_updated: None,
                bandwidth_updated: None,
            }),
        }
    }

    pub fn from_config(config: &NetworkConfig) -> Self {
        Self::new(
            config.ema_alpha,
            config.rtt_ttl(),
            config.initial_bandwidth_bps,
        )
    }

    pub fn state(&self) -> NetworkState {
        *self.state.read()
    }

    pub fn rtt(&self) -> Duration {
        Duration::try_from_secs_f64(self.state.read().rtt).unwrap_or(Duration::ZERO)
    }

    pub fn bandwidth(&self) -> f64 {
        self.state.read().bandwidth
    }

    /// Fold an RTT sample into the estimate.
    pub fn record_rtt(&self, sample: Duration) {
        let mut state = self.state.write();
        state.rtt = ema(self.alpha, state.rtt, sample.as_secs_f64());
        state.rtt_updated = Some(Instant::now());
    }

    /// Fold a transfer of `bytes` that spent `network_time` seconds on the
    /// wire into the bandwidth estimate.
    ///
    /// The current RTT is subtracted first; when nothing remains the sample
    /// is dropped and `false` is returned.
    pub fn record_transfer(&self, network_time: f64, bytes: usize) -> bool {
        let mut state = self.state.write();
        let transfer = network_time - state.rtt;
        if !(transfer > 0.0) || bytes == 0 {
            return false;
        }
        let sample = bytes as f64 / transfer;
        state.bandwidth = ema(self.alpha, state.bandwidth, sample);
        state.bandwidth_updated = Some(Instant::now());
        true
    }

    /// `rtt + bytes / bandwidth`.
    pub fn transfer_time(&self, bytes: usize) -> Duration {
        let state = self.state.read();
        let secs = if state.bandwidth > 0.0 {
            state.rtt + bytes as f64 / state.bandwidth
        } else {
            f64::INFINITY
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// The RTT estimate was never measured or is older than the TTL.
    pub fn rtt_is_stale(&self) -> bool {
        match self.state.read().rtt_updated {
            Some(at) => at.elapsed() > self.rtt_ttl,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> NetworkEstimator {
        NetworkEstimator::new(0.5, Duration::from_secs(10), 1000.0)
    }

    #[test]
    fn test_rtt_ema() {
        let est = estimator();
        est.record_rtt(Duration::from_millis(100));
        assert!((est.state().rtt - 0.05).abs() < 1e-12);
        est.record_rtt(Duration::from_millis(100));
        assert!((est.state().rtt - 0.075).abs() < 1e-12);
    }

    #[test]
    fn test_bandwidth_ema_subtracts_rtt() {
        let est = estimator();
        est.record_rtt(Duration::from_millis(200)); // rtt = 0.1
        // 0.6s on the wire, 0.5s after rtt, 1000 bytes -> 2000 B/s
        assert!(est.record_transfer(0.6, 1000));
        assert!((est.bandwidth() - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_positive_transfer_leaves_bandwidth() {
        let est = estimator();
        est.record_rtt(Duration::from_millis(200)); // rtt = 0.1
        assert!(!est.record_transfer(0.1, 5000));
        assert!(!est.record_transfer(0.05, 5000));
        assert!(!est.record_transfer(-1.0, 5000));
        assert_eq!(est.bandwidth(), 1000.0);
        assert!(est.state().bandwidth_updated.is_none());
    }

    #[test]
    fn test_transfer_time() {
        let est = estimator();
        est.record_rtt(Duration::from_millis(400)); // rtt = 0.2
        let t = est.transfer_time(500);
        assert!(t.abs_diff(Duration::from_millis(700)) < Duration::from_micros(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rtt_staleness() {
        let est = estimator();
        assert!(est.rtt_is_stale());
        est.record_rtt(Duration::from_millis(10));
        assert!(!est.rtt_is_stale());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(est.rtt_is_stale());
    }
}
