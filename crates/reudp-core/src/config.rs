//! # Shared Tunables
//!
//! [`EndpointConfig`] carries the knobs that [`crate::sender`] and
//! [`crate::receiver`] both pace against. Defaults mirror the module-level
//! constants in the crate root; overrides typically arrive from a TOML
//! config file loaded by the `reudp` endpoint binding.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{
    DEFAULT_BANDWIDTH_BPS, DEFAULT_RTT_MS, MAX_FINISH_RETRIES, MAX_RECEIVE_RETRIES,
    MAX_SEND_RETRIES, PARALLEL_COUNT,
};

/// Tunables for a single endpoint. Shared by every session the endpoint
/// drives, sender and receiver alike.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Number of in-flight fragments paced per burst.
    pub parallel_count: usize,
    /// Pacing bandwidth estimate, bytes/sec. Not measured — a static
    /// assumption (see spec.md §1 Non-goals: no congestion control).
    pub bandwidth_bps: u64,
    /// Round-trip-time estimate used to pace REQ retries and stall
    /// backoff. Not measured — a static assumption, same as `bandwidth_bps`.
    pub rtt_ms: u64,
    /// Receiver hole-scan retry budget before a transfer is abandoned.
    pub max_receive_retries: u32,
    /// Sender stall-retry budget before `SendTimeout`.
    pub max_send_retries: u32,
    /// Finish-notify (FIN) retransmit budget after delivery.
    pub max_finish_retries: u32,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            parallel_count: PARALLEL_COUNT,
            bandwidth_bps: DEFAULT_BANDWIDTH_BPS,
            rtt_ms: DEFAULT_RTT_MS,
            max_receive_retries: MAX_RECEIVE_RETRIES,
            max_send_retries: MAX_SEND_RETRIES,
            max_finish_retries: MAX_FINISH_RETRIES,
        }
    }
}

impl EndpointConfig {
    /// Load a config from a TOML file, falling back to defaults for any
    /// field the file omits.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let cfg = toml::from_str(&text)?;
        Ok(cfg)
    }

    /// Pacing interval between bursts, in milliseconds:
    /// `1000 * parallel_size / (bandwidth_bps - parallel_size)`, where
    /// `parallel_size = parallel_count * fragment_bytes`.
    ///
    /// Clamped to 1000ms when the computed value is non-finite or
    /// non-positive — notably when `parallel_size >= bandwidth_bps`, which
    /// drives the denominator to zero or negative (spec.md §9 open
    /// question: this is a documented fallthrough, not a bug).
    pub fn pacing_interval_ms(&self, fragment_bytes: usize) -> u64 {
        let parallel_size = (self.parallel_count * fragment_bytes) as f64;
        let bps = self.bandwidth_bps as f64;
        let interval = 1000.0 * parallel_size / (bps - parallel_size);
        if !interval.is_finite() || interval <= 0.0 {
            1000
        } else {
            interval as u64
        }
    }
}

/// Errors raised while loading an [`EndpointConfig`] from disk.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_crate_constants() {
        let cfg = EndpointConfig::default();
        assert_eq!(cfg.parallel_count, PARALLEL_COUNT);
        assert_eq!(cfg.bandwidth_bps, DEFAULT_BANDWIDTH_BPS);
        assert_eq!(cfg.rtt_ms, DEFAULT_RTT_MS);
    }

    #[test]
    fn pacing_interval_clamps_on_zero_bandwidth() {
        let cfg = EndpointConfig {
            bandwidth_bps: 0,
            ..EndpointConfig::default()
        };
        assert_eq!(cfg.pacing_interval_ms(1076), 1000);
    }

    #[test]
    fn pacing_interval_scales_with_bandwidth() {
        let cfg = EndpointConfig {
            parallel_count: 10,
            bandwidth_bps: 10_000,
            ..EndpointConfig::default()
        };
        // 10 fragments * 1000 bytes / 10_000 bytes/sec = 1 sec = 1000ms
        assert_eq!(cfg.pacing_interval_ms(1000), 1000);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let dir = std::env::temp_dir();
        let path = dir.join("reudp_test_partial_config.toml");
        std::fs::write(&path, "parallel_count = 16\n").unwrap();
        let cfg = EndpointConfig::from_toml_file(&path).unwrap();
        assert_eq!(cfg.parallel_count, 16);
        assert_eq!(cfg.bandwidth_bps, DEFAULT_BANDWIDTH_BPS);
        std::fs::remove_file(&path).ok();
    }
}
