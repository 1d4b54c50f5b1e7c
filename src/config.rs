//! Environment and file-based configuration (§6).
//!
//! Follows the teacher's `models::Config::from_env` pattern: read each
//! variable with a hardcoded default, parse permissively via
//! `parse().unwrap_or(default)`, never fail the whole load over one bad
//! variable.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Simulation-wide knobs sourced from the process environment.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// `EXCHANGE_INITIAL_TIME`, `HH:mm`, default `09:15`.
    pub exchange_initial_time: (u32, u32),
    /// `EXCHANGE_TIME_ACCELERATION`, default `1.0`.
    pub exchange_time_acceleration: f64,
    /// `WORKER_POOL_SIZE`, default `4`.
    pub worker_pool_size: usize,
    /// `WORKER_MAX_CONCURRENT`, default `2`.
    pub worker_max_concurrent: usize,
    /// `WORKER_TIMEOUT_MS`, default `30_000`.
    pub worker_timeout_ms: u64,
    /// `WORKER_RETRY_ATTEMPTS`, default `3`.
    pub worker_retry_attempts: u32,
    /// Kernel tick rate in Hz, operator-settable 1-120, default `30`.
    pub kernel_fps: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            exchange_initial_time: (9, 15),
            exchange_time_acceleration: 1.0,
            worker_pool_size: 4,
            worker_max_concurrent: 2,
            worker_timeout_ms: 30_000,
            worker_retry_attempts: 3,
            kernel_fps: 30,
        }
    }
}

impl SimConfig {
    /// Load configuration from the process environment, falling back to
    /// documented defaults for anything missing or unparsable.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let exchange_initial_time = std::env::var("EXCHANGE_INITIAL_TIME")
            .ok()
            .and_then(|s| parse_hhmm(&s))
            .unwrap_or((9, 15));

        let exchange_time_acceleration = std::env::var("EXCHANGE_TIME_ACCELERATION")
            .unwrap_or_else(|_| "1.0".to_string())
            .parse()
            .unwrap_or(1.0);

        let worker_pool_size = std::env::var("WORKER_POOL_SIZE")
            .unwrap_or_else(|_| "4".to_string())
            .parse()
            .unwrap_or(4);

        let worker_max_concurrent = std::env::var("WORKER_MAX_CONCURRENT")
            .unwrap_or_else(|_| "2".to_string())
            .parse()
            .unwrap_or(2);

        let worker_timeout_ms = std::env::var("WORKER_TIMEOUT_MS")
            .unwrap_or_else(|_| "30000".to_string())
            .parse()
            .unwrap_or(30_000);

        let worker_retry_attempts = std::env::var("WORKER_RETRY_ATTEMPTS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .unwrap_or(3);

        let kernel_fps = std::env::var("KERNEL_FPS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30)
            .clamp(1, 120);

        Self {
            exchange_initial_time,
            exchange_time_acceleration,
            worker_pool_size,
            worker_max_concurrent,
            worker_timeout_ms,
            worker_retry_attempts,
            kernel_fps,
        }
    }
}

fn parse_hhmm(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h < 24 && m < 60 {
        Some((h, m))
    } else {
        None
    }
}

/// One half-open intraday window, `[start, end)` in the exchange's local
/// time. Mirrors the wire shape documented in §6.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSpec {
    pub name: String,
    pub start: String,
    pub end: String,
}

/// The `TradingIntervals` JSON config file shape (§6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingIntervalsFile {
    #[serde(default)]
    pub trading_intervals: Vec<IntervalSpec>,
    #[serde(default)]
    pub non_trading_intervals: Vec<IntervalSpec>,
}

impl TradingIntervalsFile {
    /// Documented defaults: 09:30-11:30 and 13:00-15:00 trading, no
    /// non-trading carve-outs.
    pub fn defaults() -> Self {
        Self {
            trading_intervals: vec![
                IntervalSpec {
                    name: "morning".to_string(),
                    start: "09:30".to_string(),
                    end: "11:30".to_string(),
                },
                IntervalSpec {
                    name: "afternoon".to_string(),
                    start: "13:00".to_string(),
                    end: "15:00".to_string(),
                },
            ],
            non_trading_intervals: Vec::new(),
        }
    }

    /// Load from disk, falling back to `defaults()` (with a warning logged)
    /// on any I/O or parse failure — per §6, "if the file is missing or
    /// malformed, fall back to defaults."
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "malformed trading intervals file, using defaults");
                    Self::defaults()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "trading intervals file unreadable, using defaults");
                Self::defaults()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = SimConfig::default();
        assert_eq!(cfg.exchange_initial_time, (9, 15));
        assert_eq!(cfg.worker_pool_size, 4);
        assert_eq!(cfg.worker_max_concurrent, 2);
        assert_eq!(cfg.worker_timeout_ms, 30_000);
        assert_eq!(cfg.worker_retry_attempts, 3);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intervals.json");
        std::fs::write(&path, "{ not json").unwrap();
        let loaded = TradingIntervalsFile::load_or_default(&path);
        assert_eq!(loaded, TradingIntervalsFile::defaults());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let loaded = TradingIntervalsFile::load_or_default("/nonexistent/path/intervals.json");
        assert_eq!(loaded, TradingIntervalsFile::defaults());
    }

    #[test]
    fn roundtrips_well_formed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intervals.json");
        let custom = TradingIntervalsFile {
            trading_intervals: vec![IntervalSpec {
                name: "custom".to_string(),
                start: "10:00".to_string(),
                end: "12:00".to_string(),
            }],
            non_trading_intervals: vec![],
        };
        std::fs::write(&path, serde_json::to_string_pretty(&custom).unwrap()).unwrap();
        let loaded = TradingIntervalsFile::load_or_default(&path);
        assert_eq!(loaded, custom);
    }
}
