//! Engine configuration.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Tunables shared by the sweep runners and evaluators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Reference timezone for hour-of-day conditions.
    pub reference_timezone: Tz,
    /// Maximum records processed concurrently within a sweep.
    pub sweep_concurrency: usize,
    /// Upper bound on failure reasons sampled into a sweep report.
    pub failure_sample_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reference_timezone: chrono_tz::UTC,
            sweep_concurrency: 8,
            failure_sample_limit: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.reference_timezone, chrono_tz::UTC);
        assert!(config.sweep_concurrency >= 1);
        assert_eq!(config.failure_sample_limit, 10);
    }

    #[test]
    fn timezone_round_trips_through_serde() {
        let config = EngineConfig {
            reference_timezone: chrono_tz::Europe::Berlin,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("Europe/Berlin"));
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.reference_timezone, chrono_tz::Europe::Berlin);
    }
}
