//! Runtime configuration loaded from environment variables

use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_PORT: u16 = 6574;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_TICK_MS: u64 = 250;
const DEFAULT_BUS_CAPACITY: usize = 128;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    /// Period of the full re-fetch that backs every subscription-driven view
    pub poll_interval: Duration,
    /// Countdown tick granularity, also the period of the server-side timer watcher
    pub tick_interval: Duration,
    /// Buffered messages per broadcast channel before slow subscribers lag
    pub bus_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            tick_interval: Duration::from_millis(DEFAULT_TICK_MS),
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}

impl AppConfig {
    /// Load config from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind = match std::env::var("OLYMPIA_BIND") {
            Ok(raw) => match raw.trim().parse() {
                Ok(addr) => addr,
                Err(e) => {
                    tracing::warn!("Ignoring invalid OLYMPIA_BIND {:?}: {}", raw, e);
                    defaults.bind
                }
            },
            Err(_) => defaults.bind,
        };

        let poll_ms = env_u64("OLYMPIA_POLL_INTERVAL_MS")
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
            .clamp(500, 2000);

        let tick_ms = env_u64("OLYMPIA_TICK_MS")
            .unwrap_or(DEFAULT_TICK_MS)
            .clamp(100, 250);

        let bus_capacity = env_u64("OLYMPIA_BUS_CAPACITY")
            .map(|v| v as usize)
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_BUS_CAPACITY);

        Self {
            bind,
            poll_interval: Duration::from_millis(poll_ms),
            tick_interval: Duration::from_millis(tick_ms),
            bus_capacity,
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring non-numeric {}={:?}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "OLYMPIA_BIND",
            "OLYMPIA_POLL_INTERVAL_MS",
            "OLYMPIA_TICK_MS",
            "OLYMPIA_BUS_CAPACITY",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = AppConfig::from_env();
        assert_eq!(config.bind.port(), 6574);
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.bus_capacity, 128);
    }

    #[test]
    #[serial]
    fn test_intervals_are_clamped() {
        clear_env();
        std::env::set_var("OLYMPIA_POLL_INTERVAL_MS", "50");
        std::env::set_var("OLYMPIA_TICK_MS", "5000");
        let config = AppConfig::from_env();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back() {
        clear_env();
        std::env::set_var("OLYMPIA_BIND", "not an address");
        std::env::set_var("OLYMPIA_BUS_CAPACITY", "lots");
        let config = AppConfig::from_env();
        assert_eq!(config.bind, AppConfig::default().bind);
        assert_eq!(config.bus_capacity, 128);
        clear_env();
    }
}
