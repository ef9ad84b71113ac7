//! Configuration of the reservation engine

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration of the ticket reservation system
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Address of the key-value store
    pub store_addr: String,
    /// Password for the key-value store, empty if none
    pub store_password: String,
    /// Logical database index within the store
    pub store_db: u32,
    /// How long a reservation holds a ticket
    pub reservation_ttl: Duration,
    /// Attempts of the optimistic read-modify-write loop before `Conflict`
    pub reserve_attempts: u32,
    /// Buffer size of each connected client's notification channel
    pub notification_buffer: usize,
    /// Simulated latency of the payment gateway
    pub settlement_delay: Duration,
    /// Idle period after which the reaper sweeps for lapsed reservations
    pub reaper_interval: Duration,
    /// Append-only log of settled payments
    pub transaction_log: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_addr: String::from("localhost:6379"),
            store_password: String::new(),
            store_db: 0,
            reservation_ttl: Duration::from_secs(30 * 60),
            reserve_attempts: 3,
            notification_buffer: 64,
            settlement_delay: Duration::from_secs(2),
            reaper_interval: Duration::from_secs(1),
            transaction_log: PathBuf::from("transactions.log"),
        }
    }
}

impl Config {
    /// Load the configuration from the process environment
    ///
    /// Unset or unparsable variables keep their default value.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Config::default();
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(addr) = var("REDIS_ADDR") {
            config.store_addr = addr;
        }
        if let Some(password) = var("REDIS_PASSWORD") {
            config.store_password = password;
        }
        if let Some(db) = var("REDIS_DB").and_then(|v| v.parse().ok()) {
            config.store_db = db;
        }
        if let Some(ttl) = var("RESERVATION_TTL").and_then(|v| parse_duration(&v)) {
            config.reservation_ttl = ttl;
        }
        if let Some(attempts) = var("RESERVE_ATTEMPTS").and_then(|v| v.parse().ok()) {
            if attempts > 0 {
                config.reserve_attempts = attempts;
            }
        }
        if let Some(buffer) = var("NOTIFICATION_BUFFER").and_then(|v| v.parse().ok()) {
            config.notification_buffer = buffer;
        }
        if let Some(delay) = var("SETTLEMENT_DELAY").and_then(|v| parse_duration(&v)) {
            config.settlement_delay = delay;
        }
        if let Some(interval) = var("REAPER_INTERVAL").and_then(|v| parse_duration(&v)) {
            config.reaper_interval = interval;
        }
        if let Some(path) = var("TRANSACTION_LOG") {
            config.transaction_log = PathBuf::from(path);
        }
        config
    }

    /// Set the reservation hold window
    pub fn with_reservation_ttl(mut self, ttl: Duration) -> Self {
        self.reservation_ttl = ttl;
        self
    }

    /// Set the simulated settlement latency
    pub fn with_settlement_delay(mut self, delay: Duration) -> Self {
        self.settlement_delay = delay;
        self
    }

    /// Set the reaper's sweep period
    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    /// Set the transaction log location
    pub fn with_transaction_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.transaction_log = path.into();
        self
    }

    /// Set the per-client notification buffer
    pub fn with_notification_buffer(mut self, buffer: usize) -> Self {
        self.notification_buffer = buffer;
        self
    }
}

/// Parse durations like `30m`, `10s`, `1h30m` or `250ms`
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit())?;
        if digits == 0 {
            return None;
        }
        let value: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60)?),
            "h" => Duration::from_secs(value.checked_mul(60 * 60)?),
            _ => return None,
        };
        total = total.checked_add(unit)?;
        rest = &rest[unit_len..];
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn durations() {
        assert_eq!(parse_duration("30m"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("15"), Some(Duration::from_secs(15)));
        assert_eq!(parse_duration("m"), None);
        assert_eq!(parse_duration("10 parsecs"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn overflowing_durations_are_rejected() {
        assert_eq!(parse_duration("9999999999999999999h"), None);
        assert_eq!(parse_duration("18446744073709551615m"), None);
        assert_eq!(parse_duration("18446744073709551615s1s"), None);

        let config = Config::from_lookup(|key| {
            (key == "RESERVATION_TTL").then(|| String::from("9999999999999999999h"))
        });
        assert_eq!(config.reservation_ttl, Config::default().reservation_ttl);
    }

    #[test]
    fn environment_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("REDIS_ADDR", "store:6380"),
            ("REDIS_DB", "2"),
            ("RESERVATION_TTL", "90s"),
            ("SETTLEMENT_DELAY", "not a duration"),
            ("RESERVE_ATTEMPTS", "0"),
        ]
        .into_iter()
        .collect();
        let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.store_addr, "store:6380");
        assert_eq!(config.store_db, 2);
        assert_eq!(config.reservation_ttl, Duration::from_secs(90));
        assert_eq!(config.settlement_delay, Config::default().settlement_delay);
        assert_eq!(config.reserve_attempts, 3);
    }
}
