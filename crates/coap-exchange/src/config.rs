// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Exchange engine configuration - single source of truth
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: Compile-time defaults (RFC 7252 / RFC 7641 derived)
//! - **Level 2 (Dynamic)**: `NetworkConfig` with fluent builders and
//!   string-keyed updates (`set("EXCHANGE_LIFETIME", "247000")`)
//! - **Level 3 (Files)**: YAML loader, behind the `config-loader` feature
//!
//! # Example
//!
//! ```rust
//! use coap_exchange::NetworkConfig;
//! use std::time::Duration;
//!
//! let config = NetworkConfig::default()
//!     .with_deduplicator("crop-rotation")
//!     .with_crop_rotation_period(Duration::from_secs(2));
//! assert!(config.validate().is_ok());
//! ```

use crate::{Error, Result};
use std::time::Duration;

// =======================================================================
// Deduplication (RFC 7252 Sec.4.8.2)
// =======================================================================

/// EXCHANGE_LIFETIME default (milliseconds)
///
/// RFC 7252: MAX_TRANSMIT_SPAN + 2 * MAX_LATENCY + PROCESSING_DELAY = 247 s.
/// A message id must not be reused (and is remembered) for this long.
pub const EXCHANGE_LIFETIME_MS: u64 = 247_000;

/// Mark-and-sweep scan interval (milliseconds)
pub const MARK_AND_SWEEP_INTERVAL_MS: u64 = 10_000;

/// Crop-rotation bucket period (milliseconds)
///
/// Entries live between one and two periods.
pub const CROP_ROTATION_PERIOD_MS: u64 = 2_000;

/// Default deduplicator selection string
pub const DEFAULT_DEDUPLICATOR: &str = "mark-and-sweep";

// =======================================================================
// Observe (RFC 7641 Sec.3.4 / Sec.4.5)
// =======================================================================

/// Notification max age (milliseconds)
///
/// RFC 7641: a notification older than 128 s is never considered
/// reordered, whatever its sequence number says.
pub const NOTIFICATION_MAX_AGE_MS: u64 = 128_000;

/// Maximum time between two confirmable notifications (milliseconds)
///
/// RFC 7641 Sec.4.5: a server should send a CON at least every 24 hours.
pub const NOTIFICATION_CHECK_INTERVAL_MS: u64 = 86_400_000;

/// Maximum number of NON notifications between two CON notifications
pub const NOTIFICATION_CHECK_INTERVAL_COUNT: u32 = 100;

// =======================================================================
// Configuration keys
// =======================================================================

/// Key for [`NetworkConfig::exchange_lifetime`] (milliseconds)
pub const KEY_EXCHANGE_LIFETIME: &str = "EXCHANGE_LIFETIME";
/// Key for [`NetworkConfig::mark_and_sweep_interval`] (milliseconds)
pub const KEY_MARK_AND_SWEEP_INTERVAL: &str = "MARK_AND_SWEEP_INTERVAL";
/// Key for [`NetworkConfig::crop_rotation_period`] (milliseconds)
pub const KEY_CROP_ROTATION_PERIOD: &str = "CROP_ROTATION_PERIOD";
/// Key for [`NetworkConfig::deduplicator`]
pub const KEY_DEDUPLICATOR: &str = "DEDUPLICATOR";
/// Key for [`NetworkConfig::notification_max_age`] (milliseconds)
pub const KEY_NOTIFICATION_MAX_AGE: &str = "NOTIFICATION_MAX_AGE";
/// Key for [`NetworkConfig::notification_check_interval`] (milliseconds)
pub const KEY_NOTIFICATION_CHECK_INTERVAL: &str = "NOTIFICATION_CHECK_INTERVAL";
/// Key for [`NetworkConfig::notification_check_interval_count`]
pub const KEY_NOTIFICATION_CHECK_INTERVAL_COUNT: &str = "NOTIFICATION_CHECK_INTERVAL_COUNT";

/// Runtime configuration consumed by the deduplicators and the observe layer.
///
/// Cheap to clone. Components that must pick up changes while running
/// (the sweep deduplicator) receive a fresh copy via `update_config()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// How long an exchange is remembered for deduplication.
    pub exchange_lifetime: Duration,
    /// Interval between two mark-and-sweep passes.
    pub mark_and_sweep_interval: Duration,
    /// Crop-rotation bucket period.
    pub crop_rotation_period: Duration,
    /// Deduplicator selection (`mark-and-sweep`, `crop-rotation`, `none`).
    ///
    /// Kept as a raw string: unknown values are tolerated here and resolved
    /// (with a warning) when the deduplicator is built.
    pub deduplicator: String,
    /// Staleness escape hatch for notification ordering.
    pub notification_max_age: Duration,
    /// Force a CON notification when this much time passed since the last check.
    pub notification_check_interval: Duration,
    /// Force a CON notification every this many notifications.
    pub notification_check_interval_count: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            exchange_lifetime: Duration::from_millis(EXCHANGE_LIFETIME_MS),
            mark_and_sweep_interval: Duration::from_millis(MARK_AND_SWEEP_INTERVAL_MS),
            crop_rotation_period: Duration::from_millis(CROP_ROTATION_PERIOD_MS),
            deduplicator: DEFAULT_DEDUPLICATOR.to_string(),
            notification_max_age: Duration::from_millis(NOTIFICATION_MAX_AGE_MS),
            notification_check_interval: Duration::from_millis(NOTIFICATION_CHECK_INTERVAL_MS),
            notification_check_interval_count: NOTIFICATION_CHECK_INTERVAL_COUNT,
        }
    }
}

impl NetworkConfig {
    /// Set the exchange lifetime.
    #[must_use]
    pub fn with_exchange_lifetime(mut self, lifetime: Duration) -> Self {
        self.exchange_lifetime = lifetime;
        self
    }

    /// Set the mark-and-sweep interval.
    #[must_use]
    pub fn with_mark_and_sweep_interval(mut self, interval: Duration) -> Self {
        self.mark_and_sweep_interval = interval;
        self
    }

    /// Set the crop-rotation period.
    #[must_use]
    pub fn with_crop_rotation_period(mut self, period: Duration) -> Self {
        self.crop_rotation_period = period;
        self
    }

    /// Select the deduplicator by name.
    #[must_use]
    pub fn with_deduplicator(mut self, name: &str) -> Self {
        self.deduplicator = name.to_string();
        self
    }

    /// Set the notification max age.
    #[must_use]
    pub fn with_notification_max_age(mut self, max_age: Duration) -> Self {
        self.notification_max_age = max_age;
        self
    }

    /// Set the CON mixing policy (time and count).
    #[must_use]
    pub fn with_notification_check_interval(mut self, interval: Duration, count: u32) -> Self {
        self.notification_check_interval = interval;
        self.notification_check_interval_count = count;
        self
    }

    /// Update one value by key.
    ///
    /// Durations are given in milliseconds.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            KEY_EXCHANGE_LIFETIME => self.exchange_lifetime = parse_millis(key, value)?,
            KEY_MARK_AND_SWEEP_INTERVAL => self.mark_and_sweep_interval = parse_millis(key, value)?,
            KEY_CROP_ROTATION_PERIOD => self.crop_rotation_period = parse_millis(key, value)?,
            KEY_DEDUPLICATOR => self.deduplicator = value.trim().to_string(),
            KEY_NOTIFICATION_MAX_AGE => self.notification_max_age = parse_millis(key, value)?,
            KEY_NOTIFICATION_CHECK_INTERVAL => {
                self.notification_check_interval = parse_millis(key, value)?;
            }
            KEY_NOTIFICATION_CHECK_INTERVAL_COUNT => {
                self.notification_check_interval_count = value.trim().parse().map_err(|_| {
                    Error::InvalidConfig(format!("{}: expected an integer, got {:?}", key, value))
                })?;
            }
            _ => return Err(Error::UnknownConfigKey(key.to_string())),
        }
        Ok(())
    }

    /// Check that periodic tasks have non-zero periods.
    pub fn validate(&self) -> Result<()> {
        let periods = [
            (KEY_EXCHANGE_LIFETIME, self.exchange_lifetime),
            (KEY_MARK_AND_SWEEP_INTERVAL, self.mark_and_sweep_interval),
            (KEY_CROP_ROTATION_PERIOD, self.crop_rotation_period),
        ];
        for (key, period) in periods {
            if period.is_zero() {
                return Err(Error::InvalidConfig(format!("{} must be > 0", key)));
            }
        }
        if self.notification_check_interval_count == 0 {
            return Err(Error::InvalidConfig(format!(
                "{} must be > 0",
                KEY_NOTIFICATION_CHECK_INTERVAL_COUNT
            )));
        }
        Ok(())
    }

    /// Copy of this configuration that is safe to run with.
    ///
    /// Values rejected by [`validate`](Self::validate) are replaced by their
    /// defaults with a warning, so a zero period never turns a periodic
    /// task into a busy loop.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        let Err(e) = self.validate() else {
            return self.clone();
        };
        log::warn!("[config] {}, using defaults for invalid values", e);

        let defaults = Self::default();
        let mut config = self.clone();
        if config.exchange_lifetime.is_zero() {
            config.exchange_lifetime = defaults.exchange_lifetime;
        }
        if config.mark_and_sweep_interval.is_zero() {
            config.mark_and_sweep_interval = defaults.mark_and_sweep_interval;
        }
        if config.crop_rotation_period.is_zero() {
            config.crop_rotation_period = defaults.crop_rotation_period;
        }
        if config.notification_check_interval_count == 0 {
            config.notification_check_interval_count = defaults.notification_check_interval_count;
        }
        config
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| Error::InvalidConfig(format!("{}: expected milliseconds, got {:?}", key, value)))
}

// =======================================================================
// YAML loader
// =======================================================================

#[cfg(feature = "config-loader")]
mod yaml {
    use super::NetworkConfig;
    use crate::{Error, Result};
    use serde::Deserialize;
    use std::path::Path;
    use std::time::Duration;

    /// YAML document, every field optional.
    ///
    /// ```yaml
    /// exchange_lifetime_ms: 247000
    /// deduplicator: crop-rotation
    /// crop_rotation_period_ms: 2000
    /// notification:
    ///   max_age_ms: 128000
    ///   check_interval_ms: 86400000
    ///   check_interval_count: 100
    /// ```
    #[derive(Debug, Default, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct YamlNetworkConfig {
        exchange_lifetime_ms: Option<u64>,
        mark_and_sweep_interval_ms: Option<u64>,
        crop_rotation_period_ms: Option<u64>,
        deduplicator: Option<String>,
        notification: Option<YamlNotification>,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct YamlNotification {
        max_age_ms: Option<u64>,
        check_interval_ms: Option<u64>,
        check_interval_count: Option<u32>,
    }

    impl NetworkConfig {
        /// Parse a YAML document on top of the defaults.
        pub fn from_yaml_str(content: &str) -> Result<Self> {
            let doc: YamlNetworkConfig =
                serde_yaml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))?;

            let mut config = NetworkConfig::default();
            if let Some(ms) = doc.exchange_lifetime_ms {
                config.exchange_lifetime = Duration::from_millis(ms);
            }
            if let Some(ms) = doc.mark_and_sweep_interval_ms {
                config.mark_and_sweep_interval = Duration::from_millis(ms);
            }
            if let Some(ms) = doc.crop_rotation_period_ms {
                config.crop_rotation_period = Duration::from_millis(ms);
            }
            if let Some(name) = doc.deduplicator {
                config.deduplicator = name;
            }
            if let Some(n) = doc.notification {
                if let Some(ms) = n.max_age_ms {
                    config.notification_max_age = Duration::from_millis(ms);
                }
                if let Some(ms) = n.check_interval_ms {
                    config.notification_check_interval = Duration::from_millis(ms);
                }
                if let Some(count) = n.check_interval_count {
                    config.notification_check_interval_count = count;
                }
            }

            config.validate()?;
            Ok(config)
        }

        /// Load a YAML file on top of the defaults.
        pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
            let path = path.as_ref();
            if !path.exists() {
                return Err(Error::ConfigFileNotFound(path.display().to_string()));
            }
            let content = std::fs::read_to_string(path)?;
            Self::from_yaml_str(&content)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.exchange_lifetime, Duration::from_secs(247));
        assert_eq!(config.mark_and_sweep_interval, Duration::from_secs(10));
        assert_eq!(config.crop_rotation_period, Duration::from_secs(2));
        assert_eq!(config.deduplicator, "mark-and-sweep");
        assert_eq!(config.notification_max_age, Duration::from_secs(128));
        assert_eq!(config.notification_check_interval_count, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_set_by_key() {
        let mut config = NetworkConfig::default();
        config.set(KEY_EXCHANGE_LIFETIME, "1000").expect("valid value");
        config.set(KEY_DEDUPLICATOR, " crop-rotation ").expect("valid value");
        config
            .set(KEY_NOTIFICATION_CHECK_INTERVAL_COUNT, "5")
            .expect("valid value");

        assert_eq!(config.exchange_lifetime, Duration::from_secs(1));
        assert_eq!(config.deduplicator, "crop-rotation");
        assert_eq!(config.notification_check_interval_count, 5);
    }

    #[test]
    fn test_set_rejects_garbage() {
        let mut config = NetworkConfig::default();
        assert!(matches!(
            config.set(KEY_MARK_AND_SWEEP_INTERVAL, "ten"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            config.set("MAX_RETRANSMIT", "4"),
            Err(Error::UnknownConfigKey(_))
        ));
    }

    #[test]
    fn test_validate_zero_period() {
        let config = NetworkConfig::default().with_crop_rotation_period(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_sanitized_replaces_zero_periods() {
        let mut config = NetworkConfig::default().with_exchange_lifetime(Duration::from_secs(5));
        config.set(KEY_MARK_AND_SWEEP_INTERVAL, "0").expect("parses");
        config.set(KEY_CROP_ROTATION_PERIOD, "0").expect("parses");

        let safe = config.sanitized();
        assert!(safe.validate().is_ok());
        assert_eq!(safe.mark_and_sweep_interval, Duration::from_secs(10));
        assert_eq!(safe.crop_rotation_period, Duration::from_secs(2));
        // Valid values are kept.
        assert_eq!(safe.exchange_lifetime, Duration::from_secs(5));

        let valid = NetworkConfig::default().with_crop_rotation_period(Duration::from_millis(7));
        assert_eq!(valid.sanitized(), valid);
    }

    #[cfg(feature = "config-loader")]
    #[test]
    fn test_yaml_partial_document() {
        let yaml = "deduplicator: none\nnotification:\n  max_age_ms: 5000\n";
        let config = NetworkConfig::from_yaml_str(yaml).expect("valid yaml");
        assert_eq!(config.deduplicator, "none");
        assert_eq!(config.notification_max_age, Duration::from_secs(5));
        assert_eq!(config.exchange_lifetime, Duration::from_secs(247));
    }

    #[cfg(feature = "config-loader")]
    #[test]
    fn test_yaml_unknown_field() {
        let result = NetworkConfig::from_yaml_str("ack_timeout_ms: 2000\n");
        assert!(matches!(result, Err(Error::ConfigParse(_))));
    }

    #[cfg(feature = "config-loader")]
    #[test]
    fn test_yaml_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "crop_rotation_period_ms: 500").expect("write");
        let config = NetworkConfig::from_yaml_file(file.path()).expect("load");
        assert_eq!(config.crop_rotation_period, Duration::from_millis(500));

        let missing = NetworkConfig::from_yaml_file("/nonexistent/coap.yaml");
        assert!(matches!(missing, Err(Error::ConfigFileNotFound(_))));
    }
}
