// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine tuning and fleet configuration
//!
//! Every retry, spacing and schedule constant is operational tuning, so all
//! of them live here with defaults rather than in the code that uses them.

use crate::catalog::{Catalog, CatalogError, Device, ReservationGroup};
use crate::job::Recurrence;
use crate::sync::SyncPolicy;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid fleet: {0}")]
    Catalog(#[from] CatalogError),
    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

fn time_of_day(hour: i64, minute: i64) -> NaiveTime {
    NaiveTime::default() + chrono::Duration::minutes(hour * 60 + minute)
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a set or clear may stay unconfirmed before recovery
    #[serde(with = "humantime_serde")]
    pub sync_timeout: Duration,
    /// Recovery attempts before a slot is marked failed
    pub max_retries: u32,
    /// Interval of the stuck-operation sweep
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Pause between the clear and the re-set during recovery
    #[serde(with = "humantime_serde")]
    pub recovery_pause: Duration,
    /// Minimum gap between two device commands
    #[serde(with = "humantime_serde")]
    pub command_spacing: Duration,
    /// Gap between two catch-up jobs
    #[serde(with = "humantime_serde")]
    pub catch_up_stagger: Duration,
    /// Calendar poll interval
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Resolution of the timer loop
    #[serde(with = "humantime_serde")]
    pub tick: Duration,
    /// Retries for direct device commands (linear backoff)
    pub command_retries: u32,
    /// Backoff step for direct device commands
    #[serde(with = "humantime_serde")]
    pub command_backoff: Duration,
    pub rotation_weekday: Weekday,
    pub rotation_time: NaiveTime,
    /// Days before check-in that the code is locked in
    pub finalize_days_before: i64,
    pub finalize_time: NaiveTime,
    pub property_check_in_time: NaiveTime,
    pub property_check_out_time: NaiveTime,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_timeout: Duration::from_secs(120),
            max_retries: 3,
            sweep_interval: Duration::from_secs(30),
            recovery_pause: Duration::from_secs(2),
            command_spacing: Duration::from_secs(2),
            catch_up_stagger: Duration::from_secs(8),
            poll_interval: Duration::from_secs(120),
            tick: Duration::from_secs(1),
            command_retries: 3,
            command_backoff: Duration::from_secs(5),
            rotation_weekday: Weekday::Mon,
            rotation_time: time_of_day(3, 0),
            finalize_days_before: 1,
            finalize_time: time_of_day(11, 0),
            property_check_in_time: time_of_day(14, 30),
            property_check_out_time: time_of_day(11, 30),
        }
    }
}

impl EngineConfig {
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_command_spacing(mut self, spacing: Duration) -> Self {
        self.command_spacing = spacing;
        self
    }

    pub fn with_catch_up_stagger(mut self, stagger: Duration) -> Self {
        self.catch_up_stagger = stagger;
        self
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            timeout: to_chrono(self.sync_timeout),
            max_retries: self.max_retries,
        }
    }

    pub fn poll_recurrence(&self) -> Recurrence {
        Recurrence::Every(to_chrono(self.poll_interval))
    }

    pub fn rotation_recurrence(&self) -> Recurrence {
        Recurrence::Weekly {
            weekday: self.rotation_weekday,
            at: self.rotation_time,
        }
    }

    /// When the code for a stay starting on `check_in` is locked in
    pub fn finalize_at(&self, check_in: NaiveDate) -> NaiveDateTime {
        (check_in - chrono::Duration::days(self.finalize_days_before)).and_time(self.finalize_time)
    }

    pub fn property_check_in_at(&self, check_in: NaiveDate) -> NaiveDateTime {
        check_in.and_time(self.property_check_in_time)
    }

    pub fn property_check_out_at(&self, check_out: NaiveDate) -> NaiveDateTime {
        check_out.and_time(self.property_check_out_time)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: "sync_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.sweep_interval.is_zero() || self.tick.is_zero() || self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "sweep_interval/tick/poll_interval",
                reason: "intervals must be greater than zero".to_string(),
            });
        }
        if self.finalize_days_before < 0 {
            return Err(ConfigError::Invalid {
                name: "finalize_days_before",
                reason: format!("{} is negative", self.finalize_days_before),
            });
        }
        Ok(())
    }
}

/// Tuning plus fleet, as loaded from a TOML file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub groups: Vec<ReservationGroup>,
    #[serde(default)]
    pub devices: Vec<Device>,
}

impl Settings {
    /// Parse and validate settings
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.engine.validate()?;
        settings.catalog()?;
        Ok(settings)
    }

    pub fn catalog(&self) -> Result<Catalog, ConfigError> {
        Ok(Catalog::new(self.devices.clone(), self.groups.clone())?)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
