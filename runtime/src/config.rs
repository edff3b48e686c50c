//! Engine configuration.
//!
//! Durations are plain `std::time::Duration` so they can be built from environment
//! variables and fed to `tokio::time` directly; the scheduler converts the offer window to
//! a `chrono` delta once, at construction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors from configuration validation and parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field holds a value the engine cannot run with
    #[error("Invalid configuration for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
    /// Unknown fulfilment policy name
    #[error("Unknown fulfillment policy: {0} (expected 'partial' or 'all_or_nothing')")]
    UnknownPolicy(String),
}

/// How much of a request an offer may cover.
///
/// Applied the same way by promotion and by the position projection shown to waiting
/// requesters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentPolicy {
    /// Offer `min(requested, available)`
    #[default]
    Partial,
    /// Offer only the full request; the head of the queue waits until it fits
    AllOrNothing,
}

impl FulfillmentPolicy {
    /// Quantity to offer an entry asking for `requested` when `available` are free.
    ///
    /// `None` means the entry cannot be offered yet. Promotion stops there rather than
    /// skipping ahead to a later entry.
    #[must_use]
    pub const fn offer_quantity(self, requested: u32, available: u32) -> Option<u32> {
        if available == 0 || requested == 0 {
            return None;
        }
        match self {
            Self::Partial => Some(if requested < available {
                requested
            } else {
                available
            }),
            Self::AllOrNothing => {
                if requested <= available {
                    Some(requested)
                } else {
                    None
                }
            }
        }
    }
}

impl fmt::Display for FulfillmentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Partial => f.write_str("partial"),
            Self::AllOrNothing => f.write_str("all_or_nothing"),
        }
    }
}

impl FromStr for FulfillmentPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "partial" => Ok(Self::Partial),
            "all_or_nothing" | "all-or-nothing" => Ok(Self::AllOrNothing),
            other => Err(ConfigError::UnknownPolicy(other.to_string())),
        }
    }
}

/// Tunables for the offer queue engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long an offer stays valid (default: 15 minutes)
    pub offer_window: Duration,
    /// How often the sweeper runs (default: 5 minutes)
    pub sweep_interval: Duration,
    /// Partial or all-or-nothing offers (default: partial)
    pub fulfillment: FulfillmentPolicy,
    /// Largest quantity a single join may ask for (default: 8)
    pub max_quantity_per_request: u32,
    /// Expired offers fetched per sweep batch (default: 100)
    pub sweep_batch_size: usize,
    /// Upper bound on promotions in one cascade pass (default: 64)
    pub max_promotions_per_pass: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            offer_window: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            fulfillment: FulfillmentPolicy::Partial,
            max_quantity_per_request: 8,
            sweep_batch_size: 100,
            max_promotions_per_pass: 64,
        }
    }
}

impl QueueConfig {
    /// Set the offer window
    #[must_use]
    pub const fn with_offer_window(mut self, window: Duration) -> Self {
        self.offer_window = window;
        self
    }

    /// Set the sweep interval
    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the fulfilment policy
    #[must_use]
    pub const fn with_fulfillment(mut self, policy: FulfillmentPolicy) -> Self {
        self.fulfillment = policy;
        self
    }

    /// Set the per-request quantity cap
    #[must_use]
    pub const fn with_max_quantity_per_request(mut self, max: u32) -> Self {
        self.max_quantity_per_request = max;
        self
    }

    /// Set the sweep batch size
    #[must_use]
    pub const fn with_sweep_batch_size(mut self, size: usize) -> Self {
        self.sweep_batch_size = size;
        self
    }

    /// Set the cascade bound
    #[must_use]
    pub const fn with_max_promotions_per_pass(mut self, max: usize) -> Self {
        self.max_promotions_per_pass = max;
        self
    }

    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.offer_window.is_zero() {
            return Err(invalid("offer_window", "must be greater than zero"));
        }
        if chrono::Duration::from_std(self.offer_window).is_err() {
            return Err(invalid("offer_window", "is too large"));
        }
        if self.sweep_interval.is_zero() {
            return Err(invalid("sweep_interval", "must be greater than zero"));
        }
        if self.max_quantity_per_request == 0 {
            return Err(invalid("max_quantity_per_request", "must be at least 1"));
        }
        if self.sweep_batch_size == 0 {
            return Err(invalid("sweep_batch_size", "must be at least 1"));
        }
        if self.max_promotions_per_pass == 0 {
            return Err(invalid("max_promotions_per_pass", "must be at least 1"));
        }
        Ok(())
    }

    /// The offer window as a `chrono` delta for deadline arithmetic.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the window does not fit.
    pub fn offer_window_delta(&self) -> Result<chrono::Duration, ConfigError> {
        chrono::Duration::from_std(self.offer_window)
            .map_err(|e| invalid("offer_window", &e.to_string()))
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
