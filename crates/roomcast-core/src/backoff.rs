//! Reconnect policy and backoff calculation.
//!
//! Delay for attempt `n` (zero-based) is `min(max, base * 2^n)`, scaled by a
//! random factor in `[1 - randomization, 1 + randomization]` and capped at
//! `max` again.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default reconnect attempts before the connection goes offline.
pub const DEFAULT_RECONNECTION_ATTEMPTS: u32 = 10;
/// Default initial delay in milliseconds.
pub const DEFAULT_RECONNECTION_DELAY_MS: u64 = 1000;
/// Default delay cap in milliseconds.
pub const DEFAULT_RECONNECTION_DELAY_MAX_MS: u64 = 5000;
/// Default randomization factor (0.0–1.0).
pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;

/// Reconnect parameters of the client transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectPolicy {
    /// Whether to reconnect at all.
    pub reconnection: bool,
    /// Attempts before giving up and going offline.
    pub reconnection_attempts: u32,
    /// Initial delay in ms.
    pub reconnection_delay_ms: u64,
    /// Delay cap in ms.
    pub reconnection_delay_max_ms: u64,
    /// Jitter range, 0.0–1.0.
    pub randomization_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            reconnection: true,
            reconnection_attempts: DEFAULT_RECONNECTION_ATTEMPTS,
            reconnection_delay_ms: DEFAULT_RECONNECTION_DELAY_MS,
            reconnection_delay_max_ms: DEFAULT_RECONNECTION_DELAY_MAX_MS,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` with an explicit random draw in `[0, 1)`.
    pub fn delay_with_random(&self, attempt: u32, random: f64) -> Duration {
        Duration::from_millis(calculate_backoff_delay_with_random(
            attempt,
            self.reconnection_delay_ms,
            self.reconnection_delay_max_ms,
            self.randomization_factor,
            random,
        ))
    }

    /// Delay before attempt `attempt` using the thread RNG.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_with_random(attempt, rand::random::<f64>())
    }

    /// Whether `attempts_made` failures exhaust the policy.
    pub fn exhausted(&self, attempts_made: u32) -> bool {
        !self.reconnection || attempts_made >= self.reconnection_attempts
    }
}

/// Exponential backoff without jitter, capped at `max_delay_ms`.
#[must_use]
pub fn calculate_backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    base_delay_ms
        .saturating_mul(1u64 << attempt.min(31))
        .min(max_delay_ms)
}

/// Exponential backoff with jitter.
///
/// `random` should be a value in `[0.0, 1.0)` from a PRNG; it maps to a
/// factor in `[1 - jitter, 1 + jitter]`. The result never exceeds
/// `max_delay_ms`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let capped = calculate_backoff_delay(attempt, base_delay_ms, max_delay_ms);
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor.clamp(0.0, 1.0);
    let with_jitter = ((capped as f64) * jitter).round().max(0.0) as u64;
    with_jitter.min(max_delay_ms)
}
