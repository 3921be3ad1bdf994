//! Auto-reclaim trigger policies.
//!
//! [`ThresholdPolicy`] fires when RAM usage reaches the configured threshold,
//! then stays quiet for a fixed cooldown. [`PeriodicTrigger`] fires on
//! elapsed time alone. The two share nothing; the reclaim coordinator is what
//! keeps them from running two reclaims at once.
//!
//! Both take `now` explicitly so sequences can be replayed in tests.

use crate::config::Config;
use crate::error::{MonitorError, Result};
use crate::types::{ReclaimReason, ReclaimRequest, Sample};
use std::time::{Duration, Instant};

/// Default minimum time between threshold-triggered reclaims.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);

/// Cadence of the periodic trigger loop.
pub const PERIODIC_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Threshold policy state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdState {
    /// Cooldown elapsed; the next breach fires.
    Armed,
    /// Suppressing repeat fires until the cooldown elapses.
    Cooling,
}

/// Threshold-crossing trigger with cooldown.
#[derive(Debug, Clone)]
pub struct ThresholdPolicy {
    cooldown: Duration,
    state: ThresholdState,
    last_fire: Option<Instant>,
}

impl ThresholdPolicy {
    /// Creates an armed policy.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidBound`] for a zero cooldown.
    pub fn new(cooldown: Duration) -> Result<Self> {
        if cooldown.is_zero() {
            return Err(MonitorError::InvalidBound {
                what: "threshold cooldown",
                value: format!("{cooldown:?}"),
            });
        }
        Ok(Self { cooldown, state: ThresholdState::Armed, last_fire: None })
    }

    /// Evaluates one sample against the auto-clean settings in `config`.
    pub fn evaluate(&mut self, sample: &Sample, config: &Config, now: Instant) -> Option<ReclaimRequest> {
        self.evaluate_with(
            sample.ram_percent,
            config.auto_clean_enabled,
            config.auto_clean_threshold_percent,
            now,
        )
    }

    /// Evaluates with explicit settings.
    ///
    /// While disabled nothing changes: no transition, no fire, and the last
    /// fire time is kept so re-enabling honours the remaining cooldown.
    pub fn evaluate_with(
        &mut self,
        ram_percent: f64,
        enabled: bool,
        threshold_percent: u32,
        now: Instant,
    ) -> Option<ReclaimRequest> {
        if !enabled {
            return None;
        }

        if self.state == ThresholdState::Cooling && self.cooldown_elapsed(now) {
            self.state = ThresholdState::Armed;
        }

        if self.state == ThresholdState::Armed && ram_percent >= f64::from(threshold_percent) {
            self.state = ThresholdState::Cooling;
            self.last_fire = Some(now);
            return Some(ReclaimRequest::new(ReclaimReason::Threshold, now));
        }

        None
    }

    fn cooldown_elapsed(&self, now: Instant) -> bool {
        self.last_fire.map_or(true, |t| now.saturating_duration_since(t) >= self.cooldown)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ThresholdState {
        self.state
    }

    /// When the policy last fired.
    #[must_use]
    pub fn last_fire(&self) -> Option<Instant> {
        self.last_fire
    }

    /// Configured cooldown.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Time left before the policy re-arms, zero if armed.
    #[must_use]
    pub fn remaining_cooldown(&self, now: Instant) -> Duration {
        match (self.state, self.last_fire) {
            (ThresholdState::Cooling, Some(t)) => {
                self.cooldown.saturating_sub(now.saturating_duration_since(t))
            }
            _ => Duration::ZERO,
        }
    }
}

/// Fires on elapsed wall-clock time, regardless of memory level.
#[derive(Debug, Clone)]
pub struct PeriodicTrigger {
    last_fire: Instant,
    was_enabled: bool,
}

impl PeriodicTrigger {
    /// Starts the period clock at `now`.
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self { last_fire: now, was_enabled: true }
    }

    /// Evaluates against the periodic settings in `config`.
    pub fn evaluate(&mut self, config: &Config, now: Instant) -> Option<ReclaimRequest> {
        self.evaluate_with(config.auto_clean_period_enabled, config.clean_period(), now)
    }

    /// Evaluates with explicit settings.
    ///
    /// Re-enabling after a disabled stretch restarts the period at `now`,
    /// so turning the feature on never fires instantly on stale time.
    pub fn evaluate_with(&mut self, enabled: bool, period: Duration, now: Instant) -> Option<ReclaimRequest> {
        if !enabled {
            self.was_enabled = false;
            return None;
        }
        if !self.was_enabled {
            self.was_enabled = true;
            self.last_fire = now;
            return None;
        }

        if now.saturating_duration_since(self.last_fire) >= period {
            self.last_fire = now;
            return Some(ReclaimRequest::new(ReclaimReason::Periodic, now));
        }
        None
    }

    /// When the period clock was last reset.
    #[must_use]
    pub fn last_fire(&self) -> Instant {
        self.last_fire
    }

    /// Time until the next fire, given `period`.
    #[must_use]
    pub fn time_until_next(&self, period: Duration, now: Instant) -> Duration {
        period.saturating_sub(now.saturating_duration_since(self.last_fire))
    }
}

/// Process-lifetime trigger timestamps, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerState {
    /// Last threshold fire, if any.
    pub last_threshold_fire: Option<Instant>,
    /// Last periodic fire (or period start).
    pub last_periodic_fire: Instant,
}
