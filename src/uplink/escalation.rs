//! Failure escalation
//!
//! Counts consecutive send failures and watches the time since the last
//! success. Either condition climbs the recovery ladder: soft reset first,
//! hard reset if that fails. Exhausting the ladder is the only
//! unrecoverable condition.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uplink_shared::limits;

use crate::error::UplinkError;

/// One step of increasingly disruptive recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryTier {
    SoftReset,
    HardReset,
}

impl fmt::Display for RecoveryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryTier::SoftReset => write!(f, "soft reset"),
            RecoveryTier::HardReset => write!(f, "hard reset"),
        }
    }
}

/// Tiers in the order they are tried
pub const RESET_LADDER: [RecoveryTier; 2] = [RecoveryTier::SoftReset, RecoveryTier::HardReset];

/// Executes recovery tiers against the link
#[async_trait]
pub trait Recovery: Send {
    async fn run_tier(&mut self, tier: RecoveryTier) -> Result<(), UplinkError>;
}

/// Run tiers in order until one succeeds
pub async fn climb_ladder<R: Recovery + ?Sized>(
    recovery: &mut R,
    ladder: &[RecoveryTier],
) -> Result<RecoveryTier, UplinkError> {
    for &tier in ladder {
        warn!("[UPLINK] Escalating: {}", tier);
        match recovery.run_tier(tier).await {
            Ok(()) => {
                info!("[UPLINK] Recovered by {}", tier);
                return Ok(tier);
            }
            Err(e) => warn!("[UPLINK] {} failed: {}", tier, e),
        }
    }
    error!("[UPLINK] All recovery tiers exhausted");
    Err(UplinkError::Unrecoverable)
}

/// Consecutive-failure counter plus success watchdog
#[derive(Debug, Clone)]
pub struct FailureEscalation {
    consecutive_failures: u32,
    threshold: u32,
    last_success: Option<Instant>,
    watchdog_timeout: Duration,
}

impl Default for FailureEscalation {
    fn default() -> Self {
        Self::new(limits::FAILURE_THRESHOLD, limits::WATCHDOG_TIMEOUT)
    }
}

impl FailureEscalation {
    pub fn new(threshold: u32, watchdog_timeout: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            threshold,
            last_success: None,
            watchdog_timeout,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_success(&self) -> Option<Instant> {
        self.last_success
    }

    pub fn on_success(&mut self, now: Instant) {
        if self.consecutive_failures > 0 {
            info!(
                "[UPLINK] Send recovered after {} failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.last_success = Some(now);
    }

    /// Record a send that was intentionally not attempted.
    ///
    /// Not a failure, and the silence it causes does not count toward the
    /// watchdog either.
    pub fn on_skipped(&mut self, now: Instant) {
        self.rebase_watchdog(now);
    }

    /// Record a failed send; at the threshold, reset the link.
    ///
    /// Returns the tier that recovered, `None` below the threshold. The
    /// counter is cleared after a triggered reset whatever its outcome, and
    /// the watchdog baseline moves to `now` so the same tick does not reset
    /// the link a second time.
    pub async fn on_failure<R: Recovery + ?Sized>(
        &mut self,
        now: Instant,
        recovery: &mut R,
    ) -> Result<Option<RecoveryTier>, UplinkError> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        warn!(
            "[UPLINK] Send failure {}/{}",
            self.consecutive_failures, self.threshold
        );
        if self.consecutive_failures < self.threshold {
            return Ok(None);
        }

        let result = climb_ladder(recovery, &RESET_LADDER).await;
        // TODO: keep the count when the ladder fails so a restart loop stays visible on the display
        self.consecutive_failures = 0;
        self.rebase_watchdog(now);
        result.map(Some)
    }

    /// Move the watchdog baseline; no-op before the first success
    fn rebase_watchdog(&mut self, now: Instant) {
        if let Some(last) = self.last_success.as_mut() {
            *last = (*last).max(now);
        }
    }

    /// True once a success has happened and the silence since reached the timeout
    pub fn watchdog_expired(&self, now: Instant) -> bool {
        self.last_success
            .is_some_and(|last| now.saturating_duration_since(last) >= self.watchdog_timeout)
    }

    /// Reset the link if the success watchdog expired.
    ///
    /// The baseline moves to `now` before recovery runs so the watchdog
    /// does not refire on the next tick.
    pub async fn check_watchdog<R: Recovery + ?Sized>(
        &mut self,
        now: Instant,
        recovery: &mut R,
    ) -> Result<Option<RecoveryTier>, UplinkError> {
        if !self.watchdog_expired(now) {
            return Ok(None);
        }
        warn!(
            "[UPLINK] No successful send for {:?}",
            self.last_success
                .map(|last| now.saturating_duration_since(last))
                .unwrap_or_default()
        );
        self.last_success = Some(now);
        climb_ladder(recovery, &RESET_LADDER).await.map(Some)
    }
}
