//! Slow-start / congestion-avoidance window controller.
//!
//! The window here paces a stop-and-wait sender; it never lets more than one
//! packet into flight. It reacts to a count of successful sends rather than to
//! ACKs or real losses:
//!
//! - every `update_every`-th successful send grows the window
//!   (slow start: `+increment` capped at ssthresh; avoidance: `+1`)
//! - every `loss_every`-th successful send simulates a loss: ssthresh halves
//!   (never below the floor), cwnd resets to the floor, back to slow start
//!
//! After either trigger the pacing interval becomes `max(1 / cwnd, min_interval)`
//! seconds. Simulated losses are statistical only and independent of what the
//! channel actually drops.

use rdt_env::{delay_from_secs, RdtError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Window-controller constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CongestionParams {
    /// Grow the window on every N-th successful send
    pub update_every: u64,

    /// Simulate a loss on every M-th successful send
    pub loss_every: u64,

    /// Slow-start growth per update
    pub slow_start_increment: u32,

    pub initial_cwnd: u32,

    pub initial_ssthresh: u32,

    /// cwnd after a simulated loss, and the lowest ssthresh may fall to
    pub cwnd_floor: u32,

    /// Lost packets booked per simulated loss
    pub simulated_loss_count: u64,

    /// Lower bound on the pacing interval, in seconds
    pub min_interval: f64,
}

impl Default for CongestionParams {
    fn default() -> Self {
        Self {
            update_every: 15,
            loss_every: 40,
            slow_start_increment: 2,
            initial_cwnd: 4,
            initial_ssthresh: 32,
            cwnd_floor: 4,
            simulated_loss_count: 2,
            min_interval: 0.001,
        }
    }
}

impl CongestionParams {
    /// Rejects parameters that would break `cwnd >= 1`, `ssthresh >= 1` or
    /// produce a zero/negative pacing interval.
    pub fn validate(&self) -> Result<(), RdtError> {
        if self.update_every == 0 || self.loss_every == 0 {
            return Err(RdtError::config("update_every and loss_every must be positive"));
        }
        if self.initial_cwnd == 0 || self.initial_ssthresh == 0 || self.cwnd_floor == 0 {
            return Err(RdtError::config("cwnd, ssthresh and floor must be at least 1"));
        }
        self.min_pacing_interval()?;
        Ok(())
    }

    /// `min_interval` as a non-zero `Duration`.
    fn min_pacing_interval(&self) -> Result<Duration, RdtError> {
        match delay_from_secs(self.min_interval) {
            Ok(min) if !min.is_zero() => Ok(min),
            _ => Err(RdtError::config(format!(
                "min_interval must be a positive duration, got {}",
                self.min_interval
            ))),
        }
    }
}

/// Which growth rule is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CongestionMode {
    SlowStart,
    CongestionAvoidance,
}

/// What a single successful send changed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindowUpdate {
    /// The window grew
    pub grew: bool,

    /// A simulated loss fired; carries the lost-packet count to book
    pub simulated_loss: Option<u64>,

    /// New pacing interval, set whenever either trigger fired
    pub interval: Option<Duration>,
}

/// Congestion window state for one sender.
#[derive(Debug, Clone)]
pub struct WindowController {
    params: CongestionParams,
    min_interval: Duration,
    cwnd: u32,
    ssthresh: u32,
    mode: CongestionMode,

    /// Successful sends seen so far
    sends: u64,

    /// Window growth events
    updates: u64,

    /// Simulated loss events
    losses: u64,
}

impl WindowController {
    pub fn new(params: CongestionParams) -> Result<Self, RdtError> {
        params.validate()?;
        Ok(Self {
            min_interval: params.min_pacing_interval()?,
            cwnd: params.initial_cwnd,
            ssthresh: params.initial_ssthresh,
            mode: CongestionMode::SlowStart,
            sends: 0,
            updates: 0,
            losses: 0,
            params,
        })
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn mode(&self) -> CongestionMode {
        self.mode
    }

    /// Number of window growth events so far.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Number of simulated losses so far.
    pub fn simulated_losses(&self) -> u64 {
        self.losses
    }

    /// Pacing interval for the current window.
    pub fn pacing_interval(&self) -> Duration {
        (Duration::from_secs(1) / self.cwnd.max(1)).max(self.min_interval)
    }

    /// Records one successful send and applies whichever triggers it hits.
    pub fn on_successful_send(&mut self) -> WindowUpdate {
        self.sends += 1;
        let mut update = WindowUpdate::default();

        if self.sends % self.params.update_every == 0 {
            self.grow();
            update.grew = true;
        }

        if self.sends % self.params.loss_every == 0 {
            self.simulate_loss();
            update.simulated_loss = Some(self.params.simulated_loss_count);
        }

        if update.grew || update.simulated_loss.is_some() {
            let interval = self.pacing_interval();
            update.interval = Some(interval);
            debug!(
                cwnd = self.cwnd,
                ssthresh = self.ssthresh,
                ?interval,
                "Congestion control"
            );
        }

        update
    }

    fn grow(&mut self) {
        self.updates += 1;
        match self.mode {
            CongestionMode::SlowStart => {
                self.cwnd = self
                    .cwnd
                    .saturating_add(self.params.slow_start_increment)
                    .min(self.ssthresh);
                if self.cwnd >= self.ssthresh {
                    self.mode = CongestionMode::CongestionAvoidance;
                    info!(cwnd = self.cwnd, "Entering congestion avoidance");
                }
            }
            CongestionMode::CongestionAvoidance => {
                self.cwnd = self.cwnd.saturating_add(1);
            }
        }
    }

    fn simulate_loss(&mut self) {
        self.losses += 1;
        self.ssthresh = (self.cwnd / 2).max(self.params.cwnd_floor);
        self.cwnd = self.params.cwnd_floor;
        self.mode = CongestionMode::SlowStart;
        info!(
            ssthresh = self.ssthresh,
            cwnd = self.cwnd,
            "Simulated packet loss"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn controller() -> WindowController {
        WindowController::new(CongestionParams::default()).unwrap()
    }

    #[test]
    fn test_initial_state() {
        let wc = controller();
        assert_eq!(wc.cwnd(), 4);
        assert_eq!(wc.ssthresh(), 32);
        assert_eq!(wc.mode(), CongestionMode::SlowStart);
        assert_eq!(wc.pacing_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_only_every_nth_send_grows() {
        let mut wc = controller();
        for _ in 0..14 {
            assert_eq!(wc.on_successful_send(), WindowUpdate::default());
        }
        let update = wc.on_successful_send();
        assert!(update.grew);
        assert_eq!(update.simulated_loss, None);
        assert_eq!(wc.cwnd(), 6);
        assert_eq!(update.interval, Some(Duration::from_secs(1) / 6));
    }

    #[test]
    fn test_simulated_loss_on_every_mth_send() {
        let mut wc = controller();
        // sends 15 and 30 grow the window: 4 -> 6 -> 8
        for _ in 0..39 {
            wc.on_successful_send();
        }
        assert_eq!(wc.cwnd(), 8);

        let update = wc.on_successful_send();
        assert!(!update.grew);
        assert_eq!(update.simulated_loss, Some(2));
        // ssthresh = max(8 / 2, 4), cwnd back to the floor
        assert_eq!(wc.ssthresh(), 4);
        assert_eq!(wc.cwnd(), 4);
        assert_eq!(wc.mode(), CongestionMode::SlowStart);
        assert_eq!(wc.simulated_losses(), 1);
    }

    #[test]
    fn test_slow_start_caps_at_ssthresh_then_avoidance() {
        let params = CongestionParams {
            update_every: 1,
            loss_every: 1000,
            initial_ssthresh: 7,
            ..Default::default()
        };
        let mut wc = WindowController::new(params).unwrap();

        wc.on_successful_send(); // 4 -> 6
        assert_eq!(wc.mode(), CongestionMode::SlowStart);
        wc.on_successful_send(); // 6 -> min(8, 7)
        assert_eq!(wc.cwnd(), 7);
        assert_eq!(wc.mode(), CongestionMode::CongestionAvoidance);
        wc.on_successful_send(); // linear
        assert_eq!(wc.cwnd(), 8);
    }

    #[test]
    fn test_interval_respects_minimum() {
        let params = CongestionParams {
            update_every: 1,
            loss_every: u64::MAX,
            min_interval: 0.2,
            ..Default::default()
        };
        let mut wc = WindowController::new(params).unwrap();
        let update = wc.on_successful_send();
        // 1 / 6 < 0.2
        assert_eq!(update.interval, Some(Duration::from_secs_f64(0.2)));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let zero_floor = CongestionParams { cwnd_floor: 0, ..Default::default() };
        assert!(WindowController::new(zero_floor).is_err());

        let zero_period = CongestionParams { update_every: 0, ..Default::default() };
        assert!(zero_period.validate().is_err());

        let bad_interval = CongestionParams { min_interval: 0.0, ..Default::default() };
        assert!(bad_interval.validate().is_err());
    }

    #[test]
    fn test_unrepresentable_min_interval_rejected() {
        for min_interval in [1e300, f64::INFINITY, f64::NAN, 1e-12] {
            let params = CongestionParams { min_interval, ..Default::default() };
            assert!(
                matches!(params.validate(), Err(RdtError::InvalidConfig(_))),
                "min_interval {min_interval} accepted"
            );
            assert!(WindowController::new(params).is_err());
        }
    }

    #[test]
    fn test_large_min_interval_paces_without_overflow() {
        let params = CongestionParams {
            update_every: 1,
            min_interval: 1e9,
            ..Default::default()
        };
        let mut wc = WindowController::new(params).unwrap();
        let update = wc.on_successful_send();
        assert_eq!(update.interval, Some(Duration::from_secs(1_000_000_000)));
    }

    proptest! {
        #[test]
        fn prop_window_never_below_one(
            update_every in 1u64..20,
            loss_every in 1u64..50,
            increment in 0u32..10,
            initial_cwnd in 1u32..64,
            initial_ssthresh in 1u32..64,
            floor in 1u32..8,
            sends in 0usize..500,
        ) {
            let params = CongestionParams {
                update_every,
                loss_every,
                slow_start_increment: increment,
                initial_cwnd,
                initial_ssthresh,
                cwnd_floor: floor,
                ..Default::default()
            };
            let mut wc = WindowController::new(params).unwrap();
            for _ in 0..sends {
                let update = wc.on_successful_send();
                prop_assert!(wc.cwnd() >= 1);
                prop_assert!(wc.ssthresh() >= 1);
                if let Some(interval) = update.interval {
                    prop_assert!(interval >= Duration::from_secs_f64(params.min_interval));
                }
            }
        }
    }
}
