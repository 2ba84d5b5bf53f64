//! # Runtime configuration.
//!
//! Provides [`SupervisorConfig`] for the task supervisor and [`PumpConfig`] for the
//! cooperative dispatch pump.
//!
//! ## Sentinel values
//! - `SupervisorConfig::grace = 0s` → abort canceled units immediately; none is reported as stuck
//! - `SupervisorConfig::bus_capacity = 0` → clamped to 1
//! - `PumpConfig::period = 0s` → yield to the scheduler once instead of pausing
//! - `PumpConfig::period < 1ms` → yield repeatedly until the period elapsed (the timer wheel
//!   cannot sleep for less than 1ms); keeps the thread busy between dispatch steps

use std::time::Duration;

/// Supervisor settings.
///
/// ## Field semantics
/// - `grace`: maximum wait for units to stop after cancellation
/// - `bus_capacity`: event bus ring buffer size (min 1)
/// - `handle_signals`: treat SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere) as a shutdown request
/// - `cancel_on_first_exit`: the first unit to finish, even successfully, winds down the rest
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Maximum time to wait for units to exit once they have been canceled.
    ///
    /// On shutdown, exceeding it makes [`Supervisor::run`](crate::Supervisor::run) return
    /// `RuntimeError::GraceExceeded`. During failure wind-down the overrun is only logged
    /// and the original failure is returned. Zero aborts the remaining units right away.
    pub grace: Duration,

    /// Capacity of the event bus broadcast channel.
    ///
    /// Receivers lagging more than `bus_capacity` events skip the oldest ones.
    pub bus_capacity: usize,

    /// Listen for OS termination signals while running.
    pub handle_signals: bool,

    /// Stop every unit as soon as any unit completes.
    ///
    /// `false` waits for all units (or the first failure).
    pub cancel_on_first_exit: bool,
}

impl SupervisorConfig {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for SupervisorConfig {
    /// Default configuration:
    ///
    /// - `grace = 10s`
    /// - `bus_capacity = 1024`
    /// - `handle_signals = true`
    /// - `cancel_on_first_exit = false`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(10),
            bus_capacity: 1024,
            handle_signals: true,
            cancel_on_first_exit: false,
        }
    }
}

/// Pump settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PumpConfig {
    /// Pause between two dispatch steps.
    ///
    /// Small but non-zero so the pump does not starve other runnable work. Periods under
    /// 1ms are paced by yielding, longer ones by the tokio timer.
    pub period: Duration,

    /// Timeout handed to `Middleware::dispatch_pending`. Keep it at zero.
    pub dispatch_timeout: Duration,
}

impl PumpConfig {
    /// True when the pump only yields between steps (`period == 0`).
    #[inline]
    pub fn yields_only(&self) -> bool {
        self.period.is_zero()
    }
}

impl Default for PumpConfig {
    /// `period = 100µs`, `dispatch_timeout = 0`.
    fn default() -> Self {
        Self {
            period: Duration::from_micros(100),
            dispatch_timeout: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SupervisorConfig::default();
        assert_eq!(cfg.grace, Duration::from_secs(10));
        assert!(cfg.handle_signals);
        assert!(!cfg.cancel_on_first_exit);

        let pump = PumpConfig::default();
        assert_eq!(pump.period, Duration::from_micros(100));
        assert!(!pump.yields_only());
    }

    #[test]
    fn bus_capacity_is_clamped() {
        let cfg = SupervisorConfig {
            bus_capacity: 0,
            ..SupervisorConfig::default()
        };
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }
}
