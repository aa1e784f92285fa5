use std::time::{Duration, Instant};

use config_model::DisplayConfig;
use tracing::{info, warn};

use crate::platform::display_power::DisplayPower;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Active,
    Off,
}

impl PowerState {
    fn opposite(self) -> Self {
        match self {
            Self::Active => Self::Off,
            Self::Off => Self::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerTransition {
    pub from: PowerState,
    pub to: PowerState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerCycleTimings {
    /// How long the panel stays on; `None` keeps it on until toggled.
    pub active: Option<Duration>,
    /// How long the panel stays off before waking on its own.
    pub off: Duration,
}

impl PowerCycleTimings {
    pub fn from_config(cfg: &DisplayConfig) -> Self {
        Self {
            active: cfg.active_window(),
            off: cfg.blank_window(),
        }
    }
}

impl Default for PowerCycleTimings {
    fn default() -> Self {
        Self {
            active: Some(Duration::from_secs(60)),
            off: Duration::from_secs(30),
        }
    }
}

/// Timed ACTIVE/OFF state machine for the physical panel.
///
/// Driven by polling: callers pass the current instant and the controller
/// applies whatever transitions are due. Platform failures are logged and
/// never hold the state machine back.
pub struct PowerCycleController {
    backend: Box<dyn DisplayPower>,
    state: PowerState,
    phase_start: Instant,
    timings: PowerCycleTimings,
    shut_down: bool,
}

impl PowerCycleController {
    pub fn new(backend: Box<dyn DisplayPower>, timings: PowerCycleTimings, now: Instant) -> Self {
        let mut controller = Self {
            backend,
            state: PowerState::Active,
            phase_start: now,
            timings,
            shut_down: false,
        };
        controller.set_idle_inhibit(true);
        controller
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn phase_start(&self) -> Instant {
        self.phase_start
    }

    /// Swap in new timings; the current phase keeps its start time.
    pub fn retime(&mut self, timings: PowerCycleTimings) {
        self.timings = timings;
    }

    /// Apply every timed transition due at `now`. Phase starts advance by the
    /// phase length, so sparse polling does not shift the schedule. The
    /// backend only sees the net change.
    pub fn update(&mut self, now: Instant) -> Option<PowerTransition> {
        let from = self.state;
        loop {
            let window = match self.state {
                PowerState::Active => match self.timings.active {
                    Some(window) => window,
                    None => break,
                },
                PowerState::Off => self.timings.off,
            };
            if window.is_zero() || now.saturating_duration_since(self.phase_start) < window {
                break;
            }
            self.phase_start += window;
            self.state = self.state.opposite();
        }
        self.finish(from)
    }

    /// Manual override: flip immediately and restart the phase timer.
    pub fn toggle(&mut self, now: Instant) -> PowerTransition {
        let from = self.state;
        self.state = from.opposite();
        self.phase_start = now;
        info!(from = ?from, to = ?self.state, "manual power toggle");
        self.apply(self.state);
        PowerTransition {
            from,
            to: self.state,
        }
    }

    /// Bring the panel back from OFF; no-op while ACTIVE.
    pub fn wake(&mut self, now: Instant) -> Option<PowerTransition> {
        (self.state == PowerState::Off).then(|| self.toggle(now))
    }

    /// Leave the panel on and release the idle inhibit. Safe to call twice.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        if self.state == PowerState::Off {
            info!("restoring display power before exit");
            if let Err(err) = self.backend.monitor_on() {
                warn!("{err}");
            }
            self.state = PowerState::Active;
        }
        self.set_idle_inhibit(false);
    }

    fn finish(&mut self, from: PowerState) -> Option<PowerTransition> {
        if self.state == from {
            return None;
        }
        info!(from = ?from, to = ?self.state, "power cycle transition");
        self.apply(self.state);
        Some(PowerTransition {
            from,
            to: self.state,
        })
    }

    fn apply(&mut self, to: PowerState) {
        match to {
            PowerState::Off => {
                if let Err(err) = self.backend.monitor_off() {
                    warn!("{err}");
                }
                self.set_idle_inhibit(false);
            }
            PowerState::Active => {
                if let Err(err) = self.backend.monitor_on() {
                    warn!("{err}");
                }
                self.set_idle_inhibit(true);
            }
        }
    }

    fn set_idle_inhibit(&mut self, inhibit: bool) {
        if let Err(err) = self.backend.set_idle_inhibit(inhibit) {
            warn!("{err}");
        }
    }
}

impl Drop for PowerCycleController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
