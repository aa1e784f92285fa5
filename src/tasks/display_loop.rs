//! The per-tick driver: commands, power cycle, slideshow timer, render.
//!
//! Everything here runs on one thread; the loop is the only writer of the
//! slideshow position, power state and frame cache.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use config_model::Configuration;
use crossbeam_channel::Receiver;
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::events::Command;
use crate::overlay::compositor::{OverlayCompositor, OverlaySet};
use crate::platform::display_power::DisplayPower;
use crate::processing::pipeline::FrameCache;
use crate::scan::{ImageCatalog, build_catalog};
use crate::tasks::power_cycle::{PowerCycleController, PowerCycleTimings, PowerState};

/// Quiet period after the last file-change notification before reloading.
pub const CONFIG_SETTLE: Duration = Duration::from_millis(250);

/// Where rendered frames go.
pub trait FrameSink {
    fn present(&mut self, frame: &RgbImage) -> Result<()>;
    /// Clear the output to black.
    fn blank(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A frame was composed and handed to the sink.
    Rendered,
    /// The panel is off; nothing was rendered.
    Dark,
    /// Exit was requested; power has been restored.
    Exit,
}

/// Position in the catalog and when it last moved.
#[derive(Debug, Clone)]
pub struct SlideshowState {
    current_index: usize,
    last_advance: Instant,
}

impl SlideshowState {
    pub fn new(now: Instant) -> Self {
        Self {
            current_index: 0,
            last_advance: now,
        }
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Step forward once when the interval has elapsed.
    pub fn advance_if_due(&mut self, now: Instant, interval: Duration, len: usize) -> bool {
        if now.saturating_duration_since(self.last_advance) < interval {
            return false;
        }
        self.advance(now, len);
        true
    }

    pub fn advance(&mut self, now: Instant, len: usize) {
        self.current_index = if len == 0 {
            0
        } else {
            (self.current_index + 1) % len
        };
        self.last_advance = now;
    }

    /// Keep the index valid after the catalog changed size.
    pub fn clamp(&mut self, len: usize) {
        if self.current_index >= len {
            self.current_index = len.saturating_sub(1);
        }
    }

    pub fn reset_timer(&mut self, now: Instant) {
        self.last_advance = now;
    }
}

#[derive(Debug, Default)]
struct PendingCommands {
    toggles: usize,
    next: usize,
    wake: bool,
    reload: bool,
    exit: bool,
}

pub struct DisplayLoop {
    config: Arc<Configuration>,
    config_path: PathBuf,
    catalog: Arc<ImageCatalog>,
    slideshow: SlideshowState,
    power: PowerCycleController,
    frames: FrameCache,
    compositor: OverlayCompositor,
    overlays: OverlaySet,
    commands: Receiver<Command>,
    clock: Box<dyn Clock>,
    config_changed_at: Option<Instant>,
}

impl DisplayLoop {
    pub fn new(
        config: Configuration,
        config_path: impl Into<PathBuf>,
        power: Box<dyn DisplayPower>,
        clock: Box<dyn Clock>,
        compositor: OverlayCompositor,
        commands: Receiver<Command>,
    ) -> Self {
        let now = clock.now();
        let catalog = build_catalog(&config.sources).catalog;
        let overlays = OverlaySet::from_config(&config.overlays);
        let power = PowerCycleController::new(
            power,
            PowerCycleTimings::from_config(&config.display),
            now,
        );
        Self {
            config: Arc::new(config),
            config_path: config_path.into(),
            catalog: Arc::new(catalog),
            slideshow: SlideshowState::new(now),
            power,
            frames: FrameCache::new(),
            compositor,
            overlays,
            commands,
            clock,
            config_changed_at: None,
        }
    }

    pub fn config(&self) -> Arc<Configuration> {
        Arc::clone(&self.config)
    }

    pub fn catalog(&self) -> Arc<ImageCatalog> {
        Arc::clone(&self.catalog)
    }

    pub fn current_index(&self) -> usize {
        self.slideshow.current_index()
    }

    pub fn power_state(&self) -> PowerState {
        self.power.state()
    }

    /// Run one iteration of the loop.
    pub fn tick(&mut self, sink: &mut dyn FrameSink) -> TickOutcome {
        let now = self.clock.now();
        let pending = self.drain_commands(now);
        if pending.exit {
            info!("exit requested");
            self.shutdown();
            return TickOutcome::Exit;
        }

        let settled = self
            .config_changed_at
            .is_some_and(|at| now.saturating_duration_since(at) >= CONFIG_SETTLE);
        if pending.reload || settled {
            self.config_changed_at = None;
            self.reload();
        }
        for _ in 0..pending.next {
            self.slideshow.advance(now, self.catalog.len());
        }

        let before = self.power.state();
        self.power.update(now);
        for _ in 0..pending.toggles {
            self.power.toggle(now);
        }
        if pending.wake {
            self.power.wake(now);
        }
        let after = self.power.state();

        if after == PowerState::Off {
            if before == PowerState::Active
                && let Err(err) = sink.blank()
            {
                warn!("failed to blank output: {err:#}");
            }
            return TickOutcome::Dark;
        }
        if before == PowerState::Off {
            // A freshly woken panel shows the current image for a full interval.
            self.slideshow.reset_timer(now);
        }

        if self
            .slideshow
            .advance_if_due(now, self.config.display.interval(), self.catalog.len())
        {
            debug!(index = self.slideshow.current_index(), "slideshow advanced");
        }
        let frame = self.render_current();
        if let Err(err) = sink.present(&frame) {
            warn!("failed to present frame: {err:#}");
        }
        TickOutcome::Rendered
    }

    /// Compose the current image with overlays for the present wall time.
    pub fn render_current(&mut self) -> RgbImage {
        let resolution = self.config.display.resolution;
        let base = match self.catalog.get(self.slideshow.current_index()) {
            Some(path) => self.frames.frame_for(path, resolution),
            None => self.frames.placeholder(resolution),
        };
        self.compositor
            .compose(&base, self.clock.wall(), &self.overlays)
    }

    /// Re-read the configuration and rescan sources. An unreadable or invalid
    /// document keeps the previous configuration.
    pub fn reload(&mut self) {
        match Configuration::load(&self.config_path).and_then(Configuration::validated) {
            Ok(config) => {
                if config.overlays.font_family != self.config.overlays.font_family {
                    self.compositor = OverlayCompositor::with_system_font(&config.overlays.font_family);
                }
                self.config = Arc::new(config);
            }
            Err(err) => warn!(
                path = %self.config_path.display(),
                "configuration reload failed, keeping previous settings: {err:#}"
            ),
        }

        let catalog = build_catalog(&self.config.sources).catalog;
        self.catalog = Arc::new(catalog);
        self.frames.clear();
        self.slideshow.clamp(self.catalog.len());
        self.overlays = OverlaySet::from_config(&self.config.overlays);
        self.power
            .retime(PowerCycleTimings::from_config(&self.config.display));
        info!(
            images = self.catalog.len(),
            index = self.slideshow.current_index(),
            "reloaded"
        );
    }

    /// Restore panel power and release the idle inhibit.
    pub fn shutdown(&mut self) {
        self.power.shutdown();
    }

    fn drain_commands(&mut self, now: Instant) -> PendingCommands {
        let mut pending = PendingCommands::default();
        while let Ok(command) = self.commands.try_recv() {
            debug!(?command, "command received");
            match command {
                Command::TogglePower => pending.toggles += 1,
                Command::NextImage => pending.next += 1,
                Command::Reload => pending.reload = true,
                Command::ConfigChanged => self.config_changed_at = Some(now),
                Command::Wake => pending.wake = true,
                Command::Exit => pending.exit = true,
            }
        }
        pending
    }
}
