//! Fullscreen window that hosts the display loop.
//!
//! Frames are blitted on the CPU through softbuffer; the loop ticks from
//! `about_to_wait` on a fixed frame interval.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use config_model::{DisplayConfig, Resolution};
use crossbeam_channel::Sender;
use image::RgbImage;
use softbuffer::{Context as SoftContext, Surface};
use tracing::{debug, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Fullscreen, Window, WindowId};

use crate::events::Command;
use crate::processing::layout::center_offset;
use crate::tasks::display_loop::{DisplayLoop, FrameSink, TickOutcome};
use crate::tasks::power_cycle::PowerState;

#[derive(Debug, Clone, Copy)]
pub struct ViewerOptions {
    pub fullscreen: bool,
    pub resolution: Resolution,
    pub frame_interval: Duration,
}

impl ViewerOptions {
    pub fn from_config(cfg: &DisplayConfig, force_windowed: bool) -> Self {
        Self {
            fullscreen: cfg.fullscreen && !force_windowed,
            resolution: cfg.resolution,
            frame_interval: cfg.frame_interval(),
        }
    }
}

/// Map a key press to a command. Unmapped keys return `None`.
pub fn command_for_key(key: &Key) -> Option<Command> {
    match key {
        Key::Named(NamedKey::Escape) => Some(Command::Exit),
        Key::Named(NamedKey::Space | NamedKey::ArrowRight) => Some(Command::NextImage),
        Key::Character(ch) => match ch.to_ascii_lowercase().as_str() {
            "q" => Some(Command::Exit),
            "b" => Some(Command::TogglePower),
            "r" => Some(Command::Reload),
            _ => None,
        },
        _ => None,
    }
}

/// Commands for a key press given the current panel state. While the panel
/// is off every key except exit and the power toggle wakes it first.
pub fn key_commands(key: &Key, power: PowerState) -> Vec<Command> {
    let command = command_for_key(key);
    if power == PowerState::Active {
        return command.into_iter().collect();
    }
    match command {
        Some(command @ (Command::Exit | Command::TogglePower)) => vec![command],
        Some(command) => vec![Command::Wake, command],
        None => vec![Command::Wake],
    }
}

/// Run the window until the display loop exits. Window or surface creation
/// failure is returned as an error.
pub fn run(display: DisplayLoop, commands: Sender<Command>, options: ViewerOptions) -> Result<()> {
    let event_loop = EventLoop::new().context("failed to create event loop")?;
    let mut app = ViewerApp::new(display, commands, options);
    event_loop.run_app(&mut app)?;
    match app.fatal.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

type WindowHandle = Arc<Window>;

struct ViewerApp {
    display: DisplayLoop,
    commands: Sender<Command>,
    options: ViewerOptions,
    window: Option<WindowHandle>,
    // Kept alive for the lifetime of the surface.
    _context: Option<SoftContext<WindowHandle>>,
    surface: Option<Surface<WindowHandle, WindowHandle>>,
    next_tick: Instant,
    fatal: Option<anyhow::Error>,
}

impl ViewerApp {
    fn new(display: DisplayLoop, commands: Sender<Command>, options: ViewerOptions) -> Self {
        Self {
            display,
            commands,
            options,
            window: None,
            _context: None,
            surface: None,
            next_tick: Instant::now(),
            fatal: None,
        }
    }

    fn ensure_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        if self.window.is_some() {
            return Ok(());
        }

        let size = PhysicalSize::new(
            self.options.resolution.width,
            self.options.resolution.height,
        );
        let mut attrs = Window::default_attributes()
            .with_title("Picture Frame")
            .with_inner_size(size);
        if self.options.fullscreen {
            attrs = attrs
                .with_decorations(false)
                .with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        let window = event_loop
            .create_window(attrs)
            .context("failed to create window")?;
        if self.options.fullscreen {
            window.set_fullscreen(Some(Fullscreen::Borderless(window.current_monitor())));
        }
        window.set_cursor_visible(false);
        let window = WindowHandle::new(window);

        let context = SoftContext::new(window.clone())
            .map_err(|err| anyhow!("failed to create softbuffer context: {err}"))?;
        let surface = Surface::new(&context, window.clone())
            .map_err(|err| anyhow!("failed to create softbuffer surface: {err}"))?;

        self._context = Some(context);
        self.surface = Some(surface);
        self.window = Some(window.clone());
        self.handle_resize(window.inner_size());
        info!(
            fullscreen = self.options.fullscreen,
            width = window.inner_size().width,
            height = window.inner_size().height,
            "display window ready"
        );
        Ok(())
    }

    fn handle_resize(&mut self, size: PhysicalSize<u32>) {
        if let Some(surface) = self.surface.as_mut()
            && let (Some(width), Some(height)) = (
                NonZeroU32::new(size.width.max(1)),
                NonZeroU32::new(size.height.max(1)),
            )
        {
            if let Err(err) = surface.resize(width, height) {
                warn!("failed to resize surface: {err}");
            }
            if self.display.power_state() == PowerState::Off
                && let Some(mut sink) = self.sink()
                && let Err(err) = sink.blank()
            {
                warn!("failed to blank output: {err:#}");
            }
        }
    }

    fn sink(&mut self) -> Option<SurfaceSink<'_>> {
        let size = self.window.as_ref()?.inner_size();
        let surface = self.surface.as_mut()?;
        Some(SurfaceSink {
            surface,
            width: size.width.max(1),
            height: size.height.max(1),
        })
    }

    fn tick(&mut self, event_loop: &ActiveEventLoop) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        let size = window.inner_size();
        let Some(surface) = self.surface.as_mut() else {
            return;
        };
        let mut sink = SurfaceSink {
            surface,
            width: size.width.max(1),
            height: size.height.max(1),
        };
        if self.display.tick(&mut sink) == TickOutcome::Exit {
            event_loop.exit();
        }
    }

    fn handle_key(&mut self, key: &Key) {
        for command in key_commands(key, self.display.power_state()) {
            debug!(?command, "key pressed");
            self.send(command);
        }
    }

    fn send(&self, command: Command) {
        if let Err(err) = self.commands.send(command) {
            warn!(?command, "display loop stopped listening: {err}");
        }
    }
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(err) = self.ensure_window(event_loop) {
            self.fatal = Some(err);
            event_loop.exit();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if window.id() != window_id {
            return;
        }
        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                self.send(Command::Exit);
                self.tick(event_loop);
            }
            WindowEvent::Resized(size) => self.handle_resize(size),
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed && !event.repeat =>
            {
                self.handle_key(&event.logical_key);
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let now = Instant::now();
        if now >= self.next_tick {
            self.tick(event_loop);
            self.next_tick += self.options.frame_interval;
            if self.next_tick <= now {
                // fell behind; don't try to catch up
                self.next_tick = now + self.options.frame_interval;
            }
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(self.next_tick));
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.display.shutdown();
        self.surface = None;
        self._context = None;
        self.window = None;
        info!("display window closed");
    }
}

struct SurfaceSink<'a> {
    surface: &'a mut Surface<WindowHandle, WindowHandle>,
    width: u32,
    height: u32,
}

impl FrameSink for SurfaceSink<'_> {
    fn present(&mut self, frame: &RgbImage) -> Result<()> {
        let mut buffer = self
            .surface
            .buffer_mut()
            .map_err(|err| anyhow!("failed to map surface buffer: {err}"))?;
        blit_into(&mut buffer, self.width, self.height, frame);
        buffer
            .present()
            .map_err(|err| anyhow!("failed to present frame: {err}"))
    }

    fn blank(&mut self) -> Result<()> {
        let mut buffer = self
            .surface
            .buffer_mut()
            .map_err(|err| anyhow!("failed to map surface buffer: {err}"))?;
        buffer.fill(BLACK);
        buffer
            .present()
            .map_err(|err| anyhow!("failed to present blank frame: {err}"))
    }
}

const BLACK: u32 = 0xFF00_0000;

#[inline]
fn pack_rgb(rgb: [u8; 3]) -> u32 {
    0xFF00_0000 | ((rgb[0] as u32) << 16) | ((rgb[1] as u32) << 8) | rgb[2] as u32
}

/// Copy `frame` centered into a `width` x `height` XRGB buffer, clipping
/// whatever does not fit and filling the rest black.
pub fn blit_into(buffer: &mut [u32], width: u32, height: u32, frame: &RgbImage) {
    buffer.fill(BLACK);
    let (fw, fh) = frame.dimensions();
    let (ox, oy) = center_offset(fw, fh, width, height);
    let stride = width as usize;
    for y in 0..height as i64 {
        let sy = y - oy;
        if sy < 0 || sy >= fh as i64 {
            continue;
        }
        let row = y as usize * stride;
        let x_start = ox.max(0);
        let x_end = (ox + fw as i64).min(width as i64);
        for x in x_start..x_end {
            let sx = (x - ox) as u32;
            if let Some(slot) = buffer.get_mut(row + x as usize) {
                *slot = pack_rgb(frame.get_pixel(sx, sy as u32).0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use winit::keyboard::SmolStr;

    #[test]
    fn maps_keys_to_commands() {
        assert_eq!(command_for_key(&Key::Named(NamedKey::Escape)), Some(Command::Exit));
        assert_eq!(command_for_key(&Key::Named(NamedKey::Space)), Some(Command::NextImage));
        assert_eq!(
            command_for_key(&Key::Named(NamedKey::ArrowRight)),
            Some(Command::NextImage)
        );
        assert_eq!(
            command_for_key(&Key::Character(SmolStr::new("B"))),
            Some(Command::TogglePower)
        );
        assert_eq!(
            command_for_key(&Key::Character(SmolStr::new("r"))),
            Some(Command::Reload)
        );
        assert_eq!(command_for_key(&Key::Character(SmolStr::new("q"))), Some(Command::Exit));
        assert_eq!(command_for_key(&Key::Character(SmolStr::new("x"))), None);
        assert_eq!(command_for_key(&Key::Named(NamedKey::Enter)), None);
    }

    #[test]
    fn keys_wake_the_panel_while_off() {
        let space = Key::Named(NamedKey::Space);
        let other = Key::Character(SmolStr::new("x"));
        assert_eq!(key_commands(&space, PowerState::Active), vec![Command::NextImage]);
        assert!(key_commands(&other, PowerState::Active).is_empty());

        assert_eq!(
            key_commands(&space, PowerState::Off),
            vec![Command::Wake, Command::NextImage]
        );
        assert_eq!(
            key_commands(&Key::Character(SmolStr::new("r")), PowerState::Off),
            vec![Command::Wake, Command::Reload]
        );
        assert_eq!(key_commands(&other, PowerState::Off), vec![Command::Wake]);
        assert_eq!(
            key_commands(&Key::Named(NamedKey::Escape), PowerState::Off),
            vec![Command::Exit]
        );
        assert_eq!(
            key_commands(&Key::Character(SmolStr::new("b")), PowerState::Off),
            vec![Command::TogglePower]
        );
    }

    #[test]
    fn blit_centers_smaller_frames() {
        let frame = RgbImage::from_pixel(2, 2, Rgb([0x12, 0x34, 0x56]));
        let mut buffer = vec![0u32; 4 * 4];
        blit_into(&mut buffer, 4, 4, &frame);
        assert_eq!(buffer[0], BLACK);
        assert_eq!(buffer[4 + 1], 0xFF12_3456);
        assert_eq!(buffer[2 * 4 + 2], 0xFF12_3456);
        assert_eq!(buffer[3 * 4 + 3], BLACK);
    }

    #[test]
    fn blit_clips_larger_frames() {
        let frame = RgbImage::from_fn(6, 2, |x, _| Rgb([x as u8, 0, 0]));
        let mut buffer = vec![0u32; 2 * 2];
        blit_into(&mut buffer, 2, 2, &frame);
        // Columns 2 and 3 of the frame land in the window.
        assert_eq!(buffer, vec![0xFF02_0000, 0xFF03_0000, 0xFF02_0000, 0xFF03_0000]);
    }
}
