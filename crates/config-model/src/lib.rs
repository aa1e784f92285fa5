//! Configuration document shared by the display engine and the settings web UI.
//!
//! The document is JSON on disk (YAML is accepted for hand-written files).
//! Keys the engine does not understand are carried through load/save untouched
//! so that sections owned by the web UI survive an engine-side save.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unknown keys preserved verbatim.
pub type ExtraFields = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Configuration {
    pub display: DisplayConfig,
    pub sources: SourcesConfig,
    pub overlays: OverlaysConfig,
    pub power: PowerConfig,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Output frame size in pixels, serialized as `[width, height]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u32; 2]", into = "[u32; 2]")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl From<[u32; 2]> for Resolution {
    fn from([width, height]: [u32; 2]) -> Self {
        Self { width, height }
    }
}

impl From<Resolution> for [u32; 2] {
    fn from(res: Resolution) -> Self {
        [res.width, res.height]
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub resolution: Resolution,
    /// Seconds each image stays on screen.
    pub slideshow_interval: f64,
    pub fullscreen: bool,
    /// Loop ticks per second.
    pub frame_rate: u32,
    pub enable_power_save: bool,
    /// Seconds the panel stays on before the power cycle blanks it.
    pub power_save_slideshow_duration: f64,
    /// Seconds the panel stays off before it is woken again.
    pub power_save_blank_duration: f64,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            slideshow_interval: 30.0,
            fullscreen: true,
            frame_rate: 30,
            enable_power_save: true,
            power_save_slideshow_duration: 60.0,
            power_save_blank_duration: 30.0,
            extra: ExtraFields::new(),
        }
    }
}

impl DisplayConfig {
    pub fn interval(&self) -> Duration {
        secs_or(self.slideshow_interval, 30.0)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.frame_rate.max(1)
    }

    /// Length of the powered-on window, `None` when the timed cycle is disabled.
    pub fn active_window(&self) -> Option<Duration> {
        self.enable_power_save
            .then(|| secs_or(self.power_save_slideshow_duration, 60.0))
    }

    /// Length of the powered-off window. Also bounds a manual power-off when
    /// the timed cycle is disabled.
    pub fn blank_window(&self) -> Duration {
        secs_or(self.power_save_blank_duration, 30.0)
    }
}

fn secs_or(value: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(value)
        .ok()
        .filter(|d| !d.is_zero())
        .unwrap_or_else(|| Duration::from_secs_f64(fallback))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SourcesConfig {
    pub local_paths: Vec<PathBuf>,
    /// Mount points of network shares, scanned after the local paths.
    pub unraid_shares: Vec<PathBuf>,
    pub shuffle: bool,
    pub shuffle_seed: Option<u64>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaysConfig {
    pub clock: OverlayConfig,
    pub date: OverlayConfig,
    pub layout: BarLayout,
    pub position: BarPosition,
    pub font_family: String,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Default for OverlaysConfig {
    fn default() -> Self {
        Self {
            clock: OverlayConfig::default(),
            date: OverlayConfig::default(),
            layout: BarLayout::default(),
            position: BarPosition::default(),
            font_family: "Arial".to_string(),
            extra: ExtraFields::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub enabled: bool,
    /// strftime-style pattern; the overlay's built-in default applies when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub font_size: f32,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: None,
            font_size: 48.0,
            extra: ExtraFields::new(),
        }
    }
}

impl OverlayConfig {
    pub fn format_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.format.as_deref().unwrap_or(default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BarLayout {
    /// One shared bar: date on the left, clock on the right.
    #[default]
    SideBySide,
    /// One bar per overlay, clock first.
    Stacked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BarPosition {
    #[default]
    Top,
    Bottom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    /// Shell command that powers the panel down; `@OUTPUT@` expands to the
    /// detected output name.
    pub sleep_command: Option<String>,
    pub wake_command: Option<String>,
    pub idle_inhibit_command: Option<String>,
    pub idle_release_command: Option<String>,
    pub backlight: Option<BacklightConfig>,
    pub command_timeout_ms: u64,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            sleep_command: None,
            wake_command: None,
            idle_inhibit_command: None,
            idle_release_command: None,
            backlight: None,
            command_timeout_ms: 2000,
            extra: ExtraFields::new(),
        }
    }
}

impl PowerConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklightConfig {
    pub path: PathBuf,
    pub sleep_value: String,
    pub wake_value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    fn for_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("yaml" | "yml") => Self::Yaml,
            _ => Self::Json,
        }
    }
}

impl Configuration {
    /// Read a configuration document, picking the parser from the file extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration at {}", path.display()))?;
        Self::parse(&raw, DocumentFormat::for_path(path))
            .with_context(|| format!("failed to parse configuration at {}", path.display()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Self::parse(raw, DocumentFormat::Json)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        Self::parse(raw, DocumentFormat::Yaml)
    }

    fn parse(raw: &str, format: DocumentFormat) -> Result<Self> {
        Ok(match format {
            DocumentFormat::Json => serde_json::from_str(raw)?,
            DocumentFormat::Yaml => serde_yaml::from_str(raw)?,
        })
    }

    /// Write the document next to `path` and rename it into place so a
    /// concurrent reader never observes a partial file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let body = match DocumentFormat::for_path(path) {
            DocumentFormat::Json => serde_json::to_string_pretty(self)?,
            DocumentFormat::Yaml => serde_yaml::to_string(self)?,
        };
        let file_name = path
            .file_name()
            .with_context(|| format!("{} has no file name", path.display()))?;
        let mut tmp_name = std::ffi::OsString::from(".");
        tmp_name.push(file_name);
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);
        fs::write(&tmp, body)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        let display = &self.display;
        ensure!(
            display.resolution.width > 0 && display.resolution.height > 0,
            "display.resolution must be positive, got {}x{}",
            display.resolution.width,
            display.resolution.height
        );
        ensure!(
            display.slideshow_interval.is_finite() && display.slideshow_interval > 0.0,
            "display.slideshow_interval must be a positive number of seconds"
        );
        ensure!(
            (1..=240).contains(&display.frame_rate),
            "display.frame_rate must be between 1 and 240"
        );
        ensure!(
            display.power_save_slideshow_duration.is_finite()
                && display.power_save_slideshow_duration > 0.0,
            "display.power_save_slideshow_duration must be positive"
        );
        ensure!(
            display.power_save_blank_duration.is_finite()
                && display.power_save_blank_duration > 0.0,
            "display.power_save_blank_duration must be positive"
        );

        for (name, overlay) in [("clock", &self.overlays.clock), ("date", &self.overlays.date)] {
            ensure!(
                overlay.font_size.is_finite() && overlay.font_size > 0.0,
                "overlays.{name}.font_size must be greater than zero"
            );
        }
        ensure!(
            !self.overlays.font_family.trim().is_empty(),
            "overlays.font_family must not be blank"
        );

        let power = &self.power;
        for (name, command) in [
            ("sleep_command", &power.sleep_command),
            ("wake_command", &power.wake_command),
            ("idle_inhibit_command", &power.idle_inhibit_command),
            ("idle_release_command", &power.idle_release_command),
        ] {
            if let Some(command) = command {
                ensure!(!command.trim().is_empty(), "power.{name} must not be blank");
            }
        }
        if let Some(backlight) = &power.backlight {
            ensure!(
                !backlight.path.as_os_str().is_empty(),
                "power.backlight.path must not be empty"
            );
        }
        ensure!(
            power.command_timeout_ms > 0,
            "power.command_timeout_ms must be greater than zero"
        );
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = Configuration::from_json_str("{}").unwrap().validated().unwrap();
        assert_eq!(cfg.display.resolution, Resolution::new(1920, 1080));
        assert_eq!(cfg.display.interval(), Duration::from_secs(30));
        assert_eq!(cfg.display.active_window(), Some(Duration::from_secs(60)));
        assert_eq!(cfg.display.blank_window(), Duration::from_secs(30));
        assert!(cfg.overlays.clock.enabled);
        assert_eq!(cfg.overlays.clock.format_or("%H:%M"), "%H:%M");
        assert_eq!(cfg.overlays.layout, BarLayout::SideBySide);
        assert_eq!(cfg.power.command_timeout(), Duration::from_millis(2000));
    }

    #[test]
    fn parses_web_ui_document() {
        let raw = r#"{
            "display": {
                "resolution": [1280, 800],
                "slideshow_interval": 12,
                "fullscreen": false,
                "enable_power_save": false
            },
            "sources": {
                "local_paths": ["/photos"],
                "unraid_shares": ["/mnt/unraid/photos"]
            },
            "overlays": {
                "clock": {"enabled": true, "format": "%I:%M", "font_size": 40, "position": "top-right"},
                "date": {"enabled": false, "format": "%d.%m.%Y", "font_size": 32},
                "weather": {"enabled": false, "api_key": ""}
            },
            "web_ui": {"port": 5000}
        }"#;
        let cfg = Configuration::from_json_str(raw).unwrap().validated().unwrap();
        assert_eq!(cfg.display.resolution, Resolution::new(1280, 800));
        assert_eq!(cfg.display.interval(), Duration::from_secs(12));
        assert_eq!(cfg.display.active_window(), None);
        assert_eq!(cfg.sources.unraid_shares, vec![PathBuf::from("/mnt/unraid/photos")]);
        assert_eq!(cfg.overlays.clock.format_or("%H:%M"), "%I:%M");
        assert!(!cfg.overlays.date.enabled);
        assert!(cfg.overlays.extra.contains_key("weather"));
        assert!(cfg.overlays.clock.extra.contains_key("position"));
        assert!(cfg.extra.contains_key("web_ui"));
    }

    #[test]
    fn parses_yaml_document() {
        let yaml = r#"
display:
  resolution: [800, 480]
overlays:
  layout: stacked
  position: bottom
power:
  sleep_command: "wlr-randr --output @OUTPUT@ --off"
  backlight:
    path: /sys/class/backlight/10-0045/bl_power
    sleep_value: "1"
    wake_value: "0"
"#;
        let cfg = Configuration::from_yaml_str(yaml).unwrap().validated().unwrap();
        assert_eq!(cfg.display.resolution, Resolution::new(800, 480));
        assert_eq!(cfg.overlays.layout, BarLayout::Stacked);
        assert_eq!(cfg.overlays.position, BarPosition::Bottom);
        assert_eq!(
            cfg.power.backlight.as_ref().map(|b| b.sleep_value.as_str()),
            Some("1")
        );
    }

    #[test]
    fn rejects_zero_resolution() {
        let err = Configuration::from_json_str(r#"{"display": {"resolution": [0, 1080]}}"#)
            .unwrap()
            .validated()
            .unwrap_err();
        assert!(err.to_string().contains("resolution"));
    }

    #[test]
    fn rejects_non_positive_font_size() {
        let err = Configuration::from_json_str(r#"{"overlays": {"date": {"font_size": 0}}}"#)
            .unwrap()
            .validated()
            .unwrap_err();
        assert!(err.to_string().contains("overlays.date.font_size"));
    }

    #[test]
    fn rejects_blank_power_command() {
        let err = Configuration::from_json_str(r#"{"power": {"wake_command": "  "}}"#)
            .unwrap()
            .validated()
            .unwrap_err();
        assert!(err.to_string().contains("wake_command"));
    }

    #[test]
    fn save_round_trips_unknown_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let raw = r#"{"web_ui": {"port": 5000}, "display": {"slideshow_interval": 5, "brightness": 0.7}}"#;
        let cfg = Configuration::from_json_str(raw).unwrap();
        cfg.save(&path).unwrap();

        let reloaded = Configuration::load(&path).unwrap();
        assert_eq!(reloaded, cfg);
        assert_eq!(reloaded.extra.get("web_ui"), Some(&serde_json::json!({"port": 5000})));
        assert!(reloaded.display.extra.contains_key("brightness"));
        assert!(!dir.path().join(".config.json.tmp").exists());
    }

    #[test]
    fn load_reports_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let err = Configuration::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("broken.json"));
    }
}
