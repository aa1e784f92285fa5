use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use picture_frame::clock::SystemClock;
use picture_frame::config::Configuration;
use picture_frame::overlay::compositor::OverlayCompositor;
use picture_frame::platform::display_power::{
    CommandDisplayPower, DisplayPowerPlan, NoopDisplayPower, PowerCommandReport, backend_for,
};
use picture_frame::platform::signals::spawn_signal_listener;
use picture_frame::scan::build_catalog;
use picture_frame::tasks::display_loop::DisplayLoop;
use picture_frame::tasks::viewer::{self, ViewerOptions};
use picture_frame::watch::watch_config;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "picture-frame", version, about = "Fullscreen digital picture frame")]
struct Args {
    /// Path to the JSON (or YAML) configuration document
    #[arg(value_name = "CONFIG", default_value = "config.json")]
    config: PathBuf,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
    /// Open a regular window even when the configuration asks for fullscreen
    #[arg(long)]
    windowed: bool,
    /// Scan the configured sources, print the catalog as JSON and exit
    #[arg(long = "list-catalog")]
    list_catalog: bool,
    /// Render the first image with overlays to a PNG file and exit
    #[arg(long, value_name = "PNG")]
    snapshot: Option<PathBuf>,
    /// Turn the panel off for N seconds through the configured backend, then back on
    #[arg(long = "power-test", value_name = "SECONDS")]
    power_test: Option<u64>,
    /// Do not watch the configuration file for changes
    #[arg(long = "no-watch")]
    no_watch: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let cfg = Configuration::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?
        .validated()
        .context("invalid configuration values")?;
    tracing::debug!("loaded configuration from {}:\n{:#?}", args.config.display(), cfg);

    if args.list_catalog {
        let scan = build_catalog(&cfg.sources);
        let json = serde_json::to_string_pretty(&scan.catalog)
            .context("failed to serialize catalog")?;
        println!("{json}");
        return Ok(());
    }

    if let Some(seconds) = args.power_test {
        return run_power_test(&cfg, seconds);
    }

    if let Some(out) = args.snapshot.as_deref() {
        return write_snapshot(cfg, &args.config, out);
    }

    let (tx, rx) = crossbeam_channel::unbounded();
    let _watcher = if args.no_watch {
        None
    } else {
        match watch_config(&args.config, tx.clone()) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!("config watching disabled: {err}");
                None
            }
        }
    };
    let _signals = spawn_signal_listener(tx.clone())?;

    let options = ViewerOptions::from_config(&cfg.display, args.windowed);
    let compositor = OverlayCompositor::with_system_font(&cfg.overlays.font_family);
    let power = backend_for(&cfg.power);
    let display = DisplayLoop::new(
        cfg,
        args.config.clone(),
        power,
        Box::new(SystemClock),
        compositor,
        rx,
    );
    let image_count = display.catalog().len();
    info!(images = image_count, "starting slideshow");

    viewer::run(display, tx, options)
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let mut filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env()
        .context("invalid RUST_LOG filter")?
        .add_directive("winit=warn".parse()?)
        .add_directive("softbuffer=warn".parse()?);
    if verbosity > 0 {
        let level = if verbosity == 1 { "debug" } else { "trace" };
        filter = filter.add_directive(format!("picture_frame={level}").parse()?);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}

fn write_snapshot(cfg: Configuration, config_path: &Path, out: &Path) -> Result<()> {
    let (_tx, rx) = crossbeam_channel::unbounded();
    let compositor = OverlayCompositor::with_system_font(&cfg.overlays.font_family);
    let mut display = DisplayLoop::new(
        cfg,
        config_path,
        Box::new(NoopDisplayPower),
        Box::new(SystemClock),
        compositor,
        rx,
    );
    let frame = display.render_current();
    frame
        .save(out)
        .with_context(|| format!("failed to write snapshot to {}", out.display()))?;
    info!(path = %out.display(), "snapshot written");
    Ok(())
}

fn run_power_test(cfg: &Configuration, seconds: u64) -> Result<()> {
    let plan = DisplayPowerPlan::from_config(&cfg.power);
    if plan.is_empty() {
        bail!("--power-test requires a backlight path or sleep/wake commands under power");
    }
    let mut backend = CommandDisplayPower::new(plan)?;

    info!(duration = seconds, "power-test: requesting sleep");
    let report = backend.sleep();
    log_report("power-test sleep", &report);
    if !report.success() {
        bail!("power-test sleep failed");
    }

    thread::sleep(Duration::from_secs(seconds));

    info!("power-test: requesting wake");
    let report = backend.wake();
    log_report("power-test wake", &report);
    if !report.success() {
        warn!("power-test wake attempt 1 failed; retrying");
        thread::sleep(Duration::from_secs(2));
        let retry = backend.wake();
        log_report("power-test wake retry", &retry);
        if !retry.success() {
            bail!("power-test wake failed after retry");
        }
    }

    info!("power-test completed successfully");
    Ok(())
}

fn log_report(label: &str, report: &PowerCommandReport) {
    info!(
        label,
        action = ?report.action,
        output = report.output.as_ref().map(|sel| sel.name.as_str()),
        success = report.success(),
        commands = report.commands.len(),
        sysfs = report.sysfs.len(),
        "display power report"
    );
}
