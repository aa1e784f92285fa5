use std::fmt;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use config_model::PowerConfig;
use tracing::{debug, info, warn};

use crate::error::PowerControlError;

/// Platform control over the physical panel.
pub trait DisplayPower {
    fn monitor_off(&mut self) -> Result<(), PowerControlError>;
    fn monitor_on(&mut self) -> Result<(), PowerControlError>;
    /// Hold (`true`) or release (`false`) the OS idle/screensaver inhibit.
    fn set_idle_inhibit(&mut self, inhibit: bool) -> Result<(), PowerControlError>;
}

/// Backend used when no power control is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDisplayPower;

impl DisplayPower for NoopDisplayPower {
    fn monitor_off(&mut self) -> Result<(), PowerControlError> {
        debug!("display power: monitor off (no backend)");
        Ok(())
    }

    fn monitor_on(&mut self) -> Result<(), PowerControlError> {
        debug!("display power: monitor on (no backend)");
        Ok(())
    }

    fn set_idle_inhibit(&mut self, inhibit: bool) -> Result<(), PowerControlError> {
        debug!(inhibit, "display power: idle inhibit (no backend)");
        Ok(())
    }
}

/// Pick the command backend when anything is configured, otherwise a no-op.
pub fn backend_for(cfg: &PowerConfig) -> Box<dyn DisplayPower> {
    let plan = DisplayPowerPlan::from_config(cfg);
    if plan.is_empty() {
        warn!("no display power control configured; power cycle only blanks the picture");
        return Box::new(NoopDisplayPower);
    }
    match CommandDisplayPower::new(plan) {
        Ok(backend) => Box::new(backend),
        Err(err) => {
            warn!("{err:#}; display power control disabled");
            Box::new(NoopDisplayPower)
        }
    }
}

#[derive(Debug, Clone)]
pub struct DisplayPowerPlan {
    pub sysfs: Option<BacklightSysfs>,
    pub sleep_command: Option<String>,
    pub wake_command: Option<String>,
    pub idle_inhibit_command: Option<String>,
    pub idle_release_command: Option<String>,
    pub command_timeout: Duration,
}

impl Default for DisplayPowerPlan {
    fn default() -> Self {
        Self {
            sysfs: None,
            sleep_command: None,
            wake_command: None,
            idle_inhibit_command: None,
            idle_release_command: None,
            command_timeout: Duration::from_secs(2),
        }
    }
}

impl DisplayPowerPlan {
    pub fn from_config(cfg: &PowerConfig) -> Self {
        Self {
            sysfs: cfg.backlight.as_ref().map(|b| BacklightSysfs {
                path: b.path.clone(),
                sleep_value: b.sleep_value.clone(),
                wake_value: b.wake_value.clone(),
            }),
            sleep_command: cfg.sleep_command.clone(),
            wake_command: cfg.wake_command.clone(),
            idle_inhibit_command: cfg.idle_inhibit_command.clone(),
            idle_release_command: cfg.idle_release_command.clone(),
            command_timeout: cfg.command_timeout(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sysfs.is_none()
            && self.sleep_command.is_none()
            && self.wake_command.is_none()
            && self.idle_inhibit_command.is_none()
            && self.idle_release_command.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct BacklightSysfs {
    pub path: PathBuf,
    pub sleep_value: String,
    pub wake_value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Sleep,
    Wake,
    InhibitIdle,
    ReleaseIdle,
}

#[derive(Debug, Clone)]
pub struct PowerCommandReport {
    pub action: PowerAction,
    pub output: Option<OutputSelection>,
    pub sysfs: Vec<SysfsExecution>,
    pub commands: Vec<CommandExecution>,
}

impl PowerCommandReport {
    pub fn success(&self) -> bool {
        self.sysfs.iter().any(|s| s.success) || self.commands.iter().any(|c| c.success)
    }

    /// Whether anything was configured for this action.
    pub fn attempted(&self) -> bool {
        !self.sysfs.is_empty() || !self.commands.is_empty()
    }

    fn failure_detail(&self) -> String {
        let sysfs = self.sysfs.iter().filter_map(|s| {
            s.error
                .as_ref()
                .map(|err| format!("{}: {err}", s.path.display()))
        });
        let commands = self.commands.iter().map(|c| {
            let exit = c
                .exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "none".to_string());
            format!("`{}` exit={exit} {}", c.command, c.stderr.trim())
        });
        sysfs.chain(commands).collect::<Vec<_>>().join("; ")
    }

    fn into_result(self) -> Result<(), PowerControlError> {
        if !self.attempted() || self.success() {
            Ok(())
        } else {
            Err(PowerControlError {
                action: self.action,
                detail: self.failure_detail(),
            })
        }
    }
}

#[derive(Debug, Clone)]
pub struct SysfsExecution {
    pub path: PathBuf,
    pub value: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommandExecution {
    pub command: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone)]
pub struct OutputSelection {
    pub name: String,
    pub source: OutputSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSource {
    Autodetected,
    Fallback,
}

type CommandRunner = Arc<dyn Fn(&str, Duration) -> Result<CommandOutput> + Send + Sync>;

#[derive(Debug, Clone)]
struct CommandTemplate {
    raw: String,
    needs_output: bool,
}

/// Drives the panel through a backlight sysfs node and/or shell commands.
/// Every command is killed if it outlives the configured timeout.
pub struct CommandDisplayPower {
    sysfs: Option<BacklightSysfs>,
    sleep_command: Option<CommandTemplate>,
    wake_command: Option<CommandTemplate>,
    idle_inhibit_command: Option<CommandTemplate>,
    idle_release_command: Option<CommandTemplate>,
    timeout: Duration,
    runner: CommandRunner,
    output_cache: Option<OutputSelection>,
}

impl fmt::Debug for CommandDisplayPower {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDisplayPower")
            .field("sysfs", &self.sysfs)
            .field("sleep_command", &self.sleep_command)
            .field("wake_command", &self.wake_command)
            .field("idle_inhibit_command", &self.idle_inhibit_command)
            .field("idle_release_command", &self.idle_release_command)
            .field("timeout", &self.timeout)
            .field("output", &self.output_cache)
            .finish()
    }
}

impl CommandDisplayPower {
    pub fn new(plan: DisplayPowerPlan) -> Result<Self> {
        Self::build(plan, default_runner())
    }

    pub fn sleep(&mut self) -> PowerCommandReport {
        self.perform(PowerAction::Sleep)
    }

    pub fn wake(&mut self) -> PowerCommandReport {
        self.perform(PowerAction::Wake)
    }

    fn build(plan: DisplayPowerPlan, runner: CommandRunner) -> Result<Self> {
        if plan.is_empty() {
            return Err(anyhow!(
                "display power plan must configure at least one sysfs path or command"
            ));
        }
        let DisplayPowerPlan {
            sysfs,
            sleep_command,
            wake_command,
            idle_inhibit_command,
            idle_release_command,
            command_timeout,
        } = plan;

        let template = |cmd: Option<String>, label: &str| {
            cmd.map(|cmd| {
                ensure_not_blank(&cmd, label)?;
                Ok::<_, anyhow::Error>(CommandTemplate::new(cmd))
            })
            .transpose()
        };

        Ok(Self {
            sysfs,
            sleep_command: template(sleep_command, "sleep command")?,
            wake_command: template(wake_command, "wake command")?,
            idle_inhibit_command: template(idle_inhibit_command, "idle inhibit command")?,
            idle_release_command: template(idle_release_command, "idle release command")?,
            timeout: command_timeout,
            runner,
            output_cache: None,
        })
    }

    #[cfg(test)]
    fn with_runner(plan: DisplayPowerPlan, runner: CommandRunner) -> Result<Self> {
        Self::build(plan, runner)
    }

    fn perform(&mut self, action: PowerAction) -> PowerCommandReport {
        let mut report = PowerCommandReport {
            action,
            output: None,
            sysfs: Vec::new(),
            commands: Vec::new(),
        };

        if let Some(sysfs) = &self.sysfs
            && matches!(action, PowerAction::Sleep | PowerAction::Wake)
        {
            report.sysfs.push(sysfs.execute(action));
        }

        if let Some(template) = self.command_for(action).cloned() {
            match self.prepare_command(&template) {
                PreparedCommand::Ready { command, selection } => {
                    if report.output.is_none() {
                        report.output = selection.clone();
                    }
                    let execution = self.run_shell(&command);
                    if execution.success {
                        debug!(
                            ?action,
                            output = selection.as_ref().map(|sel| sel.name.as_str()),
                            command,
                            "display power command succeeded"
                        );
                    } else {
                        let exit = execution
                            .exit_code
                            .map(|code| code.to_string())
                            .unwrap_or_else(|| "none".to_string());
                        warn!(
                            ?action,
                            exit_code = exit,
                            stderr = execution.stderr,
                            command,
                            "display power command failed"
                        );
                    }
                    report.commands.push(execution);
                }
                PreparedCommand::Skipped { reason } => {
                    warn!(?action, reason, "skipping display power command");
                    report.commands.push(CommandExecution {
                        command: reason,
                        success: false,
                        exit_code: None,
                        stdout: String::new(),
                        stderr: String::new(),
                    });
                }
            }
        }

        report
    }

    fn command_for(&self, action: PowerAction) -> Option<&CommandTemplate> {
        match action {
            PowerAction::Sleep => self.sleep_command.as_ref(),
            PowerAction::Wake => self.wake_command.as_ref(),
            PowerAction::InhibitIdle => self.idle_inhibit_command.as_ref(),
            PowerAction::ReleaseIdle => self.idle_release_command.as_ref(),
        }
    }

    fn prepare_command(&mut self, template: &CommandTemplate) -> PreparedCommand {
        if !template.needs_output {
            return PreparedCommand::Ready {
                command: template.raw.clone(),
                selection: None,
            };
        }

        let Some(selection) = self.resolve_output() else {
            return PreparedCommand::Skipped {
                reason: "no connected outputs detected".to_string(),
            };
        };
        let command = template.raw.replace("@OUTPUT@", &selection.name);
        PreparedCommand::Ready {
            command,
            selection: Some(selection),
        }
    }

    fn resolve_output(&mut self) -> Option<OutputSelection> {
        if let Some(sel) = self.output_cache.clone() {
            return Some(sel);
        }

        let selection = match detect_output(&*self.runner, self.timeout) {
            OutputDetection::Detected { name } => {
                info!(output = name, "auto-detected Wayland output");
                OutputSelection {
                    name,
                    source: OutputSource::Autodetected,
                }
            }
            OutputDetection::Fallback { name } => {
                warn!(output = name, "falling back to default output name");
                OutputSelection {
                    name,
                    source: OutputSource::Fallback,
                }
            }
            OutputDetection::Unavailable => return None,
        };
        self.output_cache = Some(selection.clone());
        Some(selection)
    }

    fn run_shell(&self, command: &str) -> CommandExecution {
        match (self.runner)(command, self.timeout) {
            Ok(output) => CommandExecution {
                command: command.to_string(),
                success: output.status.success(),
                exit_code: output.status.code(),
                stdout: output.stdout,
                stderr: output.stderr,
            },
            Err(err) => CommandExecution {
                command: command.to_string(),
                success: false,
                exit_code: None,
                stdout: String::new(),
                stderr: format!("{err:#}"),
            },
        }
    }
}

impl DisplayPower for CommandDisplayPower {
    fn monitor_off(&mut self) -> Result<(), PowerControlError> {
        self.sleep().into_result()
    }

    fn monitor_on(&mut self) -> Result<(), PowerControlError> {
        self.wake().into_result()
    }

    fn set_idle_inhibit(&mut self, inhibit: bool) -> Result<(), PowerControlError> {
        let action = if inhibit {
            PowerAction::InhibitIdle
        } else {
            PowerAction::ReleaseIdle
        };
        self.perform(action).into_result()
    }
}

impl BacklightSysfs {
    fn execute(&self, action: PowerAction) -> SysfsExecution {
        let value = match action {
            PowerAction::Sleep => &self.sleep_value,
            _ => &self.wake_value,
        };

        match fs::write(&self.path, value) {
            Ok(()) => {
                debug!(
                    path = %self.path.display(),
                    value,
                    ?action,
                    "wrote backlight value"
                );
                SysfsExecution {
                    path: self.path.clone(),
                    value: value.clone(),
                    success: true,
                    error: None,
                }
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    value,
                    ?action,
                    error = %err,
                    "failed to write backlight value"
                );
                SysfsExecution {
                    path: self.path.clone(),
                    value: value.clone(),
                    success: false,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

#[derive(Debug)]
struct CommandOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

#[derive(Debug)]
enum PreparedCommand {
    Ready {
        command: String,
        selection: Option<OutputSelection>,
    },
    Skipped {
        reason: String,
    },
}

#[derive(Debug)]
enum OutputDetection {
    Detected { name: String },
    Fallback { name: String },
    Unavailable,
}

const FALLBACK_OUTPUT: &str = "HDMI-A-1";

fn detect_output(
    runner: &dyn Fn(&str, Duration) -> Result<CommandOutput>,
    timeout: Duration,
) -> OutputDetection {
    match runner("wlr-randr", timeout) {
        Ok(output) if output.status.success() => {
            if let Some(name) = parse_wlr_randr_outputs(&output.stdout) {
                OutputDetection::Detected { name }
            } else {
                warn!("wlr-randr returned no connected outputs");
                OutputDetection::Unavailable
            }
        }
        Ok(output) => {
            warn!(
                exit = ?output.status.code(),
                stderr = output.stderr,
                "wlr-randr command failed"
            );
            OutputDetection::Fallback {
                name: FALLBACK_OUTPUT.to_string(),
            }
        }
        Err(err) => {
            warn!(error = %err, "failed to invoke wlr-randr; using fallback output");
            OutputDetection::Fallback {
                name: FALLBACK_OUTPUT.to_string(),
            }
        }
    }
}

fn parse_wlr_randr_outputs(stdout: &str) -> Option<String> {
    let mut fallback = None;
    for line in stdout.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.split_whitespace();
        let name = parts.next()?;
        if parts.next() != Some("connected") {
            continue;
        }
        // Prefer an external panel over a built-in one.
        if !name.starts_with("eDP") && !name.starts_with("LVDS") {
            return Some(name.to_string());
        }
        if fallback.is_none() {
            fallback = Some(name.to_string());
        }
    }
    fallback
}

fn ensure_not_blank(value: &str, label: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(anyhow!("{label} must not be blank"))
    } else {
        Ok(())
    }
}

fn default_runner() -> CommandRunner {
    Arc::new(run_shell)
}

fn run_shell(command: &str, timeout: Duration) -> Result<CommandOutput> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn shell for command: {command}"))?;

    // Both pipes must be drained while waiting; a full pipe blocks the child.
    let stdout = child.stdout.take().map(drain_pipe);
    let stderr = child.stderr.take().map(drain_pipe);

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("failed to poll command: {command}"))?
        {
            break status;
        }
        if Instant::now() >= deadline {
            if let Err(err) = child.kill() {
                debug!(command, "failed to kill timed-out command: {err}");
            }
            let _ = child.wait();
            return Err(anyhow!("command timed out after {timeout:?}: {command}"));
        }
        thread::sleep(Duration::from_millis(10));
    };

    Ok(CommandOutput {
        status,
        stdout: collect_pipe(stdout),
        stderr: collect_pipe(stderr),
    })
}

fn drain_pipe(mut pipe: impl Read + Send + 'static) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Err(err) = pipe.read_to_end(&mut bytes) {
            debug!("failed to read command output: {err}");
        }
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

fn collect_pipe(reader: Option<thread::JoinHandle<String>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

impl CommandTemplate {
    fn new(raw: String) -> Self {
        let needs_output = raw.contains("@OUTPUT@");
        Self { raw, needs_output }
    }
}
