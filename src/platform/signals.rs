//! Unix signals as remote control:
//! SIGUSR1 toggles power, SIGUSR2 skips to the next image, SIGHUP reloads,
//! SIGINT/SIGTERM exit.

use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use tracing::{info, warn};

use crate::events::Command;

/// Listen for signals on a helper thread with its own single-threaded runtime.
pub fn spawn_signal_listener(tx: Sender<Command>) -> Result<JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || runtime.block_on(listen(tx)))
        .context("failed to spawn signal thread")
}

#[cfg(unix)]
async fn listen(tx: Sender<Command>) {
    use tokio::signal::unix::{SignalKind, signal};

    let streams = (
        signal(SignalKind::user_defined1()),
        signal(SignalKind::user_defined2()),
        signal(SignalKind::hangup()),
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    );
    let (Ok(mut usr1), Ok(mut usr2), Ok(mut hup), Ok(mut term), Ok(mut int)) = streams else {
        warn!("failed to register signal handlers; remote control disabled");
        return;
    };

    loop {
        let (name, command) = tokio::select! {
            Some(()) = usr1.recv() => ("SIGUSR1", Command::TogglePower),
            Some(()) = usr2.recv() => ("SIGUSR2", Command::NextImage),
            Some(()) = hup.recv() => ("SIGHUP", Command::Reload),
            Some(()) = term.recv() => ("SIGTERM", Command::Exit),
            Some(()) = int.recv() => ("SIGINT", Command::Exit),
            else => break,
        };
        info!(signal = name, ?command, "signal received");
        if tx.send(command).is_err() {
            // display loop is gone
            break;
        }
    }
}

#[cfg(not(unix))]
async fn listen(tx: Sender<Command>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("ctrl-c handler failed: {err}");
        return;
    }
    info!("ctrl-c received; initiating shutdown");
    let _ = tx.send(Command::Exit);
}
