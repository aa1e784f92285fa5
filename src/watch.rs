//! Watches the configuration document for external rewrites (the web UI
//! saves by writing a temp file and renaming it into place).

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crossbeam_channel::Sender;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::events::Command;

/// Start watching `config_path`. Changes are forwarded as
/// [`Command::ConfigChanged`]; the returned watcher must be kept alive.
pub fn watch_config(config_path: &Path, tx: Sender<Command>) -> notify::Result<RecommendedWatcher> {
    let config_path = config_path
        .canonicalize()
        .unwrap_or_else(|_| config_path.to_path_buf());
    let dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = config_path.file_name().map(OsString::from);

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if let Some(name) = &file_name
                && touches_config(&event, name)
            {
                debug!(kind = ?event.kind, "configuration file changed");
                let _ = tx.send(Command::ConfigChanged);
            }
        }
        Err(err) => warn!("config watch error: {err}"),
    })?;

    // Watch the directory, not the file: a rename-over replaces the inode.
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    info!(watching = %config_path.display(), "configuration watcher initialized");
    Ok(watcher)
}

fn touches_config(event: &Event, file_name: &OsString) -> bool {
    let relevant = matches!(
        event.kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Remove(_)
    );
    relevant
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind};
    use std::time::Duration;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn filters_by_file_name_and_kind() {
        let name = OsString::from("config.json");
        assert!(touches_config(
            &event(EventKind::Create(CreateKind::File), "/etc/frame/config.json"),
            &name
        ));
        assert!(touches_config(
            &event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                "/etc/frame/config.json"
            ),
            &name
        ));
        assert!(!touches_config(
            &event(EventKind::Create(CreateKind::File), "/etc/frame/other.json"),
            &name
        ));
        assert!(!touches_config(
            &event(
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)),
                "/etc/frame/config.json"
            ),
            &name
        ));
    }

    #[test]
    fn forwards_rewrites_of_the_watched_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{}").unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        let _watcher = watch_config(&path, tx).unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), "x").unwrap();
        std::fs::write(&path, r#"{"display": {}}"#).unwrap();

        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got, Command::ConfigChanged);
    }
}
