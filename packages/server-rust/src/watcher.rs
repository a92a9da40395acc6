//! Watches the config file for changes and emits reconfiguration intents.

use std::path::PathBuf;
use std::time::Duration;

use cloudkv_core::ConfigSnapshot;
use notify::event::ModifyKind;
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};

/// Errors the config watcher can report. A watcher error is always fatal
/// to the watcher task; the current running configuration continues
/// unchanged (spec.md §7, kind 5).
#[derive(Debug, thiserror::Error)]
pub enum ConfigWatchError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] cloudkv_core::config::ConfigError),
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// Whether an event should trigger a reconfiguration re-read.
///
/// The source this was distilled from filters with `!A || !B` where `A`
/// and `B` are "has rename" and "has remove" — true for almost every
/// event, the opposite of the evident intent. This filters out rename and
/// remove, passing through write/chmod as spec.md §4.4 describes.
fn is_reload_trigger(kind: &EventKind) -> bool {
    !matches!(
        kind,
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
    )
}

/// Spawns a blocking watcher task for `path`. Emits a freshly parsed
/// [`ConfigSnapshot`] on the first channel whenever a relevant change is
/// observed, and a fatal error on the second. Stops when `cancel` reports
/// `true` or when a watch-subsystem error occurs, releasing the OS watch
/// handle either way.
pub fn watch(
    path: PathBuf,
    cancel: watch::Receiver<bool>,
) -> (mpsc::Receiver<ConfigSnapshot>, mpsc::Receiver<ConfigWatchError>) {
    let (out_tx, out_rx) = mpsc::channel(1);
    let (err_tx, err_rx) = mpsc::channel(1);

    tokio::task::spawn_blocking(move || run(path, cancel, out_tx, err_tx));

    (out_rx, err_rx)
}

fn run(
    path: PathBuf,
    cancel: watch::Receiver<bool>,
    out_tx: mpsc::Sender<ConfigSnapshot>,
    err_tx: mpsc::Sender<ConfigWatchError>,
) {
    let (notify_tx, notify_rx) = std::sync::mpsc::channel();
    let config = Config::default().with_poll_interval(Duration::from_secs(2));

    let mut watcher = match RecommendedWatcher::new(notify_tx, config) {
        Ok(w) => w,
        Err(e) => {
            let _ = err_tx.blocking_send(ConfigWatchError::Watch(e));
            return;
        }
    };

    if let Err(e) = watcher.watch(&path, RecursiveMode::NonRecursive) {
        let _ = err_tx.blocking_send(ConfigWatchError::Watch(e));
        return;
    }

    tracing::info!(path = %path.display(), "config watcher started");

    loop {
        if *cancel.borrow() {
            tracing::debug!("config watcher cancelled");
            return;
        }

        match notify_rx.recv_timeout(Duration::from_millis(250)) {
            Ok(Ok(event)) => {
                if !is_reload_trigger(&event.kind) {
                    continue;
                }
                match std::fs::read_to_string(&path).map_err(ConfigWatchError::Io).and_then(
                    |contents| ConfigSnapshot::parse(&contents).map_err(ConfigWatchError::Parse),
                ) {
                    Ok(snapshot) => {
                        tracing::info!(?snapshot, "config change detected, reloading");
                        if out_tx.blocking_send(snapshot).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = err_tx.blocking_send(e);
                        return;
                    }
                }
            }
            Ok(Err(e)) => {
                let _ = err_tx.blocking_send(ConfigWatchError::Watch(e));
                return;
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, RemoveKind, RenameMode};

    #[test]
    fn write_and_chmod_trigger_reload() {
        assert!(is_reload_trigger(&EventKind::Modify(ModifyKind::Data(
            notify::event::DataChange::Content
        ))));
        assert!(is_reload_trigger(&EventKind::Create(CreateKind::File)));
    }

    #[test]
    fn remove_does_not_trigger_reload() {
        assert!(!is_reload_trigger(&EventKind::Remove(RemoveKind::File)));
    }

    #[test]
    fn rename_does_not_trigger_reload() {
        assert!(!is_reload_trigger(&EventKind::Modify(ModifyKind::Name(
            RenameMode::Any
        ))));
    }

    #[tokio::test]
    async fn cancelling_stops_the_watcher() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"logger":"File","frontend":"REST"}"#).unwrap();

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (_snapshots, mut errors) = watch(path, cancel_rx);
        cancel_tx.send(true).unwrap();

        // The watcher exits silently on cancellation; no error should ever
        // arrive on its error channel.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(errors.try_recv().is_err());
    }
}
