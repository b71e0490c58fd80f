//! File system watcher for scene containers.
//!
//! Turns debounced file events under the scenes directory into container
//! events. A scene path whose file is gone after the debounce window is a
//! deletion; anything else touching a scene file is a change.

use super::directory::SceneDirectory;
use crate::config::RegistryConfig;
use crate::types::ScopeKey;
use crate::{RegistryError, Result};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Something happened to a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEvent {
    Deleted(ScopeKey),
    Changed(ScopeKey),
}

/// Callback invoked from the watcher thread.
pub type EventCallback = Box<dyn Fn(ContainerEvent) + Send + Sync + 'static>;

pub struct SceneWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
    stop_tx: mpsc::Sender<()>,
}

impl SceneWatcher {
    /// Start watching `scenes`.
    ///
    /// The scenes root must exist. Events arrive on a background thread;
    /// the callback is responsible for serializing any registry access.
    pub fn new(scenes: &SceneDirectory, debounce: Duration, on_event: EventCallback) -> Result<Self> {
        let root = scenes.root().to_path_buf();
        if !root.is_dir() {
            return Err(RegistryError::Watch {
                message: format!("Scenes directory {} does not exist", root.display()),
            });
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (event_tx, event_rx) = mpsc::channel::<DebounceEventResult>();

        let mut debouncer = new_debouncer(debounce, event_tx)?;
        debouncer.watcher().watch(&root, RecursiveMode::Recursive)?;
        info!("Watching scenes at {}", root.display());

        let scenes = scenes.clone();
        std::thread::spawn(move || loop {
            if stop_rx.try_recv().is_ok() {
                debug!("Scene watcher stopping");
                break;
            }

            match event_rx.recv_timeout(RegistryConfig::WATCH_POLL_INTERVAL) {
                Ok(Ok(events)) => {
                    for event in classify(&scenes, events.iter().map(|e| e.path.as_path())) {
                        on_event(event);
                    }
                }
                Ok(Err(e)) => warn!("Scene watcher error: {}", e),
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    warn!("Scene watcher channel disconnected");
                    break;
                }
            }
        });

        Ok(Self {
            _debouncer: debouncer,
            stop_tx,
        })
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

/// Collapse one debounced batch into at most one event per scope.
///
/// Deletions come first so a scene moved within the batch has released its
/// old scope before the new one is looked at.
fn classify<'a>(
    scenes: &SceneDirectory,
    paths: impl IntoIterator<Item = &'a Path>,
) -> Vec<ContainerEvent> {
    let mut by_scope: BTreeMap<ScopeKey, bool> = BTreeMap::new();
    for path in paths {
        if !scenes.is_scene_path(path) {
            continue;
        }
        match scenes.scope_for_path(path) {
            Ok(scope) => {
                by_scope.insert(scope, path.exists());
            }
            Err(e) => debug!("Ignoring event for {}: {}", path.display(), e),
        }
    }

    let (changed, deleted): (Vec<_>, Vec<_>) =
        by_scope.into_iter().partition(|(_, exists)| *exists);
    deleted
        .into_iter()
        .map(|(scope, _)| ContainerEvent::Deleted(scope))
        .chain(changed.into_iter().map(|(scope, _)| ContainerEvent::Changed(scope)))
        .collect()
}
