//! File system watcher that turns source changes into reload triggers
//!
//! Uses the `notify` crate. Which event kinds count is decided by the
//! `watch_*` flags of the profile; hidden paths and `ignore`d components
//! never trigger. Bursts are folded later by the trigger receiver.
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────────┐
//! │   notify    │────>│ WatchFilter │────>│  TriggerSender   │
//! │   watcher   │     │ kind + path │     │ (FileChanged)    │
//! └─────────────┘     └─────────────┘     └─────────────────┘
//! ```

use std::path::{Component, Path, PathBuf};

use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::StoveConfig;
use crate::error::{Result, StoveError};
use crate::trigger::{ReloadReason, TriggerSender};

/// Decides which filesystem events are worth a reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchFilter {
    pub moved: bool,
    pub created: bool,
    pub deleted: bool,
    pub modified: bool,
    pub closed: bool,
    pub ignore: Vec<String>,
}

impl WatchFilter {
    pub fn from_config(config: &StoveConfig) -> Self {
        Self {
            moved: config.watch_moved,
            created: config.watch_created,
            deleted: config.watch_deleted,
            modified: config.watch_modified,
            closed: config.watch_closed,
            ignore: config.ignore.clone(),
        }
    }

    pub fn accepts_kind(&self, kind: &EventKind) -> bool {
        match kind {
            EventKind::Create(_) => self.created,
            EventKind::Remove(_) => self.deleted,
            EventKind::Modify(ModifyKind::Name(_)) => self.moved,
            EventKind::Modify(_) => self.modified,
            EventKind::Access(AccessKind::Close(AccessMode::Write)) => self.closed,
            _ => false,
        }
    }

    /// `path` is checked relative to `root`; hidden or ignored components reject it.
    pub fn accepts_path(&self, path: &Path, root: &Path) -> bool {
        let relative = path.strip_prefix(root).unwrap_or(path);
        relative.components().all(|component| match component {
            Component::Normal(name) => {
                let name = name.to_string_lossy();
                !name.starts_with('.') && !self.ignore.iter().any(|i| name == i.as_str())
            }
            _ => true,
        })
    }

    /// First path of `event` that should trigger a reload.
    pub fn matching_path<'a>(&self, event: &'a Event, root: &Path) -> Option<&'a PathBuf> {
        if !self.accepts_kind(&event.kind) {
            return None;
        }
        event.paths.iter().find(|p| self.accepts_path(p, root))
    }
}

/// Running watcher; dropping it stops the notifications.
pub struct WatcherHandle {
    root: PathBuf,
    _watcher: RecommendedWatcher,
}

impl WatcherHandle {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

pub struct FileWatcher;

impl FileWatcher {
    /// Watch `config.watch_dir` and fire `FileChanged` triggers into `triggers`.
    pub fn start(config: &StoveConfig, triggers: TriggerSender) -> Result<WatcherHandle> {
        let root = std::fs::canonicalize(&config.watch_dir)?;
        let filter = WatchFilter::from_config(config);
        let mode = if config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        let event_root = root.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    tracing::trace!("[WATCHER] Event kind: {:?}, paths: {:?}", event.kind, event.paths);
                    if let Some(path) = filter.matching_path(&event, &event_root) {
                        let relative = path.strip_prefix(&event_root).unwrap_or(path);
                        tracing::debug!("[WATCHER] Accepted change: {}", relative.display());
                        triggers.fire(ReloadReason::FileChanged(relative.to_path_buf()));
                    }
                }
                Err(e) => tracing::error!("Watcher error: {:?}", e),
            }
        })
        .map_err(notify_error)?;

        watcher.watch(&root, mode).map_err(notify_error)?;
        tracing::info!("Watching {} for changes", root.display());

        Ok(WatcherHandle {
            root,
            _watcher: watcher,
        })
    }
}

fn notify_error(e: notify::Error) -> StoveError {
    StoveError::Io(std::io::Error::other(e.to_string()))
}
