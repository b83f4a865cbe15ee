/// Debounced change notifications for markdown files under the source directories.
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use {
    notify_debouncer_full::{
        DebounceEventResult, Debouncer, RecommendedCache, new_debouncer,
        notify::{EventKind, RecommendedWatcher, RecursiveMode},
    },
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use crate::manager::is_markdown;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            Self::Created(p) | Self::Modified(p) | Self::Removed(p) => p,
        }
    }

    fn from_kind(kind: EventKind, path: &Path) -> Option<Self> {
        if !is_markdown(path) {
            return None;
        }
        let path = path.to_path_buf();
        match kind {
            EventKind::Create(_) => Some(Self::Created(path)),
            EventKind::Modify(_) => Some(Self::Modified(path)),
            EventKind::Remove(_) => Some(Self::Removed(path)),
            _ => None,
        }
    }
}

/// Keeps the OS watch alive; dropping it stops event delivery.
pub struct MemoryFileWatcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
}

impl MemoryFileWatcher {
    /// Watch every existing directory in `dirs` recursively.
    pub fn start(
        dirs: &[PathBuf],
        debounce: Duration,
    ) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<WatchEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events {
                        for path in &event.paths {
                            let Some(watch_event) = WatchEvent::from_kind(event.kind, path) else {
                                continue;
                            };
                            debug!(path = %path.display(), ?watch_event, "memory file changed");
                            if tx.send(watch_event).is_err() {
                                return;
                            }
                        }
                    }
                },
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "memory file watcher error");
                    }
                },
            }
        })?;

        for dir in dirs.iter().filter(|d| d.exists()) {
            debouncer.watch(dir, RecursiveMode::Recursive)?;
            info!(dir = %dir.display(), "watching memory directory");
        }

        Ok((
            Self {
                _debouncer: debouncer,
            },
            rx,
        ))
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        notify_debouncer_full::notify::event::{CreateKind, ModifyKind, RemoveKind},
    };

    #[test]
    fn only_markdown_paths_pass() {
        assert!(is_markdown(Path::new("notes/a.md")));
        assert!(is_markdown(Path::new("b.markdown")));
        assert!(!is_markdown(Path::new("c.txt")));
        assert!(!is_markdown(Path::new("md")));
    }

    #[test]
    fn event_kinds_map_to_watch_events() {
        let p = Path::new("x.md");
        assert_eq!(
            WatchEvent::from_kind(EventKind::Create(CreateKind::File), p),
            Some(WatchEvent::Created(p.to_path_buf()))
        );
        assert_eq!(
            WatchEvent::from_kind(EventKind::Modify(ModifyKind::Any), p),
            Some(WatchEvent::Modified(p.to_path_buf()))
        );
        assert_eq!(
            WatchEvent::from_kind(EventKind::Remove(RemoveKind::File), p),
            Some(WatchEvent::Removed(p.to_path_buf()))
        );
        assert_eq!(WatchEvent::from_kind(EventKind::Any, p), None);
        assert_eq!(
            WatchEvent::from_kind(EventKind::Create(CreateKind::File), Path::new("x.txt")),
            None
        );
    }
}
