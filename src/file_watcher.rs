use std::path::{Path, PathBuf};

use crossbeam_channel::Sender;
use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::scheduler::HostCommand;

/// Keeps the player script file in sync with the running game. Dropping the
/// handle stops watching.
pub struct ScriptWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl ScriptWatcher {
    /// Watches `path` and sends its new contents as [`HostCommand::SetCode`]
    /// whenever it is created or modified.
    pub fn spawn(path: PathBuf, commands: Sender<HostCommand>) -> notify::Result<Self> {
        let watched = path.clone();
        let mut last_sent = std::fs::read_to_string(&path).ok();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<NotifyEvent, notify::Error>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("[scriptidle watcher] Watch error: {e}");
                        return;
                    }
                };
                if let Some(source) = script_update(&event, &watched, last_sent.as_deref()) {
                    info!("[scriptidle watcher] Reloading script: {}", watched.display());
                    last_sent = Some(source.clone());
                    let (reply, _) = oneshot::channel();
                    let _ = commands.send(HostCommand::SetCode(source, reply));
                }
            })?;

        // notify needs a directory to follow a single file across editor renames.
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!("[scriptidle watcher] Watching script: {}", path.display());
        Ok(Self {
            _watcher: watcher,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// New script source if `event` touched `script_path` and its contents changed.
fn script_update(event: &NotifyEvent, script_path: &Path, last: Option<&str>) -> Option<String> {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return None;
    }
    if !event.paths.iter().any(|p| path_matches(p, script_path)) {
        return None;
    }
    let source = std::fs::read_to_string(script_path).ok()?;
    if last == Some(source.as_str()) {
        return None;
    }
    Some(source)
}

fn path_matches(a: &Path, b: &Path) -> bool {
    let ca = std::fs::canonicalize(a).unwrap_or_else(|_| a.to_path_buf());
    let cb = std::fs::canonicalize(b).unwrap_or_else(|_| b.to_path_buf());
    ca == cb
}
