//! Config hot reload.
//!
//! Watches JSON config files through the platform file notifier and invokes
//! registered callbacks with the re-parsed document on change. A file that
//! stops parsing keeps its previous good config; error callbacks get the
//! parse failure instead.
//!
//! Callback registration returns an opaque [`CallbackToken`]; removal
//! consumes the token, so callbacks need not be comparable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Invoked with the watched path and the freshly parsed document.
pub type ChangeCallback = Arc<dyn Fn(&Path, &serde_json::Value) + Send + Sync>;
/// Invoked with the watched path and a description of the failure.
pub type ErrorCallback = Arc<dyn Fn(&Path, &str) + Send + Sync>;

/// Opaque handle identifying one registered callback.
#[derive(Debug, PartialEq, Eq)]
pub struct CallbackToken(u64);

/// Minimum spacing between reloads of the same file; editors tend to fire
/// bursts of events per save.
const DEBOUNCE: Duration = Duration::from_millis(100);

struct FileState {
    config: Option<serde_json::Value>,
    last_error: Option<String>,
    last_reload: Option<Instant>,
    change_callbacks: Vec<(u64, ChangeCallback)>,
    error_callbacks: Vec<(u64, ErrorCallback)>,
}

impl FileState {
    fn new() -> Self {
        Self {
            config: None,
            last_error: None,
            last_reload: None,
            change_callbacks: Vec::new(),
            error_callbacks: Vec::new(),
        }
    }
}

#[derive(Default)]
struct State {
    files: HashMap<PathBuf, FileState>,
}

/// Watches config files and hot-reloads them on change.
pub struct ConfigWatcher {
    state: Arc<Mutex<State>>,
    watcher: Mutex<RecommendedWatcher>,
    next_token: AtomicU64,
    stop: Arc<AtomicBool>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl ConfigWatcher {
    pub fn new() -> Result<Self> {
        let state: Arc<Mutex<State>> = Arc::new(Mutex::new(State::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = channel::<Vec<PathBuf>>();

        let watcher = RecommendedWatcher::new(
            event_forwarder(tx),
            notify::Config::default(),
        )?;

        let drain_state = state.clone();
        let drain_stop = stop.clone();
        let drain = std::thread::Builder::new()
            .name("reflex-config-watch".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(Duration::from_millis(200)) {
                    Ok(paths) => {
                        for path in paths {
                            reload_path(&drain_state, &path, true);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if drain_stop.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(Self {
            state,
            watcher: Mutex::new(watcher),
            next_token: AtomicU64::new(1),
            stop,
            drain: Mutex::new(Some(drain)),
        })
    }

    /// Start watching a file and load its current contents.
    pub fn watch(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = canonical(path.as_ref());
        self.watcher
            .lock()
            .unwrap()
            .watch(&path, RecursiveMode::NonRecursive)?;
        self.state
            .lock()
            .unwrap()
            .files
            .entry(path.clone())
            .or_insert_with(FileState::new);
        info!(path = %path.display(), "watching config file");
        reload_path(&self.state, &path, false);
        Ok(())
    }

    /// Stop watching a file; its callbacks are dropped.
    pub fn unwatch(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = canonical(path.as_ref());
        self.watcher.lock().unwrap().unwatch(&path)?;
        self.state.lock().unwrap().files.remove(&path);
        Ok(())
    }

    /// Register a change callback for a watched path.
    pub fn on_change(&self, path: impl AsRef<Path>, callback: ChangeCallback) -> CallbackToken {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let path = canonical(path.as_ref());
        self.state
            .lock()
            .unwrap()
            .files
            .entry(path)
            .or_insert_with(FileState::new)
            .change_callbacks
            .push((token, callback));
        CallbackToken(token)
    }

    /// Register an error callback for a watched path.
    pub fn on_error(&self, path: impl AsRef<Path>, callback: ErrorCallback) -> CallbackToken {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let path = canonical(path.as_ref());
        self.state
            .lock()
            .unwrap()
            .files
            .entry(path)
            .or_insert_with(FileState::new)
            .error_callbacks
            .push((token, callback));
        CallbackToken(token)
    }

    /// Remove one registered callback, consuming its token.
    pub fn remove_callback(&self, token: CallbackToken) -> bool {
        let mut state = self.state.lock().unwrap();
        for file in state.files.values_mut() {
            let before = file.change_callbacks.len() + file.error_callbacks.len();
            file.change_callbacks.retain(|(id, _)| *id != token.0);
            file.error_callbacks.retain(|(id, _)| *id != token.0);
            if file.change_callbacks.len() + file.error_callbacks.len() != before {
                return true;
            }
        }
        false
    }

    /// Last successfully parsed config for a path.
    pub fn config(&self, path: impl AsRef<Path>) -> Option<serde_json::Value> {
        let path = canonical(path.as_ref());
        self.state
            .lock()
            .unwrap()
            .files
            .get(&path)
            .and_then(|f| f.config.clone())
    }

    /// Last parse/read failure for a path, if any.
    pub fn last_error(&self, path: impl AsRef<Path>) -> Option<String> {
        let path = canonical(path.as_ref());
        self.state
            .lock()
            .unwrap()
            .files
            .get(&path)
            .and_then(|f| f.last_error.clone())
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().files.keys().cloned().collect()
    }

    /// Force a reload outside the notifier, e.g. after programmatic writes.
    pub fn reload(&self, path: impl AsRef<Path>) {
        reload_path(&self.state, &canonical(path.as_ref()), false);
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.drain.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn event_forwarder(tx: Sender<Vec<PathBuf>>) -> impl Fn(notify::Result<Event>) + Send + 'static {
    move |result| match result {
        Ok(event) => {
            let paths: Vec<PathBuf> = event.paths.iter().map(|p| canonical(p)).collect();
            if !paths.is_empty() {
                let _ = tx.send(paths);
            }
        }
        Err(e) => warn!(%e, "file watcher error"),
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Reload one path and dispatch callbacks. `debounced` suppresses reloads
/// arriving within [`DEBOUNCE`] of the previous one.
fn reload_path(state: &Arc<Mutex<State>>, path: &Path, debounced: bool) {
    enum Outcome {
        Changed(serde_json::Value, Vec<ChangeCallback>),
        Failed(String, Vec<ErrorCallback>),
        Skip,
    }

    let outcome = {
        let mut state = state.lock().unwrap();
        let Some(file) = state.files.get_mut(path) else {
            return;
        };
        if debounced {
            if let Some(last) = file.last_reload {
                if last.elapsed() < DEBOUNCE {
                    return;
                }
            }
        }
        file.last_reload = Some(Instant::now());

        match std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).map_err(|e| e.to_string()))
        {
            Ok(config) => {
                if file.config.as_ref() == Some(&config) {
                    Outcome::Skip
                } else {
                    file.config = Some(config.clone());
                    file.last_error = None;
                    let callbacks = file
                        .change_callbacks
                        .iter()
                        .map(|(_, cb)| cb.clone())
                        .collect();
                    Outcome::Changed(config, callbacks)
                }
            }
            Err(message) => {
                file.last_error = Some(message.clone());
                let callbacks = file
                    .error_callbacks
                    .iter()
                    .map(|(_, cb)| cb.clone())
                    .collect();
                Outcome::Failed(message, callbacks)
            }
        }
    };

    // Callbacks run without the state lock so they may call back in.
    match outcome {
        Outcome::Changed(config, callbacks) => {
            debug!(path = %path.display(), "config reloaded");
            for callback in callbacks {
                callback(path, &config);
            }
        }
        Outcome::Failed(message, callbacks) => {
            warn!(path = %path.display(), error = %message, "config reload failed");
            for callback in callbacks {
                callback(path, &message);
            }
        }
        Outcome::Skip => {}
    }
}
