//! Polling directory watchers
//!
//! Each watched root gets a dedicated thread that rescans on a fixed
//! interval and diffs the new snapshot against the previous one. No OS
//! notification API is used: the remote side usually lives on a cloud
//! mount where inotify-style events are unreliable, and a one-second
//! poll of an editor config folder is cheap.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, trace};

use crate::error::Result;
use crate::scanner::{Resource, ScanFilter, Scanner, Snapshot};

/// How often a sleeping watcher rechecks its control state, so pause
/// and stop take effect well before the next poll tick.
const CONTROL_TICK: Duration = Duration::from_millis(100);

/// Lifecycle state of a watcher thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WatchState {
    /// Polling and emitting events.
    Active = 0,
    /// Thread alive but not scanning or emitting.
    Paused = 1,
    /// Thread has exited or is about to.
    Stopped = 2,
}

impl WatchState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::Paused,
            _ => Self::Stopped,
        }
    }
}

/// One detected filesystem change under a watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A file appeared since the last poll.
    Created(Resource),
    /// A file's version advanced since the last poll.
    Modified(Resource),
    /// A file vanished since the last poll.
    Deleted {
        /// Root-relative key of the vanished file.
        key: String,
    },
}

impl WatchEvent {
    /// The key this event concerns.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Created(resource) | Self::Modified(resource) => &resource.key,
            Self::Deleted { key } => key,
        }
    }
}

/// Callback invoked for every detected change, on the watcher thread.
pub type EventSink = Arc<dyn Fn(WatchEvent) + Send + Sync>;

struct Shared {
    state: AtomicU8,
    // Set on resume: the next tick re-baselines without emitting, so
    // changes the engine itself made while the watcher slept are not
    // reported back as fresh edits
    rescan: AtomicBool,
}

/// Cloneable control handle for a running watcher.
#[derive(Clone)]
pub struct WatcherHandle {
    shared: Arc<Shared>,
}

impl WatcherHandle {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WatchState {
        WatchState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Suspend polling. A no-op unless the watcher is active.
    pub fn pause(&self) {
        let _ = self.shared.state.compare_exchange(
            WatchState::Active as u8,
            WatchState::Paused as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Resume polling. The next tick re-baselines silently, so changes
    /// made during the pause do not produce events.
    pub fn resume(&self) {
        if self
            .shared
            .state
            .compare_exchange(
                WatchState::Paused as u8,
                WatchState::Active as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            self.shared.rescan.store(true, Ordering::SeqCst);
        }
    }

    fn request_stop(&self) {
        self.shared
            .state
            .store(WatchState::Stopped as u8, Ordering::SeqCst);
    }
}

/// A polling watcher over one root directory.
pub struct Watcher {
    handle: WatcherHandle,
    thread: Option<JoinHandle<()>>,
}

impl Watcher {
    /// Spawn a watcher thread over `root`.
    ///
    /// The baseline scan runs before this returns, so every change made
    /// after `spawn` produces an event. `interval` is the poll period.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher thread cannot be spawned.
    pub fn spawn(
        name: &str,
        root: PathBuf,
        filter: ScanFilter,
        interval: Duration,
        sink: EventSink,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: AtomicU8::new(WatchState::Active as u8),
            rescan: AtomicBool::new(false),
        });
        let handle = WatcherHandle {
            shared: Arc::clone(&shared),
        };

        let scanner = Scanner::new(filter);
        let mut baseline = scanner.scan(&root);
        debug!(root = %root.display(), files = baseline.len(), "watcher baseline established");

        let thread_name = format!("watch-{name}");
        let thread = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                loop {
                    if !sleep_interval(&shared, interval) {
                        break;
                    }
                    match WatchState::from_u8(shared.state.load(Ordering::SeqCst)) {
                        WatchState::Stopped => break,
                        WatchState::Paused => continue,
                        WatchState::Active => {}
                    }

                    let current = scanner.scan(&root);
                    if shared.rescan.swap(false, Ordering::SeqCst) {
                        trace!(root = %root.display(), "re-baselined after resume");
                        baseline = current;
                        continue;
                    }

                    for event in diff_events(&baseline, &current) {
                        trace!(key = event.key(), "change detected");
                        sink(event);
                    }
                    baseline = current;
                }
                debug!(root = %root.display(), "watcher stopped");
            })
            .with_context(|| format!("Failed to spawn thread: {thread_name}"))?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    /// A cloneable control handle, usable from other threads.
    #[must_use]
    pub fn control(&self) -> WatcherHandle {
        self.handle.clone()
    }

    /// Stop the watcher and wait for its thread to exit.
    pub fn stop(&mut self) {
        self.handle.request_stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleep one poll interval in short slices, returning false as soon as
/// a stop is requested.
fn sleep_interval(shared: &Shared, interval: Duration) -> bool {
    let mut remaining = interval;
    while !remaining.is_zero() {
        let slice = remaining.min(CONTROL_TICK);
        thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
        if shared.state.load(Ordering::SeqCst) == WatchState::Stopped as u8 {
            return false;
        }
    }
    true
}

/// Changes between two consecutive snapshots of the same root.
#[must_use]
pub fn diff_events(baseline: &Snapshot, current: &Snapshot) -> Vec<WatchEvent> {
    let mut events = Vec::new();

    for key in baseline.keys() {
        if !current.contains_key(key) {
            events.push(WatchEvent::Deleted { key: key.clone() });
        }
    }
    for (key, resource) in current {
        match baseline.get(key) {
            None => events.push(WatchEvent::Created(resource.clone())),
            Some(previous) if resource.version > previous.version => {
                events.push(WatchEvent::Modified(resource.clone()));
            }
            Some(_) => {}
        }
    }

    events
}
