//! Long-running watch service
//!
//! Wires the engine, the task queue, and one watcher per root into a
//! background service: watcher events become queued single-item syncs,
//! and full-tree syncs can be requested at any time. All sync work
//! funnels through the queue, so jobs never overlap.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::SyncSettings;
use crate::error::Result;
use crate::queue::{Task, TaskQueue};
use crate::scanner::ScanFilter;
use crate::sync::{SyncContext, SyncDirection, SyncEngine, SyncMode};
use crate::watcher::{EventSink, WatchEvent, Watcher};

/// Queue key under which full-tree syncs are deduplicated.
const FULL_SYNC_KEY: &str = "full-sync";

struct ServiceInner {
    ctx: Arc<SyncContext>,
    engine: Arc<SyncEngine>,
    local_watcher: Watcher,
    remote_watcher: Watcher,
}

/// The background sync service.
pub struct SyncService {
    queue: TaskQueue,
    inner: Arc<Mutex<ServiceInner>>,
}

impl SyncService {
    /// Start the service: validate the engine and spawn both watchers.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a watcher
    /// thread cannot be spawned.
    pub fn start(ctx: Arc<SyncContext>) -> Result<Self> {
        let queue = TaskQueue::new();
        let inner = build_inner(ctx, &queue)?;
        info!("watch service started");
        Ok(Self {
            queue,
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    /// Request a full-tree sync. Dropped if an identical request is
    /// already queued or running.
    pub fn request_full_sync(&self, mode: SyncMode, override_all: bool) {
        if self.queue.has(FULL_SYNC_KEY) {
            debug!("full sync already pending, request dropped");
            return;
        }

        let (engine, local, remote) = {
            let inner = self.lock();
            (
                Arc::clone(&inner.engine),
                inner.local_watcher.control(),
                inner.remote_watcher.control(),
            )
        };

        self.queue.push(Task::keyed(FULL_SYNC_KEY, move || {
            // Both watchers sit out the batch; resume re-baselines
            // them, so nothing the sync wrote comes back as an event
            local.pause();
            remote.pause();

            match engine.full_sync(mode, override_all) {
                Ok(report) if report.is_success() => {
                    info!(operations = report.total_operations(), "full sync completed");
                }
                Ok(report) => {
                    warn!(errors = report.errors.len(), "full sync completed with errors");
                }
                Err(e) => warn!(error = %e, "full sync failed"),
            }

            local.resume();
            remote.resume();
        }));
    }

    /// Swap in new settings: the engine and both watchers are rebuilt,
    /// the installer adapter and any in-flight queued work carry over.
    ///
    /// # Errors
    ///
    /// Returns an error if the new settings are invalid; the old
    /// configuration keeps running in that case.
    pub fn reload(&self, settings: SyncSettings) -> Result<()> {
        let mut inner = self.lock();
        let ctx = Arc::new(SyncContext::with_installer(
            settings,
            Arc::clone(&inner.ctx.installer),
        ));
        let fresh = build_inner(ctx, &self.queue)?;
        // The replaced watchers stop on drop
        *inner = fresh;
        info!("watch service reloaded");
        Ok(())
    }

    /// Stop both watchers. Queued jobs already started are left to
    /// finish on their own.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.local_watcher.stop();
        inner.remote_watcher.stop();
        info!("watch service stopped");
    }

    fn lock(&self) -> MutexGuard<'_, ServiceInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn build_inner(ctx: Arc<SyncContext>, queue: &TaskQueue) -> Result<ServiceInner> {
    let engine = Arc::new(SyncEngine::new(Arc::clone(&ctx))?);
    let filter = ScanFilter::new(
        &ctx.settings.include_files,
        &ctx.settings.ignore_files,
        &ctx.settings.ignore_dirs,
    )?;
    let interval = Duration::from_secs(ctx.settings.sync_interval);

    // An edit under the local root pushes out; one under the remote
    // root pulls in
    let local_watcher = Watcher::spawn(
        "local",
        ctx.settings.local_folder.clone(),
        filter.clone(),
        interval,
        item_sink(SyncDirection::Push, Arc::clone(&engine), queue.clone()),
    )?;
    let remote_watcher = Watcher::spawn(
        "remote",
        ctx.settings.sync_folder.clone(),
        filter,
        interval,
        item_sink(SyncDirection::Pull, Arc::clone(&engine), queue.clone()),
    )?;

    Ok(ServiceInner {
        ctx,
        engine,
        local_watcher,
        remote_watcher,
    })
}

fn item_sink(direction: SyncDirection, engine: Arc<SyncEngine>, queue: TaskQueue) -> EventSink {
    Arc::new(move |event: WatchEvent| {
        let task_key = format!("{}:{}", direction.as_str(), event.key());
        if queue.has(&task_key) {
            debug!(key = event.key(), "item sync already pending, event dropped");
            return;
        }
        let engine = Arc::clone(&engine);
        queue.push(Task::keyed(task_key, move || {
            if let Err(e) = engine.sync_item_event(direction, &event) {
                warn!(key = event.key(), error = %e, "item sync failed");
            }
        }));
    })
}
