//! Background render worker.
//!
//! Browser work is async; callers may not be. [`RenderPool`] owns a
//! dedicated multi-threaded tokio runtime and exposes a blocking
//! [`RenderPool::submit_and_wait`], so a synchronous caller (or one already
//! inside a different event loop) can hand over a future and block on its
//! result without nesting runtimes.

use std::future::Future;
use std::sync::{mpsc, Mutex};

use once_cell::sync::OnceCell;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, warn};

use crate::error::{render_err, ExportError, Result};

static GLOBAL: OnceCell<RenderPool> = OnceCell::new();

/// Process-wide pool, started on first use.
pub fn global() -> Result<&'static RenderPool> {
    GLOBAL.get_or_try_init(RenderPool::new)
}

pub struct RenderPool {
    runtime: Mutex<Option<Runtime>>,
}

impl RenderPool {
    pub fn new() -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .thread_name("nbpdf-render")
            .enable_all()
            .build()?;
        debug!("Render pool started");
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
        })
    }

    fn handle(&self) -> Result<Handle> {
        let guard = self.runtime.lock().map_err(|_| ExportError::WorkerShutdown)?;
        guard
            .as_ref()
            .map(|rt| rt.handle().clone())
            .ok_or(ExportError::WorkerShutdown)
    }

    /// Run `task` on the pool and block the calling thread until it finishes.
    ///
    /// The caller's thread only waits on a channel, so this is safe to call
    /// from inside another runtime's task.
    pub fn submit_and_wait<F, T>(&self, task: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.handle()?;
        let (tx, rx) = mpsc::channel();
        let task = handle.spawn(task);
        handle.spawn(async move {
            let _ = tx.send(task.await);
        });
        // Sender dropped without a value: the runtime went away mid-task
        match rx.recv().map_err(|_| ExportError::WorkerShutdown)? {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => Err(render_err(format!("render task panicked: {e}"))),
            Err(_) => Err(ExportError::WorkerShutdown),
        }
    }

    /// Stop the pool. Tasks still running are abandoned; later submissions
    /// fail with [`ExportError::WorkerShutdown`].
    pub fn shutdown(&self) {
        let runtime = match self.runtime.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match runtime {
            Some(runtime) => {
                runtime.shutdown_background();
                debug!("Render pool stopped");
            }
            None => warn!("Render pool already stopped"),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.runtime.lock().map(|g| g.is_some()).unwrap_or(false)
    }
}

impl std::fmt::Debug for RenderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPool")
            .field("running", &self.is_running())
            .finish()
    }
}
