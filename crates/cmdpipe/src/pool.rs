//! Worker pool that runs stream handler tasks

use std::fmt;
use std::future::Future;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::debug;

/// How long an idle worker thread is kept alive
const WORKER_KEEP_ALIVE: Duration = Duration::from_secs(60);

static GLOBAL_RUNTIME: Lazy<Runtime> = Lazy::new(|| {
    let runtime = Builder::new_multi_thread()
        .thread_name("cmdpipe-worker")
        .thread_keep_alive(WORKER_KEEP_ALIVE)
        .enable_all()
        .build()
        .unwrap_or_else(|e| panic!("failed to start cmdpipe worker runtime: {e}"));
    debug!("Built-in worker runtime created");
    runtime
});

/// Handle onto the tokio runtime that runs stream tasks
///
/// Cheap to clone and safe to share between unrelated executions. The
/// default is a process-wide runtime created on first use; its threads never
/// keep the process alive.
#[derive(Clone)]
pub struct WorkerPool {
    handle: Handle,
}

impl WorkerPool {
    /// The built-in process-wide pool
    pub fn global() -> Self {
        Self {
            handle: GLOBAL_RUNTIME.handle().clone(),
        }
    }

    /// The runtime the caller is running on, falling back to the built-in pool
    pub fn current() -> Self {
        Handle::try_current()
            .map(Self::from_handle)
            .unwrap_or_else(|_| Self::global())
    }

    /// Use an existing runtime
    pub fn from_handle(handle: Handle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Drive a future to completion from synchronous code
    ///
    /// Panics when called from within an async execution context.
    pub(crate) fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::global()
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("runtime", &self.handle.runtime_flavor())
            .finish()
    }
}
