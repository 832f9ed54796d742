//! Per-account execution contexts.
//!
//! Every account gets its own OS thread driving a single-threaded tokio
//! runtime. All client calls for that account run there, so a long-lived
//! update stream on one account never blocks the login flow of another.
//!
//! Two bridges move work onto a context:
//! - [`ExecutionContext::submit`] blocks a synchronous caller until the future
//!   completes (or the timeout elapses).
//! - [`ExecutionContext::run`] does the same for async callers without
//!   blocking their runtime.

use std::future::Future;
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

/// Grace period used when a context is dropped without an explicit shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Failed to start execution context: {0}")]
    Spawn(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Execution context is closed")]
    Closed,

    #[error("Task panicked: {0}")]
    Panicked(String),
}

#[derive(Default)]
struct Lifecycle {
    shutdown_tx: Option<oneshot::Sender<Duration>>,
    thread: Option<thread::JoinHandle<()>>,
}

/// A dedicated thread + current-thread runtime pair.
///
/// Dropping the context without calling [`shutdown`](Self::shutdown) still
/// stops the runtime (the shutdown sender is dropped), but the thread is not
/// joined.
pub struct ExecutionContext {
    name: String,
    handle: Handle,
    lifecycle: Mutex<Lifecycle>,
}

impl ExecutionContext {
    /// Start a new context on a thread called `name`.
    ///
    /// Returns once the runtime is built and ready to accept work.
    pub fn create(name: impl Into<String>) -> Result<Self, RuntimeError> {
        let name = name.into();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<Handle, String>>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<Duration>();

        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let rt = match Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(rt.handle().clone()));

                // Drives every spawned task until shutdown is requested or the
                // owning context goes away.
                let grace = rt.block_on(async move {
                    shutdown_rx.await.unwrap_or(DEFAULT_SHUTDOWN_GRACE)
                });
                rt.shutdown_timeout(grace);
            })
            .map_err(|e| RuntimeError::Spawn(e.to_string()))?;

        let handle = match ready_rx.recv() {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(RuntimeError::Spawn(e));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(RuntimeError::Spawn(
                    "context thread exited during startup".to_string(),
                ));
            }
        };

        log::debug!("Execution context {} started", name);

        Ok(Self {
            name,
            handle,
            lifecycle: Mutex::new(Lifecycle {
                shutdown_tx: Some(shutdown_tx),
                thread: Some(thread),
            }),
        })
    }

    /// Name of the context thread.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the context thread is still running.
    pub fn is_alive(&self) -> bool {
        let lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        lifecycle
            .thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    /// Run `future` on this context and block the calling thread until it
    /// completes.
    ///
    /// Must not be called from inside an async task; use [`run`](Self::run)
    /// there. Calling it from the context's own thread deadlocks until the
    /// timeout fires.
    pub fn submit<F>(&self, future: F, timeout: Duration) -> Result<F::Output, RuntimeError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = std_mpsc::channel();
        let task = self.handle.spawn(async move {
            let _ = tx.send(future.await);
        });

        match rx.recv_timeout(timeout) {
            Ok(output) => Ok(output),
            Err(RecvTimeoutError::Timeout) => {
                task.abort();
                Err(RuntimeError::Timeout)
            }
            // The task was dropped before producing a value: the runtime is
            // gone or the future panicked.
            Err(RecvTimeoutError::Disconnected) => Err(RuntimeError::Closed),
        }
    }

    /// Run `future` on this context and await its output from another runtime.
    pub async fn run<F>(&self, future: F, timeout: Duration) -> Result<F::Output, RuntimeError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let mut task = self.handle.spawn(future);

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) if e.is_panic() => Err(RuntimeError::Panicked(e.to_string())),
            Ok(Err(_)) => Err(RuntimeError::Closed),
            Err(_) => {
                task.abort();
                Err(RuntimeError::Timeout)
            }
        }
    }

    /// Start a background task on this context.
    pub fn spawn<F>(&self, future: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future).abort_handle()
    }

    /// Stop the runtime and join the context thread.
    ///
    /// Background tasks still running after `grace` are dropped. Calling this
    /// more than once is a no-op.
    pub fn shutdown(&self, grace: Duration) -> Result<(), RuntimeError> {
        let (shutdown_tx, thread) = {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
            (lifecycle.shutdown_tx.take(), lifecycle.thread.take())
        };

        if let Some(tx) = shutdown_tx {
            let _ = tx.send(grace);
        }

        if let Some(thread) = thread {
            thread
                .join()
                .map_err(|_| RuntimeError::Panicked(format!("context {} panicked", self.name)))?;
            log::debug!("Execution context {} stopped", self.name);
        }

        Ok(())
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("name", &self.name)
            .field("alive", &self.is_alive())
            .finish()
    }
}
