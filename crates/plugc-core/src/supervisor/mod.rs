//! Compiler worker supervision.
//!
//! [`PluginCompiler`] is a cheap, cloneable handle to a supervisor task that
//! owns one compiler worker at a time. The worker is started lazily on the
//! first compilation that needs it, restarted after a crash, and stopped
//! after a period without work.

mod actor;
mod diagnose;
mod idle;
mod launch;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, watch};

use crate::compile::{
    Compilation, CompilationId, CompilationOutcome, CompiledBatch, FsInputResolver, InputResolver,
};
use crate::config::CompilerConfig;
use crate::error::Error;
use crate::provision::BinaryProvisioner;
use crate::source::SourceUnit;

use actor::{Event, Supervisor};

pub use diagnose::{crash_hints, dependency_trace};
pub use launch::{
    LaunchedWorker, ProcessLauncher, WorkerLauncher, WorkerProcess, diagnose_launch_failure,
    launch_args, library_search_path, purge_old_logs,
};

/// Lifecycle of the supervised worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No worker process.
    Stopped,
    /// A worker is being spawned.
    Starting,
    /// A worker is running (it may not have sent Ready yet).
    Running,
    /// The worker was asked to exit.
    ShuttingDown,
}

struct Inner {
    events: mpsc::UnboundedSender<Event>,
    next_id: AtomicU64,
    state: watch::Receiver<SupervisorState>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let _ = self.events.send(Event::Closed);
    }
}

/// Handle to the compiler supervisor.
///
/// Clones share the same supervisor. When the last clone is dropped the
/// worker is shut down and any in-flight compilations fail.
#[derive(Clone)]
pub struct PluginCompiler {
    inner: Arc<Inner>,
}

impl PluginCompiler {
    /// Start a supervisor that spawns real worker processes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: CompilerConfig, provisioner: Arc<dyn BinaryProvisioner>) -> Self {
        let resolver = Arc::new(FsInputResolver::new(&config));
        Self::with_parts(config, provisioner, Arc::new(ProcessLauncher), resolver)
    }

    /// Start a supervisor with a custom launcher and input resolver.
    pub fn with_parts(
        config: CompilerConfig,
        provisioner: Arc<dyn BinaryProvisioner>,
        launcher: Arc<dyn WorkerLauncher>,
        resolver: Arc<dyn InputResolver>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SupervisorState::Stopped);

        let supervisor = Supervisor::new(
            config,
            provisioner,
            launcher,
            resolver,
            events_tx.clone(),
            state_tx,
        );
        tokio::spawn(supervisor.run(events_rx));

        Self {
            inner: Arc::new(Inner {
                events: events_tx,
                next_id: AtomicU64::new(0),
                state: state_rx,
            }),
        }
    }

    /// Submit a batch of plugins for compilation.
    ///
    /// `callback` is invoked exactly once, from the supervisor task, when
    /// the compilation completes or fails. It must not block.
    pub fn submit<F>(&self, units: Vec<Arc<SourceUnit>>, callback: F) -> CompilationId
    where
        F: FnOnce(CompiledBatch) + Send + 'static,
    {
        let id = CompilationId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let event = Event::Submit {
            id,
            units,
            callback: Box::new(callback),
        };

        if let Err(mpsc::error::SendError(Event::Submit { id, units, callback })) =
            self.inner.events.send(event)
        {
            Compilation::new(id, units, callback).fail(&Error::Stopped.to_string());
        }
        id
    }

    /// Compile a batch and wait for the result.
    pub async fn compile(&self, units: Vec<Arc<SourceUnit>>) -> CompiledBatch {
        let (tx, rx) = oneshot::channel();
        let id = self.submit(units.clone(), move |batch| {
            let _ = tx.send(batch);
        });

        match rx.await {
            Ok(batch) => batch,
            Err(_) => CompiledBatch {
                id,
                units,
                outcome: CompilationOutcome::Failed(Error::Stopped.to_string()),
                started_at: None,
                ended_at: Instant::now(),
            },
        }
    }

    /// Stop the worker, failing in-flight compilations.
    ///
    /// Safe to call at any time and any number of times. Returns once the
    /// worker has been asked to exit; the process itself may linger for up
    /// to the configured grace period.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.inner.events.send(Event::Shutdown { done: Some(tx) }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Number of compilations submitted but not yet completed.
    pub async fn pending(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.inner.events.send(Event::Pending { reply: tx }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Current worker state.
    pub fn state(&self) -> SupervisorState {
        *self.inner.state.borrow()
    }

    /// Watch worker state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.inner.state.clone()
    }
}

impl std::fmt::Debug for PluginCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCompiler")
            .field("state", &self.state())
            .finish()
    }
}
