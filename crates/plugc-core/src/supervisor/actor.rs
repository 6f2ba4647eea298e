//! The supervisor task.
//!
//! All supervisor state lives in [`Supervisor`] and is only touched from the
//! task running [`Supervisor::run`]. Submissions, worker messages, process
//! exits and timer firings all arrive as [`Event`]s on one queue, so their
//! effects are serialized without locks.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::compile::{
    Compilation, CompilationId, CompilationOutcome, CompilationRegistry, CompletionCallback,
    InputResolver, PreparedInputs, RequestQueue, attribute,
};
use crate::config::{CompilerConfig, DEFAULT_SHUTDOWN_GRACE};
use crate::error::{Error, Result};
use crate::ipc::{
    AssemblyOutput, ChannelEvent, ChannelEventKind, CompileRequest, CompilerMessage, MessageBody,
    MessageChannel,
};
use crate::provision::BinaryProvisioner;
use crate::source::SourceUnit;

use super::diagnose::{crash_hints, dependency_trace};
use super::idle::IdleTimer;
use super::launch::{WorkerLauncher, WorkerProcess, diagnose_launch_failure, purge_old_logs};
use super::SupervisorState;

/// Everything the supervisor task reacts to.
pub(crate) enum Event {
    Submit {
        id: CompilationId,
        units: Vec<Arc<SourceUnit>>,
        callback: CompletionCallback,
    },
    Prepared {
        id: CompilationId,
        result: Result<PreparedInputs>,
    },
    Channel(ChannelEvent),
    ProcessExited {
        generation: u64,
        code: Option<i32>,
    },
    IdleElapsed {
        epoch: u64,
    },
    Shutdown {
        done: Option<oneshot::Sender<()>>,
    },
    Pending {
        reply: oneshot::Sender<usize>,
    },
    /// Every handle has been dropped.
    Closed,
}

impl From<ChannelEvent> for Event {
    fn from(event: ChannelEvent) -> Self {
        Event::Channel(event)
    }
}

/// The live worker of one generation.
struct Worker {
    generation: u64,
    channel: MessageChannel,
    stop_tx: oneshot::Sender<Duration>,
    library_path: OsString,
}

pub(crate) struct Supervisor {
    config: CompilerConfig,
    provisioner: Arc<dyn BinaryProvisioner>,
    launcher: Arc<dyn WorkerLauncher>,
    resolver: Arc<dyn InputResolver>,
    events: mpsc::UnboundedSender<Event>,
    state: watch::Sender<SupervisorState>,
    registry: CompilationRegistry,
    queue: RequestQueue,
    worker: Option<Worker>,
    generation: u64,
    idle: IdleTimer,
    version: String,
    binary: Option<PathBuf>,
    traced: bool,
}

impl Supervisor {
    pub(crate) fn new(
        config: CompilerConfig,
        provisioner: Arc<dyn BinaryProvisioner>,
        launcher: Arc<dyn WorkerLauncher>,
        resolver: Arc<dyn InputResolver>,
        events: mpsc::UnboundedSender<Event>,
        state: watch::Sender<SupervisorState>,
    ) -> Self {
        let version = provisioner.installed_version();
        Self {
            config,
            provisioner,
            launcher,
            resolver,
            events,
            state,
            registry: CompilationRegistry::new(),
            queue: RequestQueue::new(),
            worker: None,
            generation: 0,
            idle: IdleTimer::new(),
            version,
            binary: None,
            traced: false,
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = rx.recv().await {
            if let Event::Closed = event {
                self.stop("compiler was shut down");
                break;
            }
            self.handle(event);
        }
        debug!("Compiler supervisor stopped");
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Submit { id, units, callback } => self.on_submit(id, units, callback),
            Event::Prepared { id, result } => self.on_prepared(id, result),
            Event::Channel(ChannelEvent { generation, kind }) => {
                if !self.is_current(generation) {
                    debug!("Ignoring event from stale compiler generation {}", generation);
                    return;
                }
                match kind {
                    ChannelEventKind::Message(message) => self.on_message(message),
                    ChannelEventKind::Error(e) => {
                        error!("Compiler transport error: {}", e);
                        self.on_disconnected();
                    }
                    ChannelEventKind::Disconnected => self.on_disconnected(),
                }
            }
            Event::ProcessExited { generation, code } => {
                if self.is_current(generation) {
                    self.on_process_exited(code);
                }
            }
            Event::IdleElapsed { epoch } => self.on_idle(epoch),
            Event::Shutdown { done } => {
                self.stop("compiler was shut down");
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
            Event::Pending { reply } => {
                let _ = reply.send(self.registry.len());
            }
            Event::Closed => {}
        }
    }

    fn on_submit(&mut self, id: CompilationId, units: Vec<Arc<SourceUnit>>, callback: CompletionCallback) {
        let compilation = Compilation::new(id, units.clone(), callback);
        if units.is_empty() {
            debug!("Compilation {} has no plugins, nothing to do", id);
            compilation.complete(CompilationOutcome::Empty);
            self.after_completion();
            return;
        }

        self.registry.register(compilation);
        let prepare = self.resolver.prepare(units);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = prepare.await;
            let _ = events.send(Event::Prepared { id, result });
        });
    }

    fn on_prepared(&mut self, id: CompilationId, result: Result<PreparedInputs>) {
        if !self.registry.contains(id) {
            debug!("Compilation {} was abandoned while preparing", id);
            return;
        }

        match result {
            Ok(inputs) => self.enqueue_or_send(id, inputs),
            Err(e) => {
                error!("Failed to prepare compilation {}: {}", id, e);
                if let Some(compilation) = self.registry.remove(id) {
                    compilation.fail(&e.to_string());
                }
                self.after_completion();
            }
        }
    }

    fn enqueue_or_send(&mut self, id: CompilationId, inputs: PreparedInputs) {
        let Some(binary) = self.provisioner.validated_executable_path() else {
            let reason = format!("compiler version {} couldn't be started", self.version);
            error!("{}", Error::Provisioning(reason.clone()));
            if let Some(compilation) = self.registry.remove(id) {
                compilation.fail(&reason);
            }
            self.after_completion();
            return;
        };

        if !self.ensure_running(&binary) {
            let reason = format!("compiler version {} couldn't be started", self.version);
            self.fail_all(&reason);
            return;
        }

        let Some(compilation) = self.registry.get_mut(id) else {
            return;
        };
        compilation.start();
        let request = CompileRequest {
            output_file: compilation.output_name(),
            source_files: inputs.source_files,
            reference_files: inputs.reference_files,
        };
        let message = CompilerMessage::compile(id.0, request);

        match self.queue.offer(message) {
            Some(message) => {
                self.send(message);
            }
            None => debug!("Compilation {} queued until compiler is ready", id),
        }
    }

    /// Make sure a worker is running. Returns false if it could not be started.
    fn ensure_running(&mut self, binary: &Path) -> bool {
        self.idle.cancel();
        if self.worker.is_some() {
            return true;
        }

        self.version = self.provisioner.installed_version();
        purge_old_logs(&self.config.log_dir);
        self.state.send_replace(SupervisorState::Starting);

        let launched = match self.launcher.launch(binary, &self.config) {
            Ok(launched) => launched,
            Err(e) => {
                let hints = diagnose_launch_failure(binary, &e);
                let err = Error::Launch {
                    path: binary.to_path_buf(),
                    source: e,
                };
                error!("Compiler version {}: {}", self.version, err);
                for hint in hints {
                    warn!("{}", hint);
                }
                self.state.send_replace(SupervisorState::Stopped);
                return false;
            }
        };

        self.generation += 1;
        let generation = self.generation;
        self.queue.reset();

        let channel = MessageChannel::start(
            launched.reader,
            launched.writer,
            generation,
            self.events.clone(),
        );
        let pid = launched.process.id();
        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(watch_process(
            launched.process,
            generation,
            self.events.clone(),
            stop_rx,
        ));

        self.worker = Some(Worker {
            generation,
            channel,
            stop_tx,
            library_path: launched.library_path,
        });
        self.binary = Some(binary.to_path_buf());
        self.state.send_replace(SupervisorState::Running);

        info!(
            "Started compiler version {} (pid {:?}, generation {})",
            self.version, pid, generation
        );
        true
    }

    fn on_message(&mut self, message: CompilerMessage) {
        let id = CompilationId(message.id);
        match message.body {
            MessageBody::Assembly(output) => self.on_assembly(id, output),
            MessageBody::Error(text) => {
                error!("Compilation {} failed: {}", id, text);
                match self.registry.remove(id) {
                    Some(compilation) => compilation.fail(&text),
                    None => warn!("Compiler reported an error for unknown compilation {}", id),
                }
                self.after_completion();
            }
            MessageBody::Ready => {
                if !self.send(CompilerMessage::ready()) {
                    return;
                }
                let queued = self.queue.open();
                if !queued.is_empty() {
                    debug!("Compiler ready, sending {} queued compilations", queued.len());
                }
                for message in queued {
                    if !self.send(message) {
                        break;
                    }
                }
            }
            MessageBody::Compile(_) | MessageBody::Exit => {
                warn!("Unexpected {:?} message from compiler", message.kind());
            }
        }
    }

    fn on_assembly(&mut self, id: CompilationId, output: AssemblyOutput) {
        let Some(compilation) = self.registry.remove(id) else {
            warn!("Compiler produced output for unknown compilation {}", id);
            return;
        };

        if let Some(std_output) = output.std_output.as_deref() {
            let attribution = attribute(std_output, compilation.units(), &self.config.plugin_dir);
            for line in &attribution.unresolved {
                error!("Compiler error not attributable to a plugin: {}", line);
            }
            attribution.apply(compilation.units());
        }

        let outcome = match output.assembly {
            Some(bytes) if !bytes.is_empty() => CompilationOutcome::Compiled(bytes),
            _ => CompilationOutcome::Failed("compiler produced no assembly".to_string()),
        };
        compilation.complete(outcome);
        self.after_completion();
    }

    fn on_disconnected(&mut self) {
        let reason = format!("compiler version {} disconnected", self.version);
        error!("{}", reason);
        self.fail_all(&reason);
        self.trace_dependencies();
        self.teardown();
    }

    fn on_process_exited(&mut self, code: Option<i32>) {
        let reason = format!("compiler version {} was closed unexpectedly", self.version);
        error!("{} (exit code {:?})", reason, code);
        self.fail_all(&reason);

        let library_path = self
            .worker
            .as_ref()
            .map(|w| w.library_path.clone())
            .unwrap_or_default();
        for hint in crash_hints(&self.config, self.binary.as_deref(), &library_path) {
            warn!("{}", hint);
        }
        self.teardown();
    }

    fn on_idle(&mut self, epoch: u64) {
        if !self.idle.fired(epoch) {
            return;
        }
        if !self.registry.is_empty() {
            debug!(
                "Compiler idle timer fired with {} compilations in flight, ignoring",
                self.registry.len()
            );
            return;
        }
        if self.worker.is_some() {
            info!("Compiler idle for {:?}, shutting down", self.config.idle_timeout);
            self.teardown();
        }
    }

    /// Explicit shutdown: fail whatever is in flight, then stop the worker.
    fn stop(&mut self, reason: &str) {
        self.idle.cancel();
        let in_flight = self.registry.len();
        if in_flight > 0 {
            info!("Failing {} in-flight compilations on shutdown", in_flight);
        }
        for compilation in self.registry.drain() {
            compilation.fail(reason);
        }
        self.teardown();
    }

    fn fail_all(&mut self, reason: &str) {
        let compilations = self.registry.drain();
        let dropped = self.queue.reset();
        if dropped > 0 {
            debug!("Dropped {} queued compile requests", dropped);
        }
        if compilations.is_empty() {
            return;
        }
        for compilation in compilations {
            compilation.fail(reason);
        }
        self.after_completion();
    }

    /// Stop the current worker, if any. Idempotent.
    fn teardown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.state.send_replace(SupervisorState::ShuttingDown);

        // Hand the process over to the watcher first so its exit is not
        // reported as a crash.
        let _ = worker.stop_tx.send(self.config.shutdown_grace);
        worker.channel.send(CompilerMessage::exit());
        worker.channel.stop();
        self.queue.reset();

        info!("Compiler generation {} shut down", worker.generation);
        self.state.send_replace(SupervisorState::Stopped);
    }

    fn after_completion(&mut self) {
        self.idle.cancel();
        if self.config.auto_shutdown {
            self.idle.arm(self.config.idle_timeout, self.events.clone(), |epoch| {
                Event::IdleElapsed { epoch }
            });
        }
    }

    fn trace_dependencies(&mut self) {
        if self.traced || !cfg!(target_os = "linux") {
            return;
        }
        let (Some(binary), Some(worker)) = (self.binary.clone(), self.worker.as_ref()) else {
            return;
        };
        self.traced = true;
        let library_path = worker.library_path.clone();
        tokio::spawn(async move {
            for line in dependency_trace(binary, library_path).await {
                error!("{}", line);
            }
        });
    }

    /// Hand a message to the worker's writer.
    ///
    /// A closed writer is a transport failure: every tracked compilation is
    /// failed and the worker torn down. Returns whether the message was queued.
    fn send(&mut self, message: CompilerMessage) -> bool {
        let kind = message.kind();
        let queued = self
            .worker
            .as_ref()
            .is_some_and(|worker| worker.channel.send(message));
        if !queued {
            warn!("Compiler channel closed, dropping {:?} message", kind);
            self.on_disconnected();
        }
        queued
    }

    fn is_current(&self, generation: u64) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| worker.generation == generation)
    }
}

/// Wait for the worker process to exit.
///
/// An exit before the supervisor asks for a stop is reported as
/// [`Event::ProcessExited`]. Once a stop is requested the exit is silent, and
/// a process still alive after the grace period is killed.
async fn watch_process(
    mut process: Box<dyn WorkerProcess>,
    generation: u64,
    events: mpsc::UnboundedSender<Event>,
    stop_rx: oneshot::Receiver<Duration>,
) {
    let grace = tokio::select! {
        code = process.wait() => {
            let _ = events.send(Event::ProcessExited { generation, code });
            return;
        }
        grace = stop_rx => grace.unwrap_or(DEFAULT_SHUTDOWN_GRACE),
    };

    if tokio::time::timeout(grace, process.wait()).await.is_ok() {
        debug!("Compiler generation {} exited", generation);
        return;
    }

    warn!(
        "Compiler generation {} still running after {:?}, killing it",
        generation, grace
    );
    if let Err(e) = process.start_kill() {
        warn!("Failed to kill compiler: {}", e);
    }
    let _ = process.wait().await;
}
