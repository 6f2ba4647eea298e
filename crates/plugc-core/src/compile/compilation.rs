//! A single batch compile request and its completion.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::source::SourceUnit;

/// Correlation id of a compilation. Strictly increasing per supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompilationId(pub u64);

impl fmt::Display for CompilationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilationStatus {
    /// Registered, inputs being prepared.
    Pending,
    /// Compile message built and queued or sent.
    Started,
    /// Callback fired.
    Completed,
}

/// How a compilation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CompilationOutcome {
    /// The worker produced a module.
    Compiled(Vec<u8>),
    /// No module. Per-unit details are in each unit's compiler errors.
    Failed(String),
    /// Nothing to compile.
    Empty,
}

/// What a completion callback receives.
#[derive(Debug)]
pub struct CompiledBatch {
    pub id: CompilationId,
    pub units: Vec<Arc<SourceUnit>>,
    pub outcome: CompilationOutcome,
    pub started_at: Option<Instant>,
    pub ended_at: Instant,
}

impl CompiledBatch {
    /// The compiled module, if any.
    pub fn assembly(&self) -> Option<&[u8]> {
        match &self.outcome {
            CompilationOutcome::Compiled(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, CompilationOutcome::Failed(_))
    }

    /// Name the module was compiled under.
    pub fn output_name(&self) -> String {
        output_name(self.id, &self.units)
    }

    /// Time spent between the compile request being issued and completion.
    pub fn duration(&self) -> Option<Duration> {
        self.started_at.map(|start| self.ended_at.duration_since(start))
    }
}

/// A single plugin keeps its own name; batches are named after their id.
fn output_name(id: CompilationId, units: &[Arc<SourceUnit>]) -> String {
    match units {
        [single] => single.script_name.clone(),
        _ => format!("plugins_{}", id.0),
    }
}

/// Callback invoked once when a compilation completes.
pub type CompletionCallback = Box<dyn FnOnce(CompiledBatch) + Send + 'static>;

/// An in-flight compilation. Owned by the registry until completion.
pub struct Compilation {
    id: CompilationId,
    units: Vec<Arc<SourceUnit>>,
    status: CompilationStatus,
    started_at: Option<Instant>,
    callback: CompletionCallback,
}

impl fmt::Debug for Compilation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compilation")
            .field("id", &self.id)
            .field("units", &self.units.len())
            .field("status", &self.status)
            .finish()
    }
}

impl Compilation {
    pub fn new(id: CompilationId, units: Vec<Arc<SourceUnit>>, callback: CompletionCallback) -> Self {
        Self {
            id,
            units,
            status: CompilationStatus::Pending,
            started_at: None,
            callback,
        }
    }

    pub fn id(&self) -> CompilationId {
        self.id
    }

    pub fn units(&self) -> &[Arc<SourceUnit>] {
        &self.units
    }

    pub fn status(&self) -> CompilationStatus {
        self.status
    }

    /// Name of the module the worker should produce.
    pub fn output_name(&self) -> String {
        output_name(self.id, &self.units)
    }

    /// Whether a unit with this script name is part of the batch.
    pub fn includes(&self, script_name: &str) -> bool {
        self.units.iter().any(|u| u.script_name == script_name)
    }

    /// Mark the compile request as issued.
    pub fn start(&mut self) {
        if self.status == CompilationStatus::Pending {
            self.status = CompilationStatus::Started;
            self.started_at = Some(Instant::now());
            for unit in &self.units {
                unit.clear_compiler_errors();
            }
        }
    }

    /// Finish the compilation and fire its callback.
    pub fn complete(mut self, outcome: CompilationOutcome) {
        self.status = CompilationStatus::Completed;
        let batch = CompiledBatch {
            id: self.id,
            units: self.units,
            outcome,
            started_at: self.started_at,
            ended_at: Instant::now(),
        };
        (self.callback)(batch);
    }

    /// Fail the compilation, recording `reason` on every unit.
    pub fn fail(self, reason: &str) {
        for unit in &self.units {
            unit.set_compiler_errors(reason);
        }
        self.complete(CompilationOutcome::Failed(reason.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_lifecycle_and_callback() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let unit = SourceUnit::new("Foo", "class Foo {}").shared();

        let mut compilation = Compilation::new(
            CompilationId(3),
            vec![unit.clone()],
            Box::new(move |batch| *sink.lock().unwrap() = Some(batch)),
        );
        assert_eq!(compilation.status(), CompilationStatus::Pending);
        assert_eq!(compilation.output_name(), "Foo");

        compilation.start();
        assert_eq!(compilation.status(), CompilationStatus::Started);
        compilation.complete(CompilationOutcome::Compiled(vec![1, 2]));

        let batch = seen.lock().unwrap().take().unwrap();
        assert_eq!(batch.id, CompilationId(3));
        assert_eq!(batch.assembly(), Some(&[1u8, 2][..]));
        assert!(batch.duration().is_some());
    }

    #[test]
    fn test_fail_records_reason_on_units() {
        let a = SourceUnit::new("A", "").shared();
        let b = SourceUnit::new("B", "").shared();
        let compilation = Compilation::new(CompilationId(1), vec![a.clone(), b.clone()], Box::new(|batch| {
            assert!(!batch.is_success());
            assert!(batch.duration().is_none());
        }));
        assert_eq!(compilation.output_name(), "plugins_1");
        assert!(compilation.includes("B"));

        compilation.fail("compiler went away");
        assert_eq!(a.last_compiler_errors().as_deref(), Some("compiler went away"));
        assert_eq!(b.last_compiler_errors().as_deref(), Some("compiler went away"));
    }

    #[test]
    fn test_start_clears_previous_errors() {
        let unit = SourceUnit::new("Foo", "class Foo {}").shared();
        unit.set_compiler_errors("Foo.cs(1,1): error CS1513: } expected");

        let mut compilation = Compilation::new(CompilationId(2), vec![unit.clone()], Box::new(|_| {}));
        assert!(unit.last_compiler_errors().is_some());

        compilation.start();
        assert!(unit.last_compiler_errors().is_none());
        compilation.complete(CompilationOutcome::Compiled(vec![1]));
        assert!(unit.last_compiler_errors().is_none());
    }
}
