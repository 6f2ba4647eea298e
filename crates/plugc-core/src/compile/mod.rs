//! Compilation bookkeeping.
//!
//! - `compilation`: a single batch request and its one-shot completion
//! - `registry`: in-flight compilations keyed by id
//! - `queue`: Compile messages held until the worker is ready
//! - `prepare`: resolving sources and references for a batch
//! - `diagnostics`: mapping compiler output back to source units

mod compilation;
pub mod diagnostics;
mod prepare;
mod queue;
mod registry;

pub use compilation::{
    Compilation, CompilationId, CompilationOutcome, CompilationStatus, CompiledBatch,
    CompletionCallback,
};
pub use diagnostics::{Attribution, attribute};
pub use prepare::{FsInputResolver, InputResolver, PreparedInputs};
pub use queue::{ReadyGate, RequestQueue};
pub use registry::CompilationRegistry;
