//! Plugin compiler supervisor.
//!
//! Compiles batches of plugin scripts by delegating to an out-of-process
//! compiler worker. The worker speaks length-prefixed JSON messages over its
//! standard streams; see [`ipc::protocol`] for the wire format.
//!
//! # Architecture
//!
//! - [`PluginCompiler`]: handle used to submit compilations
//! - [`supervisor`]: worker lifecycle, crash recovery and idle shutdown
//! - [`compile`]: compilation bookkeeping and diagnostic attribution
//! - [`ipc`]: message types, framing and the worker channel
//! - [`provision`]: locating the compiler executable

pub mod compile;
pub mod config;
pub mod error;
pub mod ipc;
pub mod provision;
pub mod source;
pub mod supervisor;

pub use compile::{CompilationId, CompilationOutcome, CompilationStatus, CompiledBatch};
pub use config::CompilerConfig;
pub use error::{Error, Result};
pub use provision::{BinaryProvisioner, LocalProvisioner};
pub use source::SourceUnit;
pub use supervisor::{PluginCompiler, SupervisorState};
