//! Inter-process communication with the compiler worker.
//!
//! This module provides the wire protocol and the framed channel used to
//! talk to the worker over its standard streams.

mod blob;
pub mod channel;
pub mod protocol;

pub use channel::{ChannelEvent, ChannelEventKind, MessageChannel};
pub use protocol::{
    AssemblyOutput, CompileRequest, CompilerFile, CompilerMessage, MessageBody, MessageType,
    ReferenceFile, read_message, write_message, write_null,
};
