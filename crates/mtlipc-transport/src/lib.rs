//! Child-process stdio transport for the MTL debugger IPC protocol.
//!
//! The remote controller (`mtldbg -i`) speaks its protocol over its own
//! standard input and output. This crate owns that process:
//! - [`ProcessSupervisor`] spawns it, writes to its stdin and kills it
//! - [`pump_output`] drains its stdout and hands every chunk to a callback
//!
//! This is the lowest layer of mtlipc. Framing and correlation build on top
//! of the pipes provided here.

pub mod error;
pub mod pipes;
pub mod process;
pub mod pump;

pub use error::{Result, TransportError};
pub use pipes::{PipeWriter, ProcessOutput};
pub use process::{ProcessConfig, ProcessSupervisor};
pub use pump::{pump_output, PumpExit};
