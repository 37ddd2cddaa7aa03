//! External tool execution.
//!
//! - `classifier`: which output lines signal errors and which reach the feed
//! - `runner`: spawn, stream, and classify one process run
//! - `tool`: command-line construction for the encode/decode binaries

pub mod classifier;
pub mod runner;
pub mod tool;

pub use runner::{Discard, Invocation, LineSink, ProcessRunner, RunOutput};
pub use tool::{Mp3StegoTool, StegoTool};
