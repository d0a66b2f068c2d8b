//! Process execution module.
//!
//! Provides:
//! - `CommandSpec`: argv or shell-string command with an optional working dir
//! - `CommandRunner`: the seam the pipeline runs commands through
//! - `ProcessExecutor`: real child processes with streamed output

mod command;
mod process;

pub use command::*;
pub use process::*;
