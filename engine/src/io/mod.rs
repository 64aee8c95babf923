//! I/O for plan runs: processes, pipes, files, and the terminal.

pub mod config;
pub mod executor;
pub mod plan_store;
pub mod process;
pub mod stream;
pub mod terminal;
