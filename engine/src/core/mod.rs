//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of process and file-system side effects. They
//! operate on in-memory data and return deterministic outputs suitable for tests.

pub mod budget;
pub mod env;
pub mod error;
pub mod execution;
pub mod invariants;
pub mod path;
pub mod policy;
pub mod readiness;
pub mod recovery;
pub mod types;
