//! Deterministic, pure logic shared by the conductor.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod extract;
pub mod graph;
pub mod invariants;
pub mod marker;
pub mod types;
