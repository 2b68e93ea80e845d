//! `framefarm-dispatch` library crate.
//!
//! The dispatch core: a bounded task queue, per-slot dispatch workers, and
//! the orchestrator that wires them to the backend processes. The binary
//! entrypoint lives in `main.rs`.

pub mod config;
pub mod orchestrator;
pub mod queue;
pub mod worker;
