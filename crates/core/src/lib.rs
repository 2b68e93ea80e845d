//! Pure domain logic for the framefarm render dispatcher.
//!
//! Shard planning, the dataset naming convention, retry policies and the
//! shared error taxonomy. Nothing in this crate talks to the network or
//! spawns processes, so all of it is testable in isolation.

pub mod error;
pub mod naming;
pub mod retry;
pub mod shard;
pub mod types;
