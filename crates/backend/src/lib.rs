//! Render backend integration.
//!
//! Typed wire messages and an HTTP client for the render service's batch
//! API, settings payload construction, local accelerator discovery, and
//! supervision of the per-accelerator backend processes.

pub mod api;
pub mod device;
pub mod messages;
pub mod payload;
pub mod supervisor;
