//! Fleet telemetry domain types.
//!
//! Pure logic shared by the transport, persistence and monitoring crates:
//! device lifecycle events, monitoring rules and their conditions, alerts,
//! and the well-known routing topics. Nothing in here performs I/O.

pub mod alert;
pub mod device;
pub mod error;
pub mod lookup;
pub mod rule;
pub mod topics;
pub mod types;
