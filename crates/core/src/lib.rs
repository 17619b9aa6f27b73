//! Primitives shared by the export pipeline.
//!
//! This crate contains **pure** building blocks (no I/O): identifiers,
//! process-level error codes and the upload retry policy.

pub mod code;
pub mod error;
pub mod id;
pub mod retry;

pub use code::ErrorCode;
pub use error::{CoreError, CoreResult};
pub use id::{JobId, RemoteJobId};
pub use retry::RetryPolicy;
