//! tidegate core: transport-agnostic protocol primitives and error types.
//!
//! This crate defines the backend envelope, the fluent msgpack framing used
//! on the backend link, and the error surface shared by the gateway. It
//! carries no transport or runtime dependencies so it can be reused by tools
//! and fake backends.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths must surface as `TideError`/`Result` so production
//! processes do not crash on malformed backend traffic.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{Result, TideError};
