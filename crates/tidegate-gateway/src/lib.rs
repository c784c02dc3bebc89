//! tidegate gateway library entry.
//!
//! This crate wires the backend link, the command registry and the HTTP and
//! socket adapters into one axum application. It is consumed by the binary
//! (`main.rs`) and by integration tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod api;
pub mod app_state;
pub mod backend;
pub mod command;
pub mod config;
pub mod obs;
pub mod ops;
pub mod router;
pub mod transport;
