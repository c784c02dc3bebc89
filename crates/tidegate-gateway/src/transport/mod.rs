//! Client-facing transports.
//!
//! `http` binds HTTP commands to axum routes. `socket` holds the transport
//! independent socket adapter, and `ws` runs it over a WebSocket with the
//! JSON frame `codec`.

pub mod codec;
pub mod http;
pub mod socket;
pub mod ws;
