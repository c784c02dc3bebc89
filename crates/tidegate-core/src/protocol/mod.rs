//! Protocol modules for the backend link.
//!
//! - `envelope`: the message unit exchanged with the backend.
//! - `fluent`: msgpack framing (Message / Forward shapes) carrying envelopes.
//!
//! All parsers are panic-free: malformed input is reported as `TideError`
//! instead of panicking or indexing raw buffers, so one bad packet never
//! takes the gateway down.

pub mod envelope;
pub mod fluent;

pub use envelope::Envelope;
pub use fluent::{Event, Packet};
