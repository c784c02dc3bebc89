//! Top-level facade crate for tidegate.
//!
//! Re-exports core types and the gateway library so users can depend on a single crate.

pub mod core {
    pub use tidegate_core::*;
}

pub mod gateway {
    pub use tidegate_gateway::*;
}
