//! INDI: Instrument-Neutral Device Interface protocol library
//!
//! This library implements the INDI property-synchronization protocol: devices
//! publish self-describing property vectors, clients discover and mutate them,
//! and a router fans traffic between the two sides with BLOB flow control and
//! inter-driver snooping.

pub mod core;
pub mod network;
pub mod property;
pub mod protocol;
pub mod sync;

// Re-export commonly used items
pub use crate::core::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
