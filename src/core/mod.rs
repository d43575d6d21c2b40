//! Core types and traits for the INDI protocol library
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod types;

pub use self::error::{Error, Result};
pub use self::types::{
    BlobPolicy,
    Permission,
    PropertyKind,
    PropertyState,
    RouterConfig,
    SwitchRule,
    SwitchState,
    Timestamp,
};

/// Protocol version announced in getProperties
pub const PROTOCOL_VERSION: &str = "1.7";

/// Conventional TCP port for the protocol
pub const DEFAULT_PORT: u16 = 7624;

/// Default cap on a single buffered wire fragment; BLOB-bearing messages
/// carry their payload inline as base64, so this must be generous
pub const MAX_FRAGMENT_SIZE: usize = 256 * 1024 * 1024;
