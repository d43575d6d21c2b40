//! Synchronization engines for both ends of a connection.
//!
//! [`ClientCache`] mirrors device-owned properties on the client side and
//! keeps each one's lifecycle phase; [`DeviceStore`] is the authoritative
//! store a driver publishes from. Both consume decoded [`Message`]s and
//! produce the messages or events the caller acts on, leaving transport to
//! the network layer.
//!
//! [`Message`]: crate::protocol::Message

pub mod client;
pub mod device;

pub use client::{CachedProperty, ClientCache, ClientEvent};
pub use device::{DeviceAction, DeviceStore};
