//! Protocol implementation module
//!
//! Defines the wire message types, the constrained-XML codec, and the
//! per-property synchronization state machine.

pub mod codec;
pub mod message;
pub mod state;
pub mod xml;

pub use self::codec::XmlCodec;
pub use self::message::{Message, NewVector, UpdateVector};
pub use self::state::{PropertySync, SetDisposition, SyncPhase};
pub use self::xml::XmlElement;
