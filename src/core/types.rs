use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::error::Error;

/// Whole-property status as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyState {
    /// No activity, nothing pending
    Idle,
    /// Last operation completed successfully
    Ok,
    /// An operation is in progress
    Busy,
    /// Attention required; the error-reporting channel of the protocol
    Alert,
}

impl FromStr for PropertyState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "Idle" => Ok(PropertyState::Idle),
            "Ok" => Ok(PropertyState::Ok),
            "Busy" => Ok(PropertyState::Busy),
            "Alert" => Ok(PropertyState::Alert),
            other => Err(Error::parse(format!("bad property state '{}'", other))),
        }
    }
}

impl fmt::Display for PropertyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PropertyState::Idle => "Idle",
            PropertyState::Ok => "Ok",
            PropertyState::Busy => "Busy",
            PropertyState::Alert => "Alert",
        };
        f.write_str(s)
    }
}

/// Client access advisory for a property; never carried by Light vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "ro" => Ok(Permission::ReadOnly),
            "wo" => Ok(Permission::WriteOnly),
            "rw" => Ok(Permission::ReadWrite),
            other => Err(Error::parse(format!("bad permission '{}'", other))),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Permission::ReadOnly => "ro",
            Permission::WriteOnly => "wo",
            Permission::ReadWrite => "rw",
        };
        f.write_str(s)
    }
}

/// Legal combinations of member states for a Switch vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwitchRule {
    /// Exactly one member is On at all times
    OneOfMany,
    /// At most one member is On; all-Off is a legal resting state
    AtMostOne,
    /// Members are independent
    AnyOfMany,
}

impl FromStr for SwitchRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "OneOfMany" => Ok(SwitchRule::OneOfMany),
            "AtMostOne" => Ok(SwitchRule::AtMostOne),
            "AnyOfMany" => Ok(SwitchRule::AnyOfMany),
            other => Err(Error::parse(format!("bad switch rule '{}'", other))),
        }
    }
}

impl fmt::Display for SwitchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SwitchRule::OneOfMany => "OneOfMany",
            SwitchRule::AtMostOne => "AtMostOne",
            SwitchRule::AnyOfMany => "AnyOfMany",
        };
        f.write_str(s)
    }
}

/// State of a single Switch element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    /// Returns true when the switch is On
    pub fn is_on(self) -> bool {
        matches!(self, SwitchState::On)
    }
}

impl From<bool> for SwitchState {
    fn from(on: bool) -> Self {
        if on {
            SwitchState::On
        } else {
            SwitchState::Off
        }
    }
}

impl FromStr for SwitchState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "On" => Ok(SwitchState::On),
            "Off" => Ok(SwitchState::Off),
            other => Err(Error::parse(format!("bad switch state '{}'", other))),
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SwitchState::On => "On",
            SwitchState::Off => "Off",
        })
    }
}

/// Per-client BLOB delivery policy set via enableBLOB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlobPolicy {
    /// Never deliver BLOB payloads (the default for every fresh connection)
    Never,
    /// Deliver BLOBs interleaved with other traffic
    Also,
    /// Deliver only BLOB traffic, suppressing other updates on the channel
    Only,
}

impl Default for BlobPolicy {
    fn default() -> Self {
        BlobPolicy::Never
    }
}

impl FromStr for BlobPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "Never" => Ok(BlobPolicy::Never),
            "Also" => Ok(BlobPolicy::Also),
            "Only" => Ok(BlobPolicy::Only),
            other => Err(Error::parse(format!("bad BLOB policy '{}'", other))),
        }
    }
}

impl fmt::Display for BlobPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BlobPolicy::Never => "Never",
            BlobPolicy::Also => "Also",
            BlobPolicy::Only => "Only",
        })
    }
}

/// The five property kinds; fixed for a property's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyKind {
    Number,
    Text,
    Switch,
    Light,
    Blob,
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PropertyKind::Number => "Number",
            PropertyKind::Text => "Text",
            PropertyKind::Switch => "Switch",
            PropertyKind::Light => "Light",
            PropertyKind::Blob => "BLOB",
        })
    }
}

/// ISO-8601 UTC wire timestamp (`YYYY-MM-DDTHH:MM:SS.sss`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time
    pub fn now() -> Self {
        Timestamp(Utc::now())
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        // Fractional seconds are optional on the wire
        let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .map_err(|e| Error::parse(format!("bad timestamp '{}': {}", s, e)))?;
        Ok(Timestamp(Utc.from_utc_datetime(&naive)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // to_rfc3339 appends a UTC offset; the wire format carries none
        f.write_str(
            self.0
                .to_rfc3339_opts(SecondsFormat::Millis, true)
                .trim_end_matches('Z'),
        )
    }
}

/// Configuration for the routing layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Local address the TCP accept loop binds to
    pub bind_addr: SocketAddr,
    /// Maximum size of a single buffered wire fragment in bytes
    pub max_fragment_size: usize,
    /// Depth of the per-connection outbound queue
    pub channel_capacity: usize,
    /// Attached (fast-path) BLOBs allowed in flight per connection before
    /// the flow controller holds further payloads back
    pub max_inflight_blobs: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            bind_addr: format!("0.0.0.0:{}", super::DEFAULT_PORT).parse().unwrap(),
            max_fragment_size: super::MAX_FRAGMENT_SIZE,
            channel_capacity: 64,
            max_inflight_blobs: 4,
        }
    }
}
