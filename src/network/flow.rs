use std::collections::HashSet;

use rand::Rng;

use crate::protocol::Message;

/// Per-connection BLOB flow controller.
///
/// After forwarding an attached fast-path payload the router sends a
/// pingRequest with a fresh uid; the matching pingReply proves the peer
/// has finished processing everything sent before it and released the
/// handle. While too many pings are outstanding the peer is considered
/// saturated and further attached payloads to it are shed. Inline BLOBs
/// never enter the window.
#[derive(Debug)]
pub struct FlowController {
    max_inflight: usize,
    outstanding: HashSet<String>,
}

impl FlowController {
    pub fn new(max_inflight: usize) -> Self {
        FlowController {
            max_inflight,
            outstanding: HashSet::new(),
        }
    }

    /// Whether another BLOB may be sent to this peer right now
    pub fn ready(&self) -> bool {
        self.outstanding.len() < self.max_inflight
    }

    /// Number of pings awaiting a reply
    pub fn in_flight(&self) -> usize {
        self.outstanding.len()
    }

    /// Registers a new probe and returns the pingRequest to send
    pub fn probe(&mut self) -> Message {
        let uid = format!("{:016x}", rand::thread_rng().gen::<u64>());
        self.outstanding.insert(uid.clone());
        Message::PingRequest { uid }
    }

    /// Records a pingReply; returns false for a uid this controller never
    /// issued (stale or misdirected replies are harmless)
    pub fn acknowledge(&mut self, uid: &str) -> bool {
        self.outstanding.remove(uid)
    }
}
