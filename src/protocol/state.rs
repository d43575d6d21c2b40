//! Per-property synchronization state machine.
//!
//! The protocol is stateless per-message, so convergence is modeled as one
//! small state machine per (client, device, property) triple rather than a
//! global protocol automaton. The machine is pure: transitions take and
//! return plain values and can be tested without any transport.

use std::time::{Duration, Instant};

/// Observed lifecycle phase of a property in a client-side cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No definition received; updates for this property are ignored
    Unknown,

    /// Definition received, local cache populated
    Defined,

    /// A new* request was sent; the cache is optimistically Busy awaiting a
    /// confirming set*
    PendingChange {
        /// When the request was sent, for advisory-timeout bookkeeping
        since: Instant,
    },

    /// The property was withdrawn; terminal for this cache entry
    Deleted,
}

/// What the cache layer must do with an incoming set* message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetDisposition {
    /// Merge the update into the cached property
    Apply,
    /// Drop it: no definition was ever received, a cache entry cannot be
    /// materialized from an update alone
    Ignore,
}

/// State machine driver for one cached property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertySync {
    phase: SyncPhase,
}

impl Default for PropertySync {
    fn default() -> Self {
        PropertySync {
            phase: SyncPhase::Unknown,
        }
    }
}

impl PropertySync {
    /// Starts in `Unknown`
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// A define* arrived. Definitions are legal at any time and create or
    /// replace the cache entry.
    pub fn on_define(&mut self) {
        self.phase = SyncPhase::Defined;
    }

    /// A set* arrived; tells the caller whether to merge or drop it.
    /// A confirming update clears any pending optimistic change.
    pub fn on_set(&mut self) -> SetDisposition {
        match self.phase {
            SyncPhase::Unknown | SyncPhase::Deleted => SetDisposition::Ignore,
            SyncPhase::Defined | SyncPhase::PendingChange { .. } => {
                self.phase = SyncPhase::Defined;
                SetDisposition::Apply
            }
        }
    }

    /// A new* request is about to be sent for this property; marks the
    /// optimistic pending phase. Returns false when no definition exists to
    /// request a change against.
    pub fn on_new_sent(&mut self, now: Instant) -> bool {
        match self.phase {
            SyncPhase::Defined | SyncPhase::PendingChange { .. } => {
                self.phase = SyncPhase::PendingChange { since: now };
                true
            }
            SyncPhase::Unknown | SyncPhase::Deleted => false,
        }
    }

    /// A matching delProperty arrived
    pub fn on_delete(&mut self) {
        self.phase = SyncPhase::Deleted;
    }

    /// Advisory staleness check: true when a pending change has been
    /// outstanding longer than the property's declared timeout. Never
    /// triggers any automatic action.
    pub fn is_stalled(&self, timeout: Option<f64>, now: Instant) -> bool {
        match (self.phase, timeout) {
            (SyncPhase::PendingChange { since }, Some(timeout)) if timeout > 0.0 => {
                now.duration_since(since) > Duration::from_secs_f64(timeout)
            }
            _ => false,
        }
    }
}
