//! Event system infrastructure for the presence service.
//!
//! This crate provides the notifications the session registry fans out to
//! live sessions, and the bounded queue both the per-session outbox and the
//! per-connection state lane are built on.
//!
//! # Architecture
//!
//! - **Event**: Enum representing every change a session can be told about
//! - **CollapseQueue**: Bounded FIFO that, on overflow, throws away its
//!   contents and keeps one authoritative snapshot instead
//!
//! Events are immutable values. A recipient that misses deltas because its
//! queue collapsed still converges, because the snapshot replacing them is
//! taken after every discarded delta was applied.

pub mod queue;

pub use queue::{CollapseQueue, Pushed};

use entity::{Email, UserInfo, UserStatus};
use std::collections::BTreeMap;

/// Trait for getting the wire-level name of an event or message
pub trait EventType {
    fn event_type(&self) -> &'static str;
}

/// A notification that data affecting a session's user has changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Complete snapshot: the user's own record plus the status of every
    /// buddy, already masked by presence.
    FullState {
        user: UserInfo,
        buddy_statuses: BTreeMap<Email, UserStatus>,
    },
    /// This session was ended from another session of the same identity.
    IntentionalDisconnect,
    /// Another session of this identity sent a buddy request to `email`.
    RequestSent { email: Email },
    /// `email` sent this identity a buddy request.
    RequestReceived { email: Email },
    /// This identity accepted the request from `email`, whose masked status is attached.
    AcceptSent { email: Email, status: UserStatus },
    /// `email` accepted this identity's request; carries `email`'s masked status.
    RequestAccepted { email: Email, status: UserStatus },
    /// Any relationship with `email` is gone.
    BuddyRemoved { email: Email },
    /// A buddy's displayed status changed.
    StatusChanged { email: Email, status: UserStatus },
    /// A change could not be computed; the session should resynchronize.
    SyncError,
}

impl EventType for Event {
    fn event_type(&self) -> &'static str {
        match self {
            Event::FullState { .. } => "full_state",
            Event::IntentionalDisconnect => "intentional_disconnect",
            Event::RequestSent { .. } => "request_sent",
            Event::RequestReceived { .. } => "request_received",
            Event::AcceptSent { .. } => "accept_sent",
            Event::RequestAccepted { .. } => "request_accepted",
            Event::BuddyRemoved { .. } => "buddy_removed",
            Event::StatusChanged { .. } => "status_changed",
            Event::SyncError => "sync_error",
        }
    }
}
