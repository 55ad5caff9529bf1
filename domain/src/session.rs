use crate::error::{EntityErrorKind, Error};
use crate::outbox::Outbox;
use crate::registry::{ensure_open, Registry, RegistryState};
use chrono::Utc;
use entity::{normalize_email, Email, UserStatus};
use entity_api::user::generate_hash;
use events::Event;
use log::*;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Unique identifier for a session (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry-side record of one live session. Both flags only change inside
/// the registry's critical section.
pub(crate) struct SessionState {
    pub(crate) id: SessionId,
    pub(crate) email: Email,
    pub(crate) outbox: Outbox,
    intentionally_disconnected: AtomicBool,
    closed: AtomicBool,
}

impl SessionState {
    pub(crate) fn new(email: Email, outbox: Outbox) -> Self {
        Self {
            id: SessionId::new(),
            email,
            outbox,
            intentionally_disconnected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_intentionally_disconnected(&self) -> bool {
        self.intentionally_disconnected.load(Ordering::Acquire)
    }

    pub(crate) fn mark_intentionally_disconnected(&self) {
        self.intentionally_disconnected.store(true, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// One client acting as one identity. An identity may hold several sessions
/// at once.
///
/// Every mutating call runs inside the registry's critical section and fails
/// with `IntentionalDisconnect` once another session of the same identity
/// has evicted this one.
#[derive(Clone)]
pub struct Session {
    registry: Registry,
    state: Arc<SessionState>,
}

impl Session {
    pub(crate) fn new(registry: Registry, state: Arc<SessionState>) -> Self {
        Self { registry, state }
    }

    pub fn id(&self) -> &SessionId {
        &self.state.id
    }

    pub fn email(&self) -> &str {
        &self.state.email
    }

    pub fn is_intentionally_disconnected(&self) -> bool {
        self.state.is_intentionally_disconnected()
    }

    pub fn is_open(&self) -> bool {
        !self.state.is_closed() && !self.state.is_intentionally_disconnected()
    }

    /// Wait for the next event. Returns `None` once the session has been
    /// closed and everything queued before that was delivered.
    pub async fn next_event(&self) -> Option<Event> {
        self.state.outbox.recv().await
    }

    /// Take every pending event without waiting.
    pub fn drain_events(&self) -> Vec<Event> {
        self.state.outbox.drain()
    }

    pub fn pending_events(&self) -> usize {
        self.state.outbox.len()
    }

    /// A fresh snapshot of this session's data, read under the critical section.
    pub fn full_state(&self) -> Result<Event, Error> {
        self.registry
            .locked(|reg| reg.full_state(&self.state.email).map_err(Error::from))
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut RegistryState, &SessionState) -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.registry.locked(|reg| {
            ensure_open(&self.state)?;
            f(reg, self.state.as_ref())
        })
    }

    /// Change this identity's password and evict its other sessions.
    pub fn set_password(&self, old_pass: &str, new_pass: &str) -> Result<(), Error> {
        self.registry.locked(|_| ensure_open(&self.state))?;
        let verified = self
            .registry
            .verify_credential(&self.state.email, old_pass)?;
        let new_hash = generate_hash(new_pass);
        self.mutate(|reg, me| {
            reg.ensure_credential(&me.email, &verified)?;
            reg.store.set_password_hash(&me.email, new_hash)?;
            reg.evict_sessions(&me.email, Some(&me.id));
            Ok(())
        })
    }

    /// Ask `email` to become a buddy.
    pub fn send_request(&self, email: &str) -> Result<(), Error> {
        let target = normalize_email(email);
        self.mutate(|reg, me| {
            reg.store.send_request(&me.email, &target)?;
            reg.notify(
                &target,
                Event::RequestReceived {
                    email: me.email.clone(),
                },
                None,
            );
            reg.notify(
                &me.email,
                Event::RequestSent {
                    email: target.clone(),
                },
                Some(&me.id),
            );
            Ok(())
        })
    }

    /// Accept the pending request `email` sent to this identity.
    pub fn accept_request(&self, email: &str) -> Result<(), Error> {
        let target = normalize_email(email);
        self.mutate(|reg, me| {
            reg.store.accept_request(&me.email, &target)?;

            // Statuses are masked now, at the moment of the event.
            let statuses = reg
                .masked_status(&me.email)
                .and_then(|mine| Ok((mine, reg.masked_status(&target)?)));
            let (my_status, target_status) = match statuses {
                Ok(statuses) => statuses,
                Err(e) => {
                    warn!("Accepted request but could not read statuses: {e}");
                    reg.broadcast_sync_error();
                    return Ok(());
                }
            };

            reg.notify(
                &target,
                Event::RequestAccepted {
                    email: me.email.clone(),
                    status: my_status,
                },
                None,
            );
            reg.notify(
                &me.email,
                Event::AcceptSent {
                    email: target.clone(),
                    status: target_status,
                },
                None,
            );
            Ok(())
        })
    }

    /// Remove whatever relationship links this identity and `email`.
    pub fn delete_buddy(&self, email: &str) -> Result<(), Error> {
        let target = normalize_email(email);
        self.mutate(|reg, me| {
            reg.store.delete_buddy(&me.email, &target)?;
            reg.notify(
                &me.email,
                Event::BuddyRemoved {
                    email: target.clone(),
                },
                None,
            );
            reg.notify(
                &target,
                Event::BuddyRemoved {
                    email: me.email.clone(),
                },
                None,
            );
            Ok(())
        })
    }

    /// Store a new status, stamped with the current time, and show it to
    /// every buddy with a live session.
    pub fn set_status(&self, mut status: UserStatus) -> Result<(), Error> {
        self.mutate(|reg, me| {
            if !status.availability.is_settable() {
                return Err(Error::entity(EntityErrorKind::InvalidStatus));
            }
            status.time = Utc::now();
            reg.store.set_status(&me.email, status.clone())?;
            reg.announce_status(&me.email, status);
            Ok(())
        })
    }

    /// Evict every other live session of this identity.
    pub fn disconnect_others(&self) -> Result<(), Error> {
        self.mutate(|reg, me| {
            reg.evict_sessions(&me.email, Some(&me.id));
            Ok(())
        })
    }

    /// End this session.
    ///
    /// Closing an evicted session succeeds without side effects. Closing a
    /// session twice fails with `NotOpen`. When the last live session of the
    /// identity closes, its buddies are told it went offline.
    pub fn close(&self) -> Result<(), Error> {
        self.registry.locked(|reg| {
            if self.state.is_intentionally_disconnected() {
                return Ok(());
            }
            ensure_open(&self.state)?;

            self.state.mark_closed();
            self.state.outbox.close();
            if reg.remove(&self.state.id).is_none() {
                return Err(self.registry.invariant_violation(format!(
                    "open session {} of {} is missing from the registry",
                    self.state.id, self.state.email
                )));
            }
            info!("Closed session {} for {}", self.state.id, self.state.email);

            if !reg.is_online(&self.state.email) {
                reg.announce_status(&self.state.email, UserStatus::offline());
            }
            Ok(())
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.state.id)
            .field("email", &self.state.email)
            .field("open", &self.is_open())
            .finish()
    }
}
