//! The session registry: owns every live session, serializes all mutations of
//! the store, and computes which sessions hear about each change.
//!
//! One mutex guards both the store and the session list. Every operation
//! takes it once, mutates the store, and pushes its events before letting go,
//! so no operation ever observes another one half applied. Pushing into an
//! outbox never waits on a consumer, and password hashing happens before the
//! lock is taken, which keeps the critical section short.

use crate::error::{EntityErrorKind, Error, SessionErrorKind};
use crate::outbox::Outbox;
use crate::session::{Session, SessionId, SessionState};
use entity::{normalize_email, Availability, Email, UserStatus};
use entity_api::error::{EntityApiErrorKind, Error as StoreError};
use entity_api::user::{generate_hash, verify_password};
use entity_api::Store;
use events::{Event, EventType};
use log::*;
use parking_lot::Mutex;
use service::config::{Config, DEFAULT_OUTBOX_DEPTH};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Events a session may have pending before its outbox collapses.
    pub outbox_depth: usize,
    /// Abort on registry bookkeeping faults instead of reporting them.
    pub panic_on_invariant_violation: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            outbox_depth: DEFAULT_OUTBOX_DEPTH,
            panic_on_invariant_violation: false,
        }
    }
}

impl RegistryOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            outbox_depth: config.outbox_depth,
            panic_on_invariant_violation: config.panic_on_invariant_violation(),
        }
    }
}

/// Handle to the registry. Cloning is cheap and every clone refers to the
/// same set of sessions and the same store.
#[derive(Clone)]
pub struct Registry {
    shared: Arc<Shared>,
}

struct Shared {
    options: RegistryOptions,
    state: Mutex<RegistryState>,
}

/// Everything guarded by the registry's critical section.
pub(crate) struct RegistryState {
    pub(crate) store: Box<dyn Store>,
    sessions: Vec<Arc<SessionState>>,
}

impl Registry {
    pub fn new(store: Box<dyn Store>, options: RegistryOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                options,
                state: Mutex::new(RegistryState {
                    store,
                    sessions: Vec::new(),
                }),
            }),
        }
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.shared.options
    }

    /// Run `f` inside the critical section.
    pub(crate) fn locked<T>(&self, f: impl FnOnce(&mut RegistryState) -> T) -> T {
        let mut state = self.shared.state.lock();
        f(&mut state)
    }

    /// Authenticate and open a new session.
    ///
    /// The session's outbox already holds a `FullState` when this returns, so
    /// the first thing any session observes is a complete snapshot.
    pub fn begin_session(&self, email: &str, password: &str) -> Result<Session, Error> {
        let email = normalize_email(email);
        let verified = self.verify_credential(&email, password)?;
        self.locked(|reg| {
            reg.ensure_credential(&email, &verified)?;

            let initial = reg.full_state(&email)?;
            let stored_status = match &initial {
                Event::FullState { user, .. } => user.latest_status.clone(),
                _ => UserStatus::offline(),
            };

            let state = Arc::new(SessionState::new(
                email.clone(),
                Outbox::new(self.shared.options.outbox_depth),
            ));
            state.outbox.push(initial, || Event::SyncError);

            let first_login = !reg.is_online(&email);
            reg.sessions.push(Arc::clone(&state));
            info!(
                "Began session {} for {email} ({} live)",
                state.id,
                reg.sessions_of(&email).count()
            );

            if first_login && stored_status.availability != Availability::Offline {
                reg.announce_status(&email, stored_status);
            }

            Ok(Session::new(self.clone(), state))
        })
    }

    /// Register a new identity.
    pub fn register(&self, email: &str, password: &str) -> Result<(), Error> {
        let email = normalize_email(email);
        self.locked(|reg| reg.store.add_user(&email, password))?;
        info!("Registered {email}");
        Ok(())
    }

    /// Mark an identity verified with the token issued at registration.
    pub fn verify(&self, email: &str, token: &str) -> Result<(), Error> {
        let email = normalize_email(email);
        self.locked(|reg| reg.store.verify_user(&email, token))?;
        Ok(())
    }

    /// Change a password without a session. Every live session of the
    /// identity is evicted, since none of them is the one making the change.
    pub fn change_password(&self, email: &str, old_pass: &str, new_pass: &str) -> Result<(), Error> {
        let email = normalize_email(email);
        let verified = self.verify_credential(&email, old_pass)?;
        let new_hash = generate_hash(new_pass);
        self.locked(|reg| {
            reg.ensure_credential(&email, &verified)?;
            reg.store.set_password_hash(&email, new_hash)?;
            reg.evict_sessions(&email, None);
            Ok(())
        })
    }

    /// Check `password` against the stored credential without holding the
    /// lock while hashing. Returns the hash that matched, for
    /// `RegistryState::ensure_credential` to confirm once locked.
    pub(crate) fn verify_credential(&self, email: &str, password: &str) -> Result<String, Error> {
        let stored = self
            .locked(|reg| reg.store.get_user_info(email))
            .map_err(Error::from_login)?
            .password_hash;
        verify_password(password, &stored).map_err(Error::from_login)?;
        Ok(stored)
    }

    /// Whether an identity is registered under `email`.
    pub fn has_identity(&self, email: &str) -> Result<bool, Error> {
        let email = normalize_email(email);
        self.locked(|reg| match reg.store.get_user_info(&email) {
            Ok(_) => Ok(true),
            Err(e) if e.error_kind == EntityApiErrorKind::NoSuchEmail => Ok(false),
            Err(e) => Err(e.into()),
        })
    }

    /// Whether the identity has at least one live session.
    pub fn is_online(&self, email: &str) -> bool {
        let email = normalize_email(email);
        self.locked(|reg| reg.is_online(&email))
    }

    /// Number of live sessions, across all identities.
    pub fn session_count(&self) -> usize {
        self.locked(|reg| reg.sessions.len())
    }

    /// Number of live sessions acting as `email`.
    pub fn sessions_of(&self, email: &str) -> usize {
        let email = normalize_email(email);
        self.locked(|reg| reg.sessions_of(&email).count())
    }

    /// Report a bookkeeping fault. Panics when configured to fail loudly.
    pub(crate) fn invariant_violation(&self, detail: String) -> Error {
        error!("Session registry invariant violated: {detail}");
        if self.shared.options.panic_on_invariant_violation {
            panic!("session registry invariant violated: {detail}");
        }
        Error::invariant_violation(detail)
    }
}

impl RegistryState {
    /// Fails with `Credential` when the password changed after
    /// `verified_hash` was checked.
    pub(crate) fn ensure_credential(&self, email: &str, verified_hash: &str) -> Result<(), Error> {
        let current = self
            .store
            .get_user_info(email)
            .map_err(Error::from_login)?
            .password_hash;
        if current == verified_hash {
            Ok(())
        } else {
            Err(Error::entity(EntityErrorKind::Credential))
        }
    }

    pub(crate) fn is_online(&self, email: &str) -> bool {
        self.sessions.iter().any(|s| s.email == email)
    }

    fn sessions_of<'a>(&'a self, email: &'a str) -> impl Iterator<Item = &'a Arc<SessionState>> {
        self.sessions.iter().filter(move |s| s.email == email)
    }

    /// Take a session out of the live set.
    pub(crate) fn remove(&mut self, id: &SessionId) -> Option<Arc<SessionState>> {
        let index = self.sessions.iter().position(|s| &s.id == id)?;
        Some(self.sessions.remove(index))
    }

    /// A complete snapshot of `email`'s data, with every buddy's status
    /// masked by presence.
    pub(crate) fn full_state(&self, email: &str) -> Result<Event, StoreError> {
        let user = self.store.get_user_info(email)?;
        let buddies: Vec<Email> = user.buddies.iter().cloned().collect();
        let statuses = self.store.get_statuses(&buddies)?;

        let buddy_statuses: BTreeMap<Email, UserStatus> = buddies
            .into_iter()
            .zip(statuses)
            .map(|(buddy, status)| {
                let masked = status.masked(self.is_online(&buddy));
                (buddy, masked)
            })
            .collect();

        Ok(Event::FullState {
            user,
            buddy_statuses,
        })
    }

    /// The event that replaces a collapsed outbox: a fresh snapshot, or a
    /// `SyncError` when the store cannot produce one.
    fn snapshot(&self, email: &str) -> Event {
        self.full_state(email).unwrap_or_else(|e| {
            warn!("Could not rebuild full state for {email}, sending sync error: {e}");
            Event::SyncError
        })
    }

    /// The status `email`'s buddies should currently see.
    pub(crate) fn masked_status(&self, email: &str) -> Result<UserStatus, StoreError> {
        let stored = self.store.get_statuses(&[email.to_string()])?;
        let status = stored.into_iter().next().unwrap_or_default();
        Ok(status.masked(self.is_online(email)))
    }

    /// Push `event` to every live session of `email`, except `skip`.
    pub(crate) fn notify(&self, email: &str, event: Event, skip: Option<&SessionId>) {
        let mut recipients = 0;
        for session in self.sessions_of(email) {
            if Some(&session.id) == skip {
                continue;
            }
            session.outbox.push(event.clone(), || self.snapshot(email));
            recipients += 1;
        }
        debug!(
            "Fanned out {} for {email} to {recipients} session(s)",
            event.event_type()
        );
    }

    /// Tell every live session that a change could not be computed.
    pub(crate) fn broadcast_sync_error(&self) {
        warn!(
            "Broadcasting sync error to {} session(s)",
            self.sessions.len()
        );
        for session in &self.sessions {
            session
                .outbox
                .push(Event::SyncError, || self.snapshot(&session.email));
        }
    }

    /// Send `email`'s new displayed status to the sessions of its buddies.
    pub(crate) fn announce_status(&self, email: &str, status: UserStatus) {
        let buddies = match self.store.get_user_info(email) {
            Ok(user) => user.buddies,
            Err(e) => {
                warn!("Could not read buddies of {email}: {e}");
                self.broadcast_sync_error();
                return;
            }
        };
        for buddy in &buddies {
            self.notify(
                buddy,
                Event::StatusChanged {
                    email: email.to_string(),
                    status: status.clone(),
                },
                None,
            );
        }
    }

    /// Evict every live session of `email` except `keep`: flag it, load its
    /// outbox with an `IntentionalDisconnect`, and drop it from the live set.
    pub(crate) fn evict_sessions(&mut self, email: &str, keep: Option<&SessionId>) {
        let (evicted, remaining): (Vec<_>, Vec<_>) = self
            .sessions
            .drain(..)
            .partition(|s| s.email == email && Some(&s.id) != keep);
        self.sessions = remaining;

        for session in &evicted {
            session.mark_intentionally_disconnected();
            session.outbox.force_disconnect();
            info!("Evicted session {} of {email}", session.id);
        }

        // Evicted sessions report success on close without side effects, so
        // the identity's buddies learn it went offline here or never.
        if !evicted.is_empty() && !self.is_online(email) {
            self.announce_status(email, UserStatus::offline());
        }
    }
}

/// Reject operations on sessions that can no longer act. Eviction takes
/// precedence over a normal close.
pub(crate) fn ensure_open(state: &SessionState) -> Result<(), Error> {
    if state.is_intentionally_disconnected() {
        Err(Error::session(SessionErrorKind::IntentionalDisconnect))
    } else if state.is_closed() {
        Err(Error::session(SessionErrorKind::NotOpen))
    } else {
        Ok(())
    }
}
