//! Forwarding a session's events to its connection.

use domain::error::Error as DomainError;
use domain::{Event, EventType, Session};
use events::Pushed;
use log::*;
use std::sync::Arc;
use transport::{BufferedConnection, BuddyStatus, FullState, ServerMessage};

/// The state-lane message a client sees for `event`. `None` for an
/// `IntentionalDisconnect`, which is answered on the control lane instead.
pub(crate) fn state_message(event: Event) -> Option<ServerMessage> {
    let message = match event {
        Event::FullState {
            user,
            buddy_statuses,
        } => ServerMessage::FullState(FullState {
            user: user.view(),
            buddies: buddy_statuses
                .into_iter()
                .map(|(email, status)| BuddyStatus { email, status })
                .collect(),
        }),
        Event::RequestSent { email } => ServerMessage::RequestSent { email },
        Event::RequestReceived { email } => ServerMessage::RequestReceived { email },
        Event::AcceptSent { email, status } => ServerMessage::AcceptSent { email, status },
        Event::RequestAccepted { email, status } => ServerMessage::RequestAccepted { email, status },
        Event::BuddyRemoved { email } => ServerMessage::BuddyRemoved { email },
        Event::StatusChanged { email, status } => ServerMessage::StatusChanged { email, status },
        Event::SyncError => ServerMessage::SyncError,
        Event::IntentionalDisconnect => return None,
    };
    Some(message)
}

fn full_state_message(session: &Session) -> Result<ServerMessage, DomainError> {
    let event = session.full_state()?;
    Ok(state_message(event).unwrap_or(ServerMessage::SyncError))
}

/// Drain `session`'s outbox into `out` until the session ends.
///
/// State messages go to the state lane, which collapses to a fresh full
/// state when the client falls behind. An eviction is announced with a
/// `forced_logout` on the control lane, after which the connection is
/// flushed and closed.
pub(crate) async fn relay_events(session: Session, out: Arc<BufferedConnection>) {
    while let Some(event) = session.next_event().await {
        let event_type = event.event_type();
        let Some(message) = state_message(event) else {
            info!("Session {} was logged out from elsewhere", session.id());
            match out.send_control(ServerMessage::ForcedLogout).await {
                Ok(()) => out.finish().await,
                Err(e) => {
                    debug!("Could not deliver forced logout: {e}");
                    out.close();
                }
            }
            return;
        };

        match out.send_state(message, || full_state_message(&session)) {
            Ok(Pushed::Closed) => {
                debug!("Connection of session {} closed, stopping relay", session.id());
                return;
            }
            Ok(_) => trace!("Relayed {event_type} to session {}", session.id()),
            Err(e) => {
                warn!("Could not rebuild full state for session {}: {e}", session.id());
                out.reset_state(ServerMessage::SyncError);
            }
        }
    }
    debug!("Event stream of session {} ended", session.id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{UserInfo, UserStatus};
    use std::collections::BTreeMap;

    #[test]
    fn full_state_exposes_only_the_public_view() {
        let mut user = UserInfo::new("a@x".into(), "hash".into(), "token".into());
        user.buddies.insert("b@x".into());
        let mut buddy_statuses = BTreeMap::new();
        buddy_statuses.insert("b@x".to_string(), UserStatus::offline());

        match state_message(Event::FullState {
            user: user.clone(),
            buddy_statuses,
        }) {
            Some(ServerMessage::FullState(full)) => {
                assert_eq!(full.user, user.view());
                assert_eq!(
                    full.buddies,
                    vec![BuddyStatus {
                        email: "b@x".into(),
                        status: UserStatus::offline(),
                    }]
                );
            }
            other => panic!("expected full state, got {other:?}"),
        }
    }

    #[test]
    fn intentional_disconnect_is_not_a_state_message() {
        assert_eq!(state_message(Event::IntentionalDisconnect), None);
        assert_eq!(state_message(Event::SyncError), Some(ServerMessage::SyncError));
    }
}
