//! Serving one client connection, from the first frame to disconnect.

use crate::error::Error;
use crate::relay::relay_events;
use domain::error::Error as DomainError;
use domain::{EventType, Registry, Session};
use log::*;
use service::config::{Config, DEFAULT_STATE_LANE_DEPTH};
use std::sync::Arc;
use transport::error::TransportErrorKind;
use transport::{BufferedConnection, ClientMessage, Connection, ServerMessage};

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub state_lane_depth: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            state_lane_depth: DEFAULT_STATE_LANE_DEPTH,
        }
    }
}

impl ClientOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            state_lane_depth: config.state_lane_depth,
        }
    }
}

enum Inbound {
    Message(ClientMessage),
    Malformed,
    Closed,
}

async fn read_inbound(out: &BufferedConnection) -> Inbound {
    let frame = match out.read_message().await {
        Ok(frame) => frame,
        Err(e) if e.is_terminal() => {
            if e.error_kind == TransportErrorKind::Closed {
                debug!("Connection closed");
            } else {
                warn!("Dropping connection: {e}");
            }
            out.close();
            return Inbound::Closed;
        }
        Err(e) => {
            warn!("Ignoring malformed frame: {e}");
            return Inbound::Malformed;
        }
    };
    match ClientMessage::try_from(frame) {
        Ok(message) => Inbound::Message(message),
        Err(e) => {
            warn!("Ignoring client message: {e}");
            Inbound::Malformed
        }
    }
}

/// Run a registry call on the blocking pool. Registry calls may hash a
/// password or write the store file, and must not hold up a runtime worker
/// while they do.
async fn off_runtime<T, F>(call: F) -> Result<T, DomainError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DomainError> + Send + 'static,
{
    match tokio::task::spawn_blocking(call).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(DomainError::invariant_violation(format!(
            "registry call did not complete: {e}"
        ))),
    }
}

/// Serve a client until it disconnects, logs out, or is logged out from
/// elsewhere. The connection is closed on return.
pub async fn handle_client(conn: Arc<dyn Connection>, registry: Registry, options: ClientOptions) {
    let out = Arc::new(BufferedConnection::new(conn, options.state_lane_depth));
    if let Some(session) = serve_unauthenticated(&out, &registry).await {
        serve_authenticated(&out, session).await;
    }
    out.finish().await;
}

/// Answer account messages until a login succeeds.
async fn serve_unauthenticated(out: &BufferedConnection, registry: &Registry) -> Option<Session> {
    loop {
        let message = match read_inbound(out).await {
            Inbound::Message(message) => message,
            Inbound::Malformed => continue,
            Inbound::Closed => return None,
        };

        let reply = match message {
            ClientMessage::Login { email, password } => {
                let login = {
                    let (registry, email) = (registry.clone(), email.clone());
                    off_runtime(move || registry.begin_session(&email, &password)).await
                };
                match login {
                    Ok(session) => {
                        if out.send_control(ServerMessage::LoginSuccess).await.is_ok() {
                            return Some(session);
                        }
                        close_session(&session);
                        return None;
                    }
                    Err(e) => {
                        info!("Login as {email} failed: {e}");
                        ServerMessage::LoginFailure {
                            message: e.reason().to_string(),
                        }
                    }
                }
            }
            ClientMessage::Register { email, password } => {
                let registry = registry.clone();
                match off_runtime(move || registry.register(&email, &password)).await {
                    Ok(()) => ServerMessage::RegisterSuccess,
                    Err(e) => ServerMessage::RegisterFailure {
                        message: e.reason().to_string(),
                    },
                }
            }
            ClientMessage::RegisterVerify { email, token } => {
                let registry = registry.clone();
                match off_runtime(move || registry.verify(&email, &token)).await {
                    Ok(()) => ServerMessage::RegisterSuccess,
                    Err(e) => ServerMessage::RegisterFailure {
                        message: e.reason().to_string(),
                    },
                }
            }
            ClientMessage::SetPassword {
                email,
                old_password,
                new_password,
            } => {
                let registry = registry.clone();
                let changed = off_runtime(move || {
                    registry.change_password(&email, &old_password, &new_password)
                })
                .await;
                match changed {
                    Ok(()) => ServerMessage::SetPasswordSuccess,
                    Err(e) => ServerMessage::SetPasswordFailure {
                        message: e.reason().to_string(),
                    },
                }
            }
            ClientMessage::ResetPassword { email } => {
                let known = {
                    let (registry, email) = (registry.clone(), email.clone());
                    off_runtime(move || registry.has_identity(&email)).await
                };
                match known {
                    Ok(false) => ServerMessage::NoSuchEmail,
                    Ok(true) => {
                        info!("Password reset requested for {email}, but no reset flow is configured");
                        continue;
                    }
                    Err(e) => Error::from(e).into_message("reset_password"),
                }
            }
            other => {
                debug!("Rejecting {} from an unauthenticated client", other.event_type());
                ServerMessage::LoginFailure {
                    message: "not logged in".to_string(),
                }
            }
        };

        if out.send_control(reply).await.is_err() {
            return None;
        }
    }
}

/// Dispatch session operations while a relay task forwards the session's
/// events. The session is closed on return.
async fn serve_authenticated(out: &Arc<BufferedConnection>, session: Session) {
    info!("Session {} serving {}", session.id(), session.email());
    let relay = tokio::spawn(relay_events(session.clone(), Arc::clone(out)));

    loop {
        let message = match read_inbound(out).await {
            Inbound::Message(message) => message,
            Inbound::Malformed => continue,
            Inbound::Closed => break,
        };
        let operation = message.event_type();

        if let ClientMessage::Logout = message {
            info!("Session {} logged out", session.id());
            break;
        }
        let outcome = {
            let session = session.clone();
            off_runtime(move || dispatch(&session, message)).await
        };

        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) if e.is_intentional_disconnect() => {
                debug!("Session {} was evicted during {operation}", session.id());
                break;
            }
            Err(e) if e.is_defect() => {
                error!("Session {} hit a defect during {operation}: {e}", session.id());
                out.close();
                break;
            }
            Err(e) => Some(Error::from(e).into_message(operation)),
        };
        if let Some(reply) = reply {
            if out.send_control(reply).await.is_err() {
                break;
            }
        }
    }

    close_session(&session);
    if let Err(e) = relay.await {
        warn!("Relay task of session {} failed: {e}", session.id());
    }
}

/// Apply one authenticated operation. `Ok(None)` means the outcome reaches
/// the client through the session's events alone.
fn dispatch(session: &Session, message: ClientMessage) -> Result<Option<ServerMessage>, DomainError> {
    match message {
        ClientMessage::LogoutOther => session.disconnect_others().map(|()| None),
        ClientMessage::SetStatus(status) => session.set_status(status).map(|()| None),
        ClientMessage::AddBuddy { email } => session.send_request(&email).map(|()| None),
        ClientMessage::AcceptRequest { email } => session.accept_request(&email).map(|()| None),
        ClientMessage::RemoveBuddy { email } => session.delete_buddy(&email).map(|()| None),
        ClientMessage::SetPassword {
            old_password,
            new_password,
            ..
        } => match session.set_password(&old_password, &new_password) {
            Ok(()) => Ok(Some(ServerMessage::SetPasswordSuccess)),
            Err(e) if e.is_intentional_disconnect() || e.is_defect() => Err(e),
            Err(e) => Ok(Some(ServerMessage::SetPasswordFailure {
                message: e.reason().to_string(),
            })),
        },
        other => Ok(Some(ServerMessage::OperationFailure {
            operation: other.event_type().to_string(),
            message: "already logged in".to_string(),
        })),
    }
}

fn close_session(session: &Session) {
    match session.close() {
        Ok(()) => {}
        Err(e) if e.is_defect() => error!("Closing session {} failed: {e}", session.id()),
        Err(e) => debug!("Session {} was already closed: {e}", session.id()),
    }
}
