//! The wire message catalog.
//!
//! Every message travels as a [`Frame`]: a JSON object whose `type` names the
//! message and whose `data` carries its payload, omitted for messages
//! without one.

use crate::error::{Error, TransportErrorKind};
use entity::{Email, UserStatus, UserView};
use events::EventType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One message as it appears on the wire, before its payload is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Frame {
    pub fn decode(line: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(line)?)
    }

    /// Serialize to a single line of JSON.
    pub fn encode(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages a client sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Login {
        email: Email,
        password: String,
    },
    Register {
        email: Email,
        password: String,
    },
    RegisterVerify {
        email: Email,
        token: String,
    },
    SetPassword {
        email: Email,
        old_password: String,
        new_password: String,
    },
    ResetPassword {
        email: Email,
    },
    Logout,
    LogoutOther,
    SetStatus(UserStatus),
    AddBuddy {
        email: Email,
    },
    AcceptRequest {
        email: Email,
    },
    RemoveBuddy {
        email: Email,
    },
}

impl EventType for ClientMessage {
    fn event_type(&self) -> &'static str {
        match self {
            ClientMessage::Login { .. } => "login",
            ClientMessage::Register { .. } => "register",
            ClientMessage::RegisterVerify { .. } => "register_verify",
            ClientMessage::SetPassword { .. } => "set_password",
            ClientMessage::ResetPassword { .. } => "reset_password",
            ClientMessage::Logout => "logout",
            ClientMessage::LogoutOther => "logout_other",
            ClientMessage::SetStatus(_) => "set_status",
            ClientMessage::AddBuddy { .. } => "add_buddy",
            ClientMessage::AcceptRequest { .. } => "accept_request",
            ClientMessage::RemoveBuddy { .. } => "remove_buddy",
        }
    }
}

const CLIENT_MESSAGE_TYPES: &[&str] = &[
    "login",
    "register",
    "register_verify",
    "set_password",
    "reset_password",
    "logout",
    "logout_other",
    "set_status",
    "add_buddy",
    "accept_request",
    "remove_buddy",
];

/// The two priority classes of outbound traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Acknowledgements and notices that must never be dropped.
    Control,
    /// Presence and roster updates, collapsible into a full state.
    State,
}

/// A buddy and the status this client should display for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuddyStatus {
    pub email: Email,
    pub status: UserStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullState {
    pub user: UserView,
    pub buddies: Vec<BuddyStatus>,
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    // Control lane
    LoginSuccess,
    LoginFailure {
        message: String,
    },
    RegisterSuccess,
    RegisterFailure {
        message: String,
    },
    ForcedLogout,
    #[serde(rename = "no_email")]
    NoSuchEmail,
    SetPasswordSuccess,
    SetPasswordFailure {
        message: String,
    },
    OperationFailure {
        operation: String,
        message: String,
    },

    // State lane
    FullState(FullState),
    RequestSent {
        email: Email,
    },
    RequestReceived {
        email: Email,
    },
    AcceptSent {
        email: Email,
        status: UserStatus,
    },
    RequestAccepted {
        email: Email,
        status: UserStatus,
    },
    BuddyRemoved {
        email: Email,
    },
    StatusChanged {
        email: Email,
        status: UserStatus,
    },
    SyncError,
}

impl ServerMessage {
    pub fn lane(&self) -> Lane {
        match self {
            ServerMessage::LoginSuccess
            | ServerMessage::LoginFailure { .. }
            | ServerMessage::RegisterSuccess
            | ServerMessage::RegisterFailure { .. }
            | ServerMessage::ForcedLogout
            | ServerMessage::NoSuchEmail
            | ServerMessage::SetPasswordSuccess
            | ServerMessage::SetPasswordFailure { .. }
            | ServerMessage::OperationFailure { .. } => Lane::Control,
            ServerMessage::FullState(_)
            | ServerMessage::RequestSent { .. }
            | ServerMessage::RequestReceived { .. }
            | ServerMessage::AcceptSent { .. }
            | ServerMessage::RequestAccepted { .. }
            | ServerMessage::BuddyRemoved { .. }
            | ServerMessage::StatusChanged { .. }
            | ServerMessage::SyncError => Lane::State,
        }
    }
}

impl EventType for ServerMessage {
    fn event_type(&self) -> &'static str {
        match self {
            ServerMessage::LoginSuccess => "login_success",
            ServerMessage::LoginFailure { .. } => "login_failure",
            ServerMessage::RegisterSuccess => "register_success",
            ServerMessage::RegisterFailure { .. } => "register_failure",
            ServerMessage::ForcedLogout => "forced_logout",
            ServerMessage::NoSuchEmail => "no_email",
            ServerMessage::SetPasswordSuccess => "set_password_success",
            ServerMessage::SetPasswordFailure { .. } => "set_password_failure",
            ServerMessage::OperationFailure { .. } => "operation_failure",
            ServerMessage::FullState(_) => "full_state",
            ServerMessage::RequestSent { .. } => "request_sent",
            ServerMessage::RequestReceived { .. } => "request_received",
            ServerMessage::AcceptSent { .. } => "accept_sent",
            ServerMessage::RequestAccepted { .. } => "request_accepted",
            ServerMessage::BuddyRemoved { .. } => "buddy_removed",
            ServerMessage::StatusChanged { .. } => "status_changed",
            ServerMessage::SyncError => "sync_error",
        }
    }
}

const SERVER_MESSAGE_TYPES: &[&str] = &[
    "login_success",
    "login_failure",
    "register_success",
    "register_failure",
    "forced_logout",
    "no_email",
    "set_password_success",
    "set_password_failure",
    "operation_failure",
    "full_state",
    "request_sent",
    "request_received",
    "accept_sent",
    "request_accepted",
    "buddy_removed",
    "status_changed",
    "sync_error",
];

fn to_frame<T: Serialize>(message: &T) -> Result<Frame, Error> {
    Ok(serde_json::from_value(serde_json::to_value(message)?)?)
}

fn from_frame<T: for<'de> Deserialize<'de>>(frame: Frame, known: &[&str]) -> Result<T, Error> {
    if !known.contains(&frame.message_type.as_str()) {
        return Err(Error::with_source(
            TransportErrorKind::UnknownMessageType,
            format!("unknown message type: {}", frame.message_type),
        ));
    }
    Ok(serde_json::from_value(serde_json::to_value(frame)?)?)
}

impl ClientMessage {
    pub fn to_frame(&self) -> Result<Frame, Error> {
        to_frame(self)
    }
}

impl TryFrom<Frame> for ClientMessage {
    type Error = Error;

    fn try_from(frame: Frame) -> Result<Self, Error> {
        from_frame(frame, CLIENT_MESSAGE_TYPES)
    }
}

impl ServerMessage {
    pub fn to_frame(&self) -> Result<Frame, Error> {
        to_frame(self)
    }
}

impl TryFrom<Frame> for ServerMessage {
    type Error = Error;

    fn try_from(frame: Frame) -> Result<Self, Error> {
        from_frame(frame, SERVER_MESSAGE_TYPES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity::Availability;
    use serde_json::json;

    #[test]
    fn client_messages_decode_from_frames() -> Result<(), Error> {
        let login = Frame::decode(r#"{"type":"login","data":{"email":"a@x","password":"pw"}}"#)?;
        assert_eq!(
            ClientMessage::try_from(login)?,
            ClientMessage::Login {
                email: "a@x".into(),
                password: "pw".into()
            }
        );

        let logout = Frame::decode(r#"{"type":"logout"}"#)?;
        assert_eq!(ClientMessage::try_from(logout)?, ClientMessage::Logout);

        let status = Frame::decode(
            r#"{"type":"set_status","data":{"availability":"away","message":"brb"}}"#,
        )?;
        match ClientMessage::try_from(status)? {
            ClientMessage::SetStatus(status) => {
                assert_eq!(status.availability, Availability::Away);
                assert_eq!(status.message, "brb");
            }
            other => panic!("expected set_status, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn unknown_types_are_distinguished_from_bad_payloads() -> Result<(), Error> {
        let unknown = Frame::decode(r#"{"type":"teleport","data":{}}"#)?;
        assert_eq!(
            ClientMessage::try_from(unknown).unwrap_err().error_kind,
            TransportErrorKind::UnknownMessageType
        );

        let missing_field = Frame::decode(r#"{"type":"add_buddy","data":{}}"#)?;
        assert_eq!(
            ClientMessage::try_from(missing_field).unwrap_err().error_kind,
            TransportErrorKind::Codec
        );

        assert_eq!(
            Frame::decode("not json").unwrap_err().error_kind,
            TransportErrorKind::Codec
        );
        Ok(())
    }

    #[test]
    fn payloadless_messages_omit_data() -> Result<(), Error> {
        let frame = ServerMessage::LoginSuccess.to_frame()?;
        assert_eq!(frame.message_type, "login_success");
        assert_eq!(frame.encode()?, r#"{"type":"login_success"}"#);

        let frame = ServerMessage::NoSuchEmail.to_frame()?;
        assert_eq!(frame.message_type, "no_email");
        Ok(())
    }

    #[test]
    fn full_state_never_carries_credentials() -> Result<(), Error> {
        let message = ServerMessage::FullState(FullState {
            user: UserView {
                email: "a@x".into(),
                ..Default::default()
            },
            buddies: vec![BuddyStatus {
                email: "b@x".into(),
                status: UserStatus::offline(),
            }],
        });
        let frame = message.to_frame()?;
        assert_eq!(frame.data["user"]["email"], json!("a@x"));
        assert!(frame.data["user"].get("password_hash").is_none());
        assert_eq!(frame.data["buddies"][0]["status"]["availability"], json!("offline"));
        assert_eq!(ServerMessage::try_from(frame)?, message);
        Ok(())
    }

    #[test]
    fn every_server_message_type_is_known_and_laned() {
        let messages = [
            ServerMessage::ForcedLogout,
            ServerMessage::OperationFailure {
                operation: "add_buddy".into(),
                message: "no".into(),
            },
            ServerMessage::SyncError,
            ServerMessage::BuddyRemoved {
                email: "b@x".into(),
            },
        ];
        for message in messages {
            assert!(SERVER_MESSAGE_TYPES.contains(&message.event_type()));
        }
        assert_eq!(ServerMessage::ForcedLogout.lane(), Lane::Control);
        assert_eq!(ServerMessage::SyncError.lane(), Lane::State);
    }
}
