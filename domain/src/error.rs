//! Error types for the `domain` layer.
use entity_api::error::{EntityApiErrorKind, Error as EntityApiError};
use std::error::Error as StdError;
use std::fmt;

/// Top-level domain error type.
/// Errors in the Domain layer are modeled as a tree with `domain::error::Error`
/// as the root, holding a tree of `error_kind` enums that describe what went
/// wrong in this layer or below it. The `source` field holds the original
/// error, so store failures keep their cause while callers above the domain
/// never depend on `entity_api` directly.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: DomainErrorKind,
}

/// Enum representing the major categories of errors that can occur in the `domain` layer.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainErrorKind {
    Entity(EntityErrorKind),
    Session(SessionErrorKind),
    Internal(InternalErrorKind),
}

/// Rejections of a request because of the data it refers to. The store was
/// not modified and no event was sent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntityErrorKind {
    /// Unknown email or wrong password while authenticating.
    Credential,
    /// The identity an operation targets does not exist.
    NoSuchEmail,
    /// Duplicate request, no relationship to remove, or no request to accept.
    RelationshipConflict,
    EmailTaken,
    InvalidToken,
    /// Only `Available` and `Away` may be set.
    InvalidStatus,
}

/// Operations attempted on a session that can no longer act.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionErrorKind {
    /// The session was closed by its owner.
    NotOpen,
    /// The session was evicted by another session of the same identity.
    IntentionalDisconnect,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InternalErrorKind {
    /// The store failed to read or write, or found its data inconsistent.
    Storage,
    /// Registry bookkeeping disagrees with itself. This is a defect, never a
    /// condition callers are expected to recover from.
    InvariantViolation(String),
}

impl Error {
    pub fn new(error_kind: DomainErrorKind) -> Self {
        Error {
            source: None,
            error_kind,
        }
    }

    pub fn session(kind: SessionErrorKind) -> Self {
        Self::new(DomainErrorKind::Session(kind))
    }

    pub fn entity(kind: EntityErrorKind) -> Self {
        Self::new(DomainErrorKind::Entity(kind))
    }

    pub fn invariant_violation(detail: impl Into<String>) -> Self {
        Self::new(DomainErrorKind::Internal(
            InternalErrorKind::InvariantViolation(detail.into()),
        ))
    }

    /// Translate a store error raised while authenticating. Unknown emails
    /// and bad passwords are reported alike.
    pub fn from_login(err: EntityApiError) -> Self {
        match err.error_kind {
            EntityApiErrorKind::NoSuchEmail | EntityApiErrorKind::CredentialMismatch => Error {
                source: Some(Box::new(err)),
                error_kind: DomainErrorKind::Entity(EntityErrorKind::Credential),
            },
            _ => err.into(),
        }
    }

    /// True for the defect class: bookkeeping that must never disagree did.
    pub fn is_defect(&self) -> bool {
        matches!(
            self.error_kind,
            DomainErrorKind::Internal(InternalErrorKind::InvariantViolation(_))
        )
    }

    pub fn is_intentional_disconnect(&self) -> bool {
        self.error_kind == DomainErrorKind::Session(SessionErrorKind::IntentionalDisconnect)
    }

    /// A short explanation suitable for showing to the client.
    pub fn reason(&self) -> &'static str {
        match &self.error_kind {
            DomainErrorKind::Entity(kind) => match kind {
                EntityErrorKind::Credential => "incorrect email or password",
                EntityErrorKind::NoSuchEmail => "no such email",
                EntityErrorKind::RelationshipConflict => "conflicting buddy relationship",
                EntityErrorKind::EmailTaken => "email is already registered",
                EntityErrorKind::InvalidToken => "invalid verification token",
                EntityErrorKind::InvalidStatus => "availability must be available or away",
            },
            DomainErrorKind::Session(kind) => match kind {
                SessionErrorKind::NotOpen => "session is not open",
                SessionErrorKind::IntentionalDisconnect => "session was logged out elsewhere",
            },
            DomainErrorKind::Internal(kind) => match kind {
                InternalErrorKind::Storage => "storage failure",
                InternalErrorKind::InvariantViolation(_) => "internal error",
            },
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            DomainErrorKind::Internal(InternalErrorKind::InvariantViolation(detail)) => {
                write!(f, "Domain Error: invariant violated: {detail}")
            }
            _ => write!(f, "Domain Error: {}", self.reason()),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

// This is where we translate errors from the `entity_api` layer to the `domain` layer.
impl From<EntityApiError> for Error {
    fn from(err: EntityApiError) -> Self {
        let error_kind = match err.error_kind {
            EntityApiErrorKind::NoSuchEmail => DomainErrorKind::Entity(EntityErrorKind::NoSuchEmail),
            EntityApiErrorKind::CredentialMismatch => {
                DomainErrorKind::Entity(EntityErrorKind::Credential)
            }
            EntityApiErrorKind::RelationshipConflict => {
                DomainErrorKind::Entity(EntityErrorKind::RelationshipConflict)
            }
            EntityApiErrorKind::EmailTaken => DomainErrorKind::Entity(EntityErrorKind::EmailTaken),
            EntityApiErrorKind::InvalidToken => {
                DomainErrorKind::Entity(EntityErrorKind::InvalidToken)
            }
            EntityApiErrorKind::InvalidStatus => {
                DomainErrorKind::Entity(EntityErrorKind::InvalidStatus)
            }
            EntityApiErrorKind::StorageIo | EntityApiErrorKind::Corrupted => {
                DomainErrorKind::Internal(InternalErrorKind::Storage)
            }
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}
