//! Error types for entity API
use std::error::Error as StdError;
use std::fmt;

use serde::Serialize;

/// Errors while executing operations against a [`Store`](crate::store::Store).
/// The intent is to categorize errors into two major types:
///  * Errors related to the data itself. Ex `EntityApiErrorKind::NoSuchEmail`
///  * Errors related to the backing storage. Ex `EntityApiErrorKind::StorageIo`
#[derive(Debug)]
pub struct Error {
    // Underlying I/O or (de)serialization error, when there is one
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    // Enum representing which category of error
    pub error_kind: EntityApiErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntityApiErrorKind {
    // No identity is registered under the email
    NoSuchEmail,
    // Password did not match the stored credential
    CredentialMismatch,
    // Duplicate request, missing relationship, or accepting a request that was never sent
    RelationshipConflict,
    // An identity is already registered under the email
    EmailTaken,
    // Verification token did not match
    InvalidToken,
    // Only `Available` and `Away` may be stored
    InvalidStatus,
    // Reading or writing the backing file failed
    StorageIo,
    // Stored relationships are not mirrored, or the backing file is unreadable
    Corrupted,
}

impl Error {
    pub fn new(error_kind: EntityApiErrorKind) -> Self {
        Error {
            source: None,
            error_kind,
        }
    }

    pub fn with_source(
        error_kind: EntityApiErrorKind,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Error {
            source: Some(Box::new(source)),
            error_kind,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let reason = match self.error_kind {
            EntityApiErrorKind::NoSuchEmail => "no such email",
            EntityApiErrorKind::CredentialMismatch => "incorrect password",
            EntityApiErrorKind::RelationshipConflict => "relationship conflict",
            EntityApiErrorKind::EmailTaken => "email already registered",
            EntityApiErrorKind::InvalidToken => "invalid verification token",
            EntityApiErrorKind::InvalidStatus => "invalid availability",
            EntityApiErrorKind::StorageIo => "storage I/O failure",
            EntityApiErrorKind::Corrupted => "storage corrupted",
        };
        match &self.source {
            Some(source) => write!(f, "Entity API Error: {reason}: {source}"),
            None => write!(f, "Entity API Error: {reason}"),
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

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::with_source(EntityApiErrorKind::StorageIo, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(EntityApiErrorKind::Corrupted, err)
    }
}
