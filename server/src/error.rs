use std::error::Error as StdError;

use domain::error::{DomainErrorKind, EntityErrorKind, Error as DomainError};
use transport::ServerMessage;

#[derive(Debug)]
pub struct Error(DomainError);

impl StdError for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        write!(fmt, "{}", self.0)
    }
}

impl Error {
    /// The control-lane message that tells the client `operation` failed.
    pub fn into_message(self, operation: &str) -> ServerMessage {
        match self.0.error_kind {
            DomainErrorKind::Entity(EntityErrorKind::NoSuchEmail) => ServerMessage::NoSuchEmail,
            _ => ServerMessage::OperationFailure {
                operation: operation.to_string(),
                message: self.0.reason().to_string(),
            },
        }
    }
}

impl<E> From<E> for Error
where
    E: Into<DomainError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
