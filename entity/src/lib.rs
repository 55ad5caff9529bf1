//! Plain data model shared by every layer of the presence service.
//!
//! Nothing in this crate knows about sessions, queues or the network. Records
//! here are what the durable store keeps and what events carry.

pub mod status;
pub mod users;

pub use status::{Availability, UserStatus};
pub use users::{UserInfo, UserView};

/// A type alias for the identity key of a registered user.
pub type Email = String;

/// Normalizes an email address into its identity key.
///
/// Identities are currently compared by exact string equality. Case or alias
/// folding would be added here and nowhere else.
pub fn normalize_email(email: &str) -> Email {
    email.to_string()
}
