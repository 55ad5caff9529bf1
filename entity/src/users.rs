use crate::status::UserStatus;
use crate::Email;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Everything the store keeps about one registered identity.
///
/// Relationship sets are kept symmetric by the store: `b` is in `a.buddies`
/// exactly when `a` is in `b.buddies`, and an entry in `a.outgoing_requests`
/// always has its mirror in `b.incoming_requests`.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Default)]
pub struct UserInfo {
    pub email: Email,
    pub password_hash: String,

    pub verify_token: String,
    pub verified: bool,

    #[serde(default)]
    pub buddies: BTreeSet<Email>,
    #[serde(default)]
    pub incoming_requests: BTreeSet<Email>,
    #[serde(default)]
    pub outgoing_requests: BTreeSet<Email>,

    #[serde(default)]
    pub latest_status: UserStatus,
}

impl UserInfo {
    pub fn new(email: Email, password_hash: String, verify_token: String) -> Self {
        Self {
            email,
            password_hash,
            verify_token,
            ..Default::default()
        }
    }

    /// True when any relationship, settled or pending, links this user to `other`.
    pub fn is_related_to(&self, other: &str) -> bool {
        self.buddies.contains(other)
            || self.incoming_requests.contains(other)
            || self.outgoing_requests.contains(other)
    }

    /// The client-facing projection of this record.
    pub fn view(&self) -> UserView {
        UserView::from(self)
    }
}

/// The parts of a [`UserInfo`] that may leave the server. Credentials and
/// verification tokens are never included.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Default)]
pub struct UserView {
    pub email: Email,
    pub verified: bool,
    pub buddies: BTreeSet<Email>,
    pub incoming_requests: BTreeSet<Email>,
    pub outgoing_requests: BTreeSet<Email>,
    pub latest_status: UserStatus,
}

impl From<&UserInfo> for UserView {
    fn from(info: &UserInfo) -> Self {
        Self {
            email: info.email.clone(),
            verified: info.verified,
            buddies: info.buddies.clone(),
            incoming_requests: info.incoming_requests.clone(),
            outgoing_requests: info.outgoing_requests.clone(),
            latest_status: info.latest_status.clone(),
        }
    }
}
