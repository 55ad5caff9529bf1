use crate::error::{EntityApiErrorKind, Error};
use crate::store::Store;
use crate::user::{generate_hash, generate_verify_token, verify_password};
use entity::{normalize_email, Email, UserInfo, UserStatus};
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An in-memory [`Store`]. Also the document format persisted by
/// [`FileStore`](crate::file::FileStore).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStore {
    users: BTreeMap<Email, UserInfo>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from existing records without validating them.
    pub fn from_users(users: impl IntoIterator<Item = UserInfo>) -> Self {
        Self {
            users: users
                .into_iter()
                .map(|user| (user.email.clone(), user))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    fn user(&self, email: &str) -> Result<&UserInfo, Error> {
        self.users
            .get(&normalize_email(email))
            .ok_or_else(|| Error::new(EntityApiErrorKind::NoSuchEmail))
    }

    fn user_mut(&mut self, email: &str) -> Result<&mut UserInfo, Error> {
        self.users
            .get_mut(&normalize_email(email))
            .ok_or_else(|| Error::new(EntityApiErrorKind::NoSuchEmail))
    }

    /// Fails with `Corrupted` when any half of a relationship between the
    /// two records lacks its mirror on the other side.
    fn check_mirrored(&self, a: &str, b: &str) -> Result<(), Error> {
        let (left, right) = (self.user(a)?, self.user(b)?);
        let mirrored = left.buddies.contains(b) == right.buddies.contains(a)
            && left.outgoing_requests.contains(b) == right.incoming_requests.contains(a)
            && left.incoming_requests.contains(b) == right.outgoing_requests.contains(a);
        if mirrored {
            Ok(())
        } else {
            error!("Relationship between {a} and {b} is not mirrored");
            Err(Error::new(EntityApiErrorKind::Corrupted))
        }
    }
}

impl Store for MemoryStore {
    fn add_user(&mut self, email: &str, password: &str) -> Result<(), Error> {
        let email = normalize_email(email);
        if self.users.contains_key(&email) {
            return Err(Error::new(EntityApiErrorKind::EmailTaken));
        }
        let user = UserInfo::new(
            email.clone(),
            generate_hash(password),
            generate_verify_token(),
        );
        debug!("Registering new identity {email}");
        self.users.insert(email, user);
        Ok(())
    }

    fn verify_user(&mut self, email: &str, token: &str) -> Result<(), Error> {
        let user = self.user_mut(email)?;
        if user.verify_token != token {
            return Err(Error::new(EntityApiErrorKind::InvalidToken));
        }
        user.verified = true;
        Ok(())
    }

    fn check_login(&self, email: &str, password: &str) -> Result<(), Error> {
        verify_password(password, &self.user(email)?.password_hash)
    }

    fn get_user_info(&self, email: &str) -> Result<UserInfo, Error> {
        self.user(email).cloned()
    }

    fn set_password_hash(&mut self, email: &str, password_hash: String) -> Result<(), Error> {
        self.user_mut(email)?.password_hash = password_hash;
        Ok(())
    }

    fn send_request(&mut self, from: &str, to: &str) -> Result<(), Error> {
        let (from, to) = (normalize_email(from), normalize_email(to));
        self.check_mirrored(&from, &to)?;
        if from == to || self.user(&from)?.is_related_to(&to) {
            return Err(Error::new(EntityApiErrorKind::RelationshipConflict));
        }
        self.user_mut(&from)?.outgoing_requests.insert(to.clone());
        self.user_mut(&to)?.incoming_requests.insert(from);
        Ok(())
    }

    fn accept_request(&mut self, email: &str, other: &str) -> Result<(), Error> {
        let (email, other) = (normalize_email(email), normalize_email(other));
        self.check_mirrored(&email, &other)?;
        if !self.user(&email)?.incoming_requests.contains(&other) {
            return Err(Error::new(EntityApiErrorKind::RelationshipConflict));
        }

        let accepter = self.user_mut(&email)?;
        accepter.incoming_requests.remove(&other);
        accepter.buddies.insert(other.clone());

        let requester = self.user_mut(&other)?;
        requester.outgoing_requests.remove(&email);
        requester.buddies.insert(email);
        Ok(())
    }

    fn delete_buddy(&mut self, email: &str, other: &str) -> Result<(), Error> {
        let (email, other) = (normalize_email(email), normalize_email(other));
        self.check_mirrored(&email, &other)?;
        if !self.user(&email)?.is_related_to(&other) {
            return Err(Error::new(EntityApiErrorKind::RelationshipConflict));
        }

        // Mirroring was checked above, so clearing every set on both sides
        // removes exactly the one relationship that exists.
        for (a, b) in [(&email, &other), (&other, &email)] {
            let user = self.user_mut(a)?;
            user.buddies.remove(b);
            user.incoming_requests.remove(b);
            user.outgoing_requests.remove(b);
        }
        Ok(())
    }

    fn set_status(&mut self, email: &str, status: UserStatus) -> Result<(), Error> {
        if !status.availability.is_settable() {
            return Err(Error::new(EntityApiErrorKind::InvalidStatus));
        }
        self.user_mut(email)?.latest_status = status;
        Ok(())
    }

    fn get_statuses(&self, emails: &[Email]) -> Result<Vec<UserStatus>, Error> {
        emails
            .iter()
            .map(|email| self.user(email).map(|user| user.latest_status.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity::Availability;

    fn store_with(emails: &[&str]) -> MemoryStore {
        let mut store = MemoryStore::new();
        for email in emails {
            store.add_user(email, "pw").unwrap();
        }
        store
    }

    /// At most one relationship state holds for the pair and every entry is mirrored.
    fn assert_pair_consistent(store: &MemoryStore, a: &str, b: &str) {
        store.check_mirrored(a, b).unwrap();
        let left = store.get_user_info(a).unwrap();
        let states = [
            left.buddies.contains(b),
            left.outgoing_requests.contains(b),
            left.incoming_requests.contains(b),
        ];
        assert!(states.iter().filter(|held| **held).count() <= 1);
    }

    #[test]
    fn add_user_rejects_duplicates() {
        let mut store = store_with(&["a@x"]);
        let err = store.add_user("a@x", "other").unwrap_err();
        assert_eq!(err.error_kind, EntityApiErrorKind::EmailTaken);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn check_login_distinguishes_unknown_email_and_bad_password() {
        let store = store_with(&["a@x"]);
        assert!(store.check_login("a@x", "pw").is_ok());
        assert_eq!(
            store.check_login("a@x", "nope").unwrap_err().error_kind,
            EntityApiErrorKind::CredentialMismatch
        );
        assert_eq!(
            store.check_login("b@x", "pw").unwrap_err().error_kind,
            EntityApiErrorKind::NoSuchEmail
        );
    }

    #[test]
    fn verify_user_requires_the_issued_token() -> Result<(), Error> {
        let mut store = store_with(&["a@x"]);
        let token = store.get_user_info("a@x")?.verify_token;

        let err = store.verify_user("a@x", "wrong").unwrap_err();
        assert_eq!(err.error_kind, EntityApiErrorKind::InvalidToken);
        assert!(!store.get_user_info("a@x")?.verified);

        store.verify_user("a@x", &token)?;
        assert!(store.get_user_info("a@x")?.verified);
        Ok(())
    }

    #[test]
    fn set_password_requires_old_password() -> Result<(), Error> {
        let mut store = store_with(&["a@x"]);
        let err = store.set_password("a@x", "bad", "new").unwrap_err();
        assert_eq!(err.error_kind, EntityApiErrorKind::CredentialMismatch);

        store.set_password("a@x", "pw", "new")?;
        assert!(store.check_login("a@x", "new").is_ok());
        assert!(store.check_login("a@x", "pw").is_err());
        Ok(())
    }

    #[test]
    fn request_then_accept_makes_mutual_buddies() -> Result<(), Error> {
        let mut store = store_with(&["a@x", "b@x"]);

        store.send_request("a@x", "b@x")?;
        assert!(store.get_user_info("a@x")?.outgoing_requests.contains("b@x"));
        assert!(store.get_user_info("b@x")?.incoming_requests.contains("a@x"));
        assert_pair_consistent(&store, "a@x", "b@x");

        store.accept_request("b@x", "a@x")?;
        let (a, b) = (store.get_user_info("a@x")?, store.get_user_info("b@x")?);
        assert!(a.buddies.contains("b@x") && b.buddies.contains("a@x"));
        assert!(a.outgoing_requests.is_empty() && a.incoming_requests.is_empty());
        assert!(b.outgoing_requests.is_empty() && b.incoming_requests.is_empty());
        assert_pair_consistent(&store, "a@x", "b@x");
        Ok(())
    }

    #[test]
    fn send_request_rejects_any_existing_relationship() -> Result<(), Error> {
        let mut store = store_with(&["a@x", "b@x"]);
        store.send_request("a@x", "b@x")?;

        for (from, to) in [("a@x", "b@x"), ("b@x", "a@x"), ("a@x", "a@x")] {
            let err = store.send_request(from, to).unwrap_err();
            assert_eq!(err.error_kind, EntityApiErrorKind::RelationshipConflict);
        }

        store.accept_request("b@x", "a@x")?;
        let err = store.send_request("b@x", "a@x").unwrap_err();
        assert_eq!(err.error_kind, EntityApiErrorKind::RelationshipConflict);

        let err = store.send_request("a@x", "ghost@x").unwrap_err();
        assert_eq!(err.error_kind, EntityApiErrorKind::NoSuchEmail);
        Ok(())
    }

    #[test]
    fn accept_requires_a_pending_incoming_request() -> Result<(), Error> {
        let mut store = store_with(&["a@x", "b@x"]);
        let err = store.accept_request("b@x", "a@x").unwrap_err();
        assert_eq!(err.error_kind, EntityApiErrorKind::RelationshipConflict);

        // The sender cannot accept its own outgoing request.
        store.send_request("a@x", "b@x")?;
        let err = store.accept_request("a@x", "b@x").unwrap_err();
        assert_eq!(err.error_kind, EntityApiErrorKind::RelationshipConflict);
        assert_pair_consistent(&store, "a@x", "b@x");
        Ok(())
    }

    #[test]
    fn delete_buddy_clears_every_relationship_state() -> Result<(), Error> {
        let mut store = store_with(&["a@x", "b@x"]);

        // Pending outgoing, removed by the sender.
        store.send_request("a@x", "b@x")?;
        store.delete_buddy("a@x", "b@x")?;
        assert!(!store.get_user_info("b@x")?.is_related_to("a@x"));

        // Pending incoming, removed by the receiver.
        store.send_request("a@x", "b@x")?;
        store.delete_buddy("b@x", "a@x")?;
        assert!(!store.get_user_info("a@x")?.is_related_to("b@x"));

        // Settled buddies.
        store.send_request("a@x", "b@x")?;
        store.accept_request("b@x", "a@x")?;
        store.delete_buddy("a@x", "b@x")?;
        assert!(!store.get_user_info("a@x")?.is_related_to("b@x"));
        assert!(!store.get_user_info("b@x")?.is_related_to("a@x"));

        let err = store.delete_buddy("a@x", "b@x").unwrap_err();
        assert_eq!(err.error_kind, EntityApiErrorKind::RelationshipConflict);
        Ok(())
    }

    #[test]
    fn relationship_invariant_holds_across_operation_sequences() {
        let store = store_with(&["a@x", "b@x"]);
        let ops: [fn(&mut MemoryStore) -> Result<(), Error>; 6] = [
            |s| s.send_request("a@x", "b@x"),
            |s| s.send_request("b@x", "a@x"),
            |s| s.accept_request("a@x", "b@x"),
            |s| s.accept_request("b@x", "a@x"),
            |s| s.delete_buddy("a@x", "b@x"),
            |s| s.delete_buddy("b@x", "a@x"),
        ];

        // Every sequence of three operations, including failing ones.
        for first in ops {
            for second in ops {
                for third in ops {
                    let mut scratch = store.clone();
                    for op in [first, second, third] {
                        let _ = op(&mut scratch);
                        assert_pair_consistent(&scratch, "a@x", "b@x");
                    }
                }
            }
        }
    }

    #[test]
    fn dangling_request_is_reported_as_corruption() {
        let mut a = UserInfo::new("a@x".into(), generate_hash("pw"), String::new());
        a.outgoing_requests.insert("b@x".into());
        let b = UserInfo::new("b@x".into(), generate_hash("pw"), String::new());
        let mut store = MemoryStore::from_users([a, b]);

        let err = store.accept_request("b@x", "a@x").unwrap_err();
        assert_eq!(err.error_kind, EntityApiErrorKind::Corrupted);
        let err = store.delete_buddy("a@x", "b@x").unwrap_err();
        assert_eq!(err.error_kind, EntityApiErrorKind::Corrupted);
    }

    #[test]
    fn set_status_never_stores_offline() -> Result<(), Error> {
        let mut store = store_with(&["a@x"]);
        let away = UserStatus {
            availability: Availability::Away,
            message: "brb".into(),
            ..Default::default()
        };
        store.set_status("a@x", away.clone())?;

        let err = store.set_status("a@x", UserStatus::offline()).unwrap_err();
        assert_eq!(err.error_kind, EntityApiErrorKind::InvalidStatus);
        assert_eq!(store.get_statuses(&["a@x".to_string()])?, vec![away]);
        Ok(())
    }

    #[test]
    fn get_statuses_preserves_order_and_fails_on_unknown() -> Result<(), Error> {
        let mut store = store_with(&["a@x", "b@x"]);
        store.set_status(
            "b@x",
            UserStatus {
                availability: Availability::Available,
                ..Default::default()
            },
        )?;
        let statuses = store.get_statuses(&["b@x".to_string(), "a@x".to_string()])?;
        assert_eq!(statuses[0].availability, Availability::Available);
        assert_eq!(statuses[1].availability, Availability::Offline);

        let err = store.get_statuses(&["ghost@x".to_string()]).unwrap_err();
        assert_eq!(err.error_kind, EntityApiErrorKind::NoSuchEmail);
        Ok(())
    }
}
