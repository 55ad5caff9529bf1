//! The durable store contract.
//!
//! Every method is one atomic unit: it either applies completely or leaves
//! the store untouched and returns an error. Callers serialize access
//! themselves, which is why mutations take `&mut self`.

use crate::error::Error;
use crate::user::generate_hash;
use entity::{Email, UserInfo, UserStatus};

pub trait Store: Send {
    /// Register a new identity with a fresh verification token.
    fn add_user(&mut self, email: &str, password: &str) -> Result<(), Error>;

    /// Mark an identity verified when `token` matches the one issued at registration.
    fn verify_user(&mut self, email: &str, token: &str) -> Result<(), Error>;

    fn check_login(&self, email: &str, password: &str) -> Result<(), Error>;

    fn get_user_info(&self, email: &str) -> Result<UserInfo, Error>;

    /// Replace the stored credential with an already computed hash.
    fn set_password_hash(&mut self, email: &str, password_hash: String) -> Result<(), Error>;

    /// Check `old_pass` and store a hash of `new_pass`. Hashing is slow;
    /// callers holding a lock should check and hash first and then call
    /// [`set_password_hash`](Store::set_password_hash).
    fn set_password(&mut self, email: &str, old_pass: &str, new_pass: &str) -> Result<(), Error> {
        self.check_login(email, old_pass)?;
        self.set_password_hash(email, generate_hash(new_pass))
    }

    /// Record a pending request from `from` to `to`. Fails when the two are
    /// already buddies or a request is pending in either direction.
    fn send_request(&mut self, from: &str, to: &str) -> Result<(), Error>;

    /// Accept the pending request `other` sent to `email`, making them buddies.
    fn accept_request(&mut self, email: &str, other: &str) -> Result<(), Error>;

    /// Remove whichever relationship links `email` and `other`: a settled
    /// buddy pair or a pending request in either direction.
    fn delete_buddy(&mut self, email: &str, other: &str) -> Result<(), Error>;

    /// Store a status. Only `Available` and `Away` are accepted.
    fn set_status(&mut self, email: &str, status: UserStatus) -> Result<(), Error>;

    /// Latest stored statuses, in the same order as `emails`.
    fn get_statuses(&self, emails: &[Email]) -> Result<Vec<UserStatus>, Error>;
}
