use super::error::{EntityApiErrorKind, Error};

pub fn verify_password(password_to_verify: &str, password_hash: &str) -> Result<(), Error> {
    match password_auth::verify_password(password_to_verify, password_hash) {
        Ok(_) => Ok(()),
        Err(_) => Err(Error::new(EntityApiErrorKind::CredentialMismatch)),
    }
}

pub fn generate_hash(password: &str) -> String {
    password_auth::generate_hash(password)
}

/// A fresh single-use token a new identity must present to become verified.
pub fn generate_verify_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
