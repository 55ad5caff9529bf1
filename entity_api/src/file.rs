use crate::error::Error;
use crate::memory::MemoryStore;
use crate::store::Store;
use entity::{Email, UserInfo, UserStatus};
use log::*;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// A [`Store`] persisted as a single JSON document.
///
/// Every successful mutation writes the document to a temporary file, syncs
/// it to disk and renames it over the old one, so a crash or power loss leaves
/// either the old or the new contents on disk.
/// If the write fails the in-memory table is rolled back and the operation
/// reports `StorageIo`.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    table: MemoryStore,
}

impl FileStore {
    /// Open the document at `path`, starting empty when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let table = if path.exists() {
            let bytes = fs::read(&path)?;
            serde_json::from_slice(&bytes)?
        } else {
            MemoryStore::new()
        };
        info!("Opened user store at {} ({} users)", path.display(), table.len());
        Ok(Self { path, table })
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }

    fn persist(&self) -> Result<(), Error> {
        let tmp = self.tmp_path();
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&serde_json::to_vec_pretty(&self.table)?)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &self.path)?;
        // The new document is in place; a failed directory sync only weakens
        // durability.
        if let Err(e) = self.sync_parent_dir() {
            warn!("Could not sync directory of {}: {e}", self.path.display());
        }
        Ok(())
    }

    /// Make the rename itself durable.
    #[cfg(unix)]
    fn sync_parent_dir(&self) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => std::path::Path::new("."),
        };
        fs::File::open(dir)?.sync_all()
    }

    #[cfg(not(unix))]
    fn sync_parent_dir(&self) -> std::io::Result<()> {
        Ok(())
    }

    fn mutate<T>(
        &mut self,
        op: impl FnOnce(&mut MemoryStore) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let before = self.table.clone();
        let output = op(&mut self.table)?;
        if let Err(e) = self.persist() {
            error!("Failed to persist user store {}: {e}", self.path.display());
            self.table = before;
            return Err(e);
        }
        Ok(output)
    }
}

impl Store for FileStore {
    fn add_user(&mut self, email: &str, password: &str) -> Result<(), Error> {
        self.mutate(|table| table.add_user(email, password))
    }

    fn verify_user(&mut self, email: &str, token: &str) -> Result<(), Error> {
        self.mutate(|table| table.verify_user(email, token))
    }

    fn check_login(&self, email: &str, password: &str) -> Result<(), Error> {
        self.table.check_login(email, password)
    }

    fn get_user_info(&self, email: &str) -> Result<UserInfo, Error> {
        self.table.get_user_info(email)
    }

    fn set_password_hash(&mut self, email: &str, password_hash: String) -> Result<(), Error> {
        self.mutate(|table| table.set_password_hash(email, password_hash))
    }

    fn send_request(&mut self, from: &str, to: &str) -> Result<(), Error> {
        self.mutate(|table| table.send_request(from, to))
    }

    fn accept_request(&mut self, email: &str, other: &str) -> Result<(), Error> {
        self.mutate(|table| table.accept_request(email, other))
    }

    fn delete_buddy(&mut self, email: &str, other: &str) -> Result<(), Error> {
        self.mutate(|table| table.delete_buddy(email, other))
    }

    fn set_status(&mut self, email: &str, status: UserStatus) -> Result<(), Error> {
        self.mutate(|table| table.set_status(email, status))
    }

    fn get_statuses(&self, emails: &[Email]) -> Result<Vec<UserStatus>, Error> {
        self.table.get_statuses(emails)
    }
}
