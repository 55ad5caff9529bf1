use config::Config;
use entity_api::error::Error as StoreError;
use entity_api::{FileStore, MemoryStore, Store};
use log::{info, warn};

pub mod config;
pub mod logging;

/// Open the store selected by the configuration: a JSON file when a store
/// path is set, an in-memory table otherwise.
pub fn init_store(config: &Config) -> Result<Box<dyn Store>, StoreError> {
    match config.store_path() {
        Some(path) => {
            info!("Using file-backed user store at {}", path.display());
            Ok(Box::new(FileStore::open(path)?))
        }
        None => {
            warn!("No store path configured, registered users will not survive a restart");
            Ok(Box::new(MemoryStore::new()))
        }
    }
}
