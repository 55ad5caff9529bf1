//! The durable user store: its contract and the two implementations the
//! presence service ships with.

pub use entity::{normalize_email, Availability, Email, UserInfo, UserStatus, UserView};

pub mod error;
pub mod file;
pub mod memory;
pub mod store;
pub mod user;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::Store;
