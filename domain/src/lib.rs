//! The presence core: the session registry, the sessions it owns, and the
//! per-session outbox their events travel through.
//!
//! Consumers of this crate reach the data model and the store contract
//! through the re-exports below, without depending on `entity_api` directly.

pub use entity_api::{
    normalize_email, Availability, Email, FileStore, MemoryStore, Store, UserInfo, UserStatus,
    UserView,
};
pub use events::{Event, EventType};

pub mod error;
pub mod outbox;
pub mod registry;
pub mod session;

pub use outbox::Outbox;
pub use registry::{Registry, RegistryOptions};
pub use session::{Session, SessionId};
