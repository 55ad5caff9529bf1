//! Connection plumbing between the presence service and its clients.
//!
//! This crate provides a message-oriented connection abstraction, the wire
//! message catalog, and the per-connection outbound scheduler.
//!
//! # Architecture
//!
//! - **Frames**: every message is a JSON object `{"type", "data"}`; over TCP
//!   each frame is one line, bounded by a configurable maximum length.
//! - **Two implementations**: `TcpConnection` for real clients and an
//!   in-memory pair for tests and in-process clients.
//! - **Two lanes**: control messages (acknowledgements, failures, forced
//!   logout) are never dropped and always written first; state messages
//!   (presence and roster updates) collapse into a single full state when the
//!   peer falls behind.
//!
//! # Modules
//!
//! - `connection`: the `Connection` trait, `TcpConnection`, `memory_pair`
//! - `message`: `Frame`, `ClientMessage`, `ServerMessage`
//! - `scheduler`: `BufferedConnection`, the control and state lanes

pub mod connection;
pub mod error;
pub mod message;
pub mod scheduler;

pub use connection::{memory_pair, Connection, ConnectionId, MemoryConnection, TcpConnection};
pub use message::{BuddyStatus, ClientMessage, Frame, FullState, Lane, ServerMessage};
pub use scheduler::BufferedConnection;
