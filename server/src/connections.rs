use dashmap::DashMap;
use log::*;
use std::sync::Arc;
use transport::{Connection, ConnectionId};

/// Every client connection the server is currently handling, so shutdown can
/// reach them.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<dyn Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn register(&self, connection: Arc<dyn Connection>) -> ConnectionId {
        let connection_id = ConnectionId::new();
        self.connections.insert(connection_id.clone(), connection);
        connection_id
    }

    pub fn unregister(&self, connection_id: &ConnectionId) {
        if self.connections.remove(connection_id).is_none() {
            debug!(
                "Connection {} was already unregistered",
                connection_id.as_str()
            );
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Close every registered connection. Their handlers notice on their next
    /// read and clean up after themselves.
    pub fn close_all(&self) {
        info!("Closing {} live connection(s)", self.connections.len());
        for entry in self.connections.iter() {
            entry.value().close();
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
