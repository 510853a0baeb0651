use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::Mutex;

use crate::transport::{Connection, ConnectionId};

/// The set of connections the server currently holds open.
///
/// Every add, remove and snapshot goes through one lock, so a broadcast sees
/// either all of a concurrent connect/disconnect or none of it.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
    next_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn insert(&self, connection: Arc<Connection>) {
        let mut connections = self.connections.lock().await;
        connections.insert(connection.id(), connection);
    }

    pub async fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut connections = self.connections.lock().await;
        connections.remove(&id)
    }

    /// Removes and returns every connection.
    pub async fn drain(&self) -> Vec<Arc<Connection>> {
        let mut connections = self.connections.lock().await;
        connections.drain().map(|(_, connection)| connection).collect()
    }

    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        let connections = self.connections.lock().await;
        connections.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
