//! Client registry
//!
//! Tracks live control connections so the server can enforce its
//! connection limit. Slots are released when the guard drops.

use log::debug;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// Registry for tracking active clients
#[derive(Debug, Clone)]
pub struct ClientRegistry {
    clients: Arc<Mutex<HashSet<SocketAddr>>>,
    max_clients: usize,
}

/// Keeps a connection registered for as long as it lives.
#[derive(Debug)]
pub struct ClientGuard {
    registry: ClientRegistry,
    addr: SocketAddr,
}

impl ClientRegistry {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: Arc::new(Mutex::new(HashSet::new())),
            max_clients,
        }
    }

    /// Registers a connection, or returns `None` when the server is full.
    pub fn register(&self, addr: SocketAddr) -> Option<ClientGuard> {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if clients.len() >= self.max_clients {
            return None;
        }
        clients.insert(addr);
        debug!("Registered client {addr} ({} active)", clients.len());
        Some(ClientGuard {
            registry: self.clone(),
            addr,
        })
    }

    pub fn len(&self) -> usize {
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        let mut clients = self
            .registry
            .clients
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        clients.remove(&self.addr);
        debug!("Unregistered client {} ({} active)", self.addr, clients.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforces_limit_and_releases_on_drop() {
        let registry = ClientRegistry::new(2);
        let a = registry.register("127.0.0.1:1000".parse().unwrap()).unwrap();
        let _b = registry.register("127.0.0.1:1001".parse().unwrap()).unwrap();
        assert!(registry.register("127.0.0.1:1002".parse().unwrap()).is_none());

        drop(a);
        assert_eq!(registry.len(), 1);
        assert!(registry.register("127.0.0.1:1002".parse().unwrap()).is_some());
    }
}
