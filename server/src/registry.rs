//! Connection bookkeeping for the chat server
//!
//! This module tracks every live socket the server knows about, including:
//! - Sockets that have connected but not yet completed login (pending)
//! - The bidirectional mapping between logged-in sockets and usernames
//! - The outbound queue used to write frames back to each socket
//!
//! The registry performs no network I/O itself. It is owned by the event
//! loop and mutated only from the loop's task.

use log::info;
use shared::{FrameError, Response, MAX_PAYLOAD};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::AbortHandle;

use crate::error::{RegistryError, Result, ServerError};

pub type ConnId = u32;

/// Frames that may wait for one socket's writer before it counts as stalled
pub const OUTBOUND_CAPACITY: usize = 1000;

/// One live socket as seen by the event loop
///
/// Outgoing payloads are queued on `outbound` and written by the
/// connection's writer task. The queue is bounded: a peer that stops reading
/// fills it, and further sends fail as if the socket had closed. Dropping the
/// connection drops the queue, which lets the writer flush what is left and
/// then shut the socket down.
#[derive(Debug)]
pub struct Connection {
    /// Server-assigned identifier, unique for the process lifetime
    pub id: ConnId,
    /// Remote address, kept for logging
    pub addr: SocketAddr,
    /// When the socket was accepted
    pub connected_at: Instant,
    outbound: mpsc::Sender<String>,
    reader: Option<AbortHandle>,
}

impl Connection {
    pub fn new(id: ConnId, addr: SocketAddr, outbound: mpsc::Sender<String>) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
            outbound,
            reader: None,
        }
    }

    /// Attaches the reader task so teardown can stop it
    pub fn with_reader(mut self, reader: AbortHandle) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Queues one response for this socket
    pub fn send(&self, response: &Response) -> Result<()> {
        let payload = response.to_json()?;
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::TooLarge(payload.len()).into());
        }
        self.outbound.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => ServerError::Backlogged(self.id),
            TrySendError::Closed(_) => ServerError::ConnectionClosed(self.id),
        })
    }

    /// Stops reading from the socket and releases the outbound queue
    pub fn close(self) {
        if let Some(reader) = self.reader {
            reader.abort();
        }
    }
}

/// A connection taken out of the registry, with the name it held if any
#[derive(Debug)]
pub struct Removed {
    pub connection: Connection,
    pub name: Option<String>,
}

/// Authoritative mapping of sockets to login state
///
/// A connection is either pending (accepted, no name yet) or authenticated
/// (bound to exactly one username). Names are unique among authenticated
/// connections.
pub struct ConnectionRegistry {
    connections: HashMap<ConnId, Connection>,
    /// Pending connections in arrival order
    pending: Vec<ConnId>,
    name_to_conn: HashMap<String, ConnId>,
    conn_to_name: HashMap<ConnId, String>,
    /// Authenticated names in login order
    login_order: Vec<String>,
    next_conn_id: ConnId,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            pending: Vec::new(),
            name_to_conn: HashMap::new(),
            conn_to_name: HashMap::new(),
            login_order: Vec::new(),
            next_conn_id: 1,
        }
    }

    /// Hands out the next connection identifier
    pub fn next_id(&mut self) -> ConnId {
        let id = self.next_conn_id;
        self.next_conn_id += 1;
        id
    }

    /// Tracks a freshly accepted socket as pending login
    pub fn register_pending(&mut self, conn: Connection) {
        info!("Connection {} accepted from {}", conn.id, conn.addr);
        self.pending.push(conn.id);
        self.connections.insert(conn.id, conn);
    }

    /// Moves a pending connection to the authenticated state under `name`
    ///
    /// Fails without changing anything if the name is already bound to a
    /// connection or if `conn_id` is not pending.
    pub fn promote(
        &mut self,
        conn_id: ConnId,
        name: &str,
    ) -> std::result::Result<(), RegistryError> {
        if self.name_to_conn.contains_key(name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        let Some(pos) = self.pending.iter().position(|id| *id == conn_id) else {
            return Err(RegistryError::NotPending(conn_id));
        };

        self.pending.remove(pos);
        self.name_to_conn.insert(name.to_string(), conn_id);
        self.conn_to_name.insert(conn_id, name.to_string());
        self.login_order.push(name.to_string());
        Ok(())
    }

    /// Removes a connection in either state
    ///
    /// Returns `None` when the connection is already gone, so calling this
    /// twice is harmless.
    pub fn remove(&mut self, conn_id: ConnId) -> Option<Removed> {
        let connection = self.connections.remove(&conn_id)?;
        self.pending.retain(|id| *id != conn_id);

        let name = self.conn_to_name.remove(&conn_id);
        if let Some(name) = &name {
            self.name_to_conn.remove(name);
            self.login_order.retain(|n| n != name);
        }
        info!("Connection {} removed", conn_id);

        Some(Removed { connection, name })
    }

    /// Finds the connection a logged-in user is reachable on
    pub fn socket_for(&self, name: &str) -> Option<&Connection> {
        self.name_to_conn
            .get(name)
            .and_then(|id| self.connections.get(id))
    }

    pub fn name_for(&self, conn_id: ConnId) -> Option<&str> {
        self.conn_to_name.get(&conn_id).map(String::as_str)
    }

    pub fn connection(&self, conn_id: ConnId) -> Option<&Connection> {
        self.connections.get(&conn_id)
    }

    /// Logged-in usernames in login order
    pub fn all_authenticated(&self) -> &[String] {
        &self.login_order
    }

    /// Pending connection ids in arrival order
    pub fn all_pending(&self) -> &[ConnId] {
        &self.pending
    }

    pub fn is_pending(&self, conn_id: ConnId) -> bool {
        self.pending.contains(&conn_id)
    }

    pub fn is_authenticated(&self, conn_id: ConnId) -> bool {
        self.conn_to_name.contains_key(&conn_id)
    }

    /// Returns the number of live connections in either state
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn pending_conn(registry: &mut ConnectionRegistry) -> (ConnId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let id = registry.next_id();
        registry.register_pending(Connection::new(id, test_addr(), tx));
        (id, rx)
    }

    #[test]
    fn test_registry_creation() {
        let registry = ConnectionRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.all_authenticated().is_empty());
        assert!(registry.all_pending().is_empty());
    }

    #[test]
    fn test_ids_increment() {
        let mut registry = ConnectionRegistry::new();
        assert_eq!(registry.next_id(), 1);
        assert_eq!(registry.next_id(), 2);
    }

    #[test]
    fn test_register_pending() {
        let mut registry = ConnectionRegistry::new();
        let (id, _rx) = pending_conn(&mut registry);

        assert_eq!(registry.len(), 1);
        assert!(registry.is_pending(id));
        assert!(!registry.is_authenticated(id));
        assert_eq!(registry.all_pending(), &[id]);
        assert_eq!(registry.name_for(id), None);
    }

    #[test]
    fn test_promote() {
        let mut registry = ConnectionRegistry::new();
        let (id, _rx) = pending_conn(&mut registry);

        registry.promote(id, "alice").unwrap();

        assert!(!registry.is_pending(id));
        assert!(registry.is_authenticated(id));
        assert_eq!(registry.name_for(id), Some("alice"));
        assert_eq!(registry.socket_for("alice").map(|c| c.id), Some(id));
        assert_eq!(registry.all_authenticated(), &["alice".to_string()]);
    }

    #[test]
    fn test_promote_duplicate_name() {
        let mut registry = ConnectionRegistry::new();
        let (first, _rx1) = pending_conn(&mut registry);
        let (second, _rx2) = pending_conn(&mut registry);

        registry.promote(first, "alice").unwrap();
        let err = registry.promote(second, "alice").unwrap_err();

        assert_eq!(err, RegistryError::DuplicateName("alice".to_string()));
        assert!(registry.is_pending(second));
        assert_eq!(registry.socket_for("alice").map(|c| c.id), Some(first));
    }

    #[test]
    fn test_promote_requires_pending() {
        let mut registry = ConnectionRegistry::new();
        let (id, _rx) = pending_conn(&mut registry);
        registry.promote(id, "alice").unwrap();

        assert_eq!(
            registry.promote(id, "bob"),
            Err(RegistryError::NotPending(id))
        );
        assert_eq!(registry.promote(999, "carol"), Err(RegistryError::NotPending(999)));
    }

    #[test]
    fn test_remove_authenticated_clears_name() {
        let mut registry = ConnectionRegistry::new();
        let (id, _rx) = pending_conn(&mut registry);
        registry.promote(id, "alice").unwrap();

        let removed = registry.remove(id).unwrap();
        assert_eq!(removed.name.as_deref(), Some("alice"));
        assert_eq!(removed.connection.id, id);
        assert!(registry.socket_for("alice").is_none());
        assert!(registry.all_authenticated().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_pending_and_idempotent() {
        let mut registry = ConnectionRegistry::new();
        let (id, _rx) = pending_conn(&mut registry);

        let removed = registry.remove(id).unwrap();
        assert!(removed.name.is_none());
        assert!(registry.all_pending().is_empty());
        assert!(registry.remove(id).is_none());
    }

    #[test]
    fn test_login_order_preserved() {
        let mut registry = ConnectionRegistry::new();
        let (a, _ra) = pending_conn(&mut registry);
        let (b, _rb) = pending_conn(&mut registry);
        let (c, _rc) = pending_conn(&mut registry);

        registry.promote(c, "carol").unwrap();
        registry.promote(a, "alice").unwrap();
        registry.promote(b, "bob").unwrap();
        registry.remove(a);

        assert_eq!(
            registry.all_authenticated(),
            &["carol".to_string(), "bob".to_string()]
        );
    }

    #[test]
    fn test_send_queues_json() {
        let mut registry = ConnectionRegistry::new();
        let (id, mut rx) = pending_conn(&mut registry);

        registry
            .connection(id)
            .unwrap()
            .send(&Response::Time {
                results: "2024-01-01 00:00:00".to_string(),
            })
            .unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            r#"{"action":"time","results":"2024-01-01 00:00:00"}"#
        );
    }

    #[test]
    fn test_send_refuses_oversized_payload() {
        let mut registry = ConnectionRegistry::new();
        let (id, mut rx) = pending_conn(&mut registry);

        let result = registry.connection(id).unwrap().send(&Response::Search {
            results: "x".repeat(MAX_PAYLOAD),
        });
        assert!(matches!(
            result,
            Err(ServerError::Frame(FrameError::TooLarge(_)))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let mut registry = ConnectionRegistry::new();
        let (id, rx) = pending_conn(&mut registry);
        drop(rx);

        let result = registry.connection(id).unwrap().send(&Response::List {
            results: String::new(),
        });
        assert!(matches!(result, Err(ServerError::ConnectionClosed(c)) if c == id));
    }

    #[test]
    fn test_send_to_stalled_reader() {
        let mut registry = ConnectionRegistry::new();
        let (id, mut rx) = pending_conn(&mut registry);
        let conn = registry.connection(id).unwrap();
        let response = Response::List {
            results: String::new(),
        };

        for _ in 0..OUTBOUND_CAPACITY {
            conn.send(&response).unwrap();
        }
        assert!(matches!(
            conn.send(&response),
            Err(ServerError::Backlogged(c)) if c == id
        ));

        // Room again once the writer catches up
        rx.try_recv().unwrap();
        assert!(conn.send(&response).is_ok());
    }
}
