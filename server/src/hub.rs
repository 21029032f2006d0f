//! Single owner of all mutable session state.
//!
//! The event loop hands every decoded payload to [`Hub::handle_payload`]. The
//! hub routes it to the login gate (`auth`) or the request dispatcher
//! (`dispatch`) depending on the connection's state, and turns any error into
//! a forced logout of that one connection.

use log::{debug, info, warn};
use shared::{FrameError, Response, MAX_PAYLOAD};
use std::collections::HashMap;

use crate::corpus::PoemCorpus;
use crate::error::{Result, ServerError};
use crate::group::GroupCoordinator;
use crate::index::{IndexStore, MessageIndex};
use crate::registry::{ConnId, Connection, ConnectionRegistry};

pub struct Hub {
    pub(crate) registry: ConnectionRegistry,
    pub(crate) groups: GroupCoordinator,
    /// Transcript index of every logged-in user
    pub(crate) indices: HashMap<String, MessageIndex>,
    pub(crate) corpus: PoemCorpus,
    pub(crate) store: IndexStore,
}

impl Hub {
    pub fn new(corpus: PoemCorpus, store: IndexStore) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            groups: GroupCoordinator::new(),
            indices: HashMap::new(),
            corpus,
            store,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn groups(&self) -> &GroupCoordinator {
        &self.groups
    }

    pub fn index_for(&self, name: &str) -> Option<&MessageIndex> {
        self.indices.get(name)
    }

    pub fn next_conn_id(&mut self) -> ConnId {
        self.registry.next_id()
    }

    /// Tracks a newly accepted socket until it logs in
    pub fn accept(&mut self, conn: Connection) {
        self.registry.register_pending(conn);
    }

    /// Handles one complete payload received on `conn_id`
    ///
    /// An empty payload means the peer went away.
    pub fn handle_payload(&mut self, conn_id: ConnId, payload: &str) {
        if payload.is_empty() {
            self.logout(conn_id);
            return;
        }

        let result = if let Some(name) = self.registry.name_for(conn_id).map(str::to_string) {
            self.handle_request(conn_id, &name, payload)
        } else if self.registry.is_pending(conn_id) {
            self.handle_login(conn_id, payload).map(|_| ())
        } else {
            debug!("Dropping payload for unknown connection {}", conn_id);
            Ok(())
        };

        if let Err(e) = result {
            warn!("Connection {} failed: {}", conn_id, e);
            self.logout(conn_id);
        }
    }

    /// Tears a connection down, from either state
    ///
    /// For a logged-in user this saves their history, takes them out of
    /// their group and tells former groupmates they left. Safe to call for a
    /// connection that is already gone.
    pub fn logout(&mut self, conn_id: ConnId) {
        let Some(removed) = self.registry.remove(conn_id) else {
            return;
        };

        if let Some(name) = removed.name {
            info!(
                "{} logging out after {:?}",
                name,
                removed.connection.connected_at.elapsed()
            );
            if let Some(index) = self.indices.remove(&name) {
                if let Err(e) = self.store.save(&index) {
                    warn!("Could not save history for {}: {}", name, e);
                }
            }

            let former = self.groups.leave(&name);
            let notice = Response::Disconnect {
                from: Some(name.clone()),
                msg: format!("{} has left the chat.", name),
            };
            self.notify(&former, &notice);
        }

        removed.connection.close();
    }

    /// Logs every connection out, saving all histories
    pub fn shutdown(&mut self) {
        let mut ids: Vec<ConnId> = self.registry.all_pending().to_vec();
        ids.extend(
            self.registry
                .all_authenticated()
                .iter()
                .filter_map(|name| self.registry.socket_for(name))
                .map(|conn| conn.id),
        );
        for id in ids {
            self.logout(id);
        }
    }

    /// Replies to the requester
    ///
    /// Fails if the requester's socket is gone; an oversized reply is
    /// dropped with a warning instead.
    pub(crate) fn send_to(&self, conn_id: ConnId, response: &Response) -> Result<()> {
        let conn = self
            .registry
            .connection(conn_id)
            .ok_or(ServerError::ConnectionClosed(conn_id))?;
        match conn.send(response) {
            Err(ServerError::Frame(FrameError::TooLarge(len))) => {
                warn!(
                    "Dropping {} byte reply to connection {} (limit {})",
                    len, conn_id, MAX_PAYLOAD
                );
                Ok(())
            }
            other => other,
        }
    }

    /// Sends a notice to each named user
    ///
    /// An oversized notice is skipped. A user whose socket is gone or whose
    /// queue is full is logged out, as with any other transport failure.
    pub(crate) fn notify(&mut self, names: &[String], response: &Response) {
        let mut failed = Vec::new();
        for name in names {
            let Some(conn) = self.registry.socket_for(name) else {
                continue;
            };
            match conn.send(response) {
                Ok(()) => {}
                Err(ServerError::Frame(e)) => debug!("Could not notify {}: {}", name, e),
                Err(e) => {
                    warn!("Could not notify {}: {}", name, e);
                    failed.push(conn.id);
                }
            }
        }
        for conn_id in failed {
            self.logout(conn_id);
        }
    }
}
