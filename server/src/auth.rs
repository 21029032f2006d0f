//! Login gate for pending connections.

use log::{debug, info, warn};
use shared::{LoginStatus, Request, Response};

use crate::error::Result;
use crate::hub::Hub;
use crate::index::MessageIndex;
use crate::registry::ConnId;

/// What happened to a pending connection's login attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Accepted(String),
    /// Name already online; the socket stays pending and may retry
    Duplicate(String),
    /// Not a usable login request; the socket has been torn down
    Rejected,
}

impl Hub {
    /// Runs one login attempt for a pending connection
    pub(crate) fn handle_login(&mut self, conn_id: ConnId, payload: &str) -> Result<LoginOutcome> {
        let name = match serde_json::from_str::<Request>(payload) {
            Ok(Request::Login { name }) if !name.is_empty() => name,
            Ok(other) => {
                warn!("Connection {} sent {:?} instead of a login", conn_id, other);
                self.logout(conn_id);
                return Ok(LoginOutcome::Rejected);
            }
            Err(e) => {
                warn!("Connection {} sent an unreadable login: {}", conn_id, e);
                self.logout(conn_id);
                return Ok(LoginOutcome::Rejected);
            }
        };

        if self.groups.is_member(&name) || self.registry.socket_for(&name).is_some() {
            warn!("Duplicate login attempt for {}", name);
            self.send_to(
                conn_id,
                &Response::Login {
                    status: LoginStatus::Duplicate,
                },
            )?;
            return Ok(LoginOutcome::Duplicate(name));
        }

        if let Err(e) = self.registry.promote(conn_id, &name) {
            warn!("Login for {} on connection {} refused: {}", name, conn_id, e);
            self.logout(conn_id);
            return Ok(LoginOutcome::Rejected);
        }

        let index = self.store.load(&name).unwrap_or_else(|e| {
            debug!("Starting fresh history for {}: {}", name, e);
            MessageIndex::new(name.as_str())
        });
        self.indices.insert(name.clone(), index);
        self.groups.join(&name);

        self.send_to(
            conn_id,
            &Response::Login {
                status: LoginStatus::Ok,
            },
        )?;
        info!("{} logged in", name);
        Ok(LoginOutcome::Accepted(name))
    }
}
