//! # Chat Server Library
//!
//! This library provides the connection and session engine for a group chat
//! server. A single process multiplexes many client sockets, gates them
//! through a login handshake, coordinates users into chat groups that merge
//! and split on request, fans messages out to group members, and keeps a
//! searchable transcript index per user plus a shared poem corpus.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! All session state lives in one [`hub::Hub`] owned by the event loop in
//! [`network::Server`]. Per-connection tasks only decode incoming frames and
//! write outgoing ones; every decision is made on the loop's task, so no
//! locking is needed and events are handled in a well-defined order.
//!
//! ### Failure Scoping
//! Every error is scoped to one connection or one request. Transport
//! failures log the user out, malformed payloads before login tear the
//! socket down, malformed payloads after login are ignored, and history
//! persistence is best effort.
//!
//! ## Module Organization
//!
//! - `registry`: live sockets, pending vs. logged in, name lookup
//! - `auth`: the login handshake
//! - `group`: partition of online users into chat groups
//! - `dispatch`: handling of `connect`, `exchange`, `list`, `poem`, ...
//! - `index`: per-user transcript index and its on-disk store
//! - `corpus`: the read-only poem corpus
//! - `network`: TCP accept loop and the event loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = ServerConfig::new("127.0.0.1:1112");
//!     config.corpus_path = "AllSonnets.txt".into();
//!
//!     let mut server = Server::bind(&config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod corpus;
pub mod dispatch;
pub mod error;
pub mod group;
pub mod hub;
pub mod index;
pub mod network;
pub mod registry;

pub use error::{Result, ServerError};
