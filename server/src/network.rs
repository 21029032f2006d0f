//! Server network layer: TCP accept loop and per-connection I/O tasks

use crate::corpus::{OrdinalLabels, PoemCorpus, ROMAN_LIMIT};
use crate::error::Result;
use crate::hub::Hub;
use crate::index::IndexStore;
use crate::registry::{ConnId, Connection, OUTBOUND_CAPACITY};
use log::{debug, error, info, warn};
use shared::{read_frame, write_frame, FrameError};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Everything needed to start a server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Line-delimited poem corpus
    pub corpus_path: PathBuf,
    /// JSON ordinal-label table; Roman numerals when absent
    pub labels_path: Option<PathBuf>,
    /// Where per-user history files live
    pub index_dir: PathBuf,
}

impl ServerConfig {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            corpus_path: PathBuf::from("AllSonnets.txt"),
            labels_path: None,
            index_dir: PathBuf::from("."),
        }
    }
}

/// Messages sent from connection reader tasks to the main loop
#[derive(Debug)]
pub enum ServerMessage {
    FrameReceived { conn_id: ConnId, payload: String },
    Closed { conn_id: ConnId },
    ReadFailed { conn_id: ConnId, error: FrameError },
}

impl ServerMessage {
    pub fn conn_id(&self) -> ConnId {
        match self {
            ServerMessage::FrameReceived { conn_id, .. }
            | ServerMessage::Closed { conn_id }
            | ServerMessage::ReadFailed { conn_id, .. } => *conn_id,
        }
    }
}

/// Main server: owns the listener and the hub, runs the event loop
pub struct Server {
    listener: TcpListener,
    hub: Hub,

    // Reader tasks -> main loop
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    /// Loads the corpus and binds the listening socket
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let labels = match &config.labels_path {
            Some(path) => OrdinalLabels::load(path)?,
            None => OrdinalLabels::roman(ROMAN_LIMIT),
        };
        if labels.is_empty() {
            warn!("Label table is empty, poem lookups will find nothing");
        }
        let corpus = PoemCorpus::load(&config.corpus_path, labels)?;
        let store = IndexStore::new(&config.index_dir);
        Self::with_hub(&config.bind_addr, Hub::new(corpus, store)).await
    }

    pub async fn with_hub(addr: &str, hub: Hub) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        Ok(Server {
            listener,
            hub,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Main loop; returns only if the event channel closes
    ///
    /// Each wake-up drains every queued event and handles them in a fixed
    /// order: connections that were logged in when the batch started, then
    /// pending ones, then newly accepted sockets.
    pub async fn run(&mut self) -> Result<()> {
        info!("Server started successfully");

        loop {
            let mut batch = Vec::new();
            let mut accepted = None;

            tokio::select! {
                result = self.listener.accept() => match result {
                    Ok(conn) => accepted = Some(conn),
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                message = self.server_rx.recv() => match message {
                    Some(message) => batch.push(message),
                    None => break,
                },
            }

            while let Ok(message) = self.server_rx.try_recv() {
                batch.push(message);
            }
            self.handle_tick(batch, accepted);
        }

        info!("Server shutting down");
        Ok(())
    }

    /// Logs everyone out so their histories are saved
    pub fn shutdown(&mut self) {
        self.hub.shutdown();
    }

    /// One loop iteration: the queued events, then the accepted socket
    fn handle_tick(
        &mut self,
        batch: Vec<ServerMessage>,
        accepted: Option<(TcpStream, SocketAddr)>,
    ) {
        self.process_batch(batch);
        if let Some((stream, addr)) = accepted {
            self.spawn_connection(stream, addr);
        }
    }

    /// Logged-in connections first, then pending ones, arrival order within each
    fn process_batch(&mut self, batch: Vec<ServerMessage>) {
        let registry = self.hub.registry();
        let (logged_in, pending): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .partition(|message| registry.is_authenticated(message.conn_id()));

        for message in logged_in.into_iter().chain(pending) {
            self.handle_message(message);
        }
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::FrameReceived { conn_id, payload } => {
                self.hub.handle_payload(conn_id, &payload);
            }
            ServerMessage::Closed { conn_id } => {
                debug!("Connection {} closed by peer", conn_id);
                self.hub.logout(conn_id);
            }
            ServerMessage::ReadFailed { conn_id, error } => {
                warn!("Read from connection {} failed: {}", conn_id, error);
                self.hub.logout(conn_id);
            }
        }
    }

    fn spawn_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let conn_id = self.hub.next_conn_id();
        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

        Self::spawn_writer(conn_id, write_half, outbound_rx);
        let reader = Self::spawn_reader(conn_id, read_half, self.server_tx.clone());

        self.hub
            .accept(Connection::new(conn_id, addr, outbound_tx).with_reader(reader));
    }

    /// Spawns task that decodes frames and forwards them to the main loop
    fn spawn_reader(
        conn_id: ConnId,
        read_half: OwnedReadHalf,
        server_tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> AbortHandle {
        let task = tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);

            loop {
                let message = match read_frame(&mut reader).await {
                    Ok(Some(payload)) => ServerMessage::FrameReceived { conn_id, payload },
                    Ok(None) => ServerMessage::Closed { conn_id },
                    Err(error) => ServerMessage::ReadFailed { conn_id, error },
                };
                let last = !matches!(message, ServerMessage::FrameReceived { .. });

                if server_tx.send(message).is_err() || last {
                    break;
                }
            }
        });
        task.abort_handle()
    }

    /// Spawns task that writes queued payloads until the queue is dropped
    fn spawn_writer(
        conn_id: ConnId,
        mut write_half: OwnedWriteHalf,
        mut outbound_rx: mpsc::Receiver<String>,
    ) {
        tokio::spawn(async move {
            while let Some(payload) = outbound_rx.recv().await {
                if let Err(e) = write_frame(&mut write_half, &payload).await {
                    debug!("Write to connection {} failed: {}", conn_id, e);
                    break;
                }
            }
        });
    }
}
