//! Wire protocol shared between the chat server and its clients.
//!
//! Every logical message is one JSON object whose `action` field selects the
//! variant. Objects travel inside length-prefixed frames, see [`framing`].

use serde::{Deserialize, Serialize};

pub mod framing;

pub use framing::{encode_frame, read_frame, write_frame, FrameError, MAX_PAYLOAD, SIZE_SPEC};

pub const DEFAULT_PORT: u16 = 1112;

/// Client-to-server request.
///
/// Fields default to the empty string when a client omits them, so a
/// `{"action":"connect"}` still reaches the dispatcher and is answered with a
/// `no-user` status instead of being dropped.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Request {
    Login {
        #[serde(default)]
        name: String,
    },
    Connect {
        #[serde(default)]
        target: String,
    },
    Exchange {
        #[serde(default)]
        message: String,
    },
    Disconnect,
    List,
    Poem {
        #[serde(default)]
        target: String,
    },
    Time,
    Search {
        #[serde(default)]
        target: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoginStatus {
    Ok,
    Duplicate,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "self")]
    SelfTarget,
    #[serde(rename = "no-user")]
    NoUser,
    /// Sent to existing group members when someone joins them.
    #[serde(rename = "request")]
    Request,
}

/// Server-to-client message: direct replies and peer notices alike.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Response {
    Login {
        status: LoginStatus,
    },
    Connect {
        status: ConnectStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        msg: String,
    },
    Exchange {
        from: String,
        message: String,
    },
    /// A groupmate left (`from` set) or everyone else left (`from` absent).
    Disconnect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        msg: String,
    },
    List {
        results: String,
    },
    Poem {
        results: Vec<String>,
    },
    Time {
        results: String,
    },
    Search {
        results: String,
    },
}

impl Response {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
