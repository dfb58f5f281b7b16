//! Messages a transport delivers to the connection handle.

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// Rows for one table, as carried by a subscription answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRows {
    pub table_name: String,
    pub rows: Vec<serde_json::Value>,
}

/// Events pushed by the transport, consumed by [`crate::DbConnection`].
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Handshake accepted. `token` is the credential to present next time.
    IdentityToken {
        identity: Identity,
        token: String,
    },

    /// Handshake refused (unknown module, bad credential, unreachable host).
    ConnectFailed {
        reason: String,
    },

    /// Initial rows for a subscription are in.
    SubscribeApplied {
        query_id: u32,
        tables: Vec<TableRows>,
    },

    /// A subscription request was rejected.
    SubscriptionError {
        query_id: u32,
        reason: String,
    },

    /// Connection was closed. `reason` is set when the close was abnormal.
    Disconnected {
        reason: Option<String>,
    },
}
