//! The seam between the connection handle and whatever carries the bytes.
//!
//! A transport receives [`Command`]s and answers with [`ServerEvent`]s over
//! a pair of unbounded channels. The connection handle never blocks on
//! either side: commands are fire-and-forget and events are drained from
//! the owner's update cycle.

use tokio::sync::mpsc;

use crate::client::ConnectConfig;
use crate::error::Result;
use crate::event::ServerEvent;

/// Query that asks for every row of every table.
pub const ALL_TABLES_QUERY: &str = "SELECT * FROM *";

/// Requests the client sends to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Subscribe { query_id: u32, queries: Vec<String> },
    Disconnect,
}

/// Channel ends handed to a transport when a connection is opened.
pub struct Link {
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub events: mpsc::UnboundedSender<ServerEvent>,
}

/// Something that can open a session with the service.
///
/// `open` must return promptly. The handshake outcome is reported later as
/// either [`ServerEvent::IdentityToken`] or [`ServerEvent::ConnectFailed`].
pub trait Transport: Send + Sync {
    fn open(&self, config: &ConnectConfig, link: Link) -> Result<()>;
}
