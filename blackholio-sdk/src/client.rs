//! Connection handle for a Blackholio module.
//!
//! This is the main entry point for SDK consumers. A [`DbConnection`] is
//! built with three lifecycle callbacks (connect, connect-error, disconnect)
//! and then driven from the owner's update cycle with
//! [`DbConnection::frame_tick`], which drains queued events and invokes the
//! callbacks synchronously on the calling thread.
//!
//! ## Callback ordering
//!
//! - exactly one of `on_connect` / `on_connect_error`
//! - then, per subscription, exactly one of `on_applied` / `on_error`
//! - then `on_disconnect` at most once
//!
//! Events that arrive after the connection is closed are dropped.
//!
//! ## Reconnection
//!
//! The SDK does not reconnect. A consumer that wants to retry builds a new
//! connection after `on_connect_error` or `on_disconnect`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::cache::RemoteTables;
use crate::error::{ClientError, Result};
use crate::event::{ServerEvent, TableRows};
use crate::identity::Identity;
use crate::subscription::{PendingSubscription, SubscriptionBuilder, SubscriptionEventContext};
use crate::transport::{Command, Link, Transport};

/// Default service address.
pub const DEFAULT_URI: &str = "http://127.0.0.1:3000";
/// Default module name.
pub const DEFAULT_MODULE_NAME: &str = "blackholio";

/// What to connect to, and as whom.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectConfig {
    /// Service address (`http(s)://` or `ws(s)://`).
    pub uri: String,
    /// Name of the module instance on the service.
    pub module_name: String,
    /// Credential from a previous session, if any.
    pub token: Option<String>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            module_name: DEFAULT_MODULE_NAME.to_string(),
            token: None,
        }
    }
}

impl fmt::Debug for ConnectConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectConfig")
            .field("uri", &self.uri)
            .field("module_name", &self.module_name)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

type ConnectCallback = Box<dyn FnOnce(&DbConnection, Identity, &str) + Send>;
type ConnectErrorCallback = Box<dyn FnOnce(&ClientError) + Send>;
type DisconnectCallback = Box<dyn FnOnce(&DbConnection, Option<&ClientError>) + Send>;

#[derive(Default)]
struct Callbacks {
    on_connect: Option<ConnectCallback>,
    on_connect_error: Option<ConnectErrorCallback>,
    on_disconnect: Option<DisconnectCallback>,
}

/// Builder for [`DbConnection`].
#[derive(Default)]
pub struct DbConnectionBuilder {
    config: ConnectConfig,
    callbacks: Callbacks,
}

impl DbConnectionBuilder {
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.config.uri = uri.into();
        self
    }

    pub fn with_module_name(mut self, module_name: impl Into<String>) -> Self {
        self.config.module_name = module_name.into();
        self
    }

    /// Present a cached credential. An empty token counts as none.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.config.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn on_connect(
        mut self,
        f: impl FnOnce(&DbConnection, Identity, &str) + Send + 'static,
    ) -> Self {
        self.callbacks.on_connect = Some(Box::new(f));
        self
    }

    pub fn on_connect_error(mut self, f: impl FnOnce(&ClientError) + Send + 'static) -> Self {
        self.callbacks.on_connect_error = Some(Box::new(f));
        self
    }

    pub fn on_disconnect(
        mut self,
        f: impl FnOnce(&DbConnection, Option<&ClientError>) + Send + 'static,
    ) -> Self {
        self.callbacks.on_disconnect = Some(Box::new(f));
        self
    }

    /// Validate the configuration and open the link.
    ///
    /// Returns as soon as the transport has accepted the link; the handshake
    /// outcome arrives later through the callbacks.
    pub fn build(self, transport: &dyn Transport) -> Result<DbConnection> {
        validate_uri(&self.config.uri)?;
        if self.config.module_name.trim().is_empty() {
            return Err(ClientError::MissingModuleName);
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tracing::debug!(
            uri = %self.config.uri,
            module = %self.config.module_name,
            cached_token = self.config.token.is_some(),
            "opening connection"
        );
        transport.open(
            &self.config,
            Link {
                commands: cmd_rx,
                events: event_tx,
            },
        )?;

        Ok(DbConnection {
            inner: Arc::new(Inner {
                uri: self.config.uri,
                module_name: self.config.module_name,
                cmd_tx,
                events: tokio::sync::Mutex::new(event_rx),
                state: Mutex::new(LinkState::Connecting),
                identity: Mutex::new(None),
                callbacks: Mutex::new(self.callbacks),
                subscriptions: Mutex::new(HashMap::new()),
                next_query_id: AtomicU32::new(1),
                db: RemoteTables::default(),
            }),
        })
    }
}

fn validate_uri(uri: &str) -> Result<()> {
    let host = ["http://", "https://", "ws://", "wss://"]
        .iter()
        .find_map(|scheme| uri.trim().strip_prefix(scheme));
    match host {
        Some(h) if !h.is_empty() => Ok(()),
        _ => Err(ClientError::InvalidUri(uri.to_string())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Connecting,
    Active,
    Closed,
}

struct Inner {
    uri: String,
    module_name: String,
    cmd_tx: mpsc::UnboundedSender<Command>,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerEvent>>,
    state: Mutex<LinkState>,
    identity: Mutex<Option<Identity>>,
    callbacks: Mutex<Callbacks>,
    subscriptions: Mutex<HashMap<u32, PendingSubscription>>,
    next_query_id: AtomicU32,
    db: RemoteTables,
}

/// A handle to a connection. Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct DbConnection {
    inner: Arc<Inner>,
}

impl fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConnection")
            .field("uri", &self.inner.uri)
            .field("module_name", &self.inner.module_name)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

impl DbConnection {
    pub fn builder() -> DbConnectionBuilder {
        DbConnectionBuilder::default()
    }

    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    pub fn module_name(&self) -> &str {
        &self.inner.module_name
    }

    /// True between a successful handshake and the close of the link.
    pub fn is_active(&self) -> bool {
        *self.inner.state.lock() == LinkState::Active
    }

    /// True once the link has closed for any reason.
    pub fn is_closed(&self) -> bool {
        *self.inner.state.lock() == LinkState::Closed
    }

    /// Identity assigned by the service. `None` until connected.
    pub fn try_identity(&self) -> Option<Identity> {
        *self.inner.identity.lock()
    }

    /// Rows received through subscriptions.
    pub fn db(&self) -> &RemoteTables {
        &self.inner.db
    }

    pub fn subscription_builder(&self) -> SubscriptionBuilder {
        SubscriptionBuilder::new(self.clone())
    }

    /// Dispatch every queued event. Never blocks.
    pub fn frame_tick(&self) {
        loop {
            let next = match self.inner.events.try_lock() {
                Ok(mut rx) => rx.try_recv(),
                // Another caller is draining right now.
                Err(_) => return,
            };
            match next {
                Ok(event) => self.dispatch(event),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.link_lost();
                    return;
                }
            }
        }
    }

    /// Wait for the next event and dispatch it.
    ///
    /// Returns `false` once the transport has gone away and nothing is left
    /// to dispatch.
    pub async fn advance_one_message(&self) -> bool {
        let next = {
            let mut rx = self.inner.events.lock().await;
            rx.recv().await
        };
        match next {
            Some(event) => {
                self.dispatch(event);
                true
            }
            None => {
                self.link_lost();
                false
            }
        }
    }

    /// Ask the service to close the session. Fire-and-forget.
    ///
    /// `on_disconnect` runs before this returns; no callbacks run after.
    pub fn disconnect(&self) {
        if *self.inner.state.lock() == LinkState::Closed {
            return;
        }
        let _ = self.inner.cmd_tx.send(Command::Disconnect);
        tracing::debug!(module = %self.inner.module_name, "disconnect requested");
        self.close(None, true);
    }

    pub(crate) fn register_subscription(
        &self,
        queries: Vec<String>,
        pending: PendingSubscription,
    ) -> Result<u32> {
        if !self.is_active() {
            return Err(ClientError::NotConnected);
        }
        let query_id = self.inner.next_query_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscriptions.lock().insert(query_id, pending);
        tracing::debug!(query_id, ?queries, "subscribing");
        if self
            .inner
            .cmd_tx
            .send(Command::Subscribe { query_id, queries })
            .is_err()
        {
            self.inner.subscriptions.lock().remove(&query_id);
            return Err(ClientError::ChannelClosed);
        }
        Ok(query_id)
    }

    fn dispatch(&self, event: ServerEvent) {
        let state = *self.inner.state.lock();
        if state == LinkState::Closed {
            tracing::debug!("dropping event received after close");
            return;
        }
        match event {
            ServerEvent::IdentityToken { identity, token } => {
                self.handle_identity(state, identity, &token)
            }
            ServerEvent::ConnectFailed { reason } => {
                self.close(Some(ClientError::ConnectFailed(reason)), false)
            }
            ServerEvent::SubscribeApplied { query_id, tables } => {
                self.handle_applied(state, query_id, &tables)
            }
            ServerEvent::SubscriptionError { query_id, reason } => {
                let pending = self.inner.subscriptions.lock().remove(&query_id);
                match pending {
                    Some(p) => p.failed(&ClientError::SubscriptionFailed(reason)),
                    None => tracing::warn!(query_id, %reason, "error for unknown subscription"),
                }
            }
            ServerEvent::Disconnected { reason } => {
                self.close(reason.map(ClientError::Disconnected), false)
            }
        }
    }

    fn handle_identity(&self, state: LinkState, identity: Identity, token: &str) {
        if state != LinkState::Connecting {
            tracing::warn!(%identity, "ignoring repeated identity token");
            return;
        }
        *self.inner.state.lock() = LinkState::Active;
        *self.inner.identity.lock() = Some(identity);
        let on_connect = {
            let mut callbacks = self.inner.callbacks.lock();
            callbacks.on_connect_error = None;
            callbacks.on_connect.take()
        };
        tracing::info!(%identity, module = %self.inner.module_name, "connected");
        if let Some(cb) = on_connect {
            cb(self, identity, token);
        }
    }

    fn handle_applied(&self, state: LinkState, query_id: u32, tables: &[TableRows]) {
        if state != LinkState::Active {
            tracing::warn!(query_id, "ignoring subscription rows before handshake");
            return;
        }
        self.inner.db.apply(tables);
        let pending = self.inner.subscriptions.lock().remove(&query_id);
        match pending {
            Some(p) => p.applied(&SubscriptionEventContext::new(self.clone(), query_id)),
            None => tracing::warn!(query_id, "rows for unknown subscription"),
        }
    }

    fn link_lost(&self) {
        if *self.inner.state.lock() != LinkState::Closed {
            tracing::warn!(module = %self.inner.module_name, "transport closed without notice");
            self.close(Some(ClientError::ChannelClosed), false);
        }
    }

    /// Move to `Closed` and fire the one terminal callback that applies.
    fn close(&self, error: Option<ClientError>, requested: bool) {
        let previous = std::mem::replace(&mut *self.inner.state.lock(), LinkState::Closed);
        if previous == LinkState::Closed {
            return;
        }
        let callbacks = std::mem::take(&mut *self.inner.callbacks.lock());
        let dropped = self.inner.subscriptions.lock().drain().count();
        if dropped > 0 {
            tracing::debug!(dropped, "discarding pending subscriptions");
        }

        if previous == LinkState::Connecting && !requested {
            let error = error
                .unwrap_or_else(|| ClientError::ConnectFailed("closed before handshake".to_string()));
            if let Some(cb) = callbacks.on_connect_error {
                cb(&error);
            }
        } else if let Some(cb) = callbacks.on_disconnect {
            cb(self, error.as_ref());
        }
    }
}
