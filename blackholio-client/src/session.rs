//! ArenaSession: owns the connection and drives the arena setup.
//!
//! The startup sequence is linear with two asynchronous checkpoints:
//!
//! 1. [`ArenaSession::start`] builds the connection with the cached token.
//! 2. On connect: save the new token, record the identity, emit
//!    `connected`, subscribe to every table.
//! 3. On subscription applied: emit `subscription_applied`, read the
//!    `config` row, spawn the four border bars.
//!
//! Callbacks run inside [`ArenaSession::update`], which the owner calls once
//! per frame.

use std::sync::{Arc, Weak};

use blackholio_sdk::transport::Transport;
use blackholio_sdk::{ClientError, DbConnection, Identity, SubscriptionEventContext};
use parking_lot::{Mutex, MutexGuard};

use crate::arena::{ArenaConfig, BorderSegment, border_segments};
use crate::config::{
    ClientConfig, DEFAULT_BORDER_MATERIAL, DEFAULT_BORDER_THICKNESS, DEFAULT_MODULE_NAME,
    DEFAULT_SERVER_URL, valid_thickness,
};
use crate::credentials::CredentialStore;
use crate::error::SessionError;
use crate::scene::{ObjectId, Scene};
use crate::signal::Signal;

/// What the session connects to and how it draws the border.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub server_url: String,
    pub module_name: String,
    pub border_thickness: f32,
    pub border_material: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            module_name: DEFAULT_MODULE_NAME.to_string(),
            border_thickness: DEFAULT_BORDER_THICKNESS,
            border_material: DEFAULT_BORDER_MATERIAL.to_string(),
        }
    }
}

impl From<&ClientConfig> for SessionSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            server_url: config.server_url.clone(),
            module_name: config.module_name.clone(),
            border_thickness: config.border_thickness,
            border_material: config.border_material.clone(),
        }
    }
}

/// Shared session state. Callbacks hold a `Weak` to it.
struct SessionCore<S> {
    settings: SessionSettings,
    credentials: CredentialStore,
    /// Current connection (set on start, cleared on explicit disconnect).
    conn: Mutex<Option<DbConnection>>,
    /// Identity assigned on connect.
    identity: Mutex<Option<Identity>>,
    connected: Signal,
    subscription_applied: Signal,
    scene: Mutex<S>,
    borders: Mutex<Vec<BorderSegment>>,
    spawned: Mutex<Vec<ObjectId>>,
    /// Unrecoverable setup failure, returned from the next update.
    fatal: Mutex<Option<SessionError>>,
}

impl<S: Scene + 'static> SessionCore<S> {
    fn handle_connect(self: &Arc<Self>, conn: &DbConnection, identity: Identity, token: &str) {
        tracing::info!(%identity, "Connected.");
        if let Err(e) = self.credentials.save(token) {
            tracing::warn!(error = %e, "failed to persist auth token");
        }
        *self.identity.lock() = Some(identity);

        self.connected.emit();

        // A `connected` listener may have disconnected already.
        if !conn.is_active() {
            tracing::debug!("connection closed during connect handling, not subscribing");
            return;
        }

        let on_applied = Arc::downgrade(self);
        let on_error = Arc::downgrade(self);
        let subscribed = conn
            .subscription_builder()
            .on_applied(move |ctx| {
                if let Some(core) = on_applied.upgrade() {
                    core.handle_subscription_applied(ctx);
                }
            })
            .on_error(move |e| {
                tracing::error!(error = %e, "subscription to all tables failed");
                if let Some(core) = on_error.upgrade() {
                    *core.fatal.lock() = Some(e.clone().into());
                }
            })
            .subscribe_to_all_tables();
        if let Err(e) = subscribed {
            tracing::error!(error = %e, "could not request subscription");
            *self.fatal.lock() = Some(e.into());
        }
    }

    fn handle_subscription_applied(&self, ctx: &SubscriptionEventContext) {
        tracing::info!(query_id = ctx.query_id(), "Subscription applied!");
        self.subscription_applied.emit();

        match ArenaConfig::from_cache(ctx.db()) {
            Ok(arena) => self.setup_arena(arena.world_size),
            Err(e) => {
                tracing::error!(error = %e, "arena setup aborted");
                *self.fatal.lock() = Some(e);
            }
        }
    }

    fn setup_arena(&self, world_size: f32) {
        if !self.borders.lock().is_empty() {
            tracing::debug!(world_size, "arena border already built");
            return;
        }
        let thickness = self.settings.border_thickness;
        let thickness = if valid_thickness(thickness) {
            thickness
        } else {
            tracing::warn!(thickness, "invalid border thickness, using default");
            DEFAULT_BORDER_THICKNESS
        };
        let segments = border_segments(world_size, thickness);
        let mut scene = self.scene.lock();
        let mut spawned = self.spawned.lock();
        for segment in &segments {
            spawned.push(scene.spawn_cuboid(segment.cuboid(&self.settings.border_material)));
        }
        *self.borders.lock() = segments.to_vec();
        tracing::info!(world_size, thickness, "arena border built");
    }
}

fn handle_connect_error(error: &ClientError) {
    tracing::error!(error = %error, "Connection error");
}

fn handle_disconnect(error: Option<&ClientError>) {
    tracing::info!("Disconnected.");
    if let Some(e) = error {
        tracing::warn!(error = %e, "connection closed with error");
    }
}

/// The client's connection lifecycle and arena state.
///
/// Cloning yields another handle to the same session.
pub struct ArenaSession<S> {
    core: Arc<SessionCore<S>>,
}

impl<S> Clone for ArenaSession<S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<S: Scene + 'static> ArenaSession<S> {
    /// Create an idle session. Subscribe to its signals, then call `start`.
    pub fn new(settings: SessionSettings, credentials: CredentialStore, scene: S) -> Self {
        Self {
            core: Arc::new(SessionCore {
                settings,
                credentials,
                conn: Mutex::new(None),
                identity: Mutex::new(None),
                connected: Signal::new("connected"),
                subscription_applied: Signal::new("subscription_applied"),
                scene: Mutex::new(scene),
                borders: Mutex::new(Vec::new()),
                spawned: Mutex::new(Vec::new()),
                fatal: Mutex::new(None),
            }),
        }
    }

    /// Build the connection. The outcome arrives through `update`.
    ///
    /// Allowed again once the previous connection has closed.
    pub fn start(&self, transport: &dyn Transport) -> Result<(), SessionError> {
        let live = self
            .core
            .conn
            .lock()
            .as_ref()
            .is_some_and(|conn| !conn.is_closed());
        if live {
            return Err(SessionError::AlreadyStarted);
        }

        let token = match self.core.credentials.load() {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable auth token");
                None
            }
        };

        let weak: Weak<SessionCore<S>> = Arc::downgrade(&self.core);
        let settings = &self.core.settings;
        let conn = DbConnection::builder()
            .on_connect(move |conn, identity, token| {
                if let Some(core) = weak.upgrade() {
                    core.handle_connect(conn, identity, token);
                }
            })
            .on_connect_error(handle_connect_error)
            .on_disconnect(|_, error| handle_disconnect(error))
            .with_uri(settings.server_url.as_str())
            .with_module_name(settings.module_name.as_str())
            .with_token(token)
            .build(transport)?;

        tracing::info!(uri = %settings.server_url, module = %settings.module_name, "connecting");
        *self.core.conn.lock() = Some(conn);
        Ok(())
    }

    /// Dispatch queued connection events. Call once per frame.
    pub fn update(&self) -> Result<(), SessionError> {
        if let Some(conn) = self.connection() {
            conn.frame_tick();
        }
        self.take_fatal()
    }

    /// Wait for one connection event and dispatch it.
    ///
    /// Returns `Ok(false)` when there is no connection or it has closed.
    pub async fn advance(&self) -> Result<bool, SessionError> {
        let Some(conn) = self.connection() else {
            return Ok(false);
        };
        let progressed = conn.advance_one_message().await;
        self.take_fatal()?;
        Ok(progressed)
    }

    /// True iff a connection exists and reports itself active.
    pub fn is_connected(&self) -> bool {
        self.core
            .conn
            .lock()
            .as_ref()
            .is_some_and(DbConnection::is_active)
    }

    /// Close the connection and drop the handle. No callbacks run afterwards.
    pub fn disconnect(&self) {
        let conn = self.core.conn.lock().take();
        match conn {
            Some(conn) => conn.disconnect(),
            None => tracing::debug!("disconnect requested with no connection"),
        }
    }

    pub fn connection(&self) -> Option<DbConnection> {
        self.core.conn.lock().clone()
    }

    /// Identity assigned on connect.
    pub fn local_identity(&self) -> Option<Identity> {
        *self.core.identity.lock()
    }

    /// Fires once per successful connect, after the identity is set.
    pub fn on_connected(&self) -> &Signal {
        &self.core.connected
    }

    /// Fires once the all-tables subscription has synced.
    pub fn on_subscription_applied(&self) -> &Signal {
        &self.core.subscription_applied
    }

    /// Border bars, empty until the arena is built.
    pub fn borders(&self) -> Vec<BorderSegment> {
        self.core.borders.lock().clone()
    }

    /// Objects this session spawned into the scene.
    pub fn spawned(&self) -> Vec<ObjectId> {
        self.core.spawned.lock().clone()
    }

    pub fn scene(&self) -> MutexGuard<'_, S> {
        self.core.scene.lock()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.core.settings
    }

    fn take_fatal(&self) -> Result<(), SessionError> {
        match self.core.fatal.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneGraph;
    use blackholio_sdk::loopback::LoopbackModule;

    fn session_in(dir: &tempfile::TempDir) -> ArenaSession<SceneGraph> {
        ArenaSession::new(
            SessionSettings::default(),
            CredentialStore::new(dir.path().join("prefs.toml")),
            SceneGraph::new(),
        )
    }

    #[test]
    fn not_connected_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_in(&dir);
        assert!(!session.is_connected());
        assert!(session.local_identity().is_none());
        assert!(session.borders().is_empty());
        assert!(session.update().is_ok());
    }

    #[test]
    fn settings_follow_client_config() {
        let config = ClientConfig {
            module_name: "arena-2".to_string(),
            border_thickness: 5.0,
            ..ClientConfig::default()
        };
        let settings = SessionSettings::from(&config);
        assert_eq!(settings.module_name, "arena-2");
        assert_eq!(settings.border_thickness, 5.0);
        assert_eq!(settings.server_url, DEFAULT_SERVER_URL);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let module = LoopbackModule::new("blackholio").with_config(100);
        let session = session_in(&dir);
        session.start(&module).unwrap();
        assert!(matches!(session.start(&module), Err(SessionError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn invalid_uri_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let session = ArenaSession::new(
            SessionSettings {
                server_url: "not a url".to_string(),
                ..SessionSettings::default()
            },
            CredentialStore::new(dir.path().join("prefs.toml")),
            SceneGraph::new(),
        );
        let module = LoopbackModule::new("blackholio");
        let err = session.start(&module).unwrap_err();
        assert!(matches!(err, SessionError::Client(ClientError::InvalidUri(_))));
        assert!(session.connection().is_none());
    }
}
