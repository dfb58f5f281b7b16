//! Subscription requests and their completion callbacks.

use std::fmt;

use crate::cache::RemoteTables;
use crate::client::DbConnection;
use crate::error::{ClientError, Result};
use crate::transport::ALL_TABLES_QUERY;

type AppliedCallback = Box<dyn FnOnce(&SubscriptionEventContext) + Send>;
type ErrorCallback = Box<dyn FnOnce(&ClientError) + Send>;

/// Callbacks waiting for the service to answer one subscription.
#[derive(Default)]
pub(crate) struct PendingSubscription {
    on_applied: Option<AppliedCallback>,
    on_error: Option<ErrorCallback>,
}

impl PendingSubscription {
    pub(crate) fn applied(self, ctx: &SubscriptionEventContext) {
        if let Some(cb) = self.on_applied {
            cb(ctx);
        }
    }

    pub(crate) fn failed(self, error: &ClientError) {
        match self.on_error {
            Some(cb) => cb(error),
            None => tracing::warn!(error = %error, "subscription failed with no error handler"),
        }
    }
}

/// Passed to `on_applied` once the initial rows are in the cache.
pub struct SubscriptionEventContext {
    conn: DbConnection,
    query_id: u32,
}

impl SubscriptionEventContext {
    pub(crate) fn new(conn: DbConnection, query_id: u32) -> Self {
        Self { conn, query_id }
    }

    pub fn db(&self) -> &RemoteTables {
        self.conn.db()
    }

    pub fn connection(&self) -> &DbConnection {
        &self.conn
    }

    pub fn query_id(&self) -> u32 {
        self.query_id
    }
}

impl fmt::Debug for SubscriptionEventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEventContext")
            .field("query_id", &self.query_id)
            .finish()
    }
}

/// Identifies an issued subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    query_id: u32,
}

impl SubscriptionHandle {
    pub fn query_id(&self) -> u32 {
        self.query_id
    }
}

/// Builds a subscription request. Obtained from
/// [`DbConnection::subscription_builder`].
pub struct SubscriptionBuilder {
    conn: DbConnection,
    pending: PendingSubscription,
}

impl SubscriptionBuilder {
    pub(crate) fn new(conn: DbConnection) -> Self {
        Self {
            conn,
            pending: PendingSubscription::default(),
        }
    }

    /// Called exactly once, after the initial rows have been applied.
    pub fn on_applied(mut self, f: impl FnOnce(&SubscriptionEventContext) + Send + 'static) -> Self {
        self.pending.on_applied = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(&ClientError) + Send + 'static) -> Self {
        self.pending.on_error = Some(Box::new(f));
        self
    }

    /// Send the request. Completion is reported through the callbacks.
    pub fn subscribe<I, S>(self, queries: I) -> Result<SubscriptionHandle>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queries: Vec<String> = queries.into_iter().map(Into::into).collect();
        if queries.is_empty() {
            return Err(ClientError::SubscriptionFailed("no queries given".to_string()));
        }
        let query_id = self.conn.register_subscription(queries, self.pending)?;
        Ok(SubscriptionHandle { query_id })
    }

    pub fn subscribe_to_all_tables(self) -> Result<SubscriptionHandle> {
        self.subscribe([ALL_TABLES_QUERY])
    }
}
