//! In-process stand-in for the Blackholio service.
//!
//! Speaks the same [`Command`] / [`ServerEvent`] contract as a networked
//! transport, so the whole client lifecycle can run without a server:
//! module-name check, credential → identity reuse, freshly minted tokens,
//! "all tables" subscriptions and remote kicks.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::cache::{CONFIG_ROW_ID, Config, TableRow};
use crate::client::ConnectConfig;
use crate::error::{ClientError, Result};
use crate::event::{ServerEvent, TableRows};
use crate::identity::Identity;
use crate::transport::{ALL_TABLES_QUERY, Command, Link, Transport};

/// Default world size of a freshly published module.
pub const DEFAULT_WORLD_SIZE: u64 = 1000;

struct Shared {
    module_name: String,
    tables: Mutex<BTreeMap<String, Vec<serde_json::Value>>>,
    tokens: Mutex<HashMap<String, Identity>>,
    sessions: Mutex<Vec<mpsc::UnboundedSender<ServerEvent>>>,
    refusal: Mutex<Option<String>>,
    subscription_refusal: Mutex<Option<String>>,
}

/// A module hosted in-process. Clones share state.
#[derive(Clone)]
pub struct LoopbackModule {
    shared: Arc<Shared>,
}

impl LoopbackModule {
    /// An empty module with no rows in any table.
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                module_name: module_name.into(),
                tables: Mutex::new(BTreeMap::new()),
                tokens: Mutex::new(HashMap::new()),
                sessions: Mutex::new(Vec::new()),
                refusal: Mutex::new(None),
                subscription_refusal: Mutex::new(None),
            }),
        }
    }

    /// Seed the `config` row the way the module's init reducer does.
    pub fn with_config(self, world_size: u64) -> Self {
        self.insert_row(&Config {
            id: CONFIG_ROW_ID,
            world_size,
        });
        self
    }

    pub fn module_name(&self) -> &str {
        &self.shared.module_name
    }

    /// Insert or replace a row, keyed by its primary key.
    pub fn insert_row<R: TableRow>(&self, row: &R) {
        let value = match serde_json::to_value(row) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(table = R::TABLE_NAME, error = %e, "row not serializable");
                return;
            }
        };
        let key = row.primary_key();
        let mut tables = self.shared.tables.lock();
        let rows = tables.entry(R::TABLE_NAME.to_string()).or_default();
        rows.retain(|existing| {
            serde_json::from_value::<R>(existing.clone())
                .map(|r| r.primary_key() != key)
                .unwrap_or(true)
        });
        rows.push(value);
    }

    /// Make every subsequent handshake fail with `reason`.
    pub fn refuse_connections(&self, reason: impl Into<String>) {
        *self.shared.refusal.lock() = Some(reason.into());
    }

    /// Make every subsequent subscription fail with `reason`.
    pub fn reject_subscriptions(&self, reason: impl Into<String>) {
        *self.shared.subscription_refusal.lock() = Some(reason.into());
    }

    /// Drop every live session with an error, as a server restart would.
    pub fn kick_all(&self, reason: &str) -> usize {
        let mut sessions = self.shared.sessions.lock();
        let mut kicked = 0;
        for tx in sessions.drain(..) {
            let event = ServerEvent::Disconnected {
                reason: Some(reason.to_string()),
            };
            if tx.send(event).is_ok() {
                kicked += 1;
            }
        }
        tracing::info!(kicked, reason, "loopback kicked sessions");
        kicked
    }

    /// Number of credentials the module has issued.
    pub fn issued_tokens(&self) -> usize {
        self.shared.tokens.lock().len()
    }
}

impl Transport for LoopbackModule {
    fn open(&self, config: &ConnectConfig, link: Link) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ClientError::ConnectFailed("loopback transport needs a tokio runtime".to_string())
        })?;
        runtime.spawn(run_session(self.shared.clone(), config.clone(), link));
        Ok(())
    }
}

impl Shared {
    /// Reuse the identity behind a known token, or mint a new pair.
    fn authenticate(&self, token: Option<&str>) -> (Identity, String) {
        let mut tokens = self.tokens.lock();
        if let Some(identity) = token.and_then(|t| tokens.get(t)) {
            return (*identity, token.unwrap_or_default().to_string());
        }
        if token.is_some() {
            tracing::debug!("unknown token presented, issuing a new identity");
        }
        let identity = Identity::random();
        let token = URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>());
        tokens.insert(token.clone(), identity);
        (identity, token)
    }

    fn answer(&self, queries: &[String]) -> std::result::Result<Vec<TableRows>, String> {
        let tables = self.tables.lock();
        let mut out: BTreeMap<&str, &Vec<serde_json::Value>> = BTreeMap::new();
        for query in queries {
            if query.trim().eq_ignore_ascii_case(ALL_TABLES_QUERY) {
                out.extend(tables.iter().map(|(name, rows)| (name.as_str(), rows)));
                continue;
            }
            let name = single_table(query).ok_or_else(|| format!("unsupported query `{query}`"))?;
            let rows = tables
                .get_key_value(name)
                .ok_or_else(|| format!("no such table `{name}`"))?;
            out.insert(rows.0.as_str(), rows.1);
        }
        Ok(out
            .into_iter()
            .map(|(name, rows)| TableRows {
                table_name: name.to_string(),
                rows: rows.clone(),
            })
            .collect())
    }
}

/// Table name of a `SELECT * FROM <table>` query.
fn single_table(query: &str) -> Option<&str> {
    let mut words = query.split_whitespace();
    let select = words.next()?;
    let star = words.next()?;
    let from = words.next()?;
    let table = words.next()?;
    let matches = select.eq_ignore_ascii_case("select")
        && star == "*"
        && from.eq_ignore_ascii_case("from")
        && words.next().is_none();
    matches.then_some(table.trim_end_matches(';'))
}

async fn run_session(shared: Arc<Shared>, config: ConnectConfig, link: Link) {
    let Link {
        mut commands,
        events,
    } = link;

    if config.module_name != shared.module_name {
        let _ = events.send(ServerEvent::ConnectFailed {
            reason: format!("module `{}` not found", config.module_name),
        });
        return;
    }
    if let Some(reason) = shared.refusal.lock().clone() {
        let _ = events.send(ServerEvent::ConnectFailed { reason });
        return;
    }

    let (identity, token) = shared.authenticate(config.token.as_deref());
    tracing::debug!(%identity, module = %shared.module_name, "loopback session accepted");
    if events
        .send(ServerEvent::IdentityToken { identity, token })
        .is_err()
    {
        return;
    }
    shared.sessions.lock().push(events.clone());

    while let Some(command) = commands.recv().await {
        match command {
            Command::Subscribe { query_id, queries } => {
                let refused = shared.subscription_refusal.lock().clone();
                let answer = match refused {
                    Some(reason) => Err(reason),
                    None => shared.answer(&queries),
                };
                let event = match answer {
                    Ok(tables) => ServerEvent::SubscribeApplied { query_id, tables },
                    Err(reason) => ServerEvent::SubscriptionError { query_id, reason },
                };
                if events.send(event).is_err() {
                    break;
                }
            }
            Command::Disconnect => {
                let _ = events.send(ServerEvent::Disconnected { reason: None });
                break;
            }
        }
    }

    shared.sessions.lock().retain(|tx| !tx.same_channel(&events));
    tracing::debug!(%identity, "loopback session ended");
}
