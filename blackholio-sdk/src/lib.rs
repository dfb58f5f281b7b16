//! Client SDK for the Blackholio realtime database module.
//!
//! The SDK owns the client side of the connection contract: the connection
//! handle and its callbacks, subscription requests, and the client-side row
//! cache. The wire itself sits behind [`transport::Transport`]; the
//! [`loopback`] module provides an in-process service for development and
//! tests.

pub mod cache;
pub mod client;
pub mod error;
pub mod event;
pub mod identity;
pub mod loopback;
pub mod subscription;
pub mod transport;

pub use cache::{CONFIG_ROW_ID, Config, RemoteTables, TableCache, TableRow};
pub use client::{ConnectConfig, DbConnection, DbConnectionBuilder};
pub use error::ClientError;
pub use identity::Identity;
pub use subscription::{SubscriptionBuilder, SubscriptionEventContext, SubscriptionHandle};
