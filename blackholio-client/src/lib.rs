//! Arena lifecycle adapter for the Blackholio client.
//!
//! [`session::ArenaSession`] wires the client's frame loop to a
//! [`blackholio_sdk::DbConnection`]: it connects with a cached credential,
//! subscribes to every table once connected, and builds the arena border
//! from the `config` row once the subscription has synced.

pub mod arena;
pub mod config;
pub mod credentials;
pub mod error;
pub mod scene;
pub mod session;
pub mod signal;
