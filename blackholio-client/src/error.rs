//! Errors surfaced by the session.

use blackholio_sdk::ClientError;

use crate::credentials::CredentialError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Client(#[from] ClientError),
    /// The subscription synced but the `config` row was not in it.
    #[error("config row {id} missing after subscription sync")]
    MissingConfigRow { id: u32 },
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error("session already started")]
    AlreadyStarted,
}
