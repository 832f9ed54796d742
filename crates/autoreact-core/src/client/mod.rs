//! Account client facade.
//!
//! The messaging protocol itself lives behind [`MessagingClient`]. A
//! [`ClientConnector`] builds one client per account session.
//!
//! Backends:
//! - [`memory`]: scripted accounts for tests and dry runs
//! - [`bridge`]: JSON over HTTP to a sidecar hosting the protocol library

pub mod bridge;
pub mod memory;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use bridge::BridgeConnector;
pub use memory::{MemoryAccount, MemoryConnector};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("The confirmation code is invalid")]
    OtpInvalid,

    #[error("The confirmation code has expired")]
    OtpExpired,

    #[error("Two-step verification password required")]
    TwoFactorRequired,

    #[error("The password is invalid")]
    PasswordInvalid,

    #[error("Client is not connected")]
    NotConnected,

    /// Error text reported by the protocol library, passed through verbatim.
    #[error("{0}")]
    Library(String),
}

/// Application credentials registered with the messaging platform.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub api_id: i32,
    pub api_hash: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_id", &self.api_id)
            .field("api_hash", &"<redacted>")
            .finish()
    }
}

/// A new message observed on the account's update stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub chat_id: i64,
    pub message_id: i32,
}

/// One connection to the messaging platform for one phone number.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Open the connection. Calling it on a connected client is a no-op.
    async fn connect(&self) -> Result<(), ClientError>;

    /// Whether the persisted session is already signed in.
    async fn is_authorized(&self) -> Result<bool, ClientError>;

    /// Ask the platform to deliver a login code to `phone`.
    async fn send_code(&self, phone: &str) -> Result<(), ClientError>;

    /// Complete login with the code received by `phone`.
    async fn sign_in_code(&self, phone: &str, code: &str) -> Result<(), ClientError>;

    /// Complete login with the two-step verification password.
    async fn sign_in_password(&self, password: &str) -> Result<(), ClientError>;

    /// Wait for the next new message. `None` once the connection is gone.
    async fn next_message(&self) -> Result<Option<NewMessage>, ClientError>;

    async fn send_reaction(
        &self,
        chat_id: i64,
        message_id: i32,
        emoji: &str,
    ) -> Result<(), ClientError>;

    /// Release the connection. Calling it twice is a no-op.
    async fn disconnect(&self) -> Result<(), ClientError>;
}

/// Builds clients for account sessions.
///
/// `build` runs while the session registry is locked, so it must not touch
/// the network. Connecting happens later through [`MessagingClient::connect`].
pub trait ClientConnector: Send + Sync {
    fn build(
        &self,
        phone: &str,
        credentials: &Credentials,
        session_file: &Path,
    ) -> Result<Arc<dyn MessagingClient>, ClientError>;
}
