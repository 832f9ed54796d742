//! HTTP bridge backend.
//!
//! Talks JSON to a sidecar process that hosts the real protocol library and
//! owns the session files. Every call is a blocking `ureq` request moved onto
//! the runtime's blocking pool.
//!
//! Routes, relative to the configured base URL:
//!
//! | Method | Path | Request | Response |
//! |---|---|---|---|
//! | POST | `/v1/sessions` | [`ConnectRequest`] | any |
//! | GET | `/v1/sessions/{phone}/authorized` | | [`AuthorizedResponse`] |
//! | POST | `/v1/sessions/{phone}/code` | `{}` | any |
//! | POST | `/v1/sessions/{phone}/sign-in` | [`SignInRequest`] | any |
//! | POST | `/v1/sessions/{phone}/password` | [`PasswordRequest`] | any |
//! | GET | `/v1/sessions/{phone}/updates?timeout=N` | | [`UpdatesResponse`] |
//! | POST | `/v1/sessions/{phone}/reactions` | [`ReactionRequest`] | any |
//! | DELETE | `/v1/sessions/{phone}` | | any |
//!
//! "any" means the body is ignored and may be empty. An updates request may
//! be held open for up to `timeout` seconds and answers with an empty list
//! when nothing arrived. A 404 on the session routes means the sidecar no
//! longer knows the phone; for updates this ends the stream.
//!
//! Failures come back as non-2xx responses carrying an [`ErrorResponse`] with
//! the library's RPC error name. See [`map_rpc_error`] for the names that get
//! a dedicated [`ClientError`].

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ClientConnector, ClientError, Credentials, MessagingClient, NewMessage};

/// How long the sidecar may hold an updates request open.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(25);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Map an RPC error name reported by the sidecar onto [`ClientError`].
pub fn map_rpc_error(name: &str) -> ClientError {
    match name {
        "PHONE_CODE_INVALID" | "PHONE_CODE_EMPTY" => ClientError::OtpInvalid,
        "PHONE_CODE_EXPIRED" => ClientError::OtpExpired,
        "SESSION_PASSWORD_NEEDED" => ClientError::TwoFactorRequired,
        "PASSWORD_HASH_INVALID" => ClientError::PasswordInvalid,
        other => ClientError::Library(other.to_string()),
    }
}

/// Body of `POST /v1/sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub phone: String,
    pub api_id: i32,
    pub api_hash: String,
    /// Where the sidecar persists the account's session.
    pub session_file: String,
}

/// Body of `POST /v1/sessions/{phone}/sign-in`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignInRequest {
    pub code: String,
}

/// Body of `POST /v1/sessions/{phone}/password`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

/// Body of `POST /v1/sessions/{phone}/reactions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionRequest {
    pub chat_id: i64,
    pub message_id: i32,
    pub emoji: String,
}

/// Response of `GET /v1/sessions/{phone}/authorized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedResponse {
    pub authorized: bool,
}

/// Response of `GET /v1/sessions/{phone}/updates`, oldest message first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatesResponse {
    #[serde(default)]
    pub messages: Vec<NewMessage>,
}

/// Body of any non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Connector for a sidecar reachable at `base_url`.
pub struct BridgeConnector {
    base_url: String,
    agent: ureq::Agent,
    poll_timeout: Duration,
}

impl BridgeConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_poll_timeout(base_url, DEFAULT_POLL_TIMEOUT)
    }

    pub fn with_poll_timeout(base_url: impl Into<String>, poll_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(poll_timeout + CONNECT_TIMEOUT)
            .build();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agent,
            poll_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl ClientConnector for BridgeConnector {
    fn build(
        &self,
        phone: &str,
        credentials: &Credentials,
        session_file: &Path,
    ) -> Result<Arc<dyn MessagingClient>, ClientError> {
        Ok(Arc::new(BridgeClient {
            sessions_url: format!("{}/v1/sessions", self.base_url),
            phone: phone.to_string(),
            credentials: credentials.clone(),
            session_file: session_file.to_path_buf(),
            agent: self.agent.clone(),
            poll_timeout: self.poll_timeout,
            buffer: Arc::new(Mutex::new(VecDeque::new())),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Client produced by [`BridgeConnector`].
pub struct BridgeClient {
    sessions_url: String,
    phone: String,
    credentials: Credentials,
    session_file: PathBuf,
    agent: ureq::Agent,
    poll_timeout: Duration,
    buffer: Arc<Mutex<VecDeque<NewMessage>>>,
    connected: AtomicBool,
    closed: AtomicBool,
}

enum Method {
    Get,
    Post(Value),
    Delete,
}

impl BridgeClient {
    fn session_url(&self, suffix: &str) -> String {
        if suffix.is_empty() {
            format!("{}/{}", self.sessions_url, self.phone)
        } else {
            format!("{}/{}/{}", self.sessions_url, self.phone, suffix)
        }
    }

    /// Perform one request on the blocking pool. `Ok(None)` means 404.
    async fn request(&self, method: Method, url: String) -> Result<Option<Value>, ClientError> {
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || send(&agent, method, &url, None))
            .await
            .map_err(|e| ClientError::Library(e.to_string()))?
    }

    async fn call(&self, method: Method, url: String) -> Result<Value, ClientError> {
        self.request(method, url)
            .await?
            .ok_or_else(|| ClientError::Library("Session not found on bridge".to_string()))
    }

    async fn post<T: Serialize>(&self, suffix: &str, body: &T) -> Result<(), ClientError> {
        let body = serde_json::to_value(body).map_err(|e| ClientError::Library(e.to_string()))?;
        self.call(Method::Post(body), self.session_url(suffix))
            .await
            .map(|_| ())
    }

    fn pop_buffered(&self) -> Option<NewMessage> {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }
}

fn send(
    agent: &ureq::Agent,
    method: Method,
    url: &str,
    query: Option<(&'static str, String)>,
) -> Result<Option<Value>, ClientError> {
    let request = match &method {
        Method::Get => agent.get(url),
        Method::Post(_) => agent.post(url),
        Method::Delete => agent.delete(url),
    };
    let request = match &query {
        Some((key, value)) => request.query(key, value),
        None => request,
    };
    let response = match method {
        Method::Post(body) => request.send_json(body),
        Method::Get | Method::Delete => request.call(),
    };

    match response {
        Ok(response) => {
            let body = response
                .into_string()
                .map_err(|e| ClientError::Library(e.to_string()))?;
            if body.trim().is_empty() {
                return Ok(Some(Value::Null));
            }
            serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| ClientError::Library(format!("Invalid bridge response: {}", e)))
        }
        Err(ureq::Error::Status(404, _)) => Ok(None),
        Err(ureq::Error::Status(code, response)) => match response.into_json::<ErrorResponse>() {
            Ok(body) => Err(map_rpc_error(&body.error)),
            Err(_) => Err(ClientError::Library(format!("Bridge returned HTTP {}", code))),
        },
        Err(e) => Err(ClientError::Library(e.to_string())),
    }
}

fn parse<T: DeserializeOwned>(value: Value) -> Result<T, ClientError> {
    serde_json::from_value(value)
        .map_err(|e| ClientError::Library(format!("Invalid bridge response: {}", e)))
}

/// Long-poll the updates route once and append what arrived to `buffer`.
/// Returns `Ok(false)` once the sidecar no longer knows the session.
fn poll_updates(
    agent: &ureq::Agent,
    url: &str,
    timeout: Duration,
    buffer: &Mutex<VecDeque<NewMessage>>,
) -> Result<bool, ClientError> {
    let value = match send(
        agent,
        Method::Get,
        url,
        Some(("timeout", timeout.as_secs().to_string())),
    )? {
        None => return Ok(false),
        Some(Value::Null) => return Ok(true),
        Some(value) => value,
    };
    let updates: UpdatesResponse = parse(value)?;
    buffer
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .extend(updates.messages);
    Ok(true)
}

#[async_trait]
impl MessagingClient for BridgeClient {
    async fn connect(&self) -> Result<(), ClientError> {
        let body = ConnectRequest {
            phone: self.phone.clone(),
            api_id: self.credentials.api_id,
            api_hash: self.credentials.api_hash.clone(),
            session_file: self.session_file.to_string_lossy().into_owned(),
        };
        let body = serde_json::to_value(&body).map_err(|e| ClientError::Library(e.to_string()))?;
        self.call(Method::Post(body), self.sessions_url.clone())
            .await?;
        self.connected.store(true, Ordering::SeqCst);
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_authorized(&self) -> Result<bool, ClientError> {
        let value = self
            .call(Method::Get, self.session_url("authorized"))
            .await?;
        parse::<AuthorizedResponse>(value).map(|body| body.authorized)
    }

    async fn send_code(&self, _phone: &str) -> Result<(), ClientError> {
        self.post("code", &json!({})).await
    }

    async fn sign_in_code(&self, _phone: &str, code: &str) -> Result<(), ClientError> {
        let body = SignInRequest {
            code: code.to_string(),
        };
        self.post("sign-in", &body).await
    }

    async fn sign_in_password(&self, password: &str) -> Result<(), ClientError> {
        let body = PasswordRequest {
            password: password.to_string(),
        };
        self.post("password", &body).await
    }

    async fn next_message(&self) -> Result<Option<NewMessage>, ClientError> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            if let Some(message) = self.pop_buffered() {
                return Ok(Some(message));
            }

            // The blocking task fills the buffer itself, so messages from a
            // poll outlive a caller that stopped waiting for it.
            let agent = self.agent.clone();
            let url = self.session_url("updates");
            let timeout = self.poll_timeout;
            let buffer = Arc::clone(&self.buffer);
            let open = tokio::task::spawn_blocking(move || {
                poll_updates(&agent, &url, timeout, &buffer)
            })
            .await
            .map_err(|e| ClientError::Library(e.to_string()))??;

            if !open {
                self.closed.store(true, Ordering::SeqCst);
                return Ok(None);
            }
        }
    }

    async fn send_reaction(
        &self,
        chat_id: i64,
        message_id: i32,
        emoji: &str,
    ) -> Result<(), ClientError> {
        let body = ReactionRequest {
            chat_id,
            message_id,
            emoji: emoji.to_string(),
        };
        self.post("reactions", &body).await
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        self.closed.store(true, Ordering::SeqCst);
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        // Already gone on the bridge side counts as disconnected.
        self.request(Method::Delete, self.session_url(""))
            .await
            .map(|_| ())
    }
}
