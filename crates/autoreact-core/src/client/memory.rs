//! In-memory messaging backend.
//!
//! Accounts are scripted up front (expected code, optional password, whether
//! the stored session is already authorized). Tests inject messages through a
//! [`MemoryHandle`] and inspect the reactions that were sent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use super::{ClientConnector, ClientError, Credentials, MessagingClient, NewMessage};

/// Scripted behavior of one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryAccount {
    pub code: String,
    pub password: Option<String>,
    pub authorized: bool,
    pub code_expired: bool,
    pub connect_error: Option<String>,
    pub send_code_hangs: bool,
}

impl MemoryAccount {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            password: None,
            authorized: false,
            code_expired: false,
            connect_error: None,
            send_code_hangs: false,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// The stored session is already signed in.
    pub fn authorized(mut self) -> Self {
        self.authorized = true;
        self
    }

    /// The correct code is rejected as expired.
    pub fn code_expired(mut self) -> Self {
        self.code_expired = true;
        self
    }

    pub fn failing_connect(mut self, error: impl Into<String>) -> Self {
        self.connect_error = Some(error.into());
        self
    }

    /// Code requests never complete.
    pub fn hanging_send_code(mut self) -> Self {
        self.send_code_hangs = true;
        self
    }
}

/// A reaction recorded by the in-memory backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentReaction {
    pub chat_id: i64,
    pub message_id: i32,
    pub emoji: String,
}

#[derive(Debug, Default)]
struct AccountState {
    connected: bool,
    authorized: bool,
    code_requested: bool,
    password_pending: bool,
    clients_built: usize,
    disconnects: usize,
    failing_reactions: usize,
    reactions: Vec<SentReaction>,
    session_files: Vec<PathBuf>,
}

struct AccountEntry {
    account: MemoryAccount,
    state: Arc<Mutex<AccountState>>,
    inbox_tx: mpsc::UnboundedSender<NewMessage>,
    inbox_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<NewMessage>>>,
}

impl AccountEntry {
    fn new(account: MemoryAccount) -> Self {
        let authorized = account.authorized;
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            account,
            state: Arc::new(Mutex::new(AccountState {
                authorized,
                ..AccountState::default()
            })),
            inbox_tx,
            inbox_rx: Arc::new(tokio::sync::Mutex::new(inbox_rx)),
        }
    }

    fn handle(&self) -> MemoryHandle {
        MemoryHandle {
            state: Arc::clone(&self.state),
            inbox_tx: self.inbox_tx.clone(),
        }
    }
}

/// Connector for scripted in-memory accounts.
#[derive(Default)]
pub struct MemoryConnector {
    accounts: Mutex<HashMap<String, AccountEntry>>,
    default_account: Option<MemoryAccount>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unknown phone numbers behave like `account` instead of failing.
    pub fn with_default_account(account: MemoryAccount) -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            default_account: Some(account),
        }
    }

    /// Register a scripted account and return its test handle.
    pub fn add_account(&self, phone: impl Into<String>, account: MemoryAccount) -> MemoryHandle {
        let entry = AccountEntry::new(account);
        let handle = entry.handle();
        self.accounts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(phone.into(), entry);
        handle
    }

    /// Handle for an account that was registered or built earlier.
    pub fn account(&self, phone: &str) -> Option<MemoryHandle> {
        self.accounts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(phone)
            .map(AccountEntry::handle)
    }
}

impl ClientConnector for MemoryConnector {
    fn build(
        &self,
        phone: &str,
        _credentials: &Credentials,
        session_file: &Path,
    ) -> Result<Arc<dyn MessagingClient>, ClientError> {
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());

        if !accounts.contains_key(phone) {
            let account = self
                .default_account
                .clone()
                .ok_or_else(|| ClientError::Library("PHONE_NUMBER_INVALID".to_string()))?;
            accounts.insert(phone.to_string(), AccountEntry::new(account));
        }

        let entry = accounts
            .get(phone)
            .ok_or_else(|| ClientError::Library("PHONE_NUMBER_INVALID".to_string()))?;

        {
            let mut state = entry.state.lock().unwrap_or_else(|e| e.into_inner());
            state.clients_built += 1;
            state.session_files.push(session_file.to_path_buf());
        }

        let (closed_tx, _) = watch::channel(false);
        Ok(Arc::new(MemoryClient {
            account: entry.account.clone(),
            state: Arc::clone(&entry.state),
            inbox: Arc::clone(&entry.inbox_rx),
            opened: AtomicBool::new(false),
            closed: closed_tx,
        }))
    }
}

/// Test-side view of a scripted account.
#[derive(Clone)]
pub struct MemoryHandle {
    state: Arc<Mutex<AccountState>>,
    inbox_tx: mpsc::UnboundedSender<NewMessage>,
}

impl MemoryHandle {
    /// Deliver a new message to the account's update stream.
    pub fn push_message(&self, chat_id: i64, message_id: i32) {
        let _ = self.inbox_tx.send(NewMessage {
            chat_id,
            message_id,
        });
    }

    /// Make the next `count` reaction calls fail.
    pub fn fail_next_reactions(&self, count: usize) {
        self.lock().failing_reactions = count;
    }

    pub fn reactions(&self) -> Vec<SentReaction> {
        self.lock().reactions.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn is_authorized(&self) -> bool {
        self.lock().authorized
    }

    pub fn clients_built(&self) -> usize {
        self.lock().clients_built
    }

    pub fn disconnects(&self) -> usize {
        self.lock().disconnects
    }

    pub fn session_files(&self) -> Vec<PathBuf> {
        self.lock().session_files.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AccountState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Client produced by [`MemoryConnector`].
pub struct MemoryClient {
    account: MemoryAccount,
    state: Arc<Mutex<AccountState>>,
    inbox: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<NewMessage>>>,
    /// Set once this client's own connect succeeded.
    opened: AtomicBool,
    closed: watch::Sender<bool>,
}

impl MemoryClient {
    fn lock(&self) -> std::sync::MutexGuard<'_, AccountState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn require_connected(&self) -> Result<std::sync::MutexGuard<'_, AccountState>, ClientError> {
        let state = self.lock();
        if state.connected {
            Ok(state)
        } else {
            Err(ClientError::NotConnected)
        }
    }
}

#[async_trait]
impl MessagingClient for MemoryClient {
    async fn connect(&self) -> Result<(), ClientError> {
        if let Some(error) = &self.account.connect_error {
            return Err(ClientError::Library(error.clone()));
        }
        self.lock().connected = true;
        self.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_authorized(&self) -> Result<bool, ClientError> {
        Ok(self.require_connected()?.authorized)
    }

    async fn send_code(&self, _phone: &str) -> Result<(), ClientError> {
        if self.account.send_code_hangs {
            std::future::pending::<()>().await;
        }
        self.require_connected()?.code_requested = true;
        Ok(())
    }

    async fn sign_in_code(&self, _phone: &str, code: &str) -> Result<(), ClientError> {
        let mut state = self.require_connected()?;
        if !state.code_requested {
            return Err(ClientError::Library(
                "Login code was not requested".to_string(),
            ));
        }
        if code != self.account.code {
            return Err(ClientError::OtpInvalid);
        }
        if self.account.code_expired {
            return Err(ClientError::OtpExpired);
        }
        if self.account.password.is_some() {
            state.password_pending = true;
            return Err(ClientError::TwoFactorRequired);
        }
        state.authorized = true;
        Ok(())
    }

    async fn sign_in_password(&self, password: &str) -> Result<(), ClientError> {
        let mut state = self.require_connected()?;
        if !state.password_pending {
            return Err(ClientError::Library(
                "No password step is pending".to_string(),
            ));
        }
        if self.account.password.as_deref() != Some(password) {
            return Err(ClientError::PasswordInvalid);
        }
        state.password_pending = false;
        state.authorized = true;
        Ok(())
    }

    async fn next_message(&self) -> Result<Option<NewMessage>, ClientError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Ok(None);
        }

        let mut inbox = self.inbox.lock().await;
        tokio::select! {
            message = inbox.recv() => Ok(message),
            _ = closed.changed() => Ok(None),
        }
    }

    async fn send_reaction(
        &self,
        chat_id: i64,
        message_id: i32,
        emoji: &str,
    ) -> Result<(), ClientError> {
        let mut state = self.require_connected()?;
        if state.failing_reactions > 0 {
            state.failing_reactions -= 1;
            return Err(ClientError::Library("REACTION_INVALID".to_string()));
        }
        state.reactions.push(SentReaction {
            chat_id,
            message_id,
            emoji: emoji.to_string(),
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        if self.opened.swap(false, Ordering::SeqCst) {
            let mut state = self.lock();
            if state.connected {
                state.connected = false;
                state.disconnects += 1;
            }
        }
        self.closed.send_replace(true);
        Ok(())
    }
}
