//! Control operations behind the HTTP surface.
//!
//! [`ReactorService`] is framework-agnostic: each method validates its
//! parameters, looks the account up in the registry, runs one future on the
//! account's execution context and returns a [`Reply`] or a [`ControlError`].

use std::str::FromStr;
use std::sync::Arc;

use crate::client::{ClientConnector, ClientError, Credentials};
use crate::config::ServiceConfig;
use crate::error::{status, ControlError, Reply, Routes};
use crate::paths::validate_phone;
use crate::registry::SessionRegistry;
use crate::runtime::{ExecutionContext, RuntimeError};
use crate::session::{AccountSession, AuthState};

enum LoginStart {
    CodeSent,
    Authorized,
}

/// Parse a numeric path parameter.
fn parse_numeric<T: FromStr>(name: &'static str, value: &str) -> Result<T, ControlError> {
    value
        .trim()
        .parse()
        .map_err(|_| ControlError::InvalidNumericParameter {
            name,
            value: value.to_string(),
        })
}

/// Collapse a bridged client call into one error type.
fn flatten<T>(result: Result<Result<T, ClientError>, RuntimeError>) -> Result<T, ControlError> {
    result
        .map_err(ControlError::from)
        .and_then(|inner| inner.map_err(ControlError::from))
}

pub struct ReactorService {
    registry: SessionRegistry,
    connector: Arc<dyn ClientConnector>,
    config: ServiceConfig,
}

impl ReactorService {
    pub fn new(connector: Arc<dyn ClientConnector>, config: ServiceConfig) -> Self {
        Self {
            registry: SessionRegistry::new(),
            connector,
            config,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Index of available routes.
    pub fn home(&self) -> Reply {
        Reply::status(status::HOME).with_routes(Routes::default())
    }

    /// Create a session for `phone` and request a login code.
    pub async fn login_start(
        &self,
        api_id: &str,
        api_hash: &str,
        phone: &str,
    ) -> Result<Reply, ControlError> {
        let api_id: i32 = parse_numeric("api_id", api_id)?;
        validate_phone(phone)?;

        let credentials = Credentials {
            api_id,
            api_hash: api_hash.to_string(),
        };
        let session_file = self.config.session_file(phone);

        if self.registry.contains(phone) {
            return Err(ControlError::AlreadyLoggedIn);
        }

        let client = self.connector.build(phone, &credentials, &session_file)?;
        let name = format!("autoreact-{}", phone);
        let context = tokio::task::spawn_blocking(move || ExecutionContext::create(name))
            .await
            .map_err(|e| ControlError::Runtime(e.to_string()))??;

        let session = match self
            .registry
            .insert_if_absent(AccountSession::new(phone, credentials, client, context))
        {
            Ok(session) => session,
            Err(spare) => {
                // Lost a race with a concurrent login for the same phone.
                self.discard(spare).await;
                return Err(ControlError::AlreadyLoggedIn);
            }
        };

        log::info!(
            "Starting login for {} with api_id {}",
            phone,
            session.credentials().api_id
        );

        let client = session.client();
        let code_phone = phone.to_string();
        let outcome = session
            .context()
            .run(
                async move {
                    client.connect().await?;
                    if client.is_authorized().await? {
                        return Ok(LoginStart::Authorized);
                    }
                    client.send_code(&code_phone).await?;
                    Ok::<_, ClientError>(LoginStart::CodeSent)
                },
                self.config.submit_timeout,
            )
            .await;

        match flatten(outcome) {
            Ok(LoginStart::Authorized) => {
                session.set_auth_state(AuthState::Authorized);
                Ok(Reply::status(status::ALREADY_LOGGED))
            }
            Ok(LoginStart::CodeSent) => {
                session.set_auth_state(AuthState::CodeSent);
                Ok(Reply::status(status::OTP_SENT))
            }
            Err(e) => {
                log::warn!("Login start for {} failed: {}", phone, e);
                self.discard(session).await;
                Err(e)
            }
        }
    }

    /// Submit the login code.
    pub async fn login_otp(&self, phone: &str, otp: &str) -> Result<Reply, ControlError> {
        let session = self
            .registry
            .get(phone)
            .ok_or(ControlError::LoginNotStarted)?;

        let client = session.client();
        let code_phone = phone.to_string();
        let code = otp.to_string();
        let outcome = session
            .context()
            .run(
                async move { client.sign_in_code(&code_phone, &code).await },
                self.config.submit_timeout,
            )
            .await;

        match flatten(outcome) {
            Ok(()) => {
                session.set_auth_state(AuthState::Authorized);
                Ok(Reply::status(status::LOGIN_SUCCESS))
            }
            Err(ControlError::TwoFactorRequired) => {
                session.set_auth_state(AuthState::PasswordRequired);
                Err(ControlError::TwoFactorRequired)
            }
            Err(e) => Err(e),
        }
    }

    /// Submit the two-step verification password.
    pub async fn login_password(&self, phone: &str, password: &str) -> Result<Reply, ControlError> {
        let session = self
            .registry
            .get(phone)
            .ok_or(ControlError::LoginNotStarted)?;

        let client = session.client();
        let password = password.to_string();
        let outcome = session
            .context()
            .run(
                async move { client.sign_in_password(&password).await },
                self.config.submit_timeout,
            )
            .await;

        flatten(outcome)?;
        session.set_auth_state(AuthState::Authorized);
        Ok(Reply::status(status::LOGIN_SUCCESS))
    }

    /// Start reacting with `emoji` to new messages in `group_id`.
    pub async fn react_start(
        &self,
        phone: &str,
        group_id: &str,
        emoji: &str,
    ) -> Result<Reply, ControlError> {
        let session = self.registry.get(phone).ok_or(ControlError::LoginRequired)?;
        let group_id: i64 = parse_numeric("group_id", group_id)?;

        if !session.is_authorized() {
            return Err(ControlError::LoginRequired);
        }
        if !session.context().is_alive() {
            return Err(ControlError::ContextClosed);
        }

        session.subscribe(self.config.subscription_policy, group_id, emoji.to_string())?;
        Ok(Reply::status(status::REACTION_STARTED))
    }

    /// Disconnect and forget the session for `phone`.
    pub async fn react_stop(&self, phone: &str) -> Result<Reply, ControlError> {
        let session = self.registry.remove(phone).ok_or(ControlError::NotRunning)?;
        log::info!("Stopping session for {}", phone);

        self.close(session).await?;
        Ok(Reply::status(status::STOPPED))
    }

    /// Whether a session exists for `phone`.
    ///
    /// A session whose reaction loop has ended on its own is still running,
    /// but the reply carries a message saying so.
    pub fn react_status(&self, phone: &str) -> Reply {
        match self.registry.get(phone) {
            Some(session) if session.subscription_ended() => Reply::status(status::RUNNING)
                .with_phone(phone)
                .with_message(status::REACTIONS_ENDED),
            Some(_) => Reply::status(status::RUNNING).with_phone(phone),
            None => Reply::status(status::OFFLINE),
        }
    }

    /// Tear down every session. Used on process shutdown.
    pub async fn shutdown(&self) {
        let sessions = self.registry.drain();
        if sessions.is_empty() {
            return;
        }

        log::info!("Closing {} account session(s)", sessions.len());
        for session in sessions {
            let phone = session.phone().to_string();
            if let Err(e) = self.close(session).await {
                log::warn!("Shutdown of {} reported: {}", phone, e);
            }
        }
    }

    /// Tear down a session built by `login_start` that is not kept.
    async fn discard(&self, session: Arc<AccountSession>) {
        self.registry.remove_if_same(&session);
        if let Err(e) = self.close(session).await {
            log::debug!("Cleanup after failed login reported: {}", e);
        }
    }

    /// Run the blocking teardown off the async runtime.
    async fn close(&self, session: Arc<AccountSession>) -> Result<(), ControlError> {
        let timeout = self.config.submit_timeout;
        let grace = self.config.shutdown_grace;
        tokio::task::spawn_blocking(move || session.close(timeout, grace))
            .await
            .map_err(|e| ControlError::Runtime(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::MemoryHandle;
    use crate::client::{MemoryAccount, MemoryConnector};
    use crate::reaction::SubscriptionPolicy;
    use std::time::Duration;
    use tempfile::TempDir;

    const PHONE: &str = "15550000";

    struct Fixture {
        service: ReactorService,
        connector: Arc<MemoryConnector>,
        _dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_policy(SubscriptionPolicy::Replace)
        }

        fn with_policy(policy: SubscriptionPolicy) -> Self {
            Self::build(policy, Duration::from_secs(5))
        }

        fn with_submit_timeout(timeout: Duration) -> Self {
            Self::build(SubscriptionPolicy::Replace, timeout)
        }

        fn build(policy: SubscriptionPolicy, submit_timeout: Duration) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let connector = Arc::new(MemoryConnector::new());
            let config = ServiceConfig {
                sessions_dir: dir.path().to_path_buf(),
                submit_timeout,
                shutdown_grace: Duration::from_millis(100),
                subscription_policy: policy,
            };
            let service = ReactorService::new(connector.clone(), config);
            Self {
                service,
                connector,
                _dir: dir,
            }
        }

        fn account(&self, account: MemoryAccount) -> MemoryHandle {
            self.connector.add_account(PHONE, account)
        }

        async fn logged_in(&self) -> MemoryHandle {
            let handle = self.account(MemoryAccount::new("54321"));
            self.service.login_start("123", "abc", PHONE).await.unwrap();
            self.service.login_otp(PHONE, "54321").await.unwrap();
            handle
        }
    }

    fn reply_of(result: Result<Reply, ControlError>) -> Reply {
        result.unwrap_or_else(ControlError::into_reply)
    }

    mod login_start {
        use super::*;

        #[tokio::test]
        async fn sends_code_for_new_session() {
            let fx = Fixture::new();
            let handle = fx.account(MemoryAccount::new("54321"));

            let reply = fx.service.login_start("123", "abc", PHONE).await.unwrap();

            assert_eq!(reply, Reply::status("otp_sent"));
            assert!(handle.is_connected());
            assert_eq!(
                fx.service.registry().get(PHONE).unwrap().auth_state(),
                AuthState::CodeSent
            );
            assert_eq!(
                handle.session_files(),
                vec![fx.service.config().session_file(PHONE)]
            );
            fx.service.shutdown().await;
        }

        #[tokio::test]
        async fn second_call_reuses_session() {
            let fx = Fixture::new();
            let handle = fx.account(MemoryAccount::new("54321"));

            fx.service.login_start("123", "abc", PHONE).await.unwrap();
            let reply = reply_of(fx.service.login_start("123", "abc", PHONE).await);

            assert_eq!(
                reply,
                Reply::status("already_logged").with_message("Session exists ✅")
            );
            assert_eq!(handle.clients_built(), 1);
            assert_eq!(fx.service.registry().len(), 1);
            fx.service.shutdown().await;
        }

        #[tokio::test]
        async fn authorized_session_file_skips_code() {
            let fx = Fixture::new();
            fx.account(MemoryAccount::new("54321").authorized());

            let reply = fx.service.login_start("123", "abc", PHONE).await.unwrap();

            assert_eq!(reply, Reply::status("already_logged"));
            assert!(fx.service.registry().get(PHONE).unwrap().is_authorized());
            fx.service.shutdown().await;
        }

        #[tokio::test]
        async fn rejects_non_numeric_api_id() {
            let fx = Fixture::new();
            let err = fx.service.login_start("abc", "abc", PHONE).await.unwrap_err();
            assert!(matches!(
                err,
                ControlError::InvalidNumericParameter { name: "api_id", .. }
            ));
            assert!(fx.service.registry().is_empty());
        }

        #[tokio::test]
        async fn rejects_path_like_phone() {
            let fx = Fixture::new();
            let err = fx.service.login_start("1", "abc", "..").await.unwrap_err();
            assert!(matches!(err, ControlError::InvalidPhone(_)));
        }

        #[tokio::test]
        async fn connect_failure_rolls_back() {
            let fx = Fixture::new();
            fx.account(MemoryAccount::new("1").failing_connect("Connection refused"));

            let reply = reply_of(fx.service.login_start("123", "abc", PHONE).await);

            assert_eq!(reply, Reply::error("Connection refused"));
            assert!(fx.service.registry().is_empty());
            assert_eq!(fx.service.react_status(PHONE), Reply::status("offline ❌"));
        }

        #[tokio::test]
        async fn hanging_call_times_out_and_rolls_back() {
            let fx = Fixture::with_submit_timeout(Duration::from_millis(200));
            let handle = fx.account(MemoryAccount::new("54321").hanging_send_code());

            let reply = reply_of(fx.service.login_start("123", "abc", PHONE).await);

            assert_eq!(reply, Reply::error("Operation timed out"));
            assert!(fx.service.registry().is_empty());
            assert!(!handle.is_connected());
            assert_eq!(fx.service.react_status(PHONE), Reply::status("offline ❌"));
        }

        #[tokio::test]
        async fn concurrent_starts_keep_one_session() {
            let fx = Fixture::new();
            let handle = fx.account(MemoryAccount::new("54321"));

            let (first, second) = tokio::join!(
                fx.service.login_start("123", "abc", PHONE),
                fx.service.login_start("123", "abc", PHONE)
            );
            let mut replies = vec![reply_of(first), reply_of(second)];
            replies.sort_by_key(|reply| reply.status.clone());

            assert_eq!(
                replies,
                vec![
                    Reply::status("already_logged").with_message("Session exists ✅"),
                    Reply::status("otp_sent"),
                ]
            );
            assert_eq!(fx.service.registry().len(), 1);
            assert!(handle.is_connected());
            fx.service.shutdown().await;
        }

        #[tokio::test]
        async fn unknown_account_error_is_passed_through() {
            let fx = Fixture::new();
            let reply = reply_of(fx.service.login_start("123", "abc", PHONE).await);
            assert_eq!(reply, Reply::error("PHONE_NUMBER_INVALID"));
            assert!(fx.service.registry().is_empty());
        }
    }

    mod login_otp {
        use super::*;

        #[tokio::test]
        async fn requires_started_login() {
            let fx = Fixture::new();
            let reply = reply_of(fx.service.login_otp(PHONE, "1").await);
            assert_eq!(reply, Reply::error("Start login first"));
        }

        #[tokio::test]
        async fn correct_code_logs_in() {
            let fx = Fixture::new();
            let handle = fx.account(MemoryAccount::new("54321"));
            fx.service.login_start("123", "abc", PHONE).await.unwrap();

            let reply = fx.service.login_otp(PHONE, "54321").await.unwrap();

            assert_eq!(reply, Reply::status("login_success ✅"));
            assert!(handle.is_authorized());
            fx.service.shutdown().await;
        }

        #[tokio::test]
        async fn wrong_code_is_invalid() {
            let fx = Fixture::new();
            fx.account(MemoryAccount::new("54321"));
            fx.service.login_start("123", "abc", PHONE).await.unwrap();

            let reply = reply_of(fx.service.login_otp(PHONE, "11111").await);
            assert_eq!(reply, Reply::status("otp_invalid ❌"));
            fx.service.shutdown().await;
        }

        #[tokio::test]
        async fn expired_code_is_reported() {
            let fx = Fixture::new();
            fx.account(MemoryAccount::new("54321").code_expired());
            fx.service.login_start("123", "abc", PHONE).await.unwrap();

            let reply = reply_of(fx.service.login_otp(PHONE, "54321").await);
            assert_eq!(reply, Reply::status("otp_expired ❌"));
            fx.service.shutdown().await;
        }

        #[tokio::test]
        async fn two_factor_account_asks_for_password() {
            let fx = Fixture::new();
            fx.account(MemoryAccount::new("54321").with_password("pw"));
            fx.service.login_start("123", "abc", PHONE).await.unwrap();

            let reply = reply_of(fx.service.login_otp(PHONE, "54321").await);

            assert_eq!(reply, Reply::status("2fa_required"));
            assert_eq!(
                fx.service.registry().get(PHONE).unwrap().auth_state(),
                AuthState::PasswordRequired
            );
            fx.service.shutdown().await;
        }
    }

    mod login_password {
        use super::*;

        #[tokio::test]
        async fn requires_started_login() {
            let fx = Fixture::new();
            let reply = reply_of(fx.service.login_password(PHONE, "pw").await);
            assert_eq!(reply, Reply::error("Start login first"));
        }

        #[tokio::test]
        async fn correct_password_logs_in() {
            let fx = Fixture::new();
            fx.account(MemoryAccount::new("54321").with_password("pw"));
            fx.service.login_start("123", "abc", PHONE).await.unwrap();
            let _ = fx.service.login_otp(PHONE, "54321").await;

            let reply = fx.service.login_password(PHONE, "pw").await.unwrap();

            assert_eq!(reply, Reply::status("login_success ✅"));
            assert!(fx.service.registry().get(PHONE).unwrap().is_authorized());
            fx.service.shutdown().await;
        }

        #[tokio::test]
        async fn wrong_password_is_an_error() {
            let fx = Fixture::new();
            fx.account(MemoryAccount::new("54321").with_password("pw"));
            fx.service.login_start("123", "abc", PHONE).await.unwrap();
            let _ = fx.service.login_otp(PHONE, "54321").await;

            let reply = reply_of(fx.service.login_password(PHONE, "nope").await);

            assert_eq!(reply, Reply::error("The password is invalid"));
            assert!(!fx.service.registry().get(PHONE).unwrap().is_authorized());
            fx.service.shutdown().await;
        }
    }

    mod react {
        use super::*;

        async fn wait_for_reactions(handle: &MemoryHandle, count: usize) -> usize {
            for _ in 0..200 {
                if handle.reactions().len() >= count {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            handle.reactions().len()
        }

        #[tokio::test]
        async fn start_requires_session() {
            let fx = Fixture::new();
            let reply = reply_of(fx.service.react_start(PHONE, "-1", "👍").await);
            assert_eq!(reply, Reply::error("Login required"));
        }

        #[tokio::test]
        async fn start_requires_authorization() {
            let fx = Fixture::new();
            fx.account(MemoryAccount::new("54321"));
            fx.service.login_start("123", "abc", PHONE).await.unwrap();

            let reply = reply_of(fx.service.react_start(PHONE, "-1", "👍").await);
            assert_eq!(reply, Reply::error("Login required"));
            fx.service.shutdown().await;
        }

        #[tokio::test]
        async fn start_rejects_non_numeric_group() {
            let fx = Fixture::new();
            fx.logged_in().await;

            let err = fx.service.react_start(PHONE, "group", "👍").await.unwrap_err();
            assert!(matches!(
                err,
                ControlError::InvalidNumericParameter { name: "group_id", .. }
            ));
            fx.service.shutdown().await;
        }

        #[tokio::test]
        async fn started_subscription_reacts() {
            let fx = Fixture::new();
            let handle = fx.logged_in().await;

            let reply = fx.service.react_start(PHONE, "-1001234", "👍").await.unwrap();
            assert_eq!(reply, Reply::status("reaction_started 🔥"));

            handle.push_message(-1001234, 42);
            assert_eq!(wait_for_reactions(&handle, 1).await, 1);
            assert_eq!(handle.reactions()[0].emoji, "👍");
            fx.service.shutdown().await;
        }

        #[tokio::test]
        async fn reject_policy_refuses_second_start() {
            let fx = Fixture::with_policy(SubscriptionPolicy::Reject);
            fx.logged_in().await;

            fx.service.react_start(PHONE, "-1", "👍").await.unwrap();
            let reply = reply_of(fx.service.react_start(PHONE, "-1", "👍").await);

            assert_eq!(reply, Reply::error("Reaction already running"));
            fx.service.shutdown().await;
        }

        #[tokio::test]
        async fn replace_policy_swaps_target() {
            let fx = Fixture::new();
            fx.logged_in().await;

            fx.service.react_start(PHONE, "-1", "👍").await.unwrap();
            fx.service.react_start(PHONE, "-2", "🔥").await.unwrap();

            let session = fx.service.registry().get(PHONE).unwrap();
            assert_eq!(session.subscription_target(), Some((-2, "🔥".to_string())));
            fx.service.shutdown().await;
        }

        #[tokio::test]
        async fn stop_disconnects_and_purges() {
            let fx = Fixture::new();
            let handle = fx.logged_in().await;
            fx.service.react_start(PHONE, "-1", "👍").await.unwrap();
            let session = fx.service.registry().get(PHONE).unwrap();

            let reply = fx.service.react_stop(PHONE).await.unwrap();

            assert_eq!(reply, Reply::status("stopped ✅"));
            assert!(!handle.is_connected());
            assert!(!session.context().is_alive());
            assert_eq!(fx.service.react_status(PHONE), Reply::status("offline ❌"));
        }

        #[tokio::test]
        async fn second_stop_is_not_running() {
            let fx = Fixture::new();
            fx.logged_in().await;

            fx.service.react_stop(PHONE).await.unwrap();
            let reply = reply_of(fx.service.react_stop(PHONE).await);
            assert_eq!(reply, Reply::error("Not running"));
        }

        #[tokio::test]
        async fn login_after_stop_builds_fresh_session() {
            let fx = Fixture::new();
            let handle = fx.logged_in().await;
            fx.service.react_stop(PHONE).await.unwrap();

            // The account is now authorized in its stored session.
            let reply = fx.service.login_start("123", "abc", PHONE).await.unwrap();
            assert_eq!(reply, Reply::status("already_logged"));
            assert_eq!(handle.clients_built(), 2);
            fx.service.shutdown().await;
        }
    }

    mod reporting {
        use super::*;

        #[tokio::test]
        async fn ended_subscription_is_reported() {
            let fx = Fixture::new();
            fx.logged_in().await;
            fx.service.react_start(PHONE, "-1", "👍").await.unwrap();

            let session = fx.service.registry().get(PHONE).unwrap();
            let client = session.client();
            session
                .context()
                .run(async move { client.disconnect().await }, Duration::from_secs(5))
                .await
                .unwrap()
                .unwrap();
            for _ in 0..200 {
                if session.subscription_ended() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }

            assert_eq!(
                fx.service.react_status(PHONE),
                Reply::status("running 🔥")
                    .with_phone(PHONE)
                    .with_message("Reactions ended, update stream closed")
            );
            fx.service.shutdown().await;
        }

        #[tokio::test]
        async fn unknown_phone_is_offline() {
            let fx = Fixture::new();
            assert_eq!(fx.service.react_status("999"), Reply::status("offline ❌"));
        }

        #[tokio::test]
        async fn registered_phone_is_running() {
            let fx = Fixture::new();
            fx.logged_in().await;
            assert_eq!(
                fx.service.react_status(PHONE),
                Reply::status("running 🔥").with_phone(PHONE)
            );
            fx.service.shutdown().await;
        }

        #[test]
        fn home_lists_routes() {
            let fx = Fixture::new();
            let reply = fx.service.home();
            assert_eq!(reply.status.as_deref(), Some("running ✅"));
            assert_eq!(
                reply.routes.unwrap().login_start,
                "/login/start/API_ID/API_HASH/PHONE"
            );
        }
    }

    mod shutdown {
        use super::*;

        #[tokio::test]
        async fn closes_every_session() {
            let fx = Fixture::new();
            let handle = fx.logged_in().await;

            fx.service.shutdown().await;

            assert!(fx.service.registry().is_empty());
            assert!(!handle.is_connected());
        }
    }
}
