//! Account sessions.
//!
//! One [`AccountSession`] bundles everything the control API needs for one
//! phone number: the client, its execution context, the credentials it was
//! started with and the login and subscription state.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::client::{Credentials, MessagingClient};
use crate::error::ControlError;
use crate::reaction::{self, Subscription, SubscriptionPolicy};
use crate::runtime::ExecutionContext;

/// Where the account is in the login flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Connecting,
    CodeSent,
    PasswordRequired,
    Authorized,
}

pub struct AccountSession {
    phone: String,
    credentials: Credentials,
    client: Arc<dyn MessagingClient>,
    context: ExecutionContext,
    auth: Mutex<AuthState>,
    subscription: Mutex<Option<Subscription>>,
}

impl AccountSession {
    pub fn new(
        phone: impl Into<String>,
        credentials: Credentials,
        client: Arc<dyn MessagingClient>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            phone: phone.into(),
            credentials,
            client,
            context,
            auth: Mutex::new(AuthState::Connecting),
            subscription: Mutex::new(None),
        }
    }

    pub fn phone(&self) -> &str {
        &self.phone
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn client(&self) -> Arc<dyn MessagingClient> {
        Arc::clone(&self.client)
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn auth_state(&self) -> AuthState {
        *self.auth.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_auth_state(&self, state: AuthState) {
        let mut auth = self.auth.lock().unwrap_or_else(|e| e.into_inner());
        if *auth != state {
            log::info!("Account {} is now {:?}", self.phone, state);
            *auth = state;
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.auth_state() == AuthState::Authorized
    }

    /// Whether a reaction loop is currently running.
    pub fn has_active_subscription(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    /// Whether a subscription was started and its loop has since ended on its
    /// own, for example because the update stream failed.
    pub fn subscription_ended(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|sub| !sub.is_active())
    }

    /// Group and emoji of the running subscription, if any.
    pub fn subscription_target(&self) -> Option<(i64, String)> {
        self.subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .filter(|sub| sub.is_active())
            .map(|sub| (sub.group_id, sub.emoji.clone()))
    }

    /// Start reacting in `group_id`, applying `policy` to an existing loop.
    pub fn subscribe(
        &self,
        policy: SubscriptionPolicy,
        group_id: i64,
        emoji: String,
    ) -> Result<(), ControlError> {
        let mut current = self.subscription.lock().unwrap_or_else(|e| e.into_inner());

        let running = current.as_ref().is_some_and(Subscription::is_active);
        if running && policy == SubscriptionPolicy::Reject {
            return Err(ControlError::ReactionAlreadyRunning);
        }

        let subscription =
            reaction::start_subscription(&self.context, self.client(), group_id, emoji);
        if let Some(previous) = current.replace(subscription) {
            if running {
                log::info!(
                    "Replaced reaction subscription for {} ({})",
                    self.phone,
                    previous
                );
            }
        }
        Ok(())
    }

    /// Tear the session down: cancel the subscription, disconnect the client,
    /// stop the execution context and join its thread.
    ///
    /// Blocks the calling thread. The context is stopped even if the
    /// disconnect fails; the disconnect error is returned afterwards.
    pub fn close(&self, timeout: Duration, grace: Duration) -> Result<(), ControlError> {
        if let Some(subscription) = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            subscription.cancel();
        }

        let client = self.client();
        let disconnected = self
            .context
            .submit(async move { client.disconnect().await }, timeout)
            .map_err(ControlError::from)
            .and_then(|result| result.map_err(ControlError::from));

        if let Err(e) = self.context.shutdown(grace) {
            log::warn!("Failed to stop context for {}: {}", self.phone, e);
        }

        match &disconnected {
            Ok(()) => log::info!("Account {} disconnected", self.phone),
            Err(e) => log::warn!("Disconnect for {} failed: {}", self.phone, e),
        }
        disconnected
    }
}

impl std::fmt::Debug for AccountSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountSession")
            .field("phone", &self.phone)
            .field("credentials", &self.credentials)
            .field("auth", &self.auth_state())
            .field("context", &self.context)
            .finish()
    }
}
