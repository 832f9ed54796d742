//! Service configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::reaction::SubscriptionPolicy;
use crate::runtime::DEFAULT_SHUTDOWN_GRACE;

pub const DEFAULT_SESSIONS_DIR: &str = "sessions";
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared by every account session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Directory holding the per-phone session files.
    pub sessions_dir: PathBuf,
    /// Upper bound for any single call bridged onto an account context.
    pub submit_timeout: Duration,
    /// How long a stopping context may finish its background tasks.
    pub shutdown_grace: Duration,
    /// What a second reaction-start on the same account does.
    pub subscription_policy: SubscriptionPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            sessions_dir: PathBuf::from(DEFAULT_SESSIONS_DIR),
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            subscription_policy: SubscriptionPolicy::default(),
        }
    }
}

impl ServiceConfig {
    /// Session file owned by the client backend for `phone`.
    pub fn session_file(&self, phone: &str) -> PathBuf {
        self.sessions_dir.join(format!("{}.session", phone))
    }
}
