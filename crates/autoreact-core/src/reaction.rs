//! Reaction subscriber.
//!
//! A subscription is a background loop on the account's execution context
//! that reacts to every new message in one group. Reaction failures are
//! logged and dropped.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;

use crate::client::MessagingClient;
use crate::runtime::ExecutionContext;

/// What reaction-start does when the account already has a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionPolicy {
    /// Cancel the running subscription and start the new one.
    #[default]
    Replace,
    /// Refuse with `ReactionAlreadyRunning`.
    Reject,
}

impl FromStr for SubscriptionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "reject" => Ok(Self::Reject),
            other => Err(format!(
                "unknown subscription policy '{}', expected 'replace' or 'reject'",
                other
            )),
        }
    }
}

impl std::fmt::Display for SubscriptionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Replace => write!(f, "replace"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

/// A running reaction loop. Dropping it cancels the loop.
#[derive(Debug)]
pub struct Subscription {
    pub group_id: i64,
    pub emoji: String,
    started_at: DateTime<Utc>,
    abort: AbortHandle,
}

impl Subscription {
    /// Whether the loop is still running.
    pub fn is_active(&self) -> bool {
        !self.abort.is_finished()
    }

    pub fn cancel(&self) {
        self.abort.abort();
    }
}

impl std::fmt::Display for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "group {} with {} since {}",
            self.group_id,
            self.emoji,
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

/// Start reacting with `emoji` to new messages in `group_id`.
pub fn start_subscription(
    context: &ExecutionContext,
    client: Arc<dyn MessagingClient>,
    group_id: i64,
    emoji: String,
) -> Subscription {
    let abort = context.spawn(react_loop(client, group_id, emoji.clone()));
    let subscription = Subscription {
        group_id,
        emoji,
        started_at: Utc::now(),
        abort,
    };
    log::info!(
        "Reaction subscription started on {}: {}",
        context.name(),
        subscription
    );
    subscription
}

async fn react_loop(client: Arc<dyn MessagingClient>, group_id: i64, emoji: String) {
    loop {
        match client.next_message().await {
            Ok(Some(message)) if message.chat_id == group_id => {
                let client = Arc::clone(&client);
                let emoji = emoji.clone();
                // Each reaction is independent; a slow or failing one must not
                // hold up the next message.
                tokio::spawn(async move {
                    if let Err(e) = client
                        .send_reaction(message.chat_id, message.message_id, &emoji)
                        .await
                    {
                        log::debug!(
                            "Reaction to message {} in {} dropped: {}",
                            message.message_id,
                            message.chat_id,
                            e
                        );
                    }
                });
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                log::info!("Update stream closed, reactions for group {} ended", group_id);
                break;
            }
            Err(e) => {
                log::warn!("Update stream failed for group {}: {}", group_id, e);
                break;
            }
        }
    }
}
