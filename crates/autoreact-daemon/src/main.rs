//! autoreact-daemon
//!
//! Serves the control API over HTTP until Ctrl-C, then disconnects every
//! account and stops its execution context.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use autoreact_core::client::{BridgeConnector, ClientConnector, MemoryAccount, MemoryConnector};
use autoreact_core::config::{DEFAULT_SESSIONS_DIR, DEFAULT_SUBMIT_TIMEOUT};
use autoreact_core::paths::ensure_sessions_dir;
use autoreact_core::{ReactorService, ServiceConfig, SubscriptionPolicy};
use autoreact_http::SharedState;

/// Messaging backend used for account sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Scripted in-memory accounts, no network
    Memory,
    /// JSON bridge to a client-library sidecar
    Bridge,
}

/// autoreact daemon - HTTP-controlled auto reactions
#[derive(Parser, Debug)]
#[command(name = "autoreact-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port for the HTTP server
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Directory holding per-phone session files
    #[arg(long, default_value = DEFAULT_SESSIONS_DIR)]
    sessions_dir: PathBuf,

    /// Upper bound in seconds for any single client call
    #[arg(long, default_value_t = DEFAULT_SUBMIT_TIMEOUT.as_secs())]
    submit_timeout_secs: u64,

    /// What a second reaction start on the same account does (replace, reject)
    #[arg(long, default_value_t = SubscriptionPolicy::Replace)]
    subscription_policy: SubscriptionPolicy,

    /// Messaging backend
    #[arg(long, value_enum, default_value_t = Backend::Memory)]
    backend: Backend,

    /// Base URL of the client-library sidecar (bridge backend)
    #[arg(long, default_value = "http://127.0.0.1:8765")]
    bridge_url: String,

    /// Login code accepted by every account (memory backend)
    #[arg(long, default_value = "12345")]
    memory_code: String,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            sessions_dir: self.sessions_dir.clone(),
            submit_timeout: Duration::from_secs(self.submit_timeout_secs),
            subscription_policy: self.subscription_policy,
            ..ServiceConfig::default()
        }
    }

    fn connector(&self) -> Arc<dyn ClientConnector> {
        match self.backend {
            Backend::Memory => Arc::new(MemoryConnector::with_default_account(
                MemoryAccount::new(self.memory_code.clone()),
            )),
            Backend::Bridge => Arc::new(BridgeConnector::new(self.bridge_url.clone())),
        }
    }
}

fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), String> {
    let args = Args::parse();
    init_logging(&args.log_level);

    ensure_sessions_dir(&args.sessions_dir)?;

    let config = args.service_config();
    log::info!(
        "Using {:?} backend, sessions in {}, policy {}",
        args.backend,
        config.sessions_dir.display(),
        config.subscription_policy
    );

    let service = Arc::new(ReactorService::new(args.connector(), config));
    let state = Arc::new(SharedState::new(Arc::clone(&service)));
    let mut server = autoreact_http::start(state, &args.host, args.port)?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for Ctrl-C: {}", e))?;
    log::info!("Received Ctrl-C, shutting down");

    tokio::task::spawn_blocking(move || server.stop())
        .await
        .map_err(|e| format!("HTTP server shutdown failed: {}", e))?;
    service.shutdown().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    mod args {
        use super::*;

        #[test]
        fn defaults() {
            let args = Args::try_parse_from(["autoreact-daemon"]).unwrap();
            assert_eq!(args.host, "127.0.0.1");
            assert_eq!(args.port, 8080);
            assert_eq!(args.backend, Backend::Memory);
            assert_eq!(args.subscription_policy, SubscriptionPolicy::Replace);
            assert_eq!(args.service_config(), ServiceConfig::default());
        }

        #[test]
        fn flags_map_onto_service_config() {
            let args = Args::try_parse_from([
                "autoreact-daemon",
                "--sessions-dir",
                "/tmp/autoreact",
                "--submit-timeout-secs",
                "5",
                "--subscription-policy",
                "reject",
                "--backend",
                "bridge",
            ])
            .unwrap();

            let config = args.service_config();
            assert_eq!(config.sessions_dir, PathBuf::from("/tmp/autoreact"));
            assert_eq!(config.submit_timeout, Duration::from_secs(5));
            assert_eq!(config.subscription_policy, SubscriptionPolicy::Reject);
            assert_eq!(args.backend, Backend::Bridge);
        }

        #[test]
        fn rejects_unknown_policy() {
            let result =
                Args::try_parse_from(["autoreact-daemon", "--subscription-policy", "merge"]);
            assert!(result.is_err());
        }

        #[test]
        fn rejects_unknown_backend() {
            let result = Args::try_parse_from(["autoreact-daemon", "--backend", "telepathy"]);
            assert!(result.is_err());
        }
    }

    mod connector {
        use super::*;
        use autoreact_core::client::Credentials;
        use std::path::Path;

        #[test]
        fn memory_backend_accepts_any_phone() {
            let args = Args::try_parse_from(["autoreact-daemon"]).unwrap();
            let connector = args.connector();
            let credentials = Credentials {
                api_id: 1,
                api_hash: "h".to_string(),
            };
            assert!(connector
                .build("15550000", &credentials, Path::new("sessions/15550000.session"))
                .is_ok());
        }
    }
}
