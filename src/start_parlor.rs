//! Startup helpers for the Parlor server and terminal client.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::core::config::ChatConfig;
use crate::provider::HttpCompletionProvider;
use crate::server::{self, AppState};
use crate::session::{FileDraftBuffer, IdentityProvider, SessionController, StaticIdentity};
use crate::store::SqliteConversationStore;

/// Boxed startup error.
pub type StartupError = Box<dyn std::error::Error + Send + Sync>;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` refines the filter; `default_level` is always enabled. Output
/// goes to stderr so it does not interleave with the client transcript.
pub fn init_tracing(default_level: Level) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.into()))
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Run the forwarding server (used by the `parlor-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
#[allow(clippy::cognitive_complexity)]
pub fn run_server() -> ExitCode {
    init_tracing(Level::INFO);
    tracing::info!("Starting Parlor server v{}", env!("CARGO_PKG_VERSION"));

    let config = ChatConfig::from_env();
    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {e}");
        return ExitCode::from(1);
    }
    tracing::info!("Upstream endpoint: {}", config.server.upstream_url);

    let state = match AppState::from_config(&config.server) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to create state: {e}");
            return ExitCode::from(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(server::run_server_with_shutdown(
        state,
        config.server.port,
        shutdown_signal(),
    )) {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }

    tracing::info!("Server stopped");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

/// Handles a terminal client needs to drive a session.
pub struct ClientSession {
    /// The session state machine.
    pub controller: Arc<SessionController>,
    /// Identity used to scope remote persistence; swap it to sign in or out.
    pub identity: Arc<StaticIdentity>,
}

/// Wire a session controller from configuration.
///
/// # Errors
/// Returns an error if the configuration is invalid, the HTTP client cannot
/// be built or the conversation database cannot be opened.
pub async fn open_session(config: &ChatConfig) -> Result<ClientSession, StartupError> {
    config.validate()?;

    let provider = Arc::new(HttpCompletionProvider::new(&config.client)?);
    let store = Arc::new(SqliteConversationStore::open(&config.storage).await?);
    let identity = Arc::new(StaticIdentity::new(config.defaults.user));
    let draft = Arc::new(FileDraftBuffer::from_config(&config.draft));
    tracing::info!(
        endpoint = %config.client.endpoint,
        database = %config.storage.sqlite_path.display(),
        draft = %config.draft.path.display(),
        "session opened"
    );

    let controller = Arc::new(SessionController::new(
        provider,
        store,
        Arc::clone(&identity) as Arc<dyn IdentityProvider>,
        draft,
    ));
    Ok(ClientSession {
        controller,
        identity,
    })
}
