//! Gate Server
//!
//! HTTP front end for the login, second-factor and admin-mode flows.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gate_auth::{AuthContext, CookieConfig, MemorySessionStore};
use gate_core::config::AppConfig;
use gate_db::{Database, DatabaseConfig, PgUserStore};
use gate_models::{MemoryUserStore, UserStore};
use gate_notifications::{
    EmailAddress, EmailRenderer, LogEmailSender, NotificationDispatcher, QueuedNotifier,
};

mod error;
mod health;
mod routes;
mod state;

use health::{HealthChecker, HealthConfig};
use state::AppState;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    dotenvy::dotenv().ok();
    let config = load_config()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        two_factor_required = config.two_factor.required_globally,
        "Starting Gate"
    );

    let (users, database) = connect_user_store(&config).await;

    let (notifier, queue) = QueuedNotifier::channel();
    let renderer = EmailRenderer::new(
        EmailAddress::new(&config.email.from_address).with_name(&config.email.from_name),
    );
    let dispatcher = tokio::spawn(
        NotificationDispatcher::new(queue, renderer, Arc::new(LogEmailSender)).run(),
    );

    let cookie = if config.webauthn.origin.starts_with("https://") {
        CookieConfig::default()
    } else {
        CookieConfig::development()
    };
    let mut health_checker = HealthChecker::new(HealthConfig::default());
    if let Some(db) = database.clone() {
        health_checker = health_checker.with_database(db);
    }

    let addr = config.server_addr();
    let auth = AuthContext::new(
        config,
        users,
        Arc::new(MemorySessionStore::new()),
        Arc::new(notifier),
    );
    let sweeper = spawn_session_sweeper(auth.clone());
    let app = build_router(Arc::new(AppState::new(auth, cookie, health_checker)));

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // The router and its notifier handles are gone, so the queue drains
    sweeper.abort();
    match tokio::time::timeout(Duration::from_secs(5), dispatcher).await {
        Ok(Ok(delivered)) => debug!(delivered, "Notification queue drained"),
        Ok(Err(e)) => warn!(error = %e, "Notification dispatcher failed"),
        Err(_) => warn!("Notification queue did not drain in time"),
    }
    if let Some(db) = database {
        db.close().await;
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,gate_server=debug,gate_auth=debug,tower_http=debug".into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

/// `GATE_*` variables, then `config/gate.toml`, then `GATE__SECTION__KEY`
/// variables
fn load_config() -> anyhow::Result<AppConfig> {
    let base = AppConfig::from_env()?;
    let config: AppConfig = config::Config::builder()
        .add_source(config::Config::try_from(&base)?)
        .add_source(config::File::with_name("config/gate").required(false))
        .add_source(config::Environment::with_prefix("GATE").separator("__"))
        .build()?
        .try_deserialize()?;
    config.validate()?;
    Ok(config)
}

async fn connect_user_store(config: &AppConfig) -> (Arc<dyn UserStore>, Option<Database>) {
    if !config.has_database() {
        warn!("No database configured, using an empty in-memory user store");
        return (Arc::new(MemoryUserStore::new()), None);
    }

    match Database::connect(&DatabaseConfig::from(&config.database)).await {
        Ok(db) => {
            info!("Connected to database");
            (Arc::new(PgUserStore::new(db.pool().clone())), Some(db))
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to database, using an empty in-memory user store");
            (Arc::new(MemoryUserStore::new()), None)
        }
    }
}

fn spawn_session_sweeper(auth: AuthContext) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            match auth.sessions.cleanup_expired(auth.clock.now()) {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "Expired sessions removed"),
                Err(e) => warn!(error = %e, "Session sweep failed"),
            }
        }
    })
}

/// Build the application router
fn build_router(state: Arc<AppState>) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness));

    Router::new()
        .merge(health_routes)
        .merge(routes::auth_routes())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
