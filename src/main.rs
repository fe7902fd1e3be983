use anyhow::{Context, Result};
use axum::{routing::get, Router};
use clap::{Parser, Subcommand};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod db;
mod models;
mod providers;
mod services;

use config::AppConfig;
use providers::ProviderRegistry;
use services::metadata::MetadataService;
use services::storage::Storage;

/// Community subtitles addon for Stremio
#[derive(Parser, Debug)]
#[command(name = "community-subs", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Create or upgrade the database schema
    InitDb,
    /// Create the standard user roles
    CreateRoles,
    /// Create an administrator account
    CreateAdmin {
        email: String,
        username: String,
        password: String,
    },
    /// Create the schema and download the anime id mapping
    InitAnimeDb,
}

/// Long-running jobs stopped together on shutdown
struct BackgroundTasks {
    handles: Vec<(&'static str, JoinHandle<()>)>,
    shutdown: CancellationToken,
}

impl BackgroundTasks {
    fn new() -> Self {
        Self {
            handles: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tracing::debug!("Starting background task {}", name);
        self.handles.push((name, tokio::spawn(future)));
    }

    async fn shutdown(self) {
        self.shutdown.cancel();

        for (name, handle) in self.handles {
            match tokio::time::timeout(Duration::from_secs(10), handle).await {
                Ok(Ok(())) => tracing::debug!("Background task {} stopped", name),
                Ok(Err(e)) => tracing::warn!("Background task {} panicked: {}", name, e),
                Err(_) => tracing::warn!("Background task {} did not stop in time", name),
            }
        }
    }
}

pub struct AppState {
    pub db: SqlitePool,
    pub config: AppConfig,
    pub providers: ProviderRegistry,
    pub metadata: MetadataService,
    pub storage: Storage,
}

async fn connect_db(config: &AppConfig) -> Result<SqlitePool> {
    let database_url = config.database_url();
    tracing::debug!("Database URL: {}", database_url);

    let connect_options = SqliteConnectOptions::from_str(&database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                use sqlx::Executor;
                // 16MB page cache per connection
                conn.execute("PRAGMA cache_size = -16000").await?;
                conn.execute("PRAGMA temp_store = MEMORY").await?;
                Ok(())
            })
        })
        .connect_with(connect_options)
        .await
        .with_context(|| format!("Failed to open database {}", database_url))?;

    tracing::info!("SQLite configured: WAL mode, 16MB cache (per connection)");
    Ok(pool)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "community_subs=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::load();
    config.paths.ensure_dirs().await?;

    let pool = connect_db(&config).await?;
    db::migrate(&pool).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(pool, config).await,
        Command::InitDb => {
            tracing::info!("Database schema is up to date");
            Ok(())
        }
        Command::CreateRoles => services::auth::ensure_roles(&pool).await,
        Command::CreateAdmin {
            email,
            username,
            password,
        } => {
            let user = services::auth::create_admin(&pool, &email, &username, &password).await?;
            println!("Created administrator {} ({})", user.username, user.id);
            Ok(())
        }
        Command::InitAnimeDb => {
            let updated =
                services::anime_mapping::update_mapping(&pool, &config.anime.mapping_url).await?;
            if updated {
                tracing::info!("Anime mapping imported");
            }
            Ok(())
        }
    }
}

async fn serve(pool: SqlitePool, config: AppConfig) -> Result<()> {
    config.log_config();
    services::auth::ensure_roles(&pool).await?;

    let storage = Storage::from_config(&config)?;
    let state = Arc::new(AppState {
        db: pool.clone(),
        providers: ProviderRegistry::with_defaults(&config),
        metadata: MetadataService::from_config(&config),
        storage,
        config: config.clone(),
    });
    tracing::info!(
        "Registered {} subtitle providers ({} need a login), {} storage",
        state.providers.all().len(),
        state.providers.by_auth_requirement(true).len(),
        state.storage.backend_name()
    );

    let mut bg_tasks = BackgroundTasks::new();
    let shutdown_token = bg_tasks.token();

    if config.anime.update_on_startup {
        let mapping_pool = pool.clone();
        let url = config.anime.mapping_url.clone();
        let cancel = shutdown_token.clone();
        bg_tasks.spawn("anime-mapping", async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Anime mapping update cancelled by shutdown");
                }
                result = services::anime_mapping::update_mapping(&mapping_pool, &url) => {
                    if let Err(e) = result {
                        tracing::warn!("Anime mapping update failed: {:#}", e);
                    }
                }
            }
        });
    }

    {
        let session_pool = pool.clone();
        let cancel = shutdown_token.clone();
        bg_tasks.spawn("session-cleanup", async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Session cleanup received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_secs(300)) => {
                        match services::auth::cleanup_expired_sessions(&session_pool).await {
                            Ok(removed) if removed > 0 => {
                                tracing::info!("Cleaned up {} expired sessions", removed);
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!("Session cleanup failed: {}", e),
                        }
                    }
                }
            }
        });
    }

    async fn root_handler() -> &'static str {
        "Stremio Community Subtitles"
    }

    let static_dir = config.paths.data_dir.join("static");
    let app = Router::new()
        .route("/", get(root_handler).head(root_handler))
        .route("/health", get(|| async { "OK" }))
        .merge(api::routes())
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let ip: std::net::IpAddr = config
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", config.bind_address))?;
    let addr = SocketAddr::new(ip, config.port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    bg_tasks.shutdown().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
