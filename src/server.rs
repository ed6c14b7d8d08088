mod api;
pub mod util;

use std::{fs, sync::Arc};

use anyhow::Context;
use axum::{Router, routing::get};
use camino::{Utf8Path, Utf8PathBuf};
use diesel_async::{
    AsyncConnection, AsyncPgConnection,
    async_connection_wrapper::AsyncConnectionWrapper,
    pooled_connection::{
        AsyncDieselConnectionManager,
        deadpool::{Object, Pool},
    },
};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tokio::{net::TcpListener, signal};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    Layer, filter::Targets, fmt, layer::SubscriberExt, registry, util::SubscriberInitExt,
};

use crate::{config::Config, db, server::util::DevContainer};

pub async fn serve(mut config: Config, log_dir: Option<Utf8PathBuf>) -> anyhow::Result<()> {
    let _log_guard = initialize_logging(config.is_dev(), log_dir.as_deref())?;

    config.read_secrets()?;

    let app_state = AppState::new(&config).await?;
    let app = app(app_state);

    let address = config.app_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to listen on {address}"))?;

    info!("serving on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("failed to serve app")?;

    Ok(())
}

fn initialize_logging(dev: bool, log_dir: Option<&Utf8Path>) -> anyhow::Result<Option<WorkerGuard>> {
    use tracing::Level;

    if dev {
        let filter = Targets::new()
            .with_target("herdbook_backend", Level::DEBUG)
            .with_target("tower_http", Level::TRACE);

        registry().with(fmt::layer().pretty().with_filter(filter)).init();

        return Ok(None);
    }

    let filter = Targets::new().with_target("herdbook_backend", Level::INFO);

    let Some(log_dir) = log_dir else {
        registry().with(fmt::layer().json().with_filter(filter)).init();

        return Ok(None);
    };

    fs::create_dir_all(log_dir).with_context(|| format!("failed to create log dir {log_dir}"))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
        log_dir,
        "herdbook.log",
    ));

    registry()
        .with(fmt::layer().json().with_writer(writer).with_filter(filter))
        .init();

    Ok(Some(guard))
}

pub(crate) async fn run_migrations(db_conn: AsyncPgConnection) -> anyhow::Result<()> {
    const MIGRATIONS: EmbeddedMigrations = embed_migrations!("db/migrations");

    let mut db_conn: AsyncConnectionWrapper<AsyncPgConnection> = db_conn.into();

    tokio::task::spawn_blocking(move || {
        db_conn.run_pending_migrations(MIGRATIONS).unwrap();
    })
    .await
    .context("failed to run database migrations")?;

    Ok(())
}

#[derive(Clone)]
pub enum AppState {
    Dev {
        db_pool: Pool<AsyncPgConnection>,
        _container: Arc<DevContainer>,
    },
    Prod {
        db_pool: Pool<AsyncPgConnection>,
    },
}

impl AppState {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        if config.is_dev() {
            let container = DevContainer::new("herdbook-backend_dev", false)
                .await
                .context("failed to start dev database container")?;
            let db_url = container.db_url().await?;

            run_migrations(AsyncPgConnection::establish(&db_url).await?).await?;

            let db_pool = Pool::builder(AsyncDieselConnectionManager::new(db_url)).build()?;

            Ok(Self::Dev {
                db_pool,
                _container: Arc::new(container),
            })
        } else {
            let db_url = config.db_url();

            run_migrations(AsyncPgConnection::establish(&db_url).await?).await?;

            let db_pool = Pool::builder(AsyncDieselConnectionManager::new(db_url)).build()?;

            Ok(Self::Prod { db_pool })
        }
    }

    pub async fn db_conn(&self) -> db::error::Result<Object<AsyncPgConnection>> {
        let (Self::Dev { db_pool, .. } | Self::Prod { db_pool }) = self;

        Ok(db_pool.get().await?)
    }
}

fn app(app_state: AppState) -> Router {
    Router::new()
        .nest("/api", api::router())
        .layer(TraceLayer::new_for_http())
        .route("/health", get(async || ()))
        .with_state(app_state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
