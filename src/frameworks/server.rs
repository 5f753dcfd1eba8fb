// Framework bootstrap for the matchmaking server runtime. Grounded on
// `game_server::frameworks::server`'s `init_runtime`/`build_state`/`run`
// composition-root shape.

use std::io::Result;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;

use crate::domain::ports::{Clock, Persistence, RealtimeEmitter};
use crate::frameworks::config::Config;
use crate::frameworks::persistence::memory::MemoryPersistence;
use crate::frameworks::persistence::postgres::{connect_pool, run_migrations, PostgresPersistence};
use crate::interface_adapters::routes;
use crate::interface_adapters::socket_hub::SocketHub;
use crate::interface_adapters::state::AppState;
use crate::use_cases::lobby_engine::LobbyEngine;
use crate::use_cases::lock_manager::LockManager;
use crate::use_cases::matchmaking_service::{MatchmakingConfig, MatchmakingService};
use crate::use_cases::notification_trigger::LoggingNotificationSink;
use crate::use_cases::queue_manager::QueueManager;

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

pub fn init_runtime() {
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

pub async fn run(listener: tokio::net::TcpListener, config: Config) -> Result<()> {
    let address = listener.local_addr()?;
    let state = build_state(config).await?;
    let app: Router = routes::app(state);

    tracing::info!(%address, "listening");

    axum::serve(listener, app).await.inspect_err(|e| {
        tracing::error!(error = %e, "server error");
    })
}

pub async fn run_with_config() -> Result<()> {
    init_runtime();

    let config = Config::from_env();
    let address = SocketAddr::from(([0, 0, 0, 0], config.http_port));

    let listener = tokio::net::TcpListener::bind(address).await.inspect_err(|e| {
        tracing::error!(%address, error = %e, "failed to bind");
    })?;

    run(listener, config).await
}

async fn build_state(config: Config) -> Result<Arc<AppState>> {
    let (persistence, lobbies, chats): (
        Arc<dyn Persistence>,
        Arc<dyn crate::domain::ports::LobbyStore>,
        Arc<dyn crate::domain::ports::ChatStore>,
    ) = match &config.database_url {
        Some(url) => {
            let pool = connect_pool(url)
                .await
                .map_err(|e| std::io::Error::other(format!("failed to connect to database: {e}")))?;
            run_migrations(&pool)
                .await
                .map_err(|e| std::io::Error::other(format!("failed to run migrations: {e}")))?;
            tracing::info!("connected to postgres persistence");
            let persistence = PostgresPersistence::new(pool);
            let lobbies = persistence.lobbies_arc();
            let chats = persistence.chats_arc();
            (Arc::new(persistence), lobbies, chats)
        }
        None => {
            tracing::info!("no DATABASE_URL set, using in-memory persistence");
            let persistence = MemoryPersistence::new();
            let lobbies = persistence.lobbies_arc();
            let chats = persistence.chats_arc();
            (Arc::new(persistence), lobbies, chats)
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let queue = Arc::new(QueueManager::new());
    let locks = Arc::new(LockManager::new());
    let lobby_engine = Arc::new(LobbyEngine::new(lobbies, chats, Arc::clone(&clock)));

    let socket_hub = SocketHub::new(Arc::clone(&persistence), Arc::clone(&lobby_engine), Arc::clone(&clock));
    socket_hub.spawn_lobby_event_bridge(&lobby_engine);

    let matchmaking = MatchmakingService::new(
        queue,
        locks,
        Arc::clone(&lobby_engine),
        Arc::clone(&persistence),
        Arc::new(LoggingNotificationSink),
        socket_hub.clone() as Arc<dyn RealtimeEmitter>,
        clock,
        MatchmakingConfig {
            process_interval: config.process_interval,
            min_group_size: config.min_group_size,
            lock_ttl: config.lock_ttl,
        },
    );
    matchmaking.spawn();

    Ok(Arc::new(AppState {
        matchmaking,
        lobby_engine,
        persistence,
        socket_hub,
        config,
    }))
}
