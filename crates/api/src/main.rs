use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Notify;

use bastion_api::app::{AppDependencies, build_app};
use bastion_api::app::routes::circuit_breaker::SimulatedUpstream;
use bastion_auth::{InMemoryUserRepository, TokenManager, UserRepository};
use bastion_infra::{AppConfig, connect_counter_store};
use bastion_infra::db::PostgresUserRepository;
use bastion_observability::HttpMetrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("loading configuration")?;
    bastion_observability::init(&config.logging.level, config.logging.format);

    let jwt_secret = config.jwt.secret.clone().unwrap_or_else(|| {
        tracing::warn!("JWT_SECRET not set; using insecure dev default");
        "dev-secret".to_string()
    });
    let tokens = Arc::new(TokenManager::new(
        jwt_secret.as_bytes(),
        config.jwt.access_ttl,
        config.jwt.refresh_ttl,
    ));

    let users: Arc<dyn UserRepository> = match &config.database {
        Some(db) => {
            let repo = PostgresUserRepository::connect(db)
                .await
                .context("connecting to postgres")?;
            repo.ensure_schema().await.context("creating users table")?;
            Arc::new(repo)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; users are kept in memory and lost on restart");
            Arc::new(InMemoryUserRepository::new())
        }
    };

    let counters = connect_counter_store(config.rate_limit.store, &config.redis_url)
        .await
        .with_context(|| format!("opening rate-limit store ({})", config.redis_url))?;

    let shutdown_timeout = config.server.shutdown_timeout;
    let bind_addr = config.server.bind_addr();

    let app = build_app(AppDependencies {
        config,
        tokens,
        users,
        counters,
        metrics: Arc::new(HttpMetrics::new()),
        upstream: Arc::new(SimulatedUpstream::default()),
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let signalled = Arc::new(Notify::new());
    let trigger = signalled.clone();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        trigger.notify_one();
    });
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        res = &mut server => res??,
        () = signalled.notified() => {
            tracing::info!(grace_secs = shutdown_timeout.as_secs(), "shutting down");
            match tokio::time::timeout(shutdown_timeout, &mut server).await {
                Ok(res) => res??,
                Err(_) => tracing::warn!("grace period elapsed with requests still in flight"),
            }
        }
    }

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
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
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
