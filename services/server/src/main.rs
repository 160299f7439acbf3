use std::env;
use std::sync::Arc;

use chat_core::push::PushGateway;
use server::config::Config;
use server::push::{NoopPush, ProviderPush};
use server::repo::PgRepository;
use server::state::AppState;
use server::{db, scheduler, sweeper};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let config = Config::from_env().expect("invalid configuration");

    info!("connecting to database...");
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("failed to connect to Postgres");
    db::run_migrations(&pool)
        .await
        .expect("failed to run database migrations");
    info!("migrations applied");

    let repo = Arc::new(PgRepository::new(pool));
    let push: Arc<dyn PushGateway> = match &config.push_endpoint {
        Some(endpoint) => {
            info!(endpoint = %endpoint, "push relay enabled");
            Arc::new(ProviderPush::new(
                endpoint.clone(),
                config.push_api_key.clone(),
                repo.clone(),
            ))
        }
        None => {
            info!("push relay disabled (PUSH_ENDPOINT unset)");
            Arc::new(NoopPush)
        }
    };

    let bind_addr = config.bind_addr.clone();
    let drain_window = config.drain_window;
    let state = AppState::new(repo.clone(), push, config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(scheduler::run(
        state.pipeline.clone(),
        repo.clone(),
        state.config.scheduler_interval,
        shutdown_rx.clone(),
    ));
    tokio::spawn(sweeper::run(
        repo,
        state.config.sweeper_interval,
        shutdown_rx,
    ));

    let hub = state.hub.clone();
    let router = server::build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %bind_addr, "server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Stop the background loops, then drain live connections within
            // the configured window before axum closes the listener.
            let _ = shutdown_tx.send(true);
            hub.shutdown(drain_window).await;
        })
        .await
        .expect("server error");
    info!("server shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
