use std::sync::Arc;

use anyhow::Context;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tf_lifecycle::clock::SystemClock;
use tf_lifecycle::config::Config;
use tf_lifecycle::engine::{Engine, EngineSettings, Stores};
use tf_lifecycle::provider::OctocrabProvider;
use tf_lifecycle::server::{AppState, build_router};
use tf_lifecycle::store::FileStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tf_lifecycle=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("loading configuration")?;

    let store = Arc::new(
        FileStore::open(&config.state_dir)
            .with_context(|| format!("opening state dir {}", config.state_dir.display()))?,
    );
    let provider =
        OctocrabProvider::from_token(config.github_token.clone()).context("building GitHub client")?;
    let engine = Engine::new(
        Stores::shared(store),
        provider,
        Arc::new(SystemClock),
        Box::new(StdRng::from_entropy()),
        EngineSettings::from_config(&config),
    )
    .context("opening event stream")?;

    let app = build_router(AppState::new(Arc::new(engine)));

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    info!(addr = %config.bind, state_dir = %config.state_dir.display(), "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("serving HTTP")?;

    info!("Shut down");
    Ok(())
}

/// Cancels `shutdown` on Ctrl-C or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for Ctrl-C");
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
                warn!(error = %e, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown requested");
    shutdown.cancel();
}
