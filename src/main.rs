use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use submit_queue::batch::HttpJobSource;
use submit_queue::config::Config;
use submit_queue::github::{OctocrabClient, RateLimiter, ResponseCache};
use submit_queue::health::SharedHealth;
use submit_queue::pr_view::ViewConfig;
use submit_queue::queue::SubmitQueue;
use submit_queue::server::{AppState, build_router};
use submit_queue::tracker::ChangeTrackers;
use submit_queue::worker::Engine;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "submit_queue=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let cache_bytes = usize::try_from(config.cache_bytes).unwrap_or(usize::MAX);
    let cache = match &config.cache_dir {
        Some(dir) => ResponseCache::on_disk(dir, cache_bytes)?,
        None => ResponseCache::in_memory(cache_bytes),
    };
    let limiter = Arc::new(RateLimiter::new(
        config.token_reserve,
        RateLimiter::DEFAULT_MARGIN,
    ));
    let client = OctocrabClient::from_token(config.github_token.clone(), config.repo.clone())?
        .with_limiter(limiter.clone())
        .with_cache(Arc::new(cache));
    let analytics = client.analytics().clone();
    let github = Arc::new(client);

    let queue = Arc::new(SubmitQueue::new());
    let health = SharedHealth::new(Utc::now());
    let trackers = ChangeTrackers::new();

    let mut engine = Engine::new(
        github,
        config.repo.clone(),
        Arc::new(config.queue.clone()),
        config.poll.clone(),
        ViewConfig::default(),
        queue.clone(),
        health.clone(),
        trackers.clone(),
    );
    if let Some(url) = &config.batch_url {
        engine = engine.with_batch_source(HttpJobSource::new(url.clone())?);
    }
    let engine = Arc::new(engine);

    let app_state = AppState::builder(
        config.repo.clone(),
        config.webhook_secret.clone(),
        trackers,
        queue,
        health,
    )
    .batch_status(engine.batch_status())
    .api_usage(analytics, limiter)
    .build();

    let cancel = CancellationToken::new();
    let engine_task = tokio::spawn(engine.run(cancel.clone()));

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, repo = %config.repo, "listening");

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        tracing::info!("shutting down");
        shutdown.cancel();
    });

    let server_cancel = cancel.clone();
    axum::serve(listener, build_router(app_state))
        .with_graceful_shutdown(async move { server_cancel.cancelled().await })
        .await?;

    cancel.cancel();
    engine_task.await?;
    Ok(())
}
