use anyhow::Context;
use resilient_store::config::AppConfig;
use resilient_store::context::RequestContext;
use resilient_store::metrics::MetricsService;
use resilient_store::store::NewUser;
use resilient_store::{init_app, init_tracing, App, LogFormat};
use std::env;
use std::process;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    let format = LogFormat::from_env_value(env::var("LOG_FORMAT").ok().as_deref());
    if let Err(e) = init_tracing(format) {
        eprintln!("{}", e);
    }

    // Optional config file; defaults apply without one
    let config = match env::args().nth(1) {
        Some(path) => match AppConfig::from_file(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load configuration from {}: {}", path, e);
                eprintln!("Usage: resilient-store [config_file]");
                process::exit(1);
            }
        },
        None => AppConfig::default(),
    };

    let metrics = match MetricsService::new() {
        Ok(m) => Some(m),
        Err(e) => {
            warn!(error = %e, "Metrics disabled");
            None
        }
    };

    let app = match init_app(&config).await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Startup error: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = smoke(&app).await {
        eprintln!("Smoke run failed: {:#}", e);
        process::exit(1);
    }

    if let Some(metrics) = metrics {
        info!(bytes = metrics.render().len(), "Rendered metrics snapshot");
    }
}

/// Exercise the main read and write paths once
async fn smoke(app: &App) -> anyhow::Result<()> {
    let ctx = RequestContext::background();

    let user = app
        .service
        .create_user(
            &ctx,
            NewUser {
                telegram_id: 42,
                username: "ada".to_string(),
                bio: "first programmer".to_string(),
            },
        )
        .await
        .context("creating user")?;

    let fetched = app
        .service
        .get_user(&ctx, user.id)
        .await
        .context("reading user back")?;
    app.service
        .add_preference(&ctx, fetched.id, 1)
        .await
        .context("adding preference")?;
    let preferences = app
        .service
        .get_preferences(&ctx, fetched.id)
        .await
        .context("reading preferences")?;
    let rated = app
        .service
        .update_rating(&ctx, fetched.id, 1.0)
        .await
        .context("updating rating")?;
    let stats = app
        .service
        .get_stats(&ctx, fetched.id)
        .await
        .context("reading stats")?;

    let health = app.service.health(&ctx).await;
    info!(
        user_id = fetched.id,
        preferences = preferences.len(),
        rating = rated.rating,
        active = stats.is_active,
        store_healthy = health.store,
        cache_healthy = health.cache,
        store_state = %app.monitor.store_state().await,
        cache_state = %app.monitor.cache_state().await,
        "Smoke run complete"
    );
    Ok(())
}
