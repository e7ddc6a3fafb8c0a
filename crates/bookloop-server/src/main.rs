mod config;

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use bookloop_api::{AppStateInner, Assistant, AssistantConfig};
use bookloop_core::IdentityResolver;
use bookloop_db::Database;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bookloop=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    if config.uses_dev_secret() {
        warn!("BOOKLOOP_JWT_SECRET not set, using the development secret");
    }

    // Init database
    let db = Database::open(&config.db_path)?;
    info!("Database ready at {}", config.db_path.display());

    let assistant = Assistant::new(AssistantConfig {
        api_key: config.openai_api_key.clone(),
        model: config.assistant_model.clone(),
        timeout: config.assistant_timeout,
        ..Default::default()
    })?;
    if config.openai_api_key.is_none() {
        info!("OPENAI_API_KEY not set, assistant answers from local rules");
    }

    let state = AppStateInner::new(
        Arc::new(db),
        IdentityResolver::new(config.jwt_secret.clone(), config.token_ttl_days),
        assistant,
        config.allow_anonymous_realtime,
    );
    if config.allow_anonymous_realtime {
        warn!("Anonymous realtime messages are enabled");
    }

    let mut app = bookloop_api::router(state);

    // Serve the web client for everything outside /api and /gateway
    if let Some(dist) = &config.client_dist {
        info!("Serving client from {}", dist.display());
        app = app.fallback_service(
            ServeDir::new(dist).not_found_service(ServeFile::new(dist.join("index.html"))),
        );
    }

    let app = app
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("BookLoop server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
