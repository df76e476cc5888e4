use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::CorsLayer;

use onboarding_engine::analytics::{AnalyticsSink, TracingSink};
use onboarding_engine::config::{EngineConfig, ServerConfig};
use onboarding_engine::milestones::MilestoneCatalog;
use onboarding_engine::paths::{PathSource, StaticPathSource};
use onboarding_engine::routes::api_routes;
use onboarding_engine::store::{Database, LibSqlBackend};
use onboarding_engine::OnboardingEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let server = ServerConfig::from_env();
    let config = EngineConfig::from_env();

    eprintln!("Onboarding Engine v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", server.db_path.display());
    eprintln!("   Cache: {}", config.cache_dir.display());
    eprintln!("   API: http://0.0.0.0:{}/api", server.port);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&server.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", server.db_path.display()))?,
    );

    // ── Content ──────────────────────────────────────────────────────────
    let paths: Arc<dyn PathSource> = match &server.paths_file {
        Some(file) => Arc::new(
            StaticPathSource::from_file(file)
                .with_context(|| format!("failed to load path templates from {}", file.display()))?,
        ),
        None => Arc::new(StaticPathSource::builtin()),
    };
    let catalog = match &server.catalog_file {
        Some(file) => MilestoneCatalog::from_file(file)
            .with_context(|| format!("failed to load milestone catalog from {}", file.display()))?,
        None => MilestoneCatalog::builtin(),
    };
    eprintln!(
        "   Paths: {}, milestones: {}, badges: {}",
        paths.templates().len(),
        catalog.milestones.len(),
        catalog.badges.len()
    );

    let analytics: Arc<dyn AnalyticsSink> = Arc::new(TracingSink);
    let engine = OnboardingEngine::new(db, paths, catalog, analytics, config);

    let app = api_routes(engine).layer(CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", server.port))
        .await
        .with_context(|| format!("failed to bind port {}", server.port))?;
    tracing::info!(port = server.port, "Onboarding API server started");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
