use axum::{routing::{get, post}, Router};
use nfe_entry_rust::{api, create_pool, run_migrations, AppConfig, CodeGenerator, NfeEntryService};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    let config = AppConfig::from_env()?;
    info!("Starting server with config: {:?}", config);

    let pool = create_pool(&config.database).await?;
    info!("Database pool created");

    if config.database.run_migrations {
        run_migrations(&pool).await?;
        info!("Migrations applied");
    }

    let entries = Arc::new(NfeEntryService::new(
        pool.clone(),
        config.posting.allocation_remainder,
    ));
    let codes = Arc::new(CodeGenerator::new(pool));

    let entry_routes = Router::new()
        .route("/api/nfe-entries", get(api::list_entries))
        .route("/api/nfe-entries/upload", post(api::upload_entry))
        .route("/api/nfe-entries/:id", get(api::get_entry))
        .route("/api/nfe-entries/:id/preview", post(api::preview_entry))
        .route("/api/nfe-entries/:id/confirm", post(api::confirm_entry))
        .route("/api/nfe-entries/:id/cancel", post(api::cancel_entry))
        .with_state(entries);

    let code_routes = Router::new()
        .route("/api/codes/ean-next", post(api::next_ean))
        .with_state(codes);

    let app = Router::new()
        .route("/health", get(api::health_check))
        .merge(entry_routes)
        .merge(code_routes)
        .layer(ServiceBuilder::new());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/nfe-entries/upload       - ingest an NF-e document");
    info!("  GET  /api/nfe-entries[/:id]        - list / inspect drafts");
    info!("  POST /api/nfe-entries/:id/preview  - match report");
    info!("  POST /api/nfe-entries/:id/confirm  - post purchase and stock");
    info!("  POST /api/nfe-entries/:id/cancel   - cancel draft");
    info!("  POST /api/codes/ean-next           - next internal EAN-13");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
