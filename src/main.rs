use anyhow::{Context, Result};
use localised_records::config::{load_catalog, Config};
use localised_records::http::{router, LocaleLayerState};
use localised_records::i18n::validate_configuration;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored when the environment is set directly)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("localised_records=info".parse()?),
        )
        .init();

    info!("Starting locale negotiation service");

    // Load configuration from environment
    let config = Config::from_env()?;

    // Load and check the locale catalog
    info!("Loading locale catalog from {}", config.catalog_path);
    let registry = load_catalog(&config.catalog_path)?.into_registry();

    let report = validate_configuration(&registry, &[]);
    report.log();
    if report.has_errors() {
        anyhow::bail!(
            "Locale catalog has {} configuration error(s)",
            report.errors.len()
        );
    }
    info!("Loaded {} locales", registry.locales().len());

    let app = router(LocaleLayerState::new(Arc::new(registry), config.negotiation));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
