//! # Voter Registry Server Main Driver
//!
//! ## Purpose
//! Main entry point for the voter registry search server. Orchestrates
//! initialization of all system components and starts the web server.
//!
//! ## Input/Output Specification
//! - **Input**: Configuration files, command line arguments, environment variables
//! - **Output**: Running web server with registry API endpoints
//! - **Initialization**: Opens the record store, wires engines, health checks
//!
//! ## Key Features
//! - Graceful startup and shutdown
//! - Component health monitoring
//! - Configuration validation
//! - Structured logging
//! - Signal handling for clean shutdown
//!
//! ## Architecture Flow
//! 1. Parse command line arguments and load configuration
//! 2. Initialize logging and tracing
//! 3. Open the record store and wire the engines
//! 4. Verify component health
//! 5. Start web API server
//! 6. Handle shutdown signals gracefully

use clap::{Arg, Command};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voter_registry_search::{
    api::ApiServer,
    audit::StatusAuditTrail,
    category::CategoryTree,
    config::Config,
    errors::{RegistryError, Result},
    rate_limit::RateLimiter,
    search::RelevanceSearchEngine,
    storage::RecordStore,
    suggest::SuggestionEngine,
    AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let matches = Command::new("voter-registry-server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Search and filter engine for hierarchically organized voter registries")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Server port")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("check-health")
                .long("check-health")
                .help("Run health checks and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    // Load configuration
    let config_path = matches.get_one::<String>("config").unwrap();
    let mut config = Config::from_file(config_path)?;

    // Override port if specified
    if let Some(port) = matches.get_one::<u16>("port") {
        config.server.port = *port;
    }

    config.validate()?;
    let config = Arc::new(config);

    // Initialize logging
    init_logging(&config)?;

    info!("Starting Voter Registry Search v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {}", config_path);

    // Initialize application components
    let app_state = initialize_components(config.clone())?;

    // Run health checks and exit if requested
    if matches.get_flag("check-health") {
        app_state.store.health_check()?;
        info!("All health checks passed!");
        return Ok(());
    }

    // Start the API server
    let server = ApiServer::new(app_state.clone());
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Server error: {}", e);
        }
    });

    info!(
        "Voter Registry Search started successfully on {}:{}",
        config.server.host, config.server.port
    );

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = server_handle => {
            warn!("Server stopped unexpectedly");
        }
    }

    // Graceful shutdown
    shutdown_components(&app_state)?;
    info!("Voter Registry Search shut down successfully");

    Ok(())
}

/// Initialize logging and tracing
fn init_logging(config: &Config) -> Result<()> {
    let log_level: tracing::Level =
        config
            .logging
            .level
            .parse()
            .map_err(|_| RegistryError::Config {
                message: format!("Invalid log level: {}", config.logging.level),
            })?;

    let filter = tracing_subscriber::filter::LevelFilter::from_level(log_level);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true);

    if config.logging.json_format {
        tracing_subscriber::registry()
            .with(fmt_layer.json().with_filter(filter))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt_layer.with_filter(filter))
            .init();
    }

    info!("Logging initialized with level: {}", config.logging.level);
    Ok(())
}

/// Initialize all application components
fn initialize_components(config: Arc<Config>) -> Result<AppState> {
    info!("Initializing application components...");

    info!("Opening record store at {:?}", config.storage.db_path);
    let store = Arc::new(RecordStore::new(config.storage.clone())?);

    info!("Initializing search engine...");
    let search_engine = Arc::new(RelevanceSearchEngine::new(
        store.clone(),
        config.search.clone(),
    ));

    info!("Initializing suggestion engine...");
    let suggestion_engine = Arc::new(SuggestionEngine::new(
        store.clone(),
        config.suggestions.clone(),
    ));

    let category_tree = Arc::new(CategoryTree::new(store.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
    let audit_trail = Arc::new(StatusAuditTrail::new(
        store.clone(),
        config.search.page_size,
    ));

    // Verify component health before accepting traffic
    store.health_check()?;
    info!("✓ Record store is healthy");

    let app_state = AppState {
        config,
        store,
        search_engine,
        suggestion_engine,
        category_tree,
        rate_limiter,
        audit_trail,
    };

    info!("All components initialized successfully");
    Ok(app_state)
}

/// Gracefully shutdown all components
fn shutdown_components(app_state: &AppState) -> Result<()> {
    info!("Shutting down components...");

    app_state.store.flush()?;

    info!("All components shut down successfully");
    Ok(())
}
