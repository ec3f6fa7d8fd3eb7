use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use lume_match::config::{LoggingSettings, Settings, StoreBackend};
use lume_match::core::MatchCoordinator;
use lume_match::routes::{self, matches::AppState};
use lume_match::services::{
    LocalAdvisoryLocks, MemoryProfileStore, PostgresAdvisoryLocks, PostgresProfileStore,
};
use std::sync::Arc;
use tracing::{info, error};
use tracing_subscriber::EnvFilter;

/// Environment (LOG_LEVEL, LOG_FORMAT, RUST_LOG) wins over the config file
fn init_logging(logging: &LoggingSettings) {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| logging.level.clone());
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| logging.format.clone());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    if log_format == "pretty" {
        subscriber.pretty().init();
    } else {
        subscriber.json().init();
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();

    // Logging is configured from the settings, so a load failure goes to stderr
    let settings = Settings::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    init_logging(&settings.logging);

    info!("Starting Lume Match service...");

    let default_policy = settings.matching.policy().map_err(|e| {
        error!("Invalid matching configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;
    let options = settings.matching.attempt_options();

    let coordinator = match settings.store.backend {
        StoreBackend::Postgres => {
            let store = PostgresProfileStore::from_settings(
                &settings.database.url,
                settings.database.max_connections,
                settings.database.min_connections,
                settings.database.acquire_timeout_secs,
                settings.database.idle_timeout_secs,
            )
            .await
            .map_err(|e| {
                error!("Failed to connect to PostgreSQL: {}", e);
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, e.to_string())
            })?;

            let max_connections = settings.database.max_connections.unwrap_or(10);
            let advisory = PostgresAdvisoryLocks::connect(
                &settings.database.url,
                settings.database.advisory_max_connections.unwrap_or(max_connections),
            )
            .await
            .map_err(|e| {
                error!("Failed to open advisory lock pool: {}", e);
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, e.to_string())
            })?;
            info!(
                "PostgreSQL profile store initialized (max: {} connections)",
                max_connections
            );
            MatchCoordinator::new(Arc::new(store)).with_advisory_locks(Arc::new(advisory))
        }
        StoreBackend::Memory => {
            info!("In-memory profile store initialized; state is lost on restart");
            MatchCoordinator::new(Arc::new(MemoryProfileStore::new()))
                .with_advisory_locks(Arc::new(LocalAdvisoryLocks::new()))
        }
    }
    .with_options(options);

    info!(
        "Coordinator ready: default policy {}, retry limit {}, lock timeout {:?}",
        default_policy, options.retry_limit, options.lock_timeout
    );

    let app_state = AppState {
        coordinator,
        default_policy,
    };

    let server = settings.server;
    info!("Listening on {}:{} ({} store)", server.host, server.port, settings.store.backend.as_str());

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(routes::json_config())
            .app_data(routes::path_config())
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(routes::configure_routes)
    })
    .workers(server.workers.unwrap_or(4))
    .bind((server.host, server.port))?
    .run()
    .await
}
