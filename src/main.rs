//! Vitalwatch
//!
//! Real-time backend for a wearable vital-sign monitor: classifies heart
//! rate, oxygen saturation and skin temperature against the wearer's
//! activity profile, detects a silent sensor, asks the wearer to confirm
//! suspected activity changes and keeps a bounded alert history.
//!
//! ⚠️ DISCLAIMER:
//! This system is NOT a medical diagnostic tool.

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod classifier;
mod config;
mod confirmation;
mod device;
mod error;
mod fake_sensor;
mod handlers;
mod history;
mod models;
mod monitor;
mod normalizer;
mod profiles;
mod session;
mod staleness;
mod state;
mod store;
mod validation;
mod websocket;

use crate::config::Settings;
use crate::fake_sensor::FakeWearable;
use crate::profiles::ThresholdTable;
use crate::session::Stop;
use crate::state::AppState;
use crate::store::{HistoryStore, JsonFileStore, MemoryStore};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env
    dotenv::dotenv().ok();

    // Logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vitalwatch=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();

    // Load configuration
    let settings = Settings::from_env().context("Failed to load configuration")?;
    let bind_address = format!("{}:{}", settings.server.host, settings.server.port);

    info!("Starting Vitalwatch backend");
    info!("Binding server to {}", bind_address);

    let table = match &settings.thresholds_file {
        Some(path) => ThresholdTable::from_file(path)
            .with_context(|| format!("Failed to load threshold table from {}", path))?,
        None => ThresholdTable::default(),
    };

    let store: Arc<dyn HistoryStore> = match &settings.storage.data_dir {
        Some(dir) => Arc::new(JsonFileStore::new(dir).context("Failed to open history store")?),
        None => {
            warn!("HISTORY_DATA_DIR not set, history is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    // Shared application state
    let app_state = Arc::new(RwLock::new(AppState::new(
        Arc::new(table),
        settings.monitor.clone(),
        store,
    )));

    // Simulated wearable, on the actix runtime
    if settings.simulator.enabled {
        let wearable = FakeWearable::new(&settings.simulator.user_id, settings.simulator.interval_ms)
            .context("Failed to initialize simulated wearable")?;
        let sensor_state = app_state.clone();
        actix_rt::spawn(async move {
            wearable.run(sensor_state).await;
        });
    }

    // HTTP + WebSocket server
    let server_state = app_state.clone();
    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            .configure(handlers::configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    // Persist every user's history before exiting
    let sessions = app_state.write().await.drain_sessions();
    for (user_id, session) in sessions {
        if session.send(Stop).await.is_err() {
            warn!(user_id = %user_id, "Monitor session already gone at shutdown");
        }
    }

    info!("Vitalwatch backend stopped");
    Ok(())
}
