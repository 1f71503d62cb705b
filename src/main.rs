use actix_web::{web, App, HttpServer};
use actix_web_prom::PrometheusMetricsBuilder;
use signal_relay_rs::api;
use signal_relay_rs::config::Settings;
use signal_relay_rs::credentials::CredentialStore;
use signal_relay_rs::dispatch::Dispatcher;
use signal_relay_rs::lifecycle::LifecycleManager;
use signal_relay_rs::registry::ConnectionRegistry;
use signal_relay_rs::security::AuthGate;
use signal_relay_rs::telemetry;
use signal_relay_rs::ws_server;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load environment variables before reading settings
    dotenv::dotenv().ok();

    let settings = Settings::new()?;
    telemetry::init_tracing(&settings.logging)?;

    info!("╔═══════════════════════════════════════════════════════════════╗");
    info!("║                    SIGNAL RELAY RS                            ║");
    info!("║          Control Plane → Subscriber Signal Fan-out            ║");
    info!("╚═══════════════════════════════════════════════════════════════╝");

    // Initialize Core Components
    let credentials = Arc::new(CredentialStore::from_settings(&settings.auth));
    let gate = AuthGate::new(credentials);
    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Dispatcher::new(registry.clone(), gate.clone());
    let manager = Arc::new(LifecycleManager::new(
        gate,
        registry.clone(),
        settings.keepalive.clone(),
    ));

    info!("✅ Core components initialized");

    // --- Subscriber WebSocket Task ---
    let listener = ws_server::bind(&settings.server.ws_bind()).await?;
    let ws_handle = tokio::spawn(ws_server::serve(listener, manager.clone()));

    // --- Control-plane API ---
    let prometheus = PrometheusMetricsBuilder::new("relay_http")
        .endpoint("/metrics")
        .registry(prometheus::default_registry().clone())
        .build()?;

    let bind_address = settings.server.http_bind();
    info!("🚀 Starting API Server on {}", bind_address);

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(prometheus.clone())
            .wrap(cors)
            .app_data(web::Data::new(dispatcher.clone()))
            .configure(api::config)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    // The HTTP server returns on Ctrl-C; take the subscriber side down with it.
    info!("🛑 Shutting down, closing {} subscriber sessions", registry.count());
    ws_handle.abort();
    manager.shutdown();

    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while registry.count() > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!("⚠️ {} sessions still open after shutdown grace period", registry.count());
    }

    Ok(())
}
