//! # MinuteMarket Backend Service
//!
//! Entry point. Wires the shared store, the services and the
//! background tasks together and launches the HTTP/WebSocket server:
//!
//! - REST API for marketplace, wallet, billing control and the payment
//!   processor webhook
//! - WebSocket channel for call control and WebRTC signaling relay
//! - Background reservation sweeper reconciling orphaned reservations
//!
//! ## Quick Start
//!
//! 1. Copy `.env.example` to `.env` and adjust
//! 2. Start the server: `cargo run`

use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use minutemarket_backend::config::AppConfig;
use minutemarket_backend::services::{
    BillablePolicy, BillingScheduler, CallService, Marketplace, PaymentProcessor,
    ReservationSweeper, TokenLedger,
};
use minutemarket_backend::store::LedgerStore;
use minutemarket_backend::websocket::PresenceRegistry;
use minutemarket_backend::{api, websocket, AppState};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // =========================================
    // STEP 1: Initialize Logging
    // =========================================
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("starting MinuteMarket backend service");

    // =========================================
    // STEP 2: Load Configuration
    // =========================================
    dotenvy::dotenv().ok(); // It's okay if .env doesn't exist

    let config = AppConfig::from_env().expect("Failed to load configuration");

    info!(
        billing_day = %config.billing_day,
        timezone = %config.billing_timezone,
        force_billable = config.force_billable,
        "configuration loaded"
    );

    // =========================================
    // STEP 3: Initialize Store and Services
    // =========================================
    let store = LedgerStore::new();
    let ledger = TokenLedger::new(store.clone());
    let marketplace = Marketplace::new(store.clone(), &config);
    let payments = PaymentProcessor::new(store.clone(), &config);
    let calls = CallService::new(store.clone());
    let billing = BillingScheduler::new(
        ledger.clone(),
        calls.clone(),
        BillablePolicy::from_config(&config),
        Duration::from_secs(config.charge_interval_secs),
    );
    let presence = PresenceRegistry::new();

    info!("services initialized");

    // =========================================
    // STEP 4: Start Background Services
    // =========================================
    let sweeper = ReservationSweeper::new(store.clone(), ledger.clone(), &config);
    tokio::spawn(async move {
        sweeper.run().await;
    });

    info!("reservation sweeper started");

    // =========================================
    // STEP 5: Create Application State
    // =========================================
    let app_state = Arc::new(AppState {
        config: config.clone(),
        store,
        ledger,
        marketplace,
        payments,
        calls,
        billing,
        presence,
    });

    // =========================================
    // STEP 6: Start HTTP Server
    // =========================================
    let server_host = config.server_host.clone();
    let server_port = config.server_port;

    info!("starting HTTP server on {}:{}", server_host, server_port);

    HttpServer::new(move || {
        App::new()
            // Attach shared application state
            .app_data(web::Data::new(app_state.clone()))
            // The real-time channel is consumed by browser clients
            .wrap(Cors::permissive())
            // Add logging middleware
            .wrap(middleware::Logger::default())
            // Configure API routes
            .configure(api::configure_routes)
            // Configure WebSocket routes
            .configure(websocket::configure_routes)
    })
    .bind(format!("{}:{}", server_host, server_port))?
    .run()
    .await
}
