//! # API Route Configuration
//!
//! This module sets up all the HTTP routes for the API.

use actix_web::web;

use super::handlers;

/// Configure all API routes.
///
/// This function is called from main.rs to set up
/// all the endpoint routes.
///
/// ## Route Structure
///
/// ```text
/// /
/// ├── /health                        GET - Health check
/// ├── /ice                           GET - ICE servers for WebRTC clients
/// ├── /wallet/:user                  GET - Wallet query
/// ├── /market
/// │   ├── /listings                  GET - Open listings
/// │   ├── /listings                  POST - Create listing
/// │   ├── /listings/:id/cancel       POST - Cancel listing
/// │   ├── /listings/:id/fulfill      POST - Fulfill listing
/// │   └── /supply                    GET - Treasury supply
/// ├── /admin
/// │   └── /mint                      POST - Mint treasury tokens
/// ├── /payments
/// │   └── /webhook                   POST - Payment processor events
/// └── /billing
///     ├── /start                     POST - Start billing a call
///     └── /stop                      POST - Stop billing a call
/// ```
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check endpoint
        .route("/health", web::get().to(handlers::health_check))
        // ICE configuration for WebRTC clients
        .route("/ice", web::get().to(handlers::get_ice_servers))
        // Wallet query
        .route("/wallet/{user}", web::get().to(handlers::get_wallet))
        // Marketplace endpoints
        .service(
            web::scope("/market")
                .route("/listings", web::get().to(handlers::get_open_listings))
                .route("/listings", web::post().to(handlers::create_listing))
                .route(
                    "/listings/{id}/cancel",
                    web::post().to(handlers::cancel_listing),
                )
                .route(
                    "/listings/{id}/fulfill",
                    web::post().to(handlers::fulfill_listing),
                )
                .route("/supply", web::get().to(handlers::get_supply)),
        )
        // Admin endpoints
        .service(web::scope("/admin").route("/mint", web::post().to(handlers::mint_tokens)))
        // Payment processor webhook
        .service(
            web::scope("/payments")
                .route("/webhook", web::post().to(handlers::payment_webhook)),
        )
        // Billing control
        .service(
            web::scope("/billing")
                .route("/start", web::post().to(handlers::start_billing))
                .route("/stop", web::post().to(handlers::stop_billing)),
        );
}
