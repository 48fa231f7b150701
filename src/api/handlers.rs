//! # API Request Handlers
//!
//! This module contains the handler functions for each API endpoint.
//! Each handler:
//! 1. Extracts request data
//! 2. Validates input
//! 3. Calls the appropriate service
//! 4. Returns a formatted response
//!
//! ## Error Handling
//!
//! Domain errors are translated to HTTP outcomes here: not-found
//! errors map to 404, a lost fulfillment race to 409, other
//! business-rule failures to 400. `TOKEN_NOT_TRANSFERABLE` is a broken
//! invariant, not a rejected request, so it maps to 500 and is logged
//! loudly.

use std::sync::Arc;

use actix_web::{web, HttpResponse};
use chrono::{Datelike, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{
    ApiResponse, BillingStartResponse, CancelListingRequest, CreateListingRequest,
    FulfillListingRequest, HealthResponse, IceServer, IceServersResponse, ListingResponse,
    MintRequest, MintResponse, PaymentWebhookRequest, PurchaseDetails, StartBillingRequest,
    StopBillingRequest, SupplyResponse, TokenResponse, TradeResponse, WalletResponse,
    WebhookEventType,
};
use crate::services::{BillingStart, PaymentEvent, PaymentOutcome, Purchase};
use crate::store::{LedgerError, TokenStatus};
use crate::AppState;

/// Translate a domain error into an HTTP response.
fn error_response(e: &LedgerError) -> HttpResponse {
    if e.is_bug_signal() {
        error!(%e, "ledger invariant violation surfaced to API");
        return HttpResponse::InternalServerError()
            .json(ApiResponse::<()>::error(e.code(), &e.to_string()));
    }

    let body = ApiResponse::<()>::error(e.code(), &e.to_string());
    match e {
        LedgerError::TokenNotFound(_)
        | LedgerError::ListingNotFound(_)
        | LedgerError::CallNotFound(_) => HttpResponse::NotFound().json(body),
        LedgerError::ListingUnavailable(_) => HttpResponse::Conflict().json(body),
        _ => HttpResponse::BadRequest().json(body),
    }
}

/// Health check endpoint.
///
/// ## Endpoint
///
/// `GET /health`
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    }))
}

/// Wallet query: all tokens owned by a user.
///
/// ## Endpoint
///
/// `GET /wallet/:user`
pub async fn get_wallet(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    let user_id = path.into_inner();
    let tokens = state.ledger.tokens_of(user_id).await;

    let total_minutes = tokens
        .iter()
        .filter(|t| t.status == TokenStatus::Owned || t.status == TokenStatus::Reserved)
        .map(|t| t.remaining_minutes)
        .sum();

    HttpResponse::Ok().json(ApiResponse::success(WalletResponse {
        user_id,
        total_minutes,
        tokens: tokens.into_iter().map(TokenResponse::from).collect(),
    }))
}

/// All open listings, newest first.
///
/// ## Endpoint
///
/// `GET /market/listings`
pub async fn get_open_listings(state: web::Data<Arc<AppState>>) -> HttpResponse {
    let listings: Vec<ListingResponse> = state
        .marketplace
        .open_listings()
        .await
        .into_iter()
        .map(ListingResponse::from)
        .collect();
    HttpResponse::Ok().json(ApiResponse::success(listings))
}

/// List a token for sale.
///
/// ## Endpoint
///
/// `POST /market/listings`
pub async fn create_listing(
    state: web::Data<Arc<AppState>>,
    body: web::Json<CreateListingRequest>,
) -> HttpResponse {
    let req = body.into_inner();
    match state
        .marketplace
        .create_listing(req.seller_id, req.token_id, req.price_cents)
        .await
    {
        Ok(listing) => HttpResponse::Ok().json(ApiResponse::success(ListingResponse::from(listing))),
        Err(e) => error_response(&e),
    }
}

/// Cancel an open listing.
///
/// ## Endpoint
///
/// `POST /market/listings/:id/cancel`
pub async fn cancel_listing(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: web::Json<CancelListingRequest>,
) -> HttpResponse {
    let listing_id = path.into_inner();
    match state
        .marketplace
        .cancel_listing(body.seller_id, listing_id)
        .await
    {
        Ok(()) => HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
            "listingId": listing_id,
            "status": "canceled"
        }))),
        Err(e) => error_response(&e),
    }
}

/// Buy against an open listing.
///
/// The loser of a race on the same listing receives
/// `LISTING_UNAVAILABLE` and may retry against a fresh listing; the
/// purchase is never retried automatically.
///
/// ## Endpoint
///
/// `POST /market/listings/:id/fulfill`
pub async fn fulfill_listing(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: web::Json<FulfillListingRequest>,
) -> HttpResponse {
    let listing_id = path.into_inner();
    match state
        .marketplace
        .fulfill_listing(body.buyer_id, listing_id)
        .await
    {
        Ok(trade) => HttpResponse::Ok().json(ApiResponse::success(TradeResponse::from(trade))),
        Err(e) => error_response(&e),
    }
}

/// Treasury supply for a year.
///
/// ## Endpoint
///
/// `GET /market/supply?year=2025`
pub async fn get_supply(
    state: web::Data<Arc<AppState>>,
    query: web::Query<std::collections::HashMap<String, String>>,
) -> HttpResponse {
    let year = query
        .get("year")
        .and_then(|y| y.parse().ok())
        .unwrap_or_else(|| Utc::now().year());

    let available = state.ledger.treasury_supply(year).await;
    HttpResponse::Ok().json(ApiResponse::success(SupplyResponse {
        year,
        available,
        unit_price_cents: state.config.treasury_unit_price_cents,
    }))
}

/// Mint treasury tokens.
///
/// ## Endpoint
///
/// `POST /admin/mint`
pub async fn mint_tokens(
    state: web::Data<Arc<AppState>>,
    body: web::Json<MintRequest>,
) -> HttpResponse {
    let req = body.into_inner();
    if req.quantity == 0 {
        return HttpResponse::BadRequest().json(ApiResponse::<()>::error(
            "INVALID_QUANTITY",
            "quantity must be at least 1",
        ));
    }

    let minutes = req.minutes.unwrap_or(state.config.token_minutes);
    let year = req.year.unwrap_or_else(|| Utc::now().year());

    match state
        .ledger
        .mint_batch(None, minutes, year, req.quantity)
        .await
    {
        Ok(tokens) => {
            info!(minted = tokens.len(), year, "treasury mint via admin API");
            HttpResponse::Ok().json(ApiResponse::success(MintResponse {
                minted: tokens.len(),
                year,
                token_ids: tokens.into_iter().map(|t| t.id).collect(),
            }))
        }
        Err(e) => error_response(&e),
    }
}

/// Payment processor webhook.
///
/// Events arrive at-least-once; the processor deduplicates on the
/// payment reference, so replays answer success without side effects.
/// A payment that fails *after* capture (sold-out treasury, closed
/// listing) is acknowledged with an error body rather than a 5xx:
/// the failure is recorded and redelivering the event cannot fix it.
///
/// ## Endpoint
///
/// `POST /payments/webhook`
pub async fn payment_webhook(
    state: web::Data<Arc<AppState>>,
    body: web::Json<PaymentWebhookRequest>,
) -> HttpResponse {
    let req = body.into_inner();

    match req.event_type {
        WebhookEventType::Expired => {
            if let Err(e) = state.payments.apply_expired_payment(&req.reference).await {
                return error_response(&e);
            }
            HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
                "reference": req.reference,
                "handled": "expired"
            })))
        }
        WebhookEventType::Completed => {
            let (Some(buyer_id), Some(purchase)) = (req.buyer_id, req.purchase) else {
                return HttpResponse::BadRequest().json(ApiResponse::<()>::error(
                    "INVALID_EVENT",
                    "completed events require buyerId and purchase",
                ));
            };

            let purchase = match purchase {
                PurchaseDetails::Treasury { quantity, year } => Purchase::Treasury {
                    quantity,
                    year: year.unwrap_or_else(|| Utc::now().year()),
                },
                PurchaseDetails::Marketplace { listing_id } => {
                    Purchase::Marketplace { listing_id }
                }
            };

            let event = PaymentEvent {
                reference: req.reference.clone(),
                buyer_id,
                amount_cents: req.amount_cents.unwrap_or_default(),
                purchase,
            };

            match state.payments.apply_completed_payment(event).await {
                Ok(outcome) => {
                    let data = match outcome {
                        PaymentOutcome::AlreadyProcessed => serde_json::json!({
                            "reference": req.reference,
                            "outcome": "alreadyProcessed"
                        }),
                        PaymentOutcome::TreasuryTokens(ids) => serde_json::json!({
                            "reference": req.reference,
                            "outcome": "treasuryFulfilled",
                            "tokenIds": ids
                        }),
                        PaymentOutcome::Trade(trade) => serde_json::json!({
                            "reference": req.reference,
                            "outcome": "tradeFulfilled",
                            "tradeId": trade.id,
                            "tokenId": trade.token_id
                        }),
                    };
                    HttpResponse::Ok().json(ApiResponse::success(data))
                }
                Err(e) => {
                    warn!(reference = %req.reference, %e, "payment event failed");
                    HttpResponse::Ok().json(ApiResponse::<()>::error(e.code(), &e.to_string()))
                }
            }
        }
    }
}

/// ICE server configuration for WebRTC clients.
///
/// ## Endpoint
///
/// `GET /ice`
pub async fn get_ice_servers(state: web::Data<Arc<AppState>>) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(IceServersResponse {
        ice_servers: vec![IceServer {
            urls: state.config.ice_stun_urls.clone(),
        }],
    }))
}

/// Start billing a call.
///
/// ## Endpoint
///
/// `POST /billing/start`
pub async fn start_billing(
    state: web::Data<Arc<AppState>>,
    body: web::Json<StartBillingRequest>,
) -> HttpResponse {
    match state.billing.start(body.call_id, body.payer_id).await {
        Ok(outcome) => {
            let (label, token) = match outcome {
                BillingStart::Started { token_id } => ("started", Some(token_id)),
                BillingStart::AlreadyRunning => ("alreadyRunning", None),
                BillingStart::NotBillable => ("notBillable", None),
                BillingStart::NoBalance => ("noBalance", None),
            };
            HttpResponse::Ok().json(ApiResponse::success(BillingStartResponse {
                outcome: label.to_string(),
                reserved_token_id: token,
            }))
        }
        Err(e) => error_response(&e),
    }
}

/// Stop billing a call.
///
/// ## Endpoint
///
/// `POST /billing/stop`
pub async fn stop_billing(
    state: web::Data<Arc<AppState>>,
    body: web::Json<StopBillingRequest>,
) -> HttpResponse {
    match state.billing.stop(body.call_id).await {
        Ok(()) => HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
            "callId": body.call_id,
            "billing": "stopped"
        }))),
        Err(e) => error_response(&e),
    }
}
