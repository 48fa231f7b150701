//! # API Response Models
//!
//! Structures for outgoing API response bodies.
//! All responses are wrapped in a standard format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{ListingRecord, ListingStatus, TokenRecord, TokenStatus, TradeRecord};

/// Standard API response wrapper.
///
/// ## Success Response
///
/// ```json
/// {
///     "success": true,
///     "data": { ... },
///     "error": null
/// }
/// ```
///
/// ## Error Response
///
/// ```json
/// {
///     "success": false,
///     "data": null,
///     "error": {
///         "code": "LISTING_UNAVAILABLE",
///         "message": "listing ... is no longer available"
///     }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    /// Whether the request was successful.
    pub success: bool,

    /// Response data (null on error).
    pub data: Option<T>,

    /// Error information (null on success).
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response with data.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(code: &str, message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

/// API error information.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Error code (e.g., "LISTING_UNAVAILABLE").
    pub code: String,

    /// Human-readable error message.
    pub message: String,
}

/// One token in a wallet view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub id: Uuid,
    pub remaining_minutes: i64,
    pub status: TokenStatus,
    pub issued_year: i32,
    pub created_at: DateTime<Utc>,
}

impl From<TokenRecord> for TokenResponse {
    fn from(t: TokenRecord) -> Self {
        Self {
            id: t.id,
            remaining_minutes: t.remaining_minutes,
            status: t.status,
            issued_year: t.issued_year,
            created_at: t.created_at,
        }
    }
}

/// Wallet query response: a user's tokens plus the spendable total.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletResponse {
    pub user_id: Uuid,
    /// Minutes on tokens currently available for billing.
    pub total_minutes: i64,
    pub tokens: Vec<TokenResponse>,
}

/// One open listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingResponse {
    pub id: Uuid,
    pub token_id: Uuid,
    pub seller_id: Uuid,
    pub price_cents: i64,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
}

impl From<ListingRecord> for ListingResponse {
    fn from(l: ListingRecord) -> Self {
        Self {
            id: l.id,
            token_id: l.token_id,
            seller_id: l.seller_id,
            price_cents: l.price_cents,
            status: l.status,
            created_at: l.created_at,
        }
    }
}

/// Result of a fulfilled listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeResponse {
    pub trade_id: Uuid,
    pub token_id: Uuid,
    pub price_cents: i64,
}

impl From<TradeRecord> for TradeResponse {
    fn from(t: TradeRecord) -> Self {
        Self {
            trade_id: t.id,
            token_id: t.token_id,
            price_cents: t.total_cents,
        }
    }
}

/// Treasury supply for one issue year.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplyResponse {
    pub year: i32,
    pub available: usize,
    pub unit_price_cents: i64,
}

/// Result of a treasury mint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintResponse {
    pub minted: usize,
    pub year: i32,
    pub token_ids: Vec<Uuid>,
}

/// Result of a billing start request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingStartResponse {
    /// "started", "alreadyRunning", "notBillable" or "noBalance".
    pub outcome: String,
    pub reserved_token_id: Option<Uuid>,
}

/// One STUN/TURN server entry for WebRTC clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: Vec<String>,
}

/// ICE configuration handed to WebRTC clients before they negotiate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServersResponse {
    pub ice_servers: Vec<IceServer>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}
