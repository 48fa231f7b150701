//! # API Request Models
//!
//! Structures for incoming API request bodies.
//! Each struct represents the expected JSON body for an endpoint.
//!
//! Identity note: callers pass verified user ids directly. Resolving a
//! session or API key to a user id is the identity collaborator's job
//! and happens before these bodies are built.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to list a token for sale.
///
/// ## Example JSON
///
/// ```json
/// {
///     "sellerId": "8f14e45f-...",
///     "tokenId": "c4ca4238-...",
///     "priceCents": 500
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateListingRequest {
    pub seller_id: Uuid,
    pub token_id: Uuid,
    pub price_cents: i64,
}

/// Request to cancel an open listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelListingRequest {
    pub seller_id: Uuid,
}

/// Request to buy against an open listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillListingRequest {
    pub buyer_id: Uuid,
}

/// Request to mint treasury tokens.
///
/// Minutes and year fall back to the configured unit size and the
/// current year.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintRequest {
    pub quantity: u32,
    pub minutes: Option<i64>,
    pub year: Option<i32>,
}

/// One event from the payment processor, delivered after the webhook
/// layer has verified its signature.
///
/// ## Example JSON
///
/// ```json
/// {
///     "eventType": "payment.completed",
///     "reference": "cs_test_a1b2c3",
///     "buyerId": "8f14e45f-...",
///     "amountCents": 5997,
///     "purchase": { "type": "treasury", "quantity": 3, "year": 2025 }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentWebhookRequest {
    pub event_type: WebhookEventType,

    /// The processor's globally unique payment reference.
    pub reference: String,

    /// Required for completed events.
    pub buyer_id: Option<Uuid>,

    /// Amount captured, in cents. Required for completed events.
    pub amount_cents: Option<i64>,

    /// Required for completed events.
    pub purchase: Option<PurchaseDetails>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WebhookEventType {
    /// Checkout completed and money captured.
    #[serde(rename = "payment.completed")]
    Completed,
    /// Checkout expired or failed before capture.
    #[serde(rename = "payment.expired")]
    Expired,
}

/// The purchase a completed payment pays for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PurchaseDetails {
    /// Primary purchase from the treasury.
    #[serde(rename_all = "camelCase")]
    Treasury { quantity: u32, year: Option<i32> },
    /// Secondary purchase of a listed token.
    #[serde(rename_all = "camelCase")]
    Marketplace { listing_id: Uuid },
}

/// Request to start billing a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBillingRequest {
    pub call_id: Uuid,
    pub payer_id: Uuid,
}

/// Request to stop billing a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopBillingRequest {
    pub call_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_purchase_variants_deserialize() {
        let treasury: PaymentWebhookRequest = serde_json::from_str(
            r#"{
                "eventType": "payment.completed",
                "reference": "cs_1",
                "buyerId": "8f14e45f-ceea-467f-a341-cd0d98c56464",
                "amountCents": 5997,
                "purchase": { "type": "treasury", "quantity": 3, "year": 2025 }
            }"#,
        )
        .unwrap();
        assert_eq!(treasury.event_type, WebhookEventType::Completed);
        assert!(matches!(
            treasury.purchase,
            Some(PurchaseDetails::Treasury { quantity: 3, .. })
        ));

        let expired: PaymentWebhookRequest = serde_json::from_str(
            r#"{ "eventType": "payment.expired", "reference": "cs_2" }"#,
        )
        .unwrap();
        assert_eq!(expired.event_type, WebhookEventType::Expired);
        assert!(expired.purchase.is_none());
    }
}
