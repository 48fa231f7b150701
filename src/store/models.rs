//! # Ledger Records
//!
//! This module defines the record types held by the ledger store.
//! Each struct corresponds to one logical table.
//!
//! ## Table Overview
//!
//! | Table | Description |
//! |-------|-------------|
//! | `tokens` | Prepaid call-minute tokens and their state machine |
//! | `listings` | Open/closed offers on the secondary marketplace |
//! | `trades` | Completed peer-to-peer sales (append-only) |
//! | `payments` | Idempotency + audit records for external payments |
//! | `ledger_entries` | Append-only minute/ownership audit rows |
//! | `calls` | Billing-relevant call lifecycle records |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a token.
///
/// ```text
/// Treasury --(primary purchase)--> Owned
/// Owned --(list)--> Listed --(cancel)--> Owned
/// Listed --(trade fulfilled)--> Owned (new owner)
/// Owned --(reserve)--> Reserved --(charge, remaining > 0)--> Reserved
/// Reserved --(charge, remaining == 0)--> Spent
/// Reserved --(release)--> Owned
/// ```
///
/// `Spent` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    /// Unissued, held by the treasury (no owner).
    Treasury,
    /// Owned by a user and available.
    Owned,
    /// Held by exactly one active billing session.
    Reserved,
    /// Locked under an open marketplace listing.
    Listed,
    /// All minutes consumed.
    Spent,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Treasury => "treasury",
            TokenStatus::Owned => "owned",
            TokenStatus::Reserved => "reserved",
            TokenStatus::Listed => "listed",
            TokenStatus::Spent => "spent",
        }
    }
}

/// A prepaid call-minute token.
///
/// Invariants:
/// - `remaining_minutes` is never negative
/// - `remaining_minutes == 0` iff `status == Spent`
/// - `reserved_call_id.is_some()` iff `status == Reserved`
///
/// Tokens are never deleted; `Spent` is the terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Unique token id.
    pub id: Uuid,

    /// Current owner. `None` means the token sits unissued in the treasury.
    pub owner_id: Option<Uuid>,

    /// Minutes left on the token.
    pub remaining_minutes: i64,

    /// Current lifecycle state.
    pub status: TokenStatus,

    /// Calendar year the token was issued for.
    pub issued_year: i32,

    /// The call currently holding the reservation, if any.
    pub reserved_call_id: Option<Uuid>,

    /// When the current reservation was taken, if any.
    pub reserved_at: Option<DateTime<Utc>>,

    /// When the token was minted.
    pub created_at: DateTime<Utc>,
}

/// Lifecycle state of a marketplace listing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Open,
    Filled,
    Canceled,
}

/// An open offer to sell one token.
///
/// Invariant: `status == Open` iff the underlying token is `Listed`,
/// and at most one open listing references a given token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingRecord {
    pub id: Uuid,
    pub token_id: Uuid,
    pub seller_id: Uuid,

    /// Asking price in cents. Always positive.
    pub price_cents: i64,

    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Immutable record of a completed peer-to-peer sale. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub token_id: Uuid,
    pub seller_id: Uuid,
    pub buyer_id: Uuid,
    pub total_cents: i64,
    pub platform_fee_cents: i64,
    pub created_at: DateTime<Utc>,
}

/// The two purchase flavors an external payment can complete.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    /// Primary purchase of unissued tokens from the treasury.
    TreasuryPurchase,
    /// Secondary purchase of a listed token from another user.
    MarketplacePurchase,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Idempotency and audit record for one external payment completion.
///
/// `reference` is the processor's globally unique id for the payment
/// and is the key that makes redelivered events no-ops. A reference
/// transitions to `Succeeded` at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// External processor reference (e.g. checkout session id). Unique.
    pub reference: String,

    pub kind: PaymentKind,
    pub buyer_id: Uuid,
    pub amount_cents: i64,
    pub status: PaymentStatus,

    /// Tokens assigned by a treasury purchase.
    pub token_ids: Vec<Uuid>,

    /// Listing fulfilled by a marketplace purchase.
    pub listing_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
}

/// Cause of a ledger entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerReason {
    Mint,
    BuyTreasury,
    BuyP2p,
    SellP2p,
    CallCharge,
    Release,
}

/// Append-only accounting row.
///
/// Never mutated or deleted; for every token the sum of `delta_minutes`
/// reconciles with its `remaining_minutes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntryRecord {
    pub id: Uuid,

    /// Affected user. `None` for treasury mints.
    pub user_id: Option<Uuid>,

    pub token_id: Uuid,
    pub delta_minutes: i64,
    pub reason: LedgerReason,

    /// What caused the entry: a call id, payment reference, mint batch, ...
    pub reference: String,

    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Ringing,
    Active,
    Ended,
    Failed,
}

impl CallStatus {
    /// Ended and Failed are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Ended | CallStatus::Failed)
    }
}

/// Billing-relevant subset of a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: Uuid,

    /// The paying side (the caller).
    pub caller_id: Uuid,
    pub callee_id: Uuid,

    pub status: CallStatus,

    /// Minutes billed against the reserved token so far.
    pub charged_minutes: i64,

    /// Token reserved for this call while billing is active.
    pub reserved_token_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}
