//! # Ledger Store
//!
//! The shared transactional store behind every ledger-mutating
//! operation. Tokens, listings, trades, payments, ledger entries and
//! call records all live here, and the store is the sole
//! synchronization point between request handlers, the payment
//! webhook and the per-call billing tickers.
//!
//! ## Transaction Semantics
//!
//! `transaction` serializes writers on a single async mutex and runs
//! the closure against a draft copy of the state. The draft is
//! committed only when the closure returns `Ok`; on `Err` it is
//! discarded, so a failed operation never leaves partial effects.
//! Readers of record status inside a transaction therefore see
//! committed state, which gives the conditional
//! ("compare-and-swap style") updates the services rely on: the loser
//! of a status race observes the already-changed status and surfaces a
//! domain error instead of blocking.
//!
//! Persistence technology is out of scope here; this module is the
//! seam where a durable backend would plug in.

pub mod models;
pub mod state;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

pub use models::*;
pub use state::StoreState;

/// Domain errors surfaced by ledger operations.
///
/// Every variant is detected inside a store transaction; the
/// transaction aborts with no partial effect and the caller translates
/// the error into a user-facing outcome. Business-rule failures are
/// never retried silently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// No token available to reserve. A normal business outcome: the
    /// call ends as failed, not a system error.
    #[error("no reservable token for user {0}")]
    InsufficientBalance(Uuid),

    /// Listing creation attempted on a token the seller does not own.
    #[error("token {token} is not owned by user {user}")]
    TokenNotOwned { token: Uuid, user: Uuid },

    /// Listing creation attempted on a token that is not a full,
    /// untouched owned token.
    #[error("token {0} is not listable")]
    TokenNotListable(Uuid),

    /// Listing price must be a positive amount.
    #[error("invalid listing price {0}")]
    InvalidPrice(i64),

    /// Lost a fulfillment race or the listing is already closed.
    /// Surfaced to the buyer to retry against a fresh listing.
    #[error("listing {0} is no longer available")]
    ListingUnavailable(Uuid),

    /// Defensive invariant violation at transfer time. Treated as a
    /// bug signal and logged loudly by callers.
    #[error("token {0} is not transferable")]
    TokenNotTransferable(Uuid),

    /// Buyer and seller are the same user.
    #[error("user {0} cannot buy their own listing")]
    InvalidTrade(Uuid),

    /// Treasury purchase asked for more tokens than remain unissued.
    /// The payment is recorded as failed; money was already captured
    /// externally, so this is a manual reconciliation case.
    #[error("treasury sold out for year {year}: requested {requested}, available {available}")]
    TreasurySoldOut {
        year: i32,
        requested: usize,
        available: usize,
    },

    /// Per-user primary purchase cap for the year reached.
    #[error("primary purchase limit of {limit} tokens reached for year {year}")]
    PrimaryLimitExceeded { year: i32, limit: i64 },

    /// A charge hit a token that is no longer reserved for the call,
    /// e.g. a stale timer firing after stop. The billing scheduler
    /// self-cancels on this.
    #[error("token {token} is not reserved for call {call}")]
    InvalidTransition { token: Uuid, call: Uuid },

    /// A listing is not open or not owned by the canceling seller.
    #[error("listing {0} cannot be canceled")]
    NotCancellable(Uuid),

    #[error("token {0} not found")]
    TokenNotFound(Uuid),

    #[error("listing {0} not found")]
    ListingNotFound(Uuid),

    #[error("call {0} not found")]
    CallNotFound(Uuid),
}

impl LedgerError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InsufficientBalance(_) => "INSUFFICIENT_BALANCE",
            LedgerError::TokenNotOwned { .. } => "TOKEN_NOT_OWNED",
            LedgerError::TokenNotListable(_) => "TOKEN_NOT_LISTABLE",
            LedgerError::InvalidPrice(_) => "INVALID_PRICE",
            LedgerError::ListingUnavailable(_) => "LISTING_UNAVAILABLE",
            LedgerError::TokenNotTransferable(_) => "TOKEN_NOT_TRANSFERABLE",
            LedgerError::InvalidTrade(_) => "INVALID_TRADE",
            LedgerError::TreasurySoldOut { .. } => "TREASURY_SOLD_OUT",
            LedgerError::PrimaryLimitExceeded { .. } => "PRIMARY_LIMIT_EXCEEDED",
            LedgerError::InvalidTransition { .. } => "INVALID_TRANSITION",
            LedgerError::NotCancellable(_) => "NOT_CANCELLABLE",
            LedgerError::TokenNotFound(_) => "TOKEN_NOT_FOUND",
            LedgerError::ListingNotFound(_) => "LISTING_NOT_FOUND",
            LedgerError::CallNotFound(_) => "CALL_NOT_FOUND",
        }
    }

    /// Errors that indicate a broken invariant rather than a rejected
    /// request.
    pub fn is_bug_signal(&self) -> bool {
        matches!(self, LedgerError::TokenNotTransferable(_))
    }
}

/// Handle to the shared store. Cheap to clone; all clones share state.
#[derive(Clone, Default)]
pub struct LedgerStore {
    inner: Arc<Mutex<StoreState>>,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreState::new())),
        }
    }

    /// Run `f` as one atomic transaction.
    ///
    /// The closure gets a mutable draft of the current state. If it
    /// returns `Ok` the draft replaces the committed state; if it
    /// returns `Err` the draft is dropped and nothing changes.
    pub async fn transaction<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut committed = self.inner.lock().await;
        let mut draft = committed.clone();
        match f(&mut draft) {
            Ok(value) => {
                *committed = draft;
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }

    /// Run a read-only closure against committed state.
    pub async fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> T {
        let committed = self.inner.lock().await;
        f(&committed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn token(minutes: i64) -> TokenRecord {
        TokenRecord {
            id: Uuid::new_v4(),
            owner_id: None,
            remaining_minutes: minutes,
            status: TokenStatus::Treasury,
            issued_year: 2025,
            reserved_call_id: None,
            reserved_at: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn commits_on_ok() {
        let store = LedgerStore::new();
        let t = token(60);
        let id = t.id;

        store
            .transaction(|state| {
                state.insert_token(t);
                Ok(())
            })
            .await
            .unwrap();

        let found = store.read(|state| state.token(id).cloned()).await;
        assert_eq!(found.unwrap().remaining_minutes, 60);
    }

    #[tokio::test]
    async fn discards_draft_on_err() {
        let store = LedgerStore::new();
        let t = token(60);
        let id = t.id;

        let result: Result<(), LedgerError> = store
            .transaction(|state| {
                state.insert_token(t);
                Err(LedgerError::TokenNotFound(id))
            })
            .await;

        assert!(result.is_err());
        let found = store.read(|state| state.token(id).cloned()).await;
        assert!(found.is_none(), "aborted transaction must leave no trace");
    }

    #[tokio::test]
    async fn treasury_selection_is_oldest_first() {
        let store = LedgerStore::new();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let t = token(60);
            ids.push(t.id);
            store
                .transaction(|state| {
                    state.insert_token(t);
                    Ok(())
                })
                .await
                .unwrap();
        }

        let picked = store.read(|state| state.treasury_tokens(2025, 2)).await;
        assert_eq!(picked, ids[..2].to_vec());
    }
}
