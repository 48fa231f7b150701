//! # Payment Fulfillment Processor
//!
//! Turns completion events from the external payment processor into
//! ledger mutations, exactly once per payment reference. Delivery is
//! at-least-once and unordered, so the whole of `apply_completed_payment`
//! runs in one store transaction keyed on the reference: a redelivered
//! event finds the recorded payment and returns without side effects.
//!
//! A payment can also *fail* here (treasury sold out, listing already
//! filled, purchase cap reached) after the money was captured
//! externally. Those failures are committed as `Failed` payment rows
//! and surfaced loudly; they are reconciliation/refund cases for an
//! operator, never silently swallowed.

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::store::{
    LedgerEntryRecord, LedgerError, LedgerReason, LedgerStore, PaymentKind, PaymentRecord,
    PaymentStatus, StoreState, TokenStatus, TradeRecord,
};

use super::marketplace::Marketplace;
use super::token_ledger::TokenLedger;

/// One completed payment, as handed over by the webhook layer after
/// signature verification.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    /// Globally unique processor reference (checkout session id).
    pub reference: String,
    pub buyer_id: Uuid,
    pub amount_cents: i64,
    pub purchase: Purchase,
}

/// The two purchase flavors, dispatched once here rather than branched
/// per call site.
#[derive(Debug, Clone)]
pub enum Purchase {
    /// Primary purchase of `quantity` unissued tokens for a year.
    Treasury { quantity: u32, year: i32 },
    /// Secondary purchase of one listed token.
    Marketplace { listing_id: Uuid },
}

/// What a completed payment did to the ledger.
#[derive(Debug, Clone)]
pub enum PaymentOutcome {
    /// The reference was already processed; nothing happened.
    AlreadyProcessed,
    /// Treasury tokens were assigned to the buyer.
    TreasuryTokens(Vec<Uuid>),
    /// A marketplace listing was fulfilled.
    Trade(TradeRecord),
}

enum Applied {
    AlreadyProcessed,
    TreasuryTokens(Vec<Uuid>),
    Trade(TradeRecord),
    /// Committed as a failed payment; the error still surfaces.
    Rejected(LedgerError),
}

/// Service applying external payment events to the ledger.
#[derive(Clone)]
pub struct PaymentProcessor {
    store: LedgerStore,
    platform_fee_cents: i64,
    max_tokens_per_user_year: i64,
}

impl PaymentProcessor {
    pub fn new(store: LedgerStore, config: &AppConfig) -> Self {
        Self {
            store,
            platform_fee_cents: config.platform_fee_cents,
            max_tokens_per_user_year: config.max_tokens_per_user_year,
        }
    }

    /// Apply one `payment completed` event.
    ///
    /// Idempotent on the reference. On a business failure the payment
    /// is recorded as `Failed` in the same transaction and the error
    /// is returned to the caller.
    pub async fn apply_completed_payment(
        &self,
        event: PaymentEvent,
    ) -> Result<PaymentOutcome, LedgerError> {
        let reference = event.reference.clone();
        let fee = self.platform_fee_cents;
        let cap = self.max_tokens_per_user_year;

        let applied = self
            .store
            .transaction(move |state| {
                // Idempotency gate: a reference in a terminal state has
                // already been handled, success or failure.
                if let Some(existing) = state.payment(&event.reference) {
                    if existing.status != PaymentStatus::Pending {
                        return Ok(Applied::AlreadyProcessed);
                    }
                }

                match event.purchase {
                    Purchase::Treasury { quantity, year } => {
                        Self::apply_treasury(state, &event, quantity, year, cap)
                    }
                    Purchase::Marketplace { listing_id } => {
                        Self::apply_marketplace(state, &event, listing_id, fee)
                    }
                }
            })
            .await?;

        match applied {
            Applied::AlreadyProcessed => {
                info!(%reference, "duplicate payment event ignored");
                Ok(PaymentOutcome::AlreadyProcessed)
            }
            Applied::TreasuryTokens(tokens) => {
                info!(%reference, count = tokens.len(), "treasury purchase fulfilled");
                Ok(PaymentOutcome::TreasuryTokens(tokens))
            }
            Applied::Trade(trade) => {
                info!(%reference, trade = %trade.id, "marketplace purchase fulfilled");
                Ok(PaymentOutcome::Trade(trade))
            }
            Applied::Rejected(err) => {
                if err.is_bug_signal() {
                    error!(%reference, %err, "payment fulfillment hit a broken invariant");
                } else {
                    warn!(%reference, %err, "payment failed after capture; needs reconciliation");
                }
                Err(err)
            }
        }
    }

    fn apply_treasury(
        state: &mut StoreState,
        event: &PaymentEvent,
        quantity: u32,
        year: i32,
        cap: i64,
    ) -> Result<Applied, LedgerError> {
        let record = |status, token_ids| PaymentRecord {
            reference: event.reference.clone(),
            kind: PaymentKind::TreasuryPurchase,
            buyer_id: event.buyer_id,
            amount_cents: event.amount_cents,
            status,
            token_ids,
            listing_id: None,
            created_at: Utc::now(),
        };

        let held = state.held_in_year(event.buyer_id, year);
        if held + i64::from(quantity) > cap {
            state.upsert_payment(record(PaymentStatus::Failed, Vec::new()));
            return Ok(Applied::Rejected(LedgerError::PrimaryLimitExceeded {
                year,
                limit: cap,
            }));
        }

        let token_ids = state.treasury_tokens(year, quantity as usize);
        if token_ids.len() < quantity as usize {
            let available = token_ids.len();
            state.upsert_payment(record(PaymentStatus::Failed, Vec::new()));
            return Ok(Applied::Rejected(LedgerError::TreasurySoldOut {
                year,
                requested: quantity as usize,
                available,
            }));
        }

        for &token_id in &token_ids {
            TokenLedger::transfer_on(state, token_id, event.buyer_id, TokenStatus::Treasury)?;
            state.insert_ledger_entry(LedgerEntryRecord {
                id: Uuid::new_v4(),
                user_id: Some(event.buyer_id),
                token_id,
                delta_minutes: 0,
                reason: LedgerReason::BuyTreasury,
                reference: event.reference.clone(),
                created_at: Utc::now(),
            });
        }

        state.upsert_payment(record(PaymentStatus::Succeeded, token_ids.clone()));
        Ok(Applied::TreasuryTokens(token_ids))
    }

    fn apply_marketplace(
        state: &mut StoreState,
        event: &PaymentEvent,
        listing_id: Uuid,
        fee: i64,
    ) -> Result<Applied, LedgerError> {
        let record = |status| PaymentRecord {
            reference: event.reference.clone(),
            kind: PaymentKind::MarketplacePurchase,
            buyer_id: event.buyer_id,
            amount_cents: event.amount_cents,
            status,
            token_ids: Vec::new(),
            listing_id: Some(listing_id),
            created_at: Utc::now(),
        };

        // Savepoint around the nested fulfillment: a failed
        // fulfillment must leave only the failed payment row, not a
        // half-closed listing.
        let mut savepoint = state.clone();
        match Marketplace::fulfill_on(&mut savepoint, event.buyer_id, listing_id, fee, &event.reference) {
            Ok(trade) => {
                *state = savepoint;
                state.upsert_payment(record(PaymentStatus::Succeeded));
                Ok(Applied::Trade(trade))
            }
            Err(err) => {
                state.upsert_payment(record(PaymentStatus::Failed));
                Ok(Applied::Rejected(err))
            }
        }
    }

    /// Mark an expired or failed external payment. Only a pending
    /// record changes; there is never a ledger effect.
    pub async fn apply_expired_payment(&self, reference: &str) -> Result<(), LedgerError> {
        let reference = reference.to_string();
        self.store
            .transaction(move |state| {
                if let Some(payment) = state.payment_mut(&reference) {
                    if payment.status == PaymentStatus::Pending {
                        payment.status = PaymentStatus::Failed;
                    }
                }
                Ok(())
            })
            .await
    }

    pub async fn payment(&self, reference: &str) -> Option<PaymentRecord> {
        let reference = reference.to_string();
        self.store
            .read(move |state| state.payment(&reference).cloned())
            .await
    }
}

#[cfg(test)]
mod tests {
    use crate::services::marketplace::Marketplace;

    use super::*;

    fn config() -> AppConfig {
        AppConfig::for_tests()
    }

    struct Fixture {
        store: LedgerStore,
        ledger: TokenLedger,
        market: Marketplace,
        payments: PaymentProcessor,
    }

    fn fixture() -> Fixture {
        let store = LedgerStore::new();
        let config = config();
        Fixture {
            ledger: TokenLedger::new(store.clone()),
            market: Marketplace::new(store.clone(), &config),
            payments: PaymentProcessor::new(store.clone(), &config),
            store,
        }
    }

    fn treasury_event(reference: &str, buyer: Uuid, quantity: u32) -> PaymentEvent {
        PaymentEvent {
            reference: reference.to_string(),
            buyer_id: buyer,
            amount_cents: 1999 * i64::from(quantity),
            purchase: Purchase::Treasury {
                quantity,
                year: 2025,
            },
        }
    }

    #[tokio::test]
    async fn treasury_purchase_assigns_oldest_tokens() {
        let f = fixture();
        let buyer = Uuid::new_v4();
        f.ledger.mint_batch(None, 60, 2025, 5).await.unwrap();

        let outcome = f
            .payments
            .apply_completed_payment(treasury_event("cs_1", buyer, 3))
            .await
            .unwrap();

        let PaymentOutcome::TreasuryTokens(tokens) = outcome else {
            panic!("expected treasury outcome");
        };
        assert_eq!(tokens.len(), 3);
        assert_eq!(f.ledger.tokens_of(buyer).await.len(), 3);
        assert_eq!(f.ledger.treasury_supply(2025).await, 2);

        let payment = f.payments.payment("cs_1").await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Succeeded);
    }

    #[tokio::test]
    async fn replayed_event_applies_exactly_once() {
        let f = fixture();
        let buyer = Uuid::new_v4();
        f.ledger.mint_batch(None, 60, 2025, 5).await.unwrap();

        f.payments
            .apply_completed_payment(treasury_event("cs_1", buyer, 3))
            .await
            .unwrap();
        let replay = f
            .payments
            .apply_completed_payment(treasury_event("cs_1", buyer, 3))
            .await
            .unwrap();

        assert!(matches!(replay, PaymentOutcome::AlreadyProcessed));
        assert_eq!(f.ledger.tokens_of(buyer).await.len(), 3);
        assert_eq!(f.ledger.treasury_supply(2025).await, 2);
    }

    #[tokio::test]
    async fn sold_out_treasury_fails_the_payment() {
        let f = fixture();
        let buyer = Uuid::new_v4();
        f.ledger.mint_batch(None, 60, 2025, 2).await.unwrap();

        let err = f
            .payments
            .apply_completed_payment(treasury_event("cs_1", buyer, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::TreasurySoldOut { .. }));

        // The failure is committed: no tokens moved, payment is Failed.
        assert_eq!(f.ledger.tokens_of(buyer).await.len(), 0);
        assert_eq!(f.ledger.treasury_supply(2025).await, 2);
        let payment = f.payments.payment("cs_1").await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);

        // And redelivery of the same reference stays a no-op.
        let replay = f
            .payments
            .apply_completed_payment(treasury_event("cs_1", buyer, 3))
            .await
            .unwrap();
        assert!(matches!(replay, PaymentOutcome::AlreadyProcessed));
    }

    #[tokio::test]
    async fn yearly_purchase_cap_is_enforced() {
        let f = fixture();
        let buyer = Uuid::new_v4();
        f.ledger.mint_batch(None, 60, 2025, 30).await.unwrap();

        f.payments
            .apply_completed_payment(treasury_event("cs_1", buyer, 20))
            .await
            .unwrap();
        let err = f
            .payments
            .apply_completed_payment(treasury_event("cs_2", buyer, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PrimaryLimitExceeded { .. }));
        assert_eq!(f.ledger.tokens_of(buyer).await.len(), 20);
    }

    #[tokio::test]
    async fn marketplace_purchase_runs_fulfillment() {
        let f = fixture();
        let seller = Uuid::new_v4();
        let buyer = Uuid::new_v4();
        let token = f.ledger.mint(Some(seller), 60, 2025).await.unwrap();
        let listing = f.market.create_listing(seller, token.id, 500).await.unwrap();

        let outcome = f
            .payments
            .apply_completed_payment(PaymentEvent {
                reference: "cs_p2p".to_string(),
                buyer_id: buyer,
                amount_cents: 500,
                purchase: Purchase::Marketplace {
                    listing_id: listing.id,
                },
            })
            .await
            .unwrap();

        let PaymentOutcome::Trade(trade) = outcome else {
            panic!("expected trade outcome");
        };
        assert_eq!(trade.buyer_id, buyer);
        assert_eq!(
            f.ledger.token(token.id).await.unwrap().owner_id,
            Some(buyer)
        );
    }

    #[tokio::test]
    async fn closed_listing_fails_the_payment() {
        let f = fixture();
        let seller = Uuid::new_v4();
        let buyer = Uuid::new_v4();
        let token = f.ledger.mint(Some(seller), 60, 2025).await.unwrap();
        let listing = f.market.create_listing(seller, token.id, 500).await.unwrap();
        f.market.cancel_listing(seller, listing.id).await.unwrap();

        let err = f
            .payments
            .apply_completed_payment(PaymentEvent {
                reference: "cs_p2p".to_string(),
                buyer_id: buyer,
                amount_cents: 500,
                purchase: Purchase::Marketplace {
                    listing_id: listing.id,
                },
            })
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::ListingUnavailable(listing.id));

        let payment = f.payments.payment("cs_p2p").await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
        // The seller keeps the token.
        assert_eq!(
            f.ledger.token(token.id).await.unwrap().owner_id,
            Some(seller)
        );
    }

    #[tokio::test]
    async fn expired_payment_only_touches_pending_rows() {
        let f = fixture();

        // Unknown reference: nothing to do.
        f.payments.apply_expired_payment("cs_gone").await.unwrap();
        assert!(f.payments.payment("cs_gone").await.is_none());

        // A pending row flips to failed.
        f.store
            .transaction(|state| {
                state.upsert_payment(PaymentRecord {
                    reference: "cs_pending".to_string(),
                    kind: PaymentKind::TreasuryPurchase,
                    buyer_id: Uuid::new_v4(),
                    amount_cents: 1999,
                    status: PaymentStatus::Pending,
                    token_ids: Vec::new(),
                    listing_id: None,
                    created_at: Utc::now(),
                });
                Ok(())
            })
            .await
            .unwrap();
        f.payments.apply_expired_payment("cs_pending").await.unwrap();
        assert_eq!(
            f.payments.payment("cs_pending").await.unwrap().status,
            PaymentStatus::Failed
        );
    }
}
