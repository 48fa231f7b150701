//! # Marketplace Service
//!
//! Listing lifecycle and atomic trade execution, built on the token
//! ledger's transfer primitive. Create, cancel and fulfill each run as
//! one store transaction; mutual exclusion between racing buyers comes
//! from the open -> filled status check inside the transaction, not
//! from locks. The loser of a fulfillment race observes a listing that
//! is no longer open and gets `ListingUnavailable`.
//!
//! Only full, untouched owned tokens are listable: a token that has
//! been partially consumed stays in its owner's wallet.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::store::{
    LedgerEntryRecord, LedgerError, LedgerReason, LedgerStore, ListingRecord, ListingStatus,
    StoreState, TokenStatus, TradeRecord,
};

use super::token_ledger::TokenLedger;

/// Service owning listings and trades.
#[derive(Clone)]
pub struct Marketplace {
    store: LedgerStore,
    /// Nominal minutes on a freshly minted token; only tokens still at
    /// this value are listable.
    unit_minutes: i64,
    /// Flat platform fee recorded on every trade.
    platform_fee_cents: i64,
}

impl Marketplace {
    pub fn new(store: LedgerStore, config: &AppConfig) -> Self {
        Self {
            store,
            unit_minutes: config.token_minutes,
            platform_fee_cents: config.platform_fee_cents,
        }
    }

    /// List a token for sale.
    ///
    /// The token must be owned by the seller, in status `Owned`, and
    /// still hold its full minute allotment. The `Owned -> Listed`
    /// transition and the listing insert happen atomically, which also
    /// guarantees at most one open listing per token.
    pub async fn create_listing(
        &self,
        seller_id: Uuid,
        token_id: Uuid,
        price_cents: i64,
    ) -> Result<ListingRecord, LedgerError> {
        if price_cents <= 0 {
            return Err(LedgerError::InvalidPrice(price_cents));
        }

        let unit_minutes = self.unit_minutes;
        let listing = self
            .store
            .transaction(move |state| {
                let token = state
                    .token(token_id)
                    .ok_or(LedgerError::TokenNotFound(token_id))?;
                if token.owner_id != Some(seller_id) {
                    return Err(LedgerError::TokenNotOwned {
                        token: token_id,
                        user: seller_id,
                    });
                }
                if token.status != TokenStatus::Owned || token.remaining_minutes != unit_minutes {
                    return Err(LedgerError::TokenNotListable(token_id));
                }

                let token = state
                    .token_mut(token_id)
                    .ok_or(LedgerError::TokenNotFound(token_id))?;
                token.status = TokenStatus::Listed;

                let listing = ListingRecord {
                    id: Uuid::new_v4(),
                    token_id,
                    seller_id,
                    price_cents,
                    status: ListingStatus::Open,
                    created_at: Utc::now(),
                    closed_at: None,
                };
                state.insert_listing(listing.clone());
                Ok(listing)
            })
            .await?;

        info!(listing = %listing.id, token = %token_id, seller = %seller_id, price_cents, "listing created");
        Ok(listing)
    }

    /// Cancel an open listing and return the token to its owner.
    pub async fn cancel_listing(
        &self,
        seller_id: Uuid,
        listing_id: Uuid,
    ) -> Result<(), LedgerError> {
        self.store
            .transaction(move |state| {
                let listing = state
                    .listing(listing_id)
                    .ok_or(LedgerError::ListingNotFound(listing_id))?;
                if listing.seller_id != seller_id || listing.status != ListingStatus::Open {
                    return Err(LedgerError::NotCancellable(listing_id));
                }
                let token_id = listing.token_id;

                let listing = state
                    .listing_mut(listing_id)
                    .ok_or(LedgerError::ListingNotFound(listing_id))?;
                listing.status = ListingStatus::Canceled;
                listing.closed_at = Some(Utc::now());

                let token = state
                    .token_mut(token_id)
                    .ok_or(LedgerError::TokenNotFound(token_id))?;
                token.status = TokenStatus::Owned;
                Ok(())
            })
            .await?;

        info!(listing = %listing_id, seller = %seller_id, "listing canceled");
        Ok(())
    }

    /// All open listings, newest first.
    pub async fn open_listings(&self) -> Vec<ListingRecord> {
        self.store.read(|state| state.open_listings()).await
    }

    pub async fn listing(&self, listing_id: Uuid) -> Result<ListingRecord, LedgerError> {
        self.store
            .read(|state| state.listing(listing_id).cloned())
            .await
            .ok_or(LedgerError::ListingNotFound(listing_id))
    }

    /// Execute a purchase against an open listing.
    pub async fn fulfill_listing(
        &self,
        buyer_id: Uuid,
        listing_id: Uuid,
    ) -> Result<TradeRecord, LedgerError> {
        let fee = self.platform_fee_cents;
        let trade = self
            .store
            .transaction(move |state| {
                let reference = listing_id.to_string();
                Self::fulfill_on(state, buyer_id, listing_id, fee, &reference)
            })
            .await?;

        info!(
            trade = %trade.id,
            listing = %listing_id,
            buyer = %buyer_id,
            total_cents = trade.total_cents,
            "listing fulfilled"
        );
        Ok(trade)
    }

    /// State-level fulfillment, composable inside other transactions
    /// (the payment processor runs it inside its own).
    ///
    /// Steps, all or nothing:
    /// 1. conditional open -> filled update; an already-closed listing
    ///    means another buyer won the race (`ListingUnavailable`)
    /// 2. defensive re-check of the underlying token
    ///    (`TokenNotTransferable` on any mismatch)
    /// 3. ownership transfer to the buyer
    /// 4. trade insert
    /// 5. zero-delta sell/buy ledger entries (resale moves money, not
    ///    minutes)
    pub(crate) fn fulfill_on(
        state: &mut StoreState,
        buyer_id: Uuid,
        listing_id: Uuid,
        platform_fee_cents: i64,
        reference: &str,
    ) -> Result<TradeRecord, LedgerError> {
        let listing = state
            .listing(listing_id)
            .ok_or(LedgerError::ListingNotFound(listing_id))?;
        if listing.seller_id == buyer_id {
            return Err(LedgerError::InvalidTrade(buyer_id));
        }
        if listing.status != ListingStatus::Open {
            return Err(LedgerError::ListingUnavailable(listing_id));
        }
        let (token_id, seller_id, price_cents) =
            (listing.token_id, listing.seller_id, listing.price_cents);

        let listing = state
            .listing_mut(listing_id)
            .ok_or(LedgerError::ListingNotFound(listing_id))?;
        listing.status = ListingStatus::Filled;
        listing.closed_at = Some(Utc::now());

        // Re-validate the token before touching it; a mismatch here
        // means a broken invariant, not a lost race.
        let token = state
            .token(token_id)
            .ok_or(LedgerError::TokenNotTransferable(token_id))?;
        if token.owner_id != Some(seller_id)
            || token.status != TokenStatus::Listed
            || token.remaining_minutes <= 0
        {
            return Err(LedgerError::TokenNotTransferable(token_id));
        }

        TokenLedger::transfer_on(state, token_id, buyer_id, TokenStatus::Listed)?;

        let trade = TradeRecord {
            id: Uuid::new_v4(),
            listing_id,
            token_id,
            seller_id,
            buyer_id,
            total_cents: price_cents,
            platform_fee_cents,
            created_at: Utc::now(),
        };
        state.insert_trade(trade.clone());

        for (user, reason) in [
            (seller_id, LedgerReason::SellP2p),
            (buyer_id, LedgerReason::BuyP2p),
        ] {
            state.insert_ledger_entry(LedgerEntryRecord {
                id: Uuid::new_v4(),
                user_id: Some(user),
                token_id,
                delta_minutes: 0,
                reason,
                reference: reference.to_string(),
                created_at: Utc::now(),
            });
        }

        debug!(trade = %trade.id, token = %token_id, "trade recorded");
        Ok(trade)
    }
}

#[cfg(test)]
mod tests {
    use crate::store::TokenRecord;

    use super::*;

    fn config() -> AppConfig {
        AppConfig::for_tests()
    }

    async fn fixture() -> (LedgerStore, TokenLedger, Marketplace) {
        let store = LedgerStore::new();
        let ledger = TokenLedger::new(store.clone());
        let market = Marketplace::new(store.clone(), &config());
        (store, ledger, market)
    }

    async fn owned_token(ledger: &TokenLedger, owner: Uuid) -> TokenRecord {
        ledger.mint(Some(owner), 60, 2025).await.unwrap()
    }

    #[tokio::test]
    async fn create_listing_locks_the_token() {
        let (_, ledger, market) = fixture().await;
        let seller = Uuid::new_v4();
        let token = owned_token(&ledger, seller).await;

        let listing = market.create_listing(seller, token.id, 500).await.unwrap();
        assert_eq!(listing.status, ListingStatus::Open);
        assert_eq!(
            ledger.token(token.id).await.unwrap().status,
            TokenStatus::Listed
        );

        // A listed token cannot be listed again.
        let err = market.create_listing(seller, token.id, 700).await.unwrap_err();
        assert_eq!(err, LedgerError::TokenNotListable(token.id));
    }

    #[tokio::test]
    async fn only_the_owner_may_list() {
        let (_, ledger, market) = fixture().await;
        let seller = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let token = owned_token(&ledger, seller).await;

        let err = market
            .create_listing(stranger, token.id, 500)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::TokenNotOwned { .. }));
    }

    #[tokio::test]
    async fn partially_consumed_tokens_are_not_listable() {
        let (store, ledger, market) = fixture().await;
        let seller = Uuid::new_v4();
        let token = owned_token(&ledger, seller).await;

        store
            .transaction(|state| {
                state.token_mut(token.id).unwrap().remaining_minutes = 59;
                Ok(())
            })
            .await
            .unwrap();

        let err = market.create_listing(seller, token.id, 500).await.unwrap_err();
        assert_eq!(err, LedgerError::TokenNotListable(token.id));
    }

    #[tokio::test]
    async fn nonpositive_price_is_rejected() {
        let (_, ledger, market) = fixture().await;
        let seller = Uuid::new_v4();
        let token = owned_token(&ledger, seller).await;

        let err = market.create_listing(seller, token.id, 0).await.unwrap_err();
        assert_eq!(err, LedgerError::InvalidPrice(0));
    }

    #[tokio::test]
    async fn cancel_returns_token_to_owner() {
        let (_, ledger, market) = fixture().await;
        let seller = Uuid::new_v4();
        let token = owned_token(&ledger, seller).await;
        let listing = market.create_listing(seller, token.id, 500).await.unwrap();

        market.cancel_listing(seller, listing.id).await.unwrap();

        let token = ledger.token(token.id).await.unwrap();
        assert_eq!(token.status, TokenStatus::Owned);
        assert_eq!(token.remaining_minutes, 60);
        assert_eq!(
            market.listing(listing.id).await.unwrap().status,
            ListingStatus::Canceled
        );

        // A canceled listing cannot be canceled or bought.
        let err = market.cancel_listing(seller, listing.id).await.unwrap_err();
        assert_eq!(err, LedgerError::NotCancellable(listing.id));
        let err = market
            .fulfill_listing(Uuid::new_v4(), listing.id)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::ListingUnavailable(listing.id));
    }

    #[tokio::test]
    async fn only_the_seller_may_cancel() {
        let (_, ledger, market) = fixture().await;
        let seller = Uuid::new_v4();
        let token = owned_token(&ledger, seller).await;
        let listing = market.create_listing(seller, token.id, 500).await.unwrap();

        let err = market
            .cancel_listing(Uuid::new_v4(), listing.id)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::NotCancellable(listing.id));
    }

    #[tokio::test]
    async fn fulfillment_transfers_ownership_and_records_the_trade() {
        let (store, ledger, market) = fixture().await;
        let seller = Uuid::new_v4();
        let buyer = Uuid::new_v4();
        let token = owned_token(&ledger, seller).await;
        let listing = market.create_listing(seller, token.id, 500).await.unwrap();

        let trade = market.fulfill_listing(buyer, listing.id).await.unwrap();
        assert_eq!(trade.total_cents, 500);
        assert_eq!(trade.seller_id, seller);
        assert_eq!(trade.buyer_id, buyer);

        let token = ledger.token(token.id).await.unwrap();
        assert_eq!(token.owner_id, Some(buyer));
        assert_eq!(token.status, TokenStatus::Owned);
        assert_eq!(
            market.listing(listing.id).await.unwrap().status,
            ListingStatus::Filled
        );

        let entries = store.read(|s| s.entries_for_token(trade.token_id)).await;
        let reasons: Vec<LedgerReason> = entries.iter().map(|e| e.reason).collect();
        assert!(reasons.contains(&LedgerReason::SellP2p));
        assert!(reasons.contains(&LedgerReason::BuyP2p));
    }

    #[tokio::test]
    async fn self_trade_is_rejected() {
        let (_, ledger, market) = fixture().await;
        let seller = Uuid::new_v4();
        let token = owned_token(&ledger, seller).await;
        let listing = market.create_listing(seller, token.id, 500).await.unwrap();

        let err = market.fulfill_listing(seller, listing.id).await.unwrap_err();
        assert_eq!(err, LedgerError::InvalidTrade(seller));
        assert_eq!(
            market.listing(listing.id).await.unwrap().status,
            ListingStatus::Open
        );
    }

    #[tokio::test]
    async fn second_buyer_loses_the_race() {
        let (_, ledger, market) = fixture().await;
        let seller = Uuid::new_v4();
        let token = owned_token(&ledger, seller).await;
        let listing = market.create_listing(seller, token.id, 500).await.unwrap();

        market.fulfill_listing(Uuid::new_v4(), listing.id).await.unwrap();
        let err = market
            .fulfill_listing(Uuid::new_v4(), listing.id)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::ListingUnavailable(listing.id));
    }
}
