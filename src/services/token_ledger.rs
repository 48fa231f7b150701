//! # Token Ledger Service
//!
//! Owns the token state machine: mint, reserve, charge, release,
//! transfer. Every mutating operation is one short store transaction,
//! so concurrent callers racing on the same token are decided by the
//! status checks inside the transaction rather than by locks held
//! across calls.
//!
//! ## Responsibilities
//!
//! - Mint tokens into the treasury or directly to an owner
//! - Reserve the oldest eligible token at call start
//! - Charge one minute per elapsed billing interval
//! - Release reservations at call end
//! - Reassign ownership for marketplace and treasury sales
//!
//! Minute history is mirrored into append-only ledger entries; for any
//! token the entry deltas sum to its remaining minutes.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::{
    LedgerEntryRecord, LedgerError, LedgerReason, LedgerStore, StoreState, TokenRecord,
    TokenStatus,
};

/// Service owning token lifecycle transitions.
#[derive(Clone)]
pub struct TokenLedger {
    store: LedgerStore,
}

impl TokenLedger {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    // ==========================================
    // MINTING
    // ==========================================

    /// Mint one token.
    ///
    /// With an owner the token starts `Owned`; without one it sits in
    /// the treasury awaiting primary purchase. Appends a `Mint` ledger
    /// entry crediting the full minute allotment.
    pub async fn mint(
        &self,
        owner_id: Option<Uuid>,
        minutes: i64,
        year: i32,
    ) -> Result<TokenRecord, LedgerError> {
        self.store
            .transaction(|state| Ok(Self::mint_on(state, owner_id, minutes, year)))
            .await
    }

    /// Mint a batch of treasury tokens in one transaction.
    pub async fn mint_batch(
        &self,
        owner_id: Option<Uuid>,
        minutes: i64,
        year: i32,
        quantity: u32,
    ) -> Result<Vec<TokenRecord>, LedgerError> {
        let tokens = self
            .store
            .transaction(|state| {
                let tokens: Vec<TokenRecord> = (0..quantity)
                    .map(|_| Self::mint_on(state, owner_id, minutes, year))
                    .collect();
                Ok(tokens)
            })
            .await?;

        info!(
            quantity,
            year, minutes, "minted {} tokens into the treasury", tokens.len()
        );
        Ok(tokens)
    }

    /// State-level mint, composable inside other transactions.
    pub(crate) fn mint_on(
        state: &mut StoreState,
        owner_id: Option<Uuid>,
        minutes: i64,
        year: i32,
    ) -> TokenRecord {
        let token = TokenRecord {
            id: Uuid::new_v4(),
            owner_id,
            remaining_minutes: minutes,
            status: if owner_id.is_some() {
                TokenStatus::Owned
            } else {
                TokenStatus::Treasury
            },
            issued_year: year,
            reserved_call_id: None,
            reserved_at: None,
            created_at: Utc::now(),
        };

        state.insert_ledger_entry(LedgerEntryRecord {
            id: Uuid::new_v4(),
            user_id: owner_id,
            token_id: token.id,
            delta_minutes: minutes,
            reason: LedgerReason::Mint,
            reference: format!("mint:{year}"),
            created_at: Utc::now(),
        });
        state.insert_token(token.clone());
        token
    }

    // ==========================================
    // BILLING TRANSITIONS
    // ==========================================

    /// Reserve the owner's oldest eligible token for a call.
    ///
    /// Selection and the `Owned -> Reserved` transition happen in one
    /// transaction, so two concurrent reservations for the same owner
    /// can never pick the same token: the second reservation no longer
    /// sees it as `Owned`.
    ///
    /// Fails with `InsufficientBalance` when the owner has no owned
    /// token with minutes remaining.
    pub async fn reserve_for_billing(
        &self,
        owner_id: Uuid,
        call_id: Uuid,
    ) -> Result<TokenRecord, LedgerError> {
        let token = self
            .store
            .transaction(|state| {
                state.call(call_id).ok_or(LedgerError::CallNotFound(call_id))?;

                let token_id = state
                    .oldest_reservable(owner_id)
                    .ok_or(LedgerError::InsufficientBalance(owner_id))?;

                let now = Utc::now();
                let token = state
                    .token_mut(token_id)
                    .ok_or(LedgerError::TokenNotFound(token_id))?;
                token.status = TokenStatus::Reserved;
                token.reserved_call_id = Some(call_id);
                token.reserved_at = Some(now);
                let token = token.clone();

                if let Some(call) = state.call_mut(call_id) {
                    call.reserved_token_id = Some(token_id);
                }
                Ok(token)
            })
            .await?;

        debug!(token = %token.id, call = %call_id, owner = %owner_id, "token reserved for billing");
        Ok(token)
    }

    /// Charge one minute against a token reserved for `call_id`.
    ///
    /// Decrements the token, increments the call's charged minutes and
    /// appends a `CallCharge` entry. Reaching zero minutes spends the
    /// token. Fails with `InvalidTransition` when the token is not
    /// currently reserved for that call, which is the defensive check
    /// against stale or duplicate timer firings.
    pub async fn charge_minute(
        &self,
        token_id: Uuid,
        call_id: Uuid,
    ) -> Result<TokenRecord, LedgerError> {
        self.store
            .transaction(|state| {
                let token = state
                    .token(token_id)
                    .ok_or(LedgerError::TokenNotFound(token_id))?;
                if token.status != TokenStatus::Reserved
                    || token.reserved_call_id != Some(call_id)
                {
                    return Err(LedgerError::InvalidTransition {
                        token: token_id,
                        call: call_id,
                    });
                }
                let owner = token.owner_id;

                state
                    .call_mut(call_id)
                    .ok_or(LedgerError::CallNotFound(call_id))?
                    .charged_minutes += 1;

                let token = state
                    .token_mut(token_id)
                    .ok_or(LedgerError::TokenNotFound(token_id))?;
                token.remaining_minutes -= 1;
                if token.remaining_minutes == 0 {
                    token.status = TokenStatus::Spent;
                    token.reserved_call_id = None;
                    token.reserved_at = None;
                    if let Some(call) = state.call_mut(call_id) {
                        call.reserved_token_id = None;
                    }
                }
                let token = state
                    .token(token_id)
                    .cloned()
                    .ok_or(LedgerError::TokenNotFound(token_id))?;

                state.insert_ledger_entry(LedgerEntryRecord {
                    id: Uuid::new_v4(),
                    user_id: owner,
                    token_id,
                    delta_minutes: -1,
                    reason: LedgerReason::CallCharge,
                    reference: call_id.to_string(),
                    created_at: Utc::now(),
                });
                Ok(token)
            })
            .await
    }

    /// Release a reservation.
    ///
    /// A reserved token with minutes left goes back to `Owned`; a
    /// token that is not reserved is left untouched, which makes a
    /// second release a no-op.
    pub async fn release(&self, token_id: Uuid) -> Result<(), LedgerError> {
        self.store
            .transaction(|state| {
                let token = state
                    .token(token_id)
                    .ok_or(LedgerError::TokenNotFound(token_id))?;
                if token.status != TokenStatus::Reserved {
                    return Ok(());
                }
                let owner = token.owner_id;
                let call_id = token.reserved_call_id;

                let token = state
                    .token_mut(token_id)
                    .ok_or(LedgerError::TokenNotFound(token_id))?;
                token.status = TokenStatus::Owned;
                token.reserved_call_id = None;
                token.reserved_at = None;

                if let Some(call_id) = call_id {
                    if let Some(call) = state.call_mut(call_id) {
                        call.reserved_token_id = None;
                    }
                }

                state.insert_ledger_entry(LedgerEntryRecord {
                    id: Uuid::new_v4(),
                    user_id: owner,
                    token_id,
                    delta_minutes: 0,
                    reason: LedgerReason::Release,
                    reference: call_id.map(|c| c.to_string()).unwrap_or_default(),
                    created_at: Utc::now(),
                });
                Ok(())
            })
            .await
    }

    // ==========================================
    // OWNERSHIP
    // ==========================================

    /// Reassign ownership after a sale.
    ///
    /// The expected status (`Listed` for a marketplace sale,
    /// `Treasury` for a primary sale) is checked in the same
    /// transaction that reassigns the owner; any mismatch is a
    /// `TokenNotTransferable` invariant violation.
    pub async fn transfer_ownership(
        &self,
        token_id: Uuid,
        new_owner: Uuid,
        expected_status: TokenStatus,
    ) -> Result<(), LedgerError> {
        self.store
            .transaction(|state| Self::transfer_on(state, token_id, new_owner, expected_status))
            .await
    }

    /// State-level transfer, composable inside other transactions.
    pub(crate) fn transfer_on(
        state: &mut StoreState,
        token_id: Uuid,
        new_owner: Uuid,
        expected_status: TokenStatus,
    ) -> Result<(), LedgerError> {
        let token = state
            .token_mut(token_id)
            .ok_or(LedgerError::TokenNotFound(token_id))?;
        if token.status != expected_status {
            return Err(LedgerError::TokenNotTransferable(token_id));
        }
        token.owner_id = Some(new_owner);
        token.status = TokenStatus::Owned;
        Ok(())
    }

    // ==========================================
    // QUERIES
    // ==========================================

    /// Wallet view: all tokens owned by a user, oldest first.
    pub async fn tokens_of(&self, owner_id: Uuid) -> Vec<TokenRecord> {
        self.store.read(|state| state.tokens_of(owner_id)).await
    }

    /// How many unissued treasury tokens remain for a year.
    pub async fn treasury_supply(&self, year: i32) -> usize {
        self.store.read(|state| state.treasury_count(year)).await
    }

    pub async fn token(&self, token_id: Uuid) -> Result<TokenRecord, LedgerError> {
        self.store
            .read(|state| state.token(token_id).cloned())
            .await
            .ok_or(LedgerError::TokenNotFound(token_id))
    }
}

#[cfg(test)]
mod tests {
    use crate::services::calls::CallService;
    use crate::store::{CallStatus, LedgerReason};

    use super::*;

    async fn fixture() -> (LedgerStore, TokenLedger, CallService) {
        let store = LedgerStore::new();
        (
            store.clone(),
            TokenLedger::new(store.clone()),
            CallService::new(store),
        )
    }

    #[tokio::test]
    async fn mint_without_owner_lands_in_treasury() {
        let (_, ledger, _) = fixture().await;
        let token = ledger.mint(None, 60, 2025).await.unwrap();
        assert_eq!(token.status, TokenStatus::Treasury);
        assert_eq!(token.owner_id, None);
        assert_eq!(ledger.treasury_supply(2025).await, 1);
    }

    #[tokio::test]
    async fn mint_with_owner_is_owned() {
        let (_, ledger, _) = fixture().await;
        let user = Uuid::new_v4();
        let token = ledger.mint(Some(user), 60, 2025).await.unwrap();
        assert_eq!(token.status, TokenStatus::Owned);
        assert_eq!(ledger.tokens_of(user).await.len(), 1);
    }

    #[tokio::test]
    async fn reserve_picks_oldest_owned_token() {
        let (_, ledger, calls) = fixture().await;
        let user = Uuid::new_v4();
        let first = ledger.mint(Some(user), 60, 2025).await.unwrap();
        let _second = ledger.mint(Some(user), 60, 2025).await.unwrap();

        let call = calls.create_ringing(user, Uuid::new_v4()).await.unwrap();
        let reserved = ledger.reserve_for_billing(user, call.id).await.unwrap();

        assert_eq!(reserved.id, first.id);
        assert_eq!(reserved.status, TokenStatus::Reserved);
        assert_eq!(reserved.reserved_call_id, Some(call.id));
    }

    #[tokio::test]
    async fn reserve_with_no_tokens_is_insufficient_balance() {
        let (_, ledger, calls) = fixture().await;
        let user = Uuid::new_v4();
        let call = calls.create_ringing(user, Uuid::new_v4()).await.unwrap();

        let err = ledger.reserve_for_billing(user, call.id).await.unwrap_err();
        assert_eq!(err, LedgerError::InsufficientBalance(user));
    }

    #[tokio::test]
    async fn two_reservations_never_pick_the_same_token() {
        let (_, ledger, calls) = fixture().await;
        let user = Uuid::new_v4();
        ledger.mint(Some(user), 60, 2025).await.unwrap();
        ledger.mint(Some(user), 60, 2025).await.unwrap();

        let call_a = calls.create_ringing(user, Uuid::new_v4()).await.unwrap();
        let call_b = calls.create_ringing(user, Uuid::new_v4()).await.unwrap();

        let a = ledger.reserve_for_billing(user, call_a.id).await.unwrap();
        let b = ledger.reserve_for_billing(user, call_b.id).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn charge_decrements_and_records() {
        let (store, ledger, calls) = fixture().await;
        let user = Uuid::new_v4();
        ledger.mint(Some(user), 60, 2025).await.unwrap();
        let call = calls.create_ringing(user, Uuid::new_v4()).await.unwrap();
        calls.mark_active(call.id).await.unwrap();
        let token = ledger.reserve_for_billing(user, call.id).await.unwrap();

        let charged = ledger.charge_minute(token.id, call.id).await.unwrap();
        assert_eq!(charged.remaining_minutes, 59);
        assert_eq!(charged.status, TokenStatus::Reserved);

        let call = calls.get(call.id).await.unwrap();
        assert_eq!(call.charged_minutes, 1);

        let entries = store.read(|s| s.entries_for_token(token.id)).await;
        let charges: Vec<_> = entries
            .iter()
            .filter(|e| e.reason == LedgerReason::CallCharge)
            .collect();
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].delta_minutes, -1);
    }

    #[tokio::test]
    async fn charge_for_wrong_call_is_invalid_transition() {
        let (_, ledger, calls) = fixture().await;
        let user = Uuid::new_v4();
        ledger.mint(Some(user), 60, 2025).await.unwrap();
        let call = calls.create_ringing(user, Uuid::new_v4()).await.unwrap();
        let other = calls.create_ringing(user, Uuid::new_v4()).await.unwrap();
        let token = ledger.reserve_for_billing(user, call.id).await.unwrap();

        let err = ledger.charge_minute(token.id, other.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn last_minute_spends_the_token() {
        let (_, ledger, calls) = fixture().await;
        let user = Uuid::new_v4();
        ledger.mint(Some(user), 1, 2025).await.unwrap();
        let call = calls.create_ringing(user, Uuid::new_v4()).await.unwrap();
        calls.mark_active(call.id).await.unwrap();
        let token = ledger.reserve_for_billing(user, call.id).await.unwrap();

        let charged = ledger.charge_minute(token.id, call.id).await.unwrap();
        assert_eq!(charged.remaining_minutes, 0);
        assert_eq!(charged.status, TokenStatus::Spent);
        assert_eq!(charged.reserved_call_id, None);

        // Spent is terminal: never selected again.
        let next = calls.create_ringing(user, Uuid::new_v4()).await.unwrap();
        let err = ledger.reserve_for_billing(user, next.id).await.unwrap_err();
        assert_eq!(err, LedgerError::InsufficientBalance(user));
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let (_, ledger, calls) = fixture().await;
        let user = Uuid::new_v4();
        ledger.mint(Some(user), 60, 2025).await.unwrap();
        let call = calls.create_ringing(user, Uuid::new_v4()).await.unwrap();
        let token = ledger.reserve_for_billing(user, call.id).await.unwrap();

        ledger.release(token.id).await.unwrap();
        let released = ledger.token(token.id).await.unwrap();
        assert_eq!(released.status, TokenStatus::Owned);
        assert_eq!(released.remaining_minutes, 60);

        // Second release is a no-op.
        ledger.release(token.id).await.unwrap();
        assert_eq!(
            ledger.token(token.id).await.unwrap().status,
            TokenStatus::Owned
        );
    }

    #[tokio::test]
    async fn transfer_checks_expected_status() {
        let (_, ledger, _) = fixture().await;
        let buyer = Uuid::new_v4();
        let token = ledger.mint(None, 60, 2025).await.unwrap();

        // Wrong expectation fails and changes nothing.
        let err = ledger
            .transfer_ownership(token.id, buyer, TokenStatus::Listed)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::TokenNotTransferable(token.id));
        assert_eq!(
            ledger.token(token.id).await.unwrap().status,
            TokenStatus::Treasury
        );

        ledger
            .transfer_ownership(token.id, buyer, TokenStatus::Treasury)
            .await
            .unwrap();
        let transferred = ledger.token(token.id).await.unwrap();
        assert_eq!(transferred.owner_id, Some(buyer));
        assert_eq!(transferred.status, TokenStatus::Owned);
    }

    #[tokio::test]
    async fn entry_deltas_reconcile_with_remaining_minutes() {
        let (store, ledger, calls) = fixture().await;
        let user = Uuid::new_v4();
        ledger.mint(Some(user), 60, 2025).await.unwrap();
        let call = calls.create_ringing(user, Uuid::new_v4()).await.unwrap();
        calls.mark_active(call.id).await.unwrap();
        let token = ledger.reserve_for_billing(user, call.id).await.unwrap();
        for _ in 0..3 {
            ledger.charge_minute(token.id, call.id).await.unwrap();
        }
        ledger.release(token.id).await.unwrap();

        let entries = store.read(|s| s.entries_for_token(token.id)).await;
        let sum: i64 = entries.iter().map(|e| e.delta_minutes).sum();
        assert_eq!(sum, ledger.token(token.id).await.unwrap().remaining_minutes);
        assert_eq!(sum, 57);
    }

    #[tokio::test]
    async fn ended_call_state_survives_release() {
        let (_, ledger, calls) = fixture().await;
        let user = Uuid::new_v4();
        ledger.mint(Some(user), 60, 2025).await.unwrap();
        let call = calls.create_ringing(user, Uuid::new_v4()).await.unwrap();
        let token = ledger.reserve_for_billing(user, call.id).await.unwrap();

        calls.end_call(call.id, CallStatus::Ended).await.unwrap();
        ledger.release(token.id).await.unwrap();

        let call = calls.get(call.id).await.unwrap();
        assert_eq!(call.reserved_token_id, None);
    }
}
