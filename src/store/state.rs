//! # Store State and Record Queries
//!
//! `StoreState` is the in-memory table set behind [`LedgerStore`]; the
//! methods here are the query layer the services build on, grouped the
//! same way a SQL module would be:
//!
//! - `token_*` / `insert_token` - token table operations
//! - `listing_*` - listing table operations
//! - `payment_*` - payment table operations
//! - `call_*` - call table operations
//! - append-only inserts for trades and ledger entries
//!
//! All mutating methods run inside a [`LedgerStore::transaction`]
//! closure, so they can assume exclusive access and leave atomicity to
//! the store.
//!
//! [`LedgerStore`]: super::LedgerStore
//! [`LedgerStore::transaction`]: super::LedgerStore::transaction

use std::collections::HashMap;

use uuid::Uuid;

use super::models::*;

/// The full logical table set.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    tokens: HashMap<Uuid, TokenRecord>,
    listings: HashMap<Uuid, ListingRecord>,
    trades: Vec<TradeRecord>,
    payments: HashMap<String, PaymentRecord>,
    ledger_entries: Vec<LedgerEntryRecord>,
    calls: HashMap<Uuid, CallRecord>,
}

impl StoreState {
    pub fn new() -> Self {
        Self::default()
    }

    // ============================================
    // TOKEN QUERIES
    // ============================================

    pub fn token(&self, id: Uuid) -> Option<&TokenRecord> {
        self.tokens.get(&id)
    }

    pub fn token_mut(&mut self, id: Uuid) -> Option<&mut TokenRecord> {
        self.tokens.get_mut(&id)
    }

    pub fn insert_token(&mut self, token: TokenRecord) {
        self.tokens.insert(token.id, token);
    }

    /// All tokens owned by a user, oldest first.
    pub fn tokens_of(&self, owner: Uuid) -> Vec<TokenRecord> {
        let mut tokens: Vec<TokenRecord> = self
            .tokens
            .values()
            .filter(|t| t.owner_id == Some(owner))
            .cloned()
            .collect();
        tokens.sort_by_key(|t| (t.created_at, t.id));
        tokens
    }

    /// The oldest-created token a reservation may select for this owner:
    /// status `Owned` with minutes remaining.
    pub fn oldest_reservable(&self, owner: Uuid) -> Option<Uuid> {
        self.tokens
            .values()
            .filter(|t| {
                t.owner_id == Some(owner)
                    && t.status == TokenStatus::Owned
                    && t.remaining_minutes > 0
            })
            .min_by_key(|t| (t.created_at, t.id))
            .map(|t| t.id)
    }

    /// Up to `limit` unissued treasury tokens for a year, oldest first.
    pub fn treasury_tokens(&self, year: i32, limit: usize) -> Vec<Uuid> {
        let mut tokens: Vec<&TokenRecord> = self
            .tokens
            .values()
            .filter(|t| t.status == TokenStatus::Treasury && t.issued_year == year)
            .collect();
        tokens.sort_by_key(|t| (t.created_at, t.id));
        tokens.into_iter().take(limit).map(|t| t.id).collect()
    }

    /// How many unissued treasury tokens exist for a year.
    pub fn treasury_count(&self, year: i32) -> usize {
        self.tokens
            .values()
            .filter(|t| t.status == TokenStatus::Treasury && t.issued_year == year)
            .count()
    }

    /// How many non-spent tokens of a given issue year a user holds.
    /// Used for the per-user primary purchase cap.
    pub fn held_in_year(&self, owner: Uuid, year: i32) -> i64 {
        self.tokens
            .values()
            .filter(|t| {
                t.owner_id == Some(owner)
                    && t.issued_year == year
                    && matches!(
                        t.status,
                        TokenStatus::Owned | TokenStatus::Reserved | TokenStatus::Listed
                    )
            })
            .count() as i64
    }

    /// All currently reserved tokens. Used by the reservation sweep.
    pub fn reserved_tokens(&self) -> Vec<TokenRecord> {
        self.tokens
            .values()
            .filter(|t| t.status == TokenStatus::Reserved)
            .cloned()
            .collect()
    }

    // ============================================
    // LISTING QUERIES
    // ============================================

    pub fn listing(&self, id: Uuid) -> Option<&ListingRecord> {
        self.listings.get(&id)
    }

    pub fn listing_mut(&mut self, id: Uuid) -> Option<&mut ListingRecord> {
        self.listings.get_mut(&id)
    }

    pub fn insert_listing(&mut self, listing: ListingRecord) {
        self.listings.insert(listing.id, listing);
    }

    /// All open listings, newest first.
    pub fn open_listings(&self) -> Vec<ListingRecord> {
        let mut listings: Vec<ListingRecord> = self
            .listings
            .values()
            .filter(|l| l.status == ListingStatus::Open)
            .cloned()
            .collect();
        listings.sort_by_key(|l| std::cmp::Reverse((l.created_at, l.id)));
        listings
    }

    // ============================================
    // TRADE / LEDGER INSERTS (append-only)
    // ============================================

    pub fn insert_trade(&mut self, trade: TradeRecord) {
        self.trades.push(trade);
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn insert_ledger_entry(&mut self, entry: LedgerEntryRecord) {
        self.ledger_entries.push(entry);
    }

    /// Ledger entries for a token, in insertion order.
    pub fn entries_for_token(&self, token_id: Uuid) -> Vec<LedgerEntryRecord> {
        self.ledger_entries
            .iter()
            .filter(|e| e.token_id == token_id)
            .cloned()
            .collect()
    }

    // ============================================
    // PAYMENT QUERIES
    // ============================================

    pub fn payment(&self, reference: &str) -> Option<&PaymentRecord> {
        self.payments.get(reference)
    }

    pub fn payment_mut(&mut self, reference: &str) -> Option<&mut PaymentRecord> {
        self.payments.get_mut(reference)
    }

    /// Insert or replace the payment row for its reference.
    /// The reference is the primary key, so this doubles as the
    /// pending -> terminal status transition.
    pub fn upsert_payment(&mut self, payment: PaymentRecord) {
        self.payments.insert(payment.reference.clone(), payment);
    }

    // ============================================
    // CALL QUERIES
    // ============================================

    pub fn call(&self, id: Uuid) -> Option<&CallRecord> {
        self.calls.get(&id)
    }

    pub fn call_mut(&mut self, id: Uuid) -> Option<&mut CallRecord> {
        self.calls.get_mut(&id)
    }

    pub fn insert_call(&mut self, call: CallRecord) {
        self.calls.insert(call.id, call);
    }
}
