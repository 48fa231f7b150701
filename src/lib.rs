//! # MinuteMarket Backend
//!
//! Backend service for prepaid call-minute tokens: users buy tokens
//! from a treasury through an external payment processor, trade them
//! peer-to-peer on an internal marketplace and spend them minute by
//! minute while a call is active on billable days.
//!
//! The hard part lives in the ledger: a token must never be spent
//! twice, reserved by two calls at once, sold twice from one listing
//! or credited twice from a replayed payment event, while a per-call
//! ticker mutates the ledger in real time. Every mutating operation is
//! a short atomic transaction against the shared store; races are
//! decided by status checks inside the transaction, and losers surface
//! domain errors instead of blocking.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       BACKEND SERVICE                        │
//! │                                                              │
//! │  ┌───────────┐  ┌─────────────┐  ┌────────────────────────┐  │
//! │  │ REST API  │  │  WebSocket  │  │  Background Services   │  │
//! │  │ (Actix)   │  │  call ctrl  │  │  • Billing tickers     │  │
//! │  │           │  │  + relay    │  │  • Reservation sweep   │  │
//! │  └─────┬─────┘  └──────┬──────┘  └───────────┬────────────┘  │
//! │        │               │                     │               │
//! │  ┌─────┴───────────────┴─────────────────────┴────────────┐  │
//! │  │                     SERVICE LAYER                      │  │
//! │  │  TokenLedger · Marketplace · PaymentProcessor          │  │
//! │  │  CallService · BillingScheduler                        │  │
//! │  └───────────────────────────┬────────────────────────────┘  │
//! │                              │                               │
//! │                      ┌───────┴───────┐                       │
//! │                      │  LedgerStore  │                       │
//! │                      └───────────────┘                       │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use crate::config::AppConfig;
use crate::services::{
    BillingScheduler, CallService, Marketplace, PaymentProcessor, TokenLedger,
};
use crate::store::LedgerStore;
use crate::websocket::PresenceRegistry;

pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod store;
pub mod websocket;

/// Application state shared across all handlers and background tasks.
pub struct AppState {
    /// Application configuration.
    pub config: AppConfig,

    /// The shared transactional store.
    pub store: LedgerStore,

    /// Token state machine service.
    pub ledger: TokenLedger,

    /// Listing lifecycle and trade execution.
    pub marketplace: Marketplace,

    /// Idempotent payment fulfillment.
    pub payments: PaymentProcessor,

    /// Call lifecycle records.
    pub calls: CallService,

    /// Per-call billing tickers.
    pub billing: BillingScheduler,

    /// Online-presence registry for the real-time channel.
    pub presence: PresenceRegistry,
}
