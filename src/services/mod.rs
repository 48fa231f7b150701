//! # Services Module
//!
//! Core business logic, one service per domain.
//!
//! ## Services Overview
//!
//! | Service | Responsibility |
//! |---------|---------------|
//! | `TokenLedger` | Token state machine: mint, reserve, charge, release, transfer |
//! | `Marketplace` | Listing lifecycle and atomic trade execution |
//! | `PaymentProcessor` | Idempotent fulfillment of external payment events |
//! | `BillingScheduler` | Per-call recurring minute billing |
//! | `CallService` | Call lifecycle records the billing engine consumes |
//! | `ReservationSweeper` | Releases reservations orphaned by crashes |
//!
//! All services share the [`LedgerStore`](crate::store::LedgerStore)
//! as their sole synchronization point.

pub mod billing;
pub mod calls;
pub mod marketplace;
pub mod payments;
pub mod reservation_sweeper;
pub mod token_ledger;

pub use billing::{BillablePolicy, BillingScheduler, BillingStart};
pub use calls::CallService;
pub use marketplace::Marketplace;
pub use payments::{PaymentEvent, PaymentOutcome, PaymentProcessor, Purchase};
pub use reservation_sweeper::ReservationSweeper;
pub use token_ledger::TokenLedger;
