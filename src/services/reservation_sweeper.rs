//! # Reservation Sweeper
//!
//! Tokens are left in `Reserved` when a process dies between a call's
//! start and its stop; nothing inside the billing scheduler can heal
//! that, because the scheduler's state died with the process. This
//! background loop reconciles the store instead: any reserved token
//! whose call is no longer running, and any reservation older than
//! the configured maximum age, is released back to its owner.
//!
//! A release racing a live ticker is harmless: release is idempotent
//! and a ticker charging a token that is no longer reserved
//! self-cancels on `InvalidTransition`.

use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::store::{LedgerError, LedgerStore, TokenRecord};

use super::token_ledger::TokenLedger;

/// Background reconciliation for orphaned reservations.
#[derive(Clone)]
pub struct ReservationSweeper {
    store: LedgerStore,
    ledger: TokenLedger,
    sweep_interval: Duration,
    max_reservation_age: chrono::Duration,
}

impl ReservationSweeper {
    pub fn new(store: LedgerStore, ledger: TokenLedger, config: &AppConfig) -> Self {
        Self {
            store,
            ledger,
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            max_reservation_age: chrono::Duration::seconds(config.max_reservation_secs),
        }
    }

    /// Run the sweep loop forever. Spawn as a background task.
    pub async fn run(&self) {
        info!(
            "starting reservation sweeper (interval: {}s)",
            self.sweep_interval.as_secs()
        );
        let mut ticker = interval(self.sweep_interval);
        // Skip the immediate first tick; there is nothing to sweep at boot.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match self.sweep_once().await {
                Ok(0) => debug!("reservation sweep found nothing to release"),
                Ok(released) => info!(released, "reservation sweep released orphaned tokens"),
                Err(e) => error!(%e, "reservation sweep failed"),
            }
        }
    }

    /// One sweep pass. Returns how many reservations were released.
    pub async fn sweep_once(&self) -> Result<usize, LedgerError> {
        let reserved = self.store.read(|state| state.reserved_tokens()).await;
        let now = Utc::now();

        let mut released = 0;
        for token in reserved {
            if !self.is_orphaned(&token, now).await {
                continue;
            }
            warn!(
                token = %token.id,
                call = ?token.reserved_call_id,
                "releasing orphaned reservation"
            );
            self.ledger.release(token.id).await?;
            released += 1;
        }
        Ok(released)
    }

    async fn is_orphaned(&self, token: &TokenRecord, now: chrono::DateTime<Utc>) -> bool {
        // A reservation without a live call has nobody left to release it.
        let call_gone = match token.reserved_call_id {
            Some(call_id) => self
                .store
                .read(move |state| state.call(call_id).map(|c| c.status.is_terminal()))
                .await
                .unwrap_or(true),
            None => true,
        };
        if call_gone {
            return true;
        }

        // A live call that has held a reservation far past any
        // plausible duration counts as orphaned too.
        match token.reserved_at {
            Some(at) => now - at > self.max_reservation_age,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::services::calls::CallService;
    use crate::store::{CallStatus, TokenStatus};

    use super::*;

    fn fixture() -> (LedgerStore, TokenLedger, CallService, ReservationSweeper) {
        let store = LedgerStore::new();
        let ledger = TokenLedger::new(store.clone());
        let calls = CallService::new(store.clone());
        let sweeper = ReservationSweeper::new(store.clone(), ledger.clone(), &AppConfig::for_tests());
        (store, ledger, calls, sweeper)
    }

    #[tokio::test]
    async fn releases_reservations_of_ended_calls() {
        let (_, ledger, calls, sweeper) = fixture();
        let payer = Uuid::new_v4();
        ledger.mint(Some(payer), 60, 2025).await.unwrap();
        let call = calls.create_ringing(payer, Uuid::new_v4()).await.unwrap();
        let token = ledger.reserve_for_billing(payer, call.id).await.unwrap();

        // The call ends but nobody ran stop (simulated crash).
        calls.end_call(call.id, CallStatus::Ended).await.unwrap();

        let released = sweeper.sweep_once().await.unwrap();
        assert_eq!(released, 1);
        assert_eq!(
            ledger.token(token.id).await.unwrap().status,
            TokenStatus::Owned
        );
    }

    #[tokio::test]
    async fn leaves_active_reservations_alone() {
        let (_, ledger, calls, sweeper) = fixture();
        let payer = Uuid::new_v4();
        ledger.mint(Some(payer), 60, 2025).await.unwrap();
        let call = calls.create_ringing(payer, Uuid::new_v4()).await.unwrap();
        calls.mark_active(call.id).await.unwrap();
        let token = ledger.reserve_for_billing(payer, call.id).await.unwrap();

        let released = sweeper.sweep_once().await.unwrap();
        assert_eq!(released, 0);
        assert_eq!(
            ledger.token(token.id).await.unwrap().status,
            TokenStatus::Reserved
        );
    }

    #[tokio::test]
    async fn releases_reservations_past_the_maximum_age() {
        let (store, ledger, calls, sweeper) = fixture();
        let payer = Uuid::new_v4();
        ledger.mint(Some(payer), 60, 2025).await.unwrap();
        let call = calls.create_ringing(payer, Uuid::new_v4()).await.unwrap();
        calls.mark_active(call.id).await.unwrap();
        let token = ledger.reserve_for_billing(payer, call.id).await.unwrap();

        // Age the reservation past the cutoff.
        store
            .transaction(|state| {
                let t = state.token_mut(token.id).unwrap();
                t.reserved_at = Some(Utc::now() - chrono::Duration::hours(3));
                Ok(())
            })
            .await
            .unwrap();

        let released = sweeper.sweep_once().await.unwrap();
        assert_eq!(released, 1);
        assert_eq!(
            ledger.token(token.id).await.unwrap().status,
            TokenStatus::Owned
        );
    }
}
