//! # Call Billing Scheduler
//!
//! One recurring background task per active call: reserve a token at
//! call start, charge one minute per elapsed interval while the call
//! stays active, release on stop.
//!
//! ## Ticker Flow
//!
//! ```text
//! start(call, payer)
//!        │
//!        ├── not a billable day ──────────► no reservation, call runs free
//!        ├── no reservable token ─────────► call ends Failed
//!        └── token reserved
//!                 │
//!                 ▼
//!        spawned ticker task (one per call)
//!        every interval: re-check policy, charge one minute
//!                 │
//!   stop(call) ───┴──► cancel, let in-flight charge finish, release
//! ```
//!
//! Per-call state is checked-and-set under one mutex, so a second
//! `start` for the same call can never spawn a second ticker.
//! Cancellation is cooperative: the token is polled between firings
//! and an in-flight charge always completes. The interval coalesces
//! missed ticks, so a slow store delays a charge but never doubles it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc, Weekday};
use chrono_tz::Tz;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::store::{CallStatus, LedgerError};

use super::calls::CallService;
use super::token_ledger::TokenLedger;

/// Decides whether call minutes are metered right now.
///
/// Billing happens on one configured weekday in one configured
/// timezone; outside it calls are free and no token is touched. The
/// `Always`/`Never` modes exist for the config override and for tests.
#[derive(Debug, Clone)]
pub enum BillablePolicy {
    Always,
    Never,
    Weekday { day: Weekday, tz: Tz },
}

impl BillablePolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        if config.force_billable {
            BillablePolicy::Always
        } else {
            BillablePolicy::Weekday {
                day: config.billing_day,
                tz: config.billing_timezone,
            }
        }
    }

    pub fn is_billable_at(&self, at: DateTime<Utc>) -> bool {
        match self {
            BillablePolicy::Always => true,
            BillablePolicy::Never => false,
            BillablePolicy::Weekday { day, tz } => at.with_timezone(tz).weekday() == *day,
        }
    }

    pub fn is_billable_now(&self) -> bool {
        self.is_billable_at(Utc::now())
    }
}

/// What `start` did for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingStart {
    /// A ticker for this call already runs; nothing changed.
    AlreadyRunning,
    /// Not a billable day; the call proceeds unbilled.
    NotBillable,
    /// No reservable token; the call was ended as failed.
    NoBalance,
    /// Token reserved and ticker scheduled.
    Started { token_id: Uuid },
}

struct ActiveTicker {
    token_id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

type TickerMap = Arc<Mutex<HashMap<Uuid, ActiveTicker>>>;

/// Per-call recurring billing, one ticker per active call.
#[derive(Clone)]
pub struct BillingScheduler {
    ledger: TokenLedger,
    calls: CallService,
    policy: Arc<BillablePolicy>,
    tick_period: Duration,
    tickers: TickerMap,
}

impl BillingScheduler {
    pub fn new(
        ledger: TokenLedger,
        calls: CallService,
        policy: BillablePolicy,
        tick_period: Duration,
    ) -> Self {
        Self {
            ledger,
            calls,
            policy: Arc::new(policy),
            tick_period,
            tickers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Begin billing for a call. Idempotent per call id.
    ///
    /// Reservation failure is a normal business outcome: the call is
    /// ended as `Failed` and no ticker is scheduled.
    pub async fn start(&self, call_id: Uuid, payer_id: Uuid) -> Result<BillingStart, LedgerError> {
        // The map lock is held across the reservation so a concurrent
        // start for the same call cannot slip in between the check and
        // the insert.
        let mut tickers = self.tickers.lock().await;
        if tickers.contains_key(&call_id) {
            return Ok(BillingStart::AlreadyRunning);
        }

        if !self.policy.is_billable_now() {
            debug!(call = %call_id, "not a billable day; call runs unbilled");
            return Ok(BillingStart::NotBillable);
        }

        let token = match self.ledger.reserve_for_billing(payer_id, call_id).await {
            Ok(token) => token,
            Err(LedgerError::InsufficientBalance(_)) => {
                info!(call = %call_id, payer = %payer_id, "no token to reserve; ending call");
                self.calls.end_call(call_id, CallStatus::Failed).await?;
                return Ok(BillingStart::NoBalance);
            }
            Err(e) => return Err(e),
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Self::run_ticker(
            self.ledger.clone(),
            self.policy.clone(),
            self.tickers.clone(),
            cancel.clone(),
            self.tick_period,
            call_id,
            token.id,
        ));
        tickers.insert(
            call_id,
            ActiveTicker {
                token_id: token.id,
                cancel,
                task,
            },
        );

        info!(call = %call_id, token = %token.id, "billing started");
        Ok(BillingStart::Started { token_id: token.id })
    }

    async fn run_ticker(
        ledger: TokenLedger,
        policy: Arc<BillablePolicy>,
        tickers: TickerMap,
        cancel: CancellationToken,
        period: Duration,
        call_id: Uuid,
        token_id: Uuid,
    ) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval completes immediately;
        // the first charge belongs at the end of the first minute.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    // A long call can cross out of the billable window.
                    if !policy.is_billable_now() {
                        debug!(call = %call_id, "billable window closed; skipping charge");
                        continue;
                    }
                    match ledger.charge_minute(token_id, call_id).await {
                        Ok(token) => {
                            debug!(call = %call_id, token = %token_id, remaining = token.remaining_minutes, "minute charged");
                        }
                        Err(LedgerError::InvalidTransition { .. }) => {
                            // The token is no longer this call's
                            // reservation (spent, or stop raced us).
                            warn!(call = %call_id, token = %token_id, "token no longer reserved; ticker self-canceling");
                            let mut map = tickers.lock().await;
                            // Only remove our own registration; stop()
                            // may already have replaced or cleared it.
                            if map.get(&call_id).map(|t| t.token_id) == Some(token_id) {
                                map.remove(&call_id);
                            }
                            break;
                        }
                        Err(e) => {
                            error!(call = %call_id, token = %token_id, %e, "charge failed; retrying next tick");
                        }
                    }
                }
            }
        }
    }

    /// Stop billing for a call. Idempotent.
    ///
    /// Cancels the ticker, waits for any in-flight charge to finish,
    /// then releases the reservation exactly once.
    pub async fn stop(&self, call_id: Uuid) -> Result<(), LedgerError> {
        let removed = {
            let mut tickers = self.tickers.lock().await;
            tickers.remove(&call_id)
        };

        let Some(ticker) = removed else {
            return Ok(());
        };

        ticker.cancel.cancel();
        if let Err(e) = ticker.task.await {
            if !e.is_cancelled() {
                error!(call = %call_id, %e, "ticker task panicked");
            }
        }

        self.ledger.release(ticker.token_id).await?;
        info!(call = %call_id, token = %ticker.token_id, "billing stopped");
        Ok(())
    }

    /// Whether a ticker currently runs for the call.
    pub async fn is_running(&self, call_id: Uuid) -> bool {
        self.tickers.lock().await.contains_key(&call_id)
    }
}
