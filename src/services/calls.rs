//! # Call Lifecycle Service
//!
//! The billing-relevant subset of call control: a call is created
//! `Ringing` on invite, marked `Active` on answer and closed as
//! `Ended` or `Failed`. Media and ICE signaling never touch this
//! service; it only records the lifecycle transitions the billing
//! scheduler consumes.

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::store::{CallRecord, CallStatus, LedgerError, LedgerStore};

/// Service owning call lifecycle records.
#[derive(Clone)]
pub struct CallService {
    store: LedgerStore,
}

impl CallService {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    /// Record a new ringing call between two users.
    pub async fn create_ringing(
        &self,
        caller_id: Uuid,
        callee_id: Uuid,
    ) -> Result<CallRecord, LedgerError> {
        let call = CallRecord {
            id: Uuid::new_v4(),
            caller_id,
            callee_id,
            status: CallStatus::Ringing,
            charged_minutes: 0,
            reserved_token_id: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        };
        let inserted = call.clone();
        self.store
            .transaction(move |state| {
                state.insert_call(call);
                Ok(())
            })
            .await?;

        debug!(call = %inserted.id, caller = %caller_id, callee = %callee_id, "call ringing");
        Ok(inserted)
    }

    /// Mark a ringing call active. A call already active stays
    /// untouched; terminal calls are never revived.
    pub async fn mark_active(&self, call_id: Uuid) -> Result<CallRecord, LedgerError> {
        self.store
            .transaction(|state| {
                let call = state
                    .call_mut(call_id)
                    .ok_or(LedgerError::CallNotFound(call_id))?;
                if call.status == CallStatus::Ringing {
                    call.status = CallStatus::Active;
                    call.started_at = Some(Utc::now());
                }
                Ok(call.clone())
            })
            .await
    }

    /// Close a call as `Ended` or `Failed`. Ending a call that is
    /// already terminal is a no-op.
    pub async fn end_call(
        &self,
        call_id: Uuid,
        reason: CallStatus,
    ) -> Result<CallRecord, LedgerError> {
        debug_assert!(reason.is_terminal());
        self.store
            .transaction(move |state| {
                let call = state
                    .call_mut(call_id)
                    .ok_or(LedgerError::CallNotFound(call_id))?;
                if !call.status.is_terminal() {
                    call.status = reason;
                    call.ended_at = Some(Utc::now());
                }
                Ok(call.clone())
            })
            .await
    }

    pub async fn get(&self, call_id: Uuid) -> Result<CallRecord, LedgerError> {
        self.store
            .read(|state| state.call(call_id).cloned())
            .await
            .ok_or(LedgerError::CallNotFound(call_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_transitions() {
        let calls = CallService::new(LedgerStore::new());
        let caller = Uuid::new_v4();
        let callee = Uuid::new_v4();

        let call = calls.create_ringing(caller, callee).await.unwrap();
        assert_eq!(call.status, CallStatus::Ringing);

        let call = calls.mark_active(call.id).await.unwrap();
        assert_eq!(call.status, CallStatus::Active);
        assert!(call.started_at.is_some());

        let call = calls.end_call(call.id, CallStatus::Ended).await.unwrap();
        assert_eq!(call.status, CallStatus::Ended);
        assert!(call.ended_at.is_some());
    }

    #[tokio::test]
    async fn ending_twice_keeps_first_outcome() {
        let calls = CallService::new(LedgerStore::new());
        let call = calls
            .create_ringing(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();

        calls.end_call(call.id, CallStatus::Failed).await.unwrap();
        let call = calls.end_call(call.id, CallStatus::Ended).await.unwrap();
        assert_eq!(call.status, CallStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_call_is_an_error() {
        let calls = CallService::new(LedgerStore::new());
        let err = calls.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, LedgerError::CallNotFound(_)));
    }
}
