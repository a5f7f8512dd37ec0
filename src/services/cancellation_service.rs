use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    AdminDecision, Caller, CancellationFilter, CancellationRequest, Page, TransactionRecord,
    TransactionStatus, TransactionView, WalletSnapshot,
};
use crate::observability::{get_metrics, mask_uuid};
use crate::repositories::{finish, LedgerStore, UnitOfWork};
use crate::services::cancellation_processor::{apply_reversal, plan_reversal};
use crate::services::eligibility::{
    normalize_admin_reason, normalize_reason, validate_approval_eligibility,
    validate_cancellation_eligibility,
};
use crate::services::ledger_service::{LedgerPolicy, TransactionStateMachine};

/// Result of an approved cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationOutcome {
    pub request: CancellationRequest,
    pub transaction: TransactionView,
    /// Wallets whose balance the reversal changed.
    pub wallets: Vec<WalletSnapshot>,
}

/// Request, approve and reject reversals of past transactions.
#[derive(Clone)]
pub struct CancellationService {
    store: Arc<dyn LedgerStore>,
    policy: LedgerPolicy,
}

impl CancellationService {
    pub fn new(store: Arc<dyn LedgerStore>, policy: LedgerPolicy) -> Self {
        Self { store, policy }
    }

    /// Files a pending cancellation request against one of the caller's transactions.
    #[instrument(skip(self, reason), fields(user_id = %caller.user_id))]
    pub async fn request_cancellation(
        &self,
        caller: &Caller,
        transaction_id: Uuid,
        reason: &str,
    ) -> Result<CancellationRequest> {
        let reason = normalize_reason(reason)?;

        let mut uow = self.store.begin().await?;
        let outcome = self
            .apply_request(uow.as_mut(), caller, transaction_id, reason)
            .await;
        let request = finish(uow, outcome).await?;

        get_metrics().record_cancellation_requested(&request.priority.to_string());
        info!(
            request_id = %request.id,
            transaction_id = %transaction_id,
            requester = %mask_uuid(&caller.user_id),
            priority = %request.priority,
            "Cancellation requested"
        );

        Ok(request)
    }

    async fn apply_request(
        &self,
        uow: &mut dyn UnitOfWork,
        caller: &Caller,
        transaction_id: Uuid,
        reason: String,
    ) -> Result<CancellationRequest> {
        let (mut tx, linked) = self.lock_legs(uow, transaction_id).await?;

        let wallet = self
            .store
            .find_wallet(tx.wallet_id)
            .await?
            .ok_or(AppError::TransactionNotFound(transaction_id))?;
        if !wallet.is_owned_by(caller.user_id) {
            return Err(AppError::NotOwner);
        }

        // a pending request on either transfer leg covers the whole transfer
        let mut has_pending = uow.has_pending_cancellation(tx.id).await?;
        if let Some(leg) = &linked {
            has_pending = has_pending || uow.has_pending_cancellation(leg.id).await?;
        }
        validate_cancellation_eligibility(&tx, has_pending, Utc::now(), self.policy.cancellation_window)?;

        let request = CancellationRequest::new(tx.id, caller.user_id, reason, tx.amount);
        uow.insert_cancellation_request(&request).await?;

        tx.link_cancel_request(request.id);
        uow.update_transaction(&tx).await?;

        Ok(request)
    }

    /// Locks a transaction together with its linked transfer leg, in id order.
    async fn lock_legs(
        &self,
        uow: &mut dyn UnitOfWork,
        transaction_id: Uuid,
    ) -> Result<(TransactionRecord, Option<TransactionRecord>)> {
        // unlocked read to learn the linked leg
        let linked_id = self
            .store
            .find_transaction(transaction_id)
            .await?
            .ok_or(AppError::TransactionNotFound(transaction_id))?
            .linked_transaction_id;

        let mut ids: Vec<Uuid> = std::iter::once(transaction_id).chain(linked_id).collect();
        ids.sort();

        let mut target: Option<TransactionRecord> = None;
        let mut linked: Option<TransactionRecord> = None;
        for id in ids {
            let tx = uow
                .lock_transaction(id)
                .await?
                .ok_or(AppError::TransactionNotFound(id))?;
            if id == transaction_id {
                target = Some(tx);
            } else {
                linked = Some(tx);
            }
        }
        let target = target.ok_or(AppError::TransactionNotFound(transaction_id))?;
        Ok((target, linked))
    }

    /// Approves a pending request: reverses the transaction's balance effect, cancels the
    /// transaction and any linked transfer leg, and resolves the request.
    #[instrument(skip(self, admin_reason), fields(admin_id = %caller.user_id))]
    pub async fn approve(
        &self,
        caller: &Caller,
        request_id: Uuid,
        admin_reason: &str,
    ) -> Result<CancellationOutcome> {
        if !caller.is_admin() {
            return Err(AppError::AdminRequired);
        }
        let admin_reason = normalize_admin_reason(admin_reason)?;

        let mut uow = self.store.begin().await?;
        let outcome = self
            .apply_approve(uow.as_mut(), caller, request_id, admin_reason)
            .await;
        let outcome = finish(uow, outcome).await?;

        get_metrics().record_cancellation_resolved(
            &AdminDecision::Approve.to_string(),
            &outcome.transaction.transaction_type.to_string(),
        );
        info!(
            request_id = %request_id,
            transaction_id = %outcome.transaction.id,
            "Cancellation approved"
        );

        Ok(outcome)
    }

    async fn apply_approve(
        &self,
        uow: &mut dyn UnitOfWork,
        caller: &Caller,
        request_id: Uuid,
        admin_reason: String,
    ) -> Result<CancellationOutcome> {
        let mut request = lock_pending(uow, request_id).await?;

        let (mut target, linked) = self.lock_legs(uow, request.transaction_id).await?;

        validate_approval_eligibility(&target, Utc::now(), self.policy.settlement_window)?;

        let plan = if target.status.contributes_to_balance() {
            plan_reversal(&target)?
        } else {
            Vec::new()
        };
        let wallets = apply_reversal(uow, &plan).await?;

        TransactionStateMachine::transition(target.status, TransactionStatus::Cancelled)?;
        target.cancel(request.reason.clone());
        uow.update_transaction(&target).await?;

        if let Some(mut leg) = linked {
            if leg.status != TransactionStatus::Cancelled {
                TransactionStateMachine::transition(leg.status, TransactionStatus::Cancelled)?;
                leg.cancel(request.reason.clone());
                uow.update_transaction(&leg).await?;
            }
        }

        if !request.resolve(caller.user_id, AdminDecision::Approve, admin_reason) {
            return Err(AppError::RequestAlreadyProcessed(request_id));
        }
        uow.update_cancellation_request(&request).await?;

        Ok(CancellationOutcome {
            request,
            transaction: target.view(),
            wallets,
        })
    }

    /// Rejects a pending request. Balances and the transaction are left untouched.
    #[instrument(skip(self, admin_reason), fields(admin_id = %caller.user_id))]
    pub async fn reject(
        &self,
        caller: &Caller,
        request_id: Uuid,
        admin_reason: &str,
    ) -> Result<CancellationRequest> {
        if !caller.is_admin() {
            return Err(AppError::AdminRequired);
        }
        let admin_reason = normalize_admin_reason(admin_reason)?;

        let mut uow = self.store.begin().await?;
        let outcome = apply_reject(uow.as_mut(), caller, request_id, admin_reason).await;
        let request = finish(uow, outcome).await?;

        get_metrics().record_cancellation_resolved(&AdminDecision::Reject.to_string(), "none");
        info!(request_id = %request_id, "Cancellation rejected");

        Ok(request)
    }

    /// Lists requests for review. Admin only.
    pub async fn list_requests(
        &self,
        caller: &Caller,
        filter: CancellationFilter,
    ) -> Result<Page<CancellationRequest>> {
        if !caller.is_admin() {
            return Err(AppError::AdminRequired);
        }

        let (items, total) = self.store.list_cancellation_requests(&filter).await?;
        Ok(Page::new(items, total, filter.pagination))
    }

    /// Returns a request to an admin or to the user who filed it.
    pub async fn get_request(&self, caller: &Caller, request_id: Uuid) -> Result<CancellationRequest> {
        self.store
            .find_cancellation_request(request_id)
            .await?
            .filter(|r| caller.is_admin() || r.requester_id == caller.user_id)
            .ok_or(AppError::CancellationRequestNotFound(request_id))
    }
}

async fn lock_pending(uow: &mut dyn UnitOfWork, request_id: Uuid) -> Result<CancellationRequest> {
    let request = uow
        .lock_cancellation_request(request_id)
        .await?
        .ok_or(AppError::CancellationRequestNotFound(request_id))?;

    if !request.is_pending() {
        return Err(AppError::RequestAlreadyProcessed(request_id));
    }
    Ok(request)
}

async fn apply_reject(
    uow: &mut dyn UnitOfWork,
    caller: &Caller,
    request_id: Uuid,
    admin_reason: String,
) -> Result<CancellationRequest> {
    let mut request = lock_pending(uow, request_id).await?;

    if !request.resolve(caller.user_id, AdminDecision::Reject, admin_reason) {
        return Err(AppError::RequestAlreadyProcessed(request_id));
    }
    uow.update_cancellation_request(&request).await?;

    Ok(request)
}
