mod common;

use chrono::{Duration, Utc};
use common::{admin, memory_ledger, user, PIN};
use rust_decimal_macros::dec;
use wallet_ledger::error::{AppError, ErrorKind};
use wallet_ledger::models::{
    AdminDecision, CancellationFilter, CancellationPriority, CancellationStatus,
    TransactionStatus, WalletStatus,
};
use wallet_ledger::repositories::LedgerStore;

const REASON: &str = "Charged twice for the same order";

#[tokio::test]
async fn test_deposit_cancellation_round_trip() {
    let (ledger, _) = memory_ledger();
    let owner = user();
    let reviewer = admin();
    let wallet = ledger.funded_wallet(&owner, "USD", dec!(0)).await;
    let receipt = ledger.ledger.deposit(&owner, wallet.id, dec!(500), None).await.unwrap();
    let tx_id = receipt.transaction.id;

    let request = ledger
        .cancellations
        .request_cancellation(&owner, tx_id, REASON)
        .await
        .unwrap();
    assert_eq!(request.status, CancellationStatus::Pending);
    assert_eq!(request.priority, CancellationPriority::Medium);

    let linked = ledger.store.find_transaction(tx_id).await.unwrap().unwrap();
    assert_eq!(linked.cancel_request_id, Some(request.id));

    let outcome = ledger
        .cancellations
        .approve(&reviewer, request.id, "Verified duplicate charge")
        .await
        .unwrap();

    assert_eq!(outcome.request.status, CancellationStatus::Approved);
    let response = outcome.request.admin_response.clone().unwrap();
    assert_eq!(response.admin_id, reviewer.user_id);
    assert_eq!(response.decision, AdminDecision::Approve);
    assert_eq!(outcome.transaction.status, TransactionStatus::Cancelled);
    assert_eq!(outcome.transaction.reason.as_deref(), Some(REASON));
    assert_eq!(ledger.balance_of(wallet.id).await, dec!(0));

    let err = ledger
        .cancellations
        .request_cancellation(&owner, tx_id, REASON)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TransactionNotCancellable { .. }));
    assert_eq!(err.kind(), ErrorKind::StateConflict);

    let report = ledger.wallets.reconcile(&owner, wallet.id).await.unwrap();
    assert!(report.consistent);
}

#[tokio::test]
async fn test_deposit_reversal_does_not_fall_through_to_withdraw() {
    let (ledger, _) = memory_ledger();
    let owner = user();
    let wallet = ledger.funded_wallet(&owner, "USD", dec!(1000)).await;
    let receipt = ledger.ledger.deposit(&owner, wallet.id, dec!(300), None).await.unwrap();

    let request = ledger
        .cancellations
        .request_cancellation(&owner, receipt.transaction.id, REASON)
        .await
        .unwrap();
    let outcome = ledger
        .cancellations
        .approve(&admin(), request.id, "ok")
        .await
        .unwrap();

    assert_eq!(outcome.wallets.len(), 1);
    assert_eq!(ledger.balance_of(wallet.id).await, dec!(1000));
}

#[tokio::test]
async fn test_withdraw_cancellation_restores_funds() {
    let (ledger, _) = memory_ledger();
    let owner = user();
    let wallet = ledger.funded_wallet(&owner, "EGP", dec!(400)).await;
    let receipt = ledger
        .ledger
        .withdraw(&owner, wallet.id, dec!(150), PIN, None)
        .await
        .unwrap();

    let request = ledger
        .cancellations
        .request_cancellation(&owner, receipt.transaction.id, REASON)
        .await
        .unwrap();
    ledger
        .cancellations
        .approve(&admin(), request.id, "ATM dispense failure")
        .await
        .unwrap();

    assert_eq!(ledger.balance_of(wallet.id).await, dec!(400));
}

#[tokio::test]
async fn test_transfer_reversal_is_symmetric() {
    let (ledger, _) = memory_ledger();
    let alice = user();
    let bob = user();
    let a = ledger.funded_wallet(&alice, "USD", dec!(1000)).await;
    let b = ledger.funded_wallet(&bob, "USD", dec!(0)).await;

    let receipt = ledger
        .ledger
        .transfer(&alice, a.id, b.id, dec!(200), PIN, None)
        .await
        .unwrap();
    let incoming_id = receipt.transaction.linked_transaction_id.unwrap();

    let request = ledger
        .cancellations
        .request_cancellation(&alice, receipt.transaction.id, "Sent to the wrong wallet")
        .await
        .unwrap();
    let outcome = ledger
        .cancellations
        .approve(&admin(), request.id, "Confirmed with recipient")
        .await
        .unwrap();

    assert_eq!(outcome.wallets.len(), 2);
    assert_eq!(ledger.balance_of(a.id).await, dec!(1000));
    assert_eq!(ledger.balance_of(b.id).await, dec!(0));

    let incoming = ledger.store.find_transaction(incoming_id).await.unwrap().unwrap();
    assert_eq!(incoming.status, TransactionStatus::Cancelled);

    for (caller, wallet) in [(&alice, a.id), (&bob, b.id)] {
        assert!(ledger.wallets.reconcile(caller, wallet).await.unwrap().consistent);
    }
}

#[tokio::test]
async fn test_incoming_leg_reversal_mirrors_outgoing() {
    let (ledger, _) = memory_ledger();
    let alice = user();
    let bob = user();
    let a = ledger.funded_wallet(&alice, "USD", dec!(500)).await;
    let b = ledger.funded_wallet(&bob, "USD", dec!(0)).await;

    let receipt = ledger
        .ledger
        .transfer(&alice, a.id, b.id, dec!(120), PIN, None)
        .await
        .unwrap();
    let incoming_id = receipt.transaction.linked_transaction_id.unwrap();

    let request = ledger
        .cancellations
        .request_cancellation(&bob, incoming_id, "I do not recognise this payment")
        .await
        .unwrap();
    ledger
        .cancellations
        .approve(&admin(), request.id, "Returned to sender")
        .await
        .unwrap();

    assert_eq!(ledger.balance_of(a.id).await, dec!(500));
    assert_eq!(ledger.balance_of(b.id).await, dec!(0));
    let outgoing = ledger
        .store
        .find_transaction(receipt.transaction.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outgoing.status, TransactionStatus::Cancelled);
}

#[tokio::test]
async fn test_pending_request_blocks_the_other_transfer_leg() {
    let (ledger, _) = memory_ledger();
    let alice = user();
    let bob = user();
    let a = ledger.funded_wallet(&alice, "USD", dec!(500)).await;
    let b = ledger.funded_wallet(&bob, "USD", dec!(0)).await;

    let receipt = ledger
        .ledger
        .transfer(&alice, a.id, b.id, dec!(100), PIN, None)
        .await
        .unwrap();
    let incoming_id = receipt.transaction.linked_transaction_id.unwrap();

    let from_sender = ledger
        .cancellations
        .request_cancellation(&alice, receipt.transaction.id, REASON)
        .await
        .unwrap();
    let err = ledger
        .cancellations
        .request_cancellation(&bob, incoming_id, "Payment was never agreed")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicateCancellationRequest(_)));
    assert_eq!(err.kind(), ErrorKind::StateConflict);

    // once the sender's request is resolved the recipient may file
    ledger
        .cancellations
        .reject(&admin(), from_sender.id, "Needs the recipient's view")
        .await
        .unwrap();
    let from_recipient = ledger
        .cancellations
        .request_cancellation(&bob, incoming_id, "Payment was never agreed")
        .await
        .unwrap();

    ledger
        .cancellations
        .approve(&admin(), from_recipient.id, "ok")
        .await
        .unwrap();
    assert_eq!(ledger.balance_of(a.id).await, dec!(500));
    assert_eq!(ledger.balance_of(b.id).await, dec!(0));

    // both legs are cancelled, so neither side can file again
    let err = ledger
        .cancellations
        .request_cancellation(&alice, receipt.transaction.id, REASON)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StateConflict);
}

#[tokio::test]
async fn test_request_outside_window_is_rejected_for_any_role() {
    let (ledger, store) = memory_ledger();
    for caller in [user(), admin()] {
        let wallet = ledger.funded_wallet(&caller, "USD", dec!(0)).await;
        let receipt = ledger.ledger.deposit(&caller, wallet.id, dec!(50), None).await.unwrap();
        assert!(
            store
                .backdate_transaction(receipt.transaction.id, Utc::now() - Duration::hours(25))
                .await
        );

        let err = ledger
            .cancellations
            .request_cancellation(&caller, receipt.transaction.id, REASON)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::CancellationWindowExpired(_)));
        assert_eq!(err.kind(), ErrorKind::StateConflict);
    }
}

#[tokio::test]
async fn test_duplicate_pending_request_is_rejected() {
    let (ledger, _) = memory_ledger();
    let owner = user();
    let wallet = ledger.funded_wallet(&owner, "USD", dec!(0)).await;
    let receipt = ledger.ledger.deposit(&owner, wallet.id, dec!(50), None).await.unwrap();

    ledger
        .cancellations
        .request_cancellation(&owner, receipt.transaction.id, REASON)
        .await
        .unwrap();
    let err = ledger
        .cancellations
        .request_cancellation(&owner, receipt.transaction.id, "Another reason entirely")
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::DuplicateCancellationRequest(id) if id == receipt.transaction.id));
    assert_eq!(err.kind(), ErrorKind::StateConflict);
}

#[tokio::test]
async fn test_reject_leaves_balances_and_allows_new_request() {
    let (ledger, _) = memory_ledger();
    let owner = user();
    let wallet = ledger.funded_wallet(&owner, "USD", dec!(0)).await;
    let receipt = ledger.ledger.deposit(&owner, wallet.id, dec!(80), None).await.unwrap();

    let request = ledger
        .cancellations
        .request_cancellation(&owner, receipt.transaction.id, REASON)
        .await
        .unwrap();
    let rejected = ledger
        .cancellations
        .reject(&admin(), request.id, "  Deposit is legitimate  ")
        .await
        .unwrap();

    assert_eq!(rejected.status, CancellationStatus::Rejected);
    assert_eq!(
        rejected.admin_response.unwrap().reason,
        "Deposit is legitimate"
    );
    assert_eq!(ledger.balance_of(wallet.id).await, dec!(80));
    let tx = ledger
        .store
        .find_transaction(receipt.transaction.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);

    let err = ledger
        .cancellations
        .approve(&admin(), request.id, "changed my mind")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::RequestAlreadyProcessed(_)));

    ledger
        .cancellations
        .request_cancellation(&owner, receipt.transaction.id, "New evidence attached")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_authorization_rules() {
    let (ledger, _) = memory_ledger();
    let owner = user();
    let wallet = ledger.funded_wallet(&owner, "USD", dec!(0)).await;
    let receipt = ledger.ledger.deposit(&owner, wallet.id, dec!(80), None).await.unwrap();

    let err = ledger
        .cancellations
        .request_cancellation(&user(), receipt.transaction.id, REASON)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotOwner));
    assert_eq!(err.kind(), ErrorKind::AuthorizationDenied);

    let request = ledger
        .cancellations
        .request_cancellation(&owner, receipt.transaction.id, REASON)
        .await
        .unwrap();

    let err = ledger
        .cancellations
        .approve(&owner, request.id, "approving my own request")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AdminRequired));

    let err = ledger
        .cancellations
        .list_requests(&owner, CancellationFilter::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AdminRequired));

    // the requester may read their own request, nobody else but admins
    assert!(ledger.cancellations.get_request(&owner, request.id).await.is_ok());
    assert!(ledger.cancellations.get_request(&admin(), request.id).await.is_ok());
    let err = ledger
        .cancellations
        .get_request(&user(), request.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::CancellationRequestNotFound(_)));
}

#[tokio::test]
async fn test_reason_validation() {
    let (ledger, _) = memory_ledger();
    let owner = user();
    let wallet = ledger.funded_wallet(&owner, "USD", dec!(0)).await;
    let receipt = ledger.ledger.deposit(&owner, wallet.id, dec!(80), None).await.unwrap();

    let err = ledger
        .cancellations
        .request_cancellation(&owner, receipt.transaction.id, "   mistake   ")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let request = ledger
        .cancellations
        .request_cancellation(&owner, receipt.transaction.id, REASON)
        .await
        .unwrap();
    let err = ledger
        .cancellations
        .approve(&admin(), request.id, "   ")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_reversal_that_would_go_negative_rolls_back() {
    let (ledger, _) = memory_ledger();
    let owner = user();
    let wallet = ledger.funded_wallet(&owner, "USD", dec!(0)).await;
    let receipt = ledger.ledger.deposit(&owner, wallet.id, dec!(500), None).await.unwrap();
    ledger
        .ledger
        .withdraw(&owner, wallet.id, dec!(400), PIN, None)
        .await
        .unwrap();

    let request = ledger
        .cancellations
        .request_cancellation(&owner, receipt.transaction.id, REASON)
        .await
        .unwrap();
    let err = ledger
        .cancellations
        .approve(&admin(), request.id, "reverse it")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);

    assert_eq!(ledger.balance_of(wallet.id).await, dec!(100));
    let tx = ledger
        .store
        .find_transaction(receipt.transaction.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
    let still_pending = ledger
        .cancellations
        .get_request(&owner, request.id)
        .await
        .unwrap();
    assert_eq!(still_pending.status, CancellationStatus::Pending);
}

#[tokio::test]
async fn test_reversal_applies_to_frozen_wallet() {
    let (ledger, _) = memory_ledger();
    let owner = user();
    let reviewer = admin();
    let wallet = ledger.funded_wallet(&owner, "USD", dec!(0)).await;
    let receipt = ledger.ledger.deposit(&owner, wallet.id, dec!(60), None).await.unwrap();

    let request = ledger
        .cancellations
        .request_cancellation(&owner, receipt.transaction.id, REASON)
        .await
        .unwrap();
    ledger
        .wallets
        .set_status(&reviewer, wallet.id, WalletStatus::Frozen)
        .await
        .unwrap();

    ledger
        .cancellations
        .approve(&reviewer, request.id, "Fraud confirmed")
        .await
        .unwrap();
    assert_eq!(ledger.balance_of(wallet.id).await, dec!(0));
}

#[tokio::test]
async fn test_settled_transaction_cannot_be_approved() {
    let (ledger, store) = memory_ledger();
    let owner = user();
    let wallet = ledger.funded_wallet(&owner, "USD", dec!(0)).await;
    let receipt = ledger.ledger.deposit(&owner, wallet.id, dec!(60), None).await.unwrap();

    let request = ledger
        .cancellations
        .request_cancellation(&owner, receipt.transaction.id, REASON)
        .await
        .unwrap();
    store
        .backdate_transaction(receipt.transaction.id, Utc::now() - Duration::hours(73))
        .await;

    let err = ledger
        .cancellations
        .approve(&admin(), request.id, "too late")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TransactionNotCancellable { .. }));
    assert_eq!(ledger.balance_of(wallet.id).await, dec!(60));
}

#[tokio::test]
async fn test_review_queue_filters_and_priority() {
    let (ledger, _) = memory_ledger();
    let owner = user();
    let reviewer = admin();
    let wallet = ledger.funded_wallet(&owner, "USD", dec!(0)).await;

    let small = ledger.ledger.deposit(&owner, wallet.id, dec!(1000), None).await.unwrap();
    let large = ledger.ledger.deposit(&owner, wallet.id, dec!(1000.01), None).await.unwrap();

    let low = ledger
        .cancellations
        .request_cancellation(&owner, small.transaction.id, REASON)
        .await
        .unwrap();
    let high = ledger
        .cancellations
        .request_cancellation(&owner, large.transaction.id, REASON)
        .await
        .unwrap();
    assert_eq!(low.priority, CancellationPriority::Medium);
    assert_eq!(high.priority, CancellationPriority::High);

    ledger.cancellations.reject(&reviewer, low.id, "no").await.unwrap();

    let pending = ledger
        .cancellations
        .list_requests(&reviewer, CancellationFilter::default())
        .await
        .unwrap();
    assert_eq!(pending.total, 1);
    assert_eq!(pending.items[0].id, high.id);

    let everything = ledger
        .cancellations
        .list_requests(
            &reviewer,
            CancellationFilter {
                status: None,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(everything.total, 2);

    let high_only = ledger
        .cancellations
        .list_requests(
            &reviewer,
            CancellationFilter {
                status: None,
                priority: Some(CancellationPriority::High),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(high_only.total, 1);
}
