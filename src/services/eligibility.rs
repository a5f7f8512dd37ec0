use chrono::{DateTime, Duration, Utc};

use crate::error::{AppError, Result};
use crate::models::cancellation::MIN_REASON_LENGTH;
use crate::models::{TransactionRecord, TransactionStatus};

/// Gate for filing a cancellation request.
///
/// Rejects transactions that are already cancelled or failed, that were created more than
/// `window` before `now`, or that already have a pending request.
pub fn validate_cancellation_eligibility(
    tx: &TransactionRecord,
    has_pending_request: bool,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<()> {
    if matches!(tx.status, TransactionStatus::Cancelled | TransactionStatus::Failed) {
        return Err(AppError::TransactionNotCancellable {
            id: tx.id,
            status: tx.status,
        });
    }

    if tx.age(now) > window {
        return Err(AppError::CancellationWindowExpired(tx.id));
    }

    if has_pending_request {
        return Err(AppError::DuplicateCancellationRequest(tx.id));
    }

    Ok(())
}

/// Gate for approving a pending request against `tx`.
///
/// Cancelled and failed transactions cannot be reversed, nor can completed ones that settled
/// more than `settlement_window` ago.
pub fn validate_approval_eligibility(
    tx: &TransactionRecord,
    now: DateTime<Utc>,
    settlement_window: Duration,
) -> Result<()> {
    let settled = tx.status == TransactionStatus::Completed && tx.age(now) > settlement_window;

    if tx.status.is_final() || settled {
        return Err(AppError::TransactionNotCancellable {
            id: tx.id,
            status: tx.status,
        });
    }

    Ok(())
}

/// Trims a requester's reason and enforces the minimum length.
pub fn normalize_reason(reason: &str) -> Result<String> {
    let trimmed = reason.trim();
    if trimmed.chars().count() < MIN_REASON_LENGTH {
        return Err(AppError::Validation(format!(
            "Reason must be at least {} characters",
            MIN_REASON_LENGTH
        )));
    }
    Ok(trimmed.to_string())
}

/// Trims an admin's reason, which must not be empty.
pub fn normalize_admin_reason(reason: &str) -> Result<String> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("Admin reason is required".to_string()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Currency;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn deposit() -> TransactionRecord {
        TransactionRecord::deposit(Uuid::new_v4(), dec!(500), Currency::USD, dec!(500))
    }

    #[test]
    fn test_fresh_transaction_is_eligible() {
        let tx = deposit();
        assert!(validate_cancellation_eligibility(&tx, false, Utc::now(), Duration::hours(24)).is_ok());
    }

    #[test]
    fn test_window_boundary() {
        let tx = deposit();
        let window = Duration::hours(24);

        let at_boundary = tx.created_at + window;
        assert!(validate_cancellation_eligibility(&tx, false, at_boundary, window).is_ok());

        let past = at_boundary + Duration::seconds(1);
        assert!(matches!(
            validate_cancellation_eligibility(&tx, false, past, window),
            Err(AppError::CancellationWindowExpired(_))
        ));
    }

    #[test]
    fn test_final_statuses_rejected() {
        let mut tx = deposit();
        tx.fail();
        assert!(matches!(
            validate_cancellation_eligibility(&tx, false, Utc::now(), Duration::hours(24)),
            Err(AppError::TransactionNotCancellable { status: TransactionStatus::Failed, .. })
        ));

        let mut tx = deposit();
        tx.cancel("Reversed by support");
        assert!(matches!(
            validate_approval_eligibility(&tx, Utc::now(), Duration::hours(72)),
            Err(AppError::TransactionNotCancellable { status: TransactionStatus::Cancelled, .. })
        ));
    }

    #[test]
    fn test_pending_request_blocks_new_one() {
        let tx = deposit();
        assert!(matches!(
            validate_cancellation_eligibility(&tx, true, Utc::now(), Duration::hours(24)),
            Err(AppError::DuplicateCancellationRequest(id)) if id == tx.id
        ));
    }

    #[test]
    fn test_settled_transaction_cannot_be_approved() {
        let tx = deposit();
        let later = tx.created_at + Duration::hours(73);
        assert!(validate_approval_eligibility(&tx, tx.created_at + Duration::hours(1), Duration::hours(72)).is_ok());
        assert!(validate_approval_eligibility(&tx, later, Duration::hours(72)).is_err());
    }

    #[test]
    fn test_reason_normalization() {
        assert_eq!(normalize_reason("  Charged twice by mistake  ").unwrap(), "Charged twice by mistake");
        assert!(normalize_reason("  ten chars!  ").is_ok());
        assert!(matches!(normalize_reason("nine char"), Err(AppError::Validation(_))));
        assert!(matches!(normalize_reason("  short    "), Err(AppError::Validation(_))));
        assert!(normalize_admin_reason("   ").is_err());
        assert_eq!(normalize_admin_reason(" ok ").unwrap(), "ok");
    }
}
