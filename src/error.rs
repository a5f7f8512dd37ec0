use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Currency, TransactionStatus, WalletStatus};

pub type Result<T> = std::result::Result<T, AppError>;

/// Stable, machine-distinguishable failure categories exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ValidationError,
    NotFound,
    StateConflict,
    AuthorizationDenied,
    InsufficientFunds,
    InternalFailure,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::StateConflict => "STATE_CONFLICT",
            ErrorKind::AuthorizationDenied => "AUTHORIZATION_DENIED",
            ErrorKind::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorKind::InternalFailure => "INTERNAL_ERROR",
        }
    }

    /// Internal failures may be retried from scratch by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::InternalFailure)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Outgoing limit that a withdrawal or transfer would breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitWindow {
    Daily,
    Monthly,
}

impl fmt::Display for LimitWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitWindow::Daily => f.write_str("daily"),
            LimitWindow::Monthly => f.write_str("monthly"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    // Validation
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Unsupported currency: {0}")]
    InvalidCurrency(String),

    #[error("PIN must be 4-6 digits")]
    MalformedPin,

    #[error("Cannot transfer to the same wallet")]
    SelfTransfer,

    #[error("Validation error: {0}")]
    Validation(String),

    // Not found
    #[error("Wallet '{0}' not found")]
    WalletNotFound(Uuid),

    #[error("Recipient wallet '{0}' not found")]
    RecipientNotFound(Uuid),

    #[error("Transaction '{0}' not found")]
    TransactionNotFound(Uuid),

    #[error("Cancellation request '{0}' not found")]
    CancellationRequestNotFound(Uuid),

    // State conflicts
    #[error("Wallet '{id}' is {status}")]
    WalletNotActive { id: Uuid, status: WalletStatus },

    #[error("Recipient wallet '{id}' is {status}")]
    RecipientNotActive { id: Uuid, status: WalletStatus },

    #[error("Currency mismatch: sender holds {sender}, recipient holds {recipient}")]
    CurrencyMismatch { sender: Currency, recipient: Currency },

    #[error("Transaction '{id}' cannot be cancelled (status: {status})")]
    TransactionNotCancellable { id: Uuid, status: TransactionStatus },

    #[error("Transaction '{0}' is outside the cancellation window")]
    CancellationWindowExpired(Uuid),

    #[error("A cancellation request is already pending for transaction '{0}'")]
    DuplicateCancellationRequest(Uuid),

    #[error("Cancellation request '{0}' has already been processed")]
    RequestAlreadyProcessed(Uuid),

    #[error("Wallet '{wallet_id}' would exceed its {window} limit of {limit}")]
    LimitExceeded {
        wallet_id: Uuid,
        window: LimitWindow,
        limit: Decimal,
    },

    #[error("Wallet '{0}' still holds funds or live transactions")]
    WalletInUse(Uuid),

    // Authorization
    #[error("Invalid PIN")]
    InvalidPin,

    #[error("Caller does not own this resource")]
    NotOwner,

    #[error("Admin role required")]
    AdminRequired,

    // Funds
    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },

    // Internal
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Timed out waiting for a lock on '{0}'")]
    LockTimeout(Uuid),

    #[error("Concurrent modification of wallet '{0}'")]
    ConcurrentModification(Uuid),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidAmount(_)
            | AppError::InvalidCurrency(_)
            | AppError::MalformedPin
            | AppError::SelfTransfer
            | AppError::Validation(_) => ErrorKind::ValidationError,

            AppError::WalletNotFound(_)
            | AppError::RecipientNotFound(_)
            | AppError::TransactionNotFound(_)
            | AppError::CancellationRequestNotFound(_) => ErrorKind::NotFound,

            AppError::WalletNotActive { .. }
            | AppError::RecipientNotActive { .. }
            | AppError::CurrencyMismatch { .. }
            | AppError::TransactionNotCancellable { .. }
            | AppError::CancellationWindowExpired(_)
            | AppError::DuplicateCancellationRequest(_)
            | AppError::RequestAlreadyProcessed(_)
            | AppError::LimitExceeded { .. }
            | AppError::WalletInUse(_) => ErrorKind::StateConflict,

            AppError::InvalidPin | AppError::NotOwner | AppError::AdminRequired => {
                ErrorKind::AuthorizationDenied
            }

            AppError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,

            AppError::Database(_)
            | AppError::LockTimeout(_)
            | AppError::ConcurrentModification(_)
            | AppError::Internal(_) => ErrorKind::InternalFailure,
        }
    }

    /// Message safe to return to callers. Internal failures are collapsed to a generic text.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::InternalFailure => match self {
                AppError::LockTimeout(_) | AppError::ConcurrentModification(_) => {
                    "The wallet is busy, please retry".to_string()
                }
                _ => "An internal error occurred".to_string(),
            },
            _ => self.to_string(),
        }
    }
}
