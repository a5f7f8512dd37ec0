use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::error::{AppError, Result};
use crate::models::{
    CancellationFilter, CancellationPriority, CancellationStatus, Currency, Pagination, SortOrder,
    TransactionFilter, TransactionStatus, TransactionType, WalletFilter, WalletSortField,
    WalletStatus, MAX_AMOUNT,
};

fn positive_amount(amount: &Decimal) -> std::result::Result<(), ValidationError> {
    if *amount <= Decimal::ZERO {
        let mut error = ValidationError::new("positive");
        error.message = Some("amount must be greater than zero".into());
        return Err(error);
    }
    if *amount > MAX_AMOUNT {
        let mut error = ValidationError::new("range");
        error.message = Some(format!("amount must not exceed {}", MAX_AMOUNT).into());
        return Err(error);
    }
    Ok(())
}

fn digits_only(pin: &str) -> std::result::Result<(), ValidationError> {
    if !pin.bytes().all(|b| b.is_ascii_digit()) {
        let mut error = ValidationError::new("digits");
        error.message = Some("PIN must contain only digits".into());
        return Err(error);
    }
    Ok(())
}

fn parse_currency(value: Option<&str>) -> Result<Option<Currency>> {
    value
        .map(|c| c.parse().map_err(|_| AppError::InvalidCurrency(c.to_string())))
        .transpose()
}

/// Request to open a wallet.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateWalletRequest {
    #[validate(length(min = 4, max = 6), custom = "digits_only")]
    pub pin: String,
    #[validate(length(equal = 3, message = "currency must be a 3-letter code"))]
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChangePinRequest {
    #[validate(length(min = 4, max = 6), custom = "digits_only")]
    pub current_pin: String,
    #[validate(length(min = 4, max = 6), custom = "digits_only")]
    pub new_pin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: WalletStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DepositRequest {
    #[validate(custom = "positive_amount")]
    pub amount: Decimal,
    #[validate(length(max = 255))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WithdrawRequest {
    #[validate(custom = "positive_amount")]
    pub amount: Decimal,
    #[validate(length(min = 4, max = 6), custom = "digits_only")]
    pub pin: String,
    #[validate(length(max = 255))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TransferRequest {
    pub recipient_wallet_id: Uuid,
    #[validate(custom = "positive_amount")]
    pub amount: Decimal,
    #[validate(length(min = 4, max = 6), custom = "digits_only")]
    pub pin: String,
    #[validate(length(max = 255))]
    pub description: Option<String>,
}

/// Body of a cancellation request filed by a wallet owner.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CancelTransactionRequest {
    #[validate(length(min = 10, max = 500))]
    pub reason: String,
}

/// Body of an admin approval or rejection.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AdminDecisionRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListWalletsQuery {
    pub user_id: Option<Uuid>,
    pub currency: Option<String>,
    pub min_balance: Option<Decimal>,
    pub max_balance: Option<Decimal>,
    pub sort_by: Option<WalletSortField>,
    pub order: Option<SortOrder>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ListWalletsQuery {
    pub fn into_filter(self) -> Result<WalletFilter> {
        Ok(WalletFilter {
            user_id: self.user_id,
            currency: parse_currency(self.currency.as_deref())?,
            min_balance: self.min_balance,
            max_balance: self.max_balance,
            sort_by: self.sort_by.unwrap_or_default(),
            order: self.order.unwrap_or_default(),
            pagination: Pagination::new(self.page, self.per_page),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTransactionsQuery {
    pub status: Option<TransactionStatus>,
    #[serde(rename = "type")]
    pub transaction_type: Option<TransactionType>,
    pub order: Option<SortOrder>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ListTransactionsQuery {
    pub fn into_filter(self) -> TransactionFilter {
        TransactionFilter {
            status: self.status,
            transaction_type: self.transaction_type,
            order: self.order.unwrap_or_default(),
            pagination: Pagination::new(self.page, self.per_page),
        }
    }
}

/// Status selector for the review queue; `all` lifts the status filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatusFilter {
    Pending,
    Approved,
    Rejected,
    All,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListCancellationRequestsQuery {
    pub status: Option<RequestStatusFilter>,
    pub priority: Option<CancellationPriority>,
    pub order: Option<SortOrder>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ListCancellationRequestsQuery {
    pub fn into_filter(self) -> CancellationFilter {
        let status = match self.status.unwrap_or(RequestStatusFilter::Pending) {
            RequestStatusFilter::Pending => Some(CancellationStatus::Pending),
            RequestStatusFilter::Approved => Some(CancellationStatus::Approved),
            RequestStatusFilter::Rejected => Some(CancellationStatus::Rejected),
            RequestStatusFilter::All => None,
        };

        CancellationFilter {
            status,
            priority: self.priority,
            order: self.order.unwrap_or_default(),
            pagination: Pagination::new(self.page, self.per_page),
        }
    }
}
