use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::ValidationErrors;

use crate::models::{Currency, Page, Wallet, WalletStatus};

/// Standard API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorResponse>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: ErrorResponse) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Error response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Vec<ValidationErrorDetail>) -> Self {
        self.details = Some(details);
        self
    }
}

/// Validation error detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    pub field: String,
    pub message: String,
}

impl ValidationErrorDetail {
    /// Flattens `validator` output into one entry per failed rule, sorted by field.
    pub fn from_errors(errors: &ValidationErrors) -> Vec<Self> {
        let mut details: Vec<Self> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| ValidationErrorDetail {
                    field: field.to_string(),
                    message: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{} is invalid ({})", field, e.code)),
                })
            })
            .collect();

        details.sort_by(|a, b| a.field.cmp(&b.field));
        details
    }
}

/// Wallet response DTO. Never carries the PIN hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub balance: Decimal,
    pub currency: Currency,
    pub status: WalletStatus,
    pub daily_limit: Decimal,
    pub monthly_limit: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Wallet> for WalletResponse {
    fn from(wallet: Wallet) -> Self {
        Self {
            id: wallet.id,
            user_id: wallet.user_id,
            balance: wallet.balance,
            currency: wallet.currency,
            status: wallet.status,
            daily_limit: wallet.daily_limit,
            monthly_limit: wallet.monthly_limit,
            created_at: wallet.created_at,
            updated_at: wallet.updated_at,
        }
    }
}

/// Paginated list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub has_more: bool,
}

impl<T> From<Page<T>> for PaginatedResponse<T> {
    fn from(page: Page<T>) -> Self {
        let seen = u64::from(page.page.saturating_sub(1)) * u64::from(page.per_page)
            + page.items.len() as u64;
        Self {
            has_more: seen < page.total,
            items: page.items,
            total: page.total,
            page: page.page,
            per_page: page.per_page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Pagination;

    #[test]
    fn test_paginated_has_more() {
        let page = Page::new(vec![1, 2], 5, Pagination::new(Some(1), Some(2)));
        assert!(PaginatedResponse::from(page).has_more);

        let page = Page::new(vec![5], 5, Pagination::new(Some(3), Some(2)));
        assert!(!PaginatedResponse::from(page).has_more);
    }

    #[test]
    fn test_wallet_response_hides_pin_hash() {
        let wallet = Wallet::new(Uuid::new_v4(), Currency::USD, "$argon2id$secret".to_string());
        let json = serde_json::to_string(&WalletResponse::from(wallet)).unwrap();
        assert!(!json.contains("argon2id"));
        assert!(!json.contains("pin"));
    }
}
