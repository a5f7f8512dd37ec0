use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CancellationPriority, CancellationStatus, Currency, TransactionStatus, TransactionType};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// One-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    /// Builds a page selection, clamping out-of-range values instead of failing.
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Rows to skip. Widened so the last representable page cannot overflow.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }

    pub fn limit(&self) -> u32 {
        self.per_page
    }

    /// Applies the selection to an already ordered list.
    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(usize::try_from(self.offset()).unwrap_or(usize::MAX))
            .take(self.limit() as usize)
            .collect()
    }
}

/// A page of results together with the unpaged total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        Self {
            items,
            total,
            page: pagination.page,
            per_page: pagination.per_page,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletSortField {
    #[default]
    CreatedAt,
    Balance,
}

#[derive(Debug, Clone, Default)]
pub struct WalletFilter {
    /// Restricts results to one owner. Always set for non-admin callers.
    pub user_id: Option<Uuid>,
    pub currency: Option<Currency>,
    pub min_balance: Option<Decimal>,
    pub max_balance: Option<Decimal>,
    pub sort_by: WalletSortField,
    pub order: SortOrder,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub status: Option<TransactionStatus>,
    pub transaction_type: Option<TransactionType>,
    pub order: SortOrder,
    pub pagination: Pagination,
}

#[derive(Debug, Clone)]
pub struct CancellationFilter {
    /// `None` selects every status.
    pub status: Option<CancellationStatus>,
    pub priority: Option<CancellationPriority>,
    pub order: SortOrder,
    pub pagination: Pagination,
}

impl Default for CancellationFilter {
    fn default() -> Self {
        Self {
            status: Some(CancellationStatus::Pending),
            priority: None,
            order: SortOrder::Desc,
            pagination: Pagination::default(),
        }
    }
}
