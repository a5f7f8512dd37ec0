use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Amount above which a cancellation request is treated as high priority.
pub const HIGH_PRIORITY_THRESHOLD: i64 = 1_000;

/// Minimum length of a requester's reason, after trimming.
pub const MIN_REASON_LENGTH: usize = 10;

/// Status of a reversal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "cancellation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CancellationStatus {
    /// Awaiting an admin decision.
    Pending,
    Approved,
    Rejected,
}

impl CancellationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CancellationStatus::Pending)
    }

    /// Returns valid next states from the current state.
    pub fn valid_transitions(&self) -> &'static [CancellationStatus] {
        match self {
            CancellationStatus::Pending => &[CancellationStatus::Approved, CancellationStatus::Rejected],
            CancellationStatus::Approved | CancellationStatus::Rejected => &[],
        }
    }

    pub fn can_transition(&self, to: CancellationStatus) -> bool {
        self.valid_transitions().contains(&to)
    }
}

impl fmt::Display for CancellationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancellationStatus::Pending => f.write_str("pending"),
            CancellationStatus::Approved => f.write_str("approved"),
            CancellationStatus::Rejected => f.write_str("rejected"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "cancellation_priority", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CancellationPriority {
    /// Representable for manual triage; never derived from an amount.
    Low,
    Medium,
    High,
}

impl CancellationPriority {
    pub fn from_amount(amount: Decimal) -> Self {
        if amount > Decimal::from(HIGH_PRIORITY_THRESHOLD) {
            CancellationPriority::High
        } else {
            CancellationPriority::Medium
        }
    }
}

impl fmt::Display for CancellationPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancellationPriority::Low => f.write_str("low"),
            CancellationPriority::Medium => f.write_str("medium"),
            CancellationPriority::High => f.write_str("high"),
        }
    }
}

/// Outcome chosen by an admin for a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "admin_decision", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AdminDecision {
    Approve,
    Reject,
}

impl AdminDecision {
    pub fn resulting_status(&self) -> CancellationStatus {
        match self {
            AdminDecision::Approve => CancellationStatus::Approved,
            AdminDecision::Reject => CancellationStatus::Rejected,
        }
    }
}

impl fmt::Display for AdminDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminDecision::Approve => f.write_str("approve"),
            AdminDecision::Reject => f.write_str("reject"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminResponse {
    pub admin_id: Uuid,
    pub decision: AdminDecision,
    pub reason: String,
    pub processed_at: DateTime<Utc>,
}

/// A request to reverse a prior transaction, subject to admin approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationRequest {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub requester_id: Uuid,
    pub reason: String,
    pub status: CancellationStatus,
    pub priority: CancellationPriority,
    pub admin_response: Option<AdminResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CancellationRequest {
    pub fn new(transaction_id: Uuid, requester_id: Uuid, reason: impl Into<String>, amount: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            requester_id,
            reason: reason.into(),
            status: CancellationStatus::Pending,
            priority: CancellationPriority::from_amount(amount),
            admin_response: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == CancellationStatus::Pending
    }

    /// Records the admin's decision. Returns false, leaving the request untouched, if the
    /// request is no longer pending.
    pub fn resolve(&mut self, admin_id: Uuid, decision: AdminDecision, reason: impl Into<String>) -> bool {
        let next = decision.resulting_status();
        if !self.status.can_transition(next) {
            return false;
        }

        let now = Utc::now();
        self.status = next;
        self.admin_response = Some(AdminResponse {
            admin_id,
            decision,
            reason: reason.into(),
            processed_at: now,
        });
        self.updated_at = now;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_priority_from_amount() {
        assert_eq!(CancellationPriority::from_amount(dec!(1000.01)), CancellationPriority::High);
        assert_eq!(CancellationPriority::from_amount(dec!(1000)), CancellationPriority::Medium);
        assert_eq!(CancellationPriority::from_amount(dec!(0.01)), CancellationPriority::Medium);
    }

    #[test]
    fn test_status_transitions() {
        assert!(CancellationStatus::Pending.can_transition(CancellationStatus::Approved));
        assert!(CancellationStatus::Pending.can_transition(CancellationStatus::Rejected));
        assert!(!CancellationStatus::Approved.can_transition(CancellationStatus::Rejected));
        assert!(!CancellationStatus::Rejected.can_transition(CancellationStatus::Pending));
        assert!(!CancellationStatus::Pending.is_terminal());
        assert!(CancellationStatus::Approved.is_terminal());
    }

    #[test]
    fn test_resolve_is_terminal() {
        let admin = Uuid::new_v4();
        let mut request = CancellationRequest::new(Uuid::new_v4(), Uuid::new_v4(), "Wrong recipient", dec!(50));

        assert!(request.resolve(admin, AdminDecision::Reject, "Not eligible"));
        assert_eq!(request.status, CancellationStatus::Rejected);

        let response = request.admin_response.clone().unwrap();
        assert_eq!(response.admin_id, admin);
        assert_eq!(response.decision, AdminDecision::Reject);

        assert!(!request.resolve(admin, AdminDecision::Approve, "Changed my mind"));
        assert_eq!(request.status, CancellationStatus::Rejected);
    }
}
