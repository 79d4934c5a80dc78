//! Checkout (leave away from the hostel) model and its status machine.

use super::EntityKind;
use crate::error::BillingError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Checkout status.
///
/// ```text
/// pending ──approve──▶ approved ──return──▶ checked_in
///    │
///    └──decline──▶ declined
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStatus {
    Pending,
    Approved,
    Declined,
    CheckedIn,
}

impl CheckoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStatus::Pending => "pending",
            CheckoutStatus::Approved => "approved",
            CheckoutStatus::Declined => "declined",
            CheckoutStatus::CheckedIn => "checked_in",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CheckoutStatus::Pending),
            "approved" => Some(CheckoutStatus::Approved),
            "declined" => Some(CheckoutStatus::Declined),
            "checked_in" => Some(CheckoutStatus::CheckedIn),
            _ => None,
        }
    }

    pub fn to_proto(&self) -> i32 {
        match self {
            CheckoutStatus::Pending => 1,
            CheckoutStatus::Approved => 2,
            CheckoutStatus::Declined => 3,
            CheckoutStatus::CheckedIn => 4,
        }
    }

    pub fn can_transition_to(&self, next: CheckoutStatus) -> bool {
        matches!(
            (self, next),
            (CheckoutStatus::Pending, CheckoutStatus::Approved)
                | (CheckoutStatus::Pending, CheckoutStatus::Declined)
                | (CheckoutStatus::Approved, CheckoutStatus::CheckedIn)
        )
    }

    /// Validate a transition, returning the new status.
    pub fn transition(self, next: CheckoutStatus) -> Result<CheckoutStatus, BillingError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(BillingError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for CheckoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for CheckoutStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CheckoutStatus::parse(&value).ok_or_else(|| format!("unknown checkout status: {}", value))
    }
}

/// One checkout/return cycle of a staff member or student.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CheckoutRecord {
    pub checkout_id: Uuid,
    #[sqlx(try_from = "String")]
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    pub checkout_time: DateTime<Utc>,
    /// Actual return, set when the entity checks back in.
    pub checkin_time: Option<DateTime<Utc>>,
    pub estimated_return_time: Option<DateTime<Utc>>,
    /// Whole days away, written on approval.
    pub checkout_duration: Option<i32>,
    #[sqlx(try_from = "String")]
    pub status: CheckoutStatus,
    pub deduction_amount: Option<Decimal>,
    pub adjusted_amount: Option<Decimal>,
    pub rule_applied: Option<String>,
    pub reason: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for submitting a checkout request.
#[derive(Debug, Clone)]
pub struct SubmitCheckout {
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    pub checkout_time: DateTime<Utc>,
    pub estimated_return_time: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

/// Financial fields written by the pending -> approved transition.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovedDeduction {
    pub duration_days: i32,
    pub deduction_amount: Decimal,
    pub adjusted_amount: Decimal,
    pub rule_applied: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_can_be_approved_or_declined() {
        assert_eq!(
            CheckoutStatus::Pending
                .transition(CheckoutStatus::Approved)
                .unwrap(),
            CheckoutStatus::Approved
        );
        assert!(CheckoutStatus::Pending.can_transition_to(CheckoutStatus::Declined));
    }

    #[test]
    fn approved_is_not_reapproved() {
        let err = CheckoutStatus::Approved
            .transition(CheckoutStatus::Approved)
            .unwrap_err();
        assert!(matches!(
            err,
            BillingError::InvalidTransition {
                from: CheckoutStatus::Approved,
                to: CheckoutStatus::Approved
            }
        ));
    }

    #[test]
    fn declined_is_terminal() {
        for next in [
            CheckoutStatus::Pending,
            CheckoutStatus::Approved,
            CheckoutStatus::CheckedIn,
        ] {
            assert!(!CheckoutStatus::Declined.can_transition_to(next));
        }
    }

    #[test]
    fn only_approved_checkouts_record_a_return() {
        assert!(CheckoutStatus::Approved.can_transition_to(CheckoutStatus::CheckedIn));
        assert!(!CheckoutStatus::Pending.can_transition_to(CheckoutStatus::CheckedIn));
    }
}
