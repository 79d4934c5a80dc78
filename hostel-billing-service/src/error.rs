//! Domain errors for checkout deductions and periodic billing.

use crate::models::CheckoutStatus;
use crate::services::calendar::CalendarError;
use service_core::error::AppError;
use service_core::grpc::IntoStatus;
use thiserror::Error;
use tonic::Status;

#[derive(Debug, Error)]
pub enum BillingError {
    /// A rule sentence that does not reduce to `duration <op> <int>`.
    #[error("Invalid rule format: {0}")]
    InvalidRuleFormat(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Deduction requested while no active universal rule exists.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: CheckoutStatus,
        to: CheckoutStatus,
    },

    #[error("Calendar error: {0}")]
    Calendar(#[from] CalendarError),

    #[error("Cache error: {0}")]
    Cache(String),

    /// Store failure; the surrounding transaction was rolled back.
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl BillingError {
    /// Wrap a sqlx error, mapping unique violations to `Conflict`.
    pub fn from_sqlx(context: &str, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                BillingError::Conflict(format!("{}: {}", context, db_err))
            }
            other => BillingError::Persistence(format!("{}: {}", context, other)),
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BillingError::InvalidRuleFormat(_) => "invalid_rule_format",
            BillingError::Validation(_) => "validation",
            BillingError::Configuration(_) => "configuration",
            BillingError::NotFound(_) => "not_found",
            BillingError::Conflict(_) => "conflict",
            BillingError::InvalidTransition { .. } => "invalid_transition",
            BillingError::Calendar(_) => "calendar",
            BillingError::Cache(_) => "cache",
            BillingError::Persistence(_) => "persistence",
        }
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        let message = err.to_string();
        match err {
            BillingError::InvalidRuleFormat(_) | BillingError::Validation(_) => {
                AppError::BadRequest(anyhow::anyhow!(message))
            }
            BillingError::Configuration(_) | BillingError::InvalidTransition { .. } => {
                AppError::FailedPrecondition(anyhow::anyhow!(message))
            }
            BillingError::NotFound(_) => AppError::NotFound(anyhow::anyhow!(message)),
            BillingError::Conflict(_) => AppError::Conflict(anyhow::anyhow!(message)),
            BillingError::Calendar(_) | BillingError::Cache(_) => {
                AppError::InternalError(anyhow::anyhow!(message))
            }
            BillingError::Persistence(_) => AppError::DatabaseError(anyhow::anyhow!(message)),
        }
    }
}

impl From<BillingError> for Status {
    fn from(err: BillingError) -> Self {
        AppError::from(err).into_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn rule_format_is_invalid_argument() {
        let status: Status =
            BillingError::InvalidRuleFormat("expected duration <op> <n>".to_string()).into();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(status.message().contains("duration <op> <n>"));
    }

    #[test]
    fn missing_rule_is_failed_precondition() {
        let status: Status =
            BillingError::Configuration("universal rule not configured".to_string()).into();
        assert_eq!(status.code(), Code::FailedPrecondition);
    }

    #[test]
    fn transition_error_names_both_states() {
        let err = BillingError::InvalidTransition {
            from: CheckoutStatus::Declined,
            to: CheckoutStatus::Approved,
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition from declined to approved"
        );
    }
}
