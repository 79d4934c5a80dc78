//! Mapping from `AppError` to `tonic::Status`.
//!
//! | AppError | gRPC Status |
//! |----------|-------------|
//! | `BadRequest` | `INVALID_ARGUMENT` |
//! | `NotFound` | `NOT_FOUND` |
//! | `Conflict` | `ALREADY_EXISTS` |
//! | `FailedPrecondition` | `FAILED_PRECONDITION` |
//! | `ServiceUnavailable` | `UNAVAILABLE` |
//! | everything else | `INTERNAL` |

use tonic::Status;

use crate::error::AppError;

/// Extension trait for converting types into `tonic::Status`.
pub trait IntoStatus {
    /// Convert into a `tonic::Status`.
    fn into_status(self) -> Status;
}

impl IntoStatus for AppError {
    fn into_status(self) -> Status {
        match self {
            AppError::BadRequest(err) => Status::invalid_argument(err.to_string()),
            AppError::NotFound(err) => Status::not_found(err.to_string()),
            AppError::Conflict(err) => Status::already_exists(err.to_string()),
            AppError::FailedPrecondition(err) => Status::failed_precondition(err.to_string()),
            AppError::InternalError(err) => {
                // Log the full error but don't expose it to clients
                tracing::error!(error = %err, "Internal error");
                Status::internal("Internal server error")
            }
            AppError::ServiceUnavailable => Status::unavailable("Service unavailable"),
            AppError::DatabaseError(err) => {
                tracing::error!(error = %err, "Database error");
                Status::internal("Database error")
            }
            AppError::ConfigError(err) => {
                tracing::error!(error = %err, "Configuration error");
                Status::internal("Configuration error")
            }
        }
    }
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        err.into_status()
    }
}

/// Result type alias for gRPC handlers.
pub type GrpcResult<T> = Result<tonic::Response<T>, Status>;

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn test_not_found_keeps_message() {
        let err = AppError::NotFound(anyhow::anyhow!("Checkout not found"));
        let status: Status = err.into();
        assert_eq!(status.code(), Code::NotFound);
        assert!(status.message().contains("Checkout not found"));
    }

    #[test]
    fn test_precondition_maps_to_failed_precondition() {
        let err = AppError::FailedPrecondition(anyhow::anyhow!("universal rule not configured"));
        let status: Status = err.into();
        assert_eq!(status.code(), Code::FailedPrecondition);
    }

    #[test]
    fn test_database_error_is_opaque() {
        let err = AppError::DatabaseError(anyhow::anyhow!("relation \"students\" does not exist"));
        let status: Status = err.into();
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "Database error");
    }
}
