use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fairway_audit::AuditError;
use fairway_booking::{EditError, EditViolation};
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    AuthenticationError(String),
    #[error("{0}")]
    AuthorizationError(String),
    #[error("{0}")]
    ValidationError(String),
    #[error("{0}")]
    NotFoundError(String),
    #[error("{0}")]
    ConflictError(String),
    #[error("Edit not allowed")]
    PolicyViolation(Vec<EditViolation>),
    #[error("{0}")]
    PaymentError(String),
    /// Transient fault; the same request may be retried
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    InternalServerError(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::AuthenticationError(_) => StatusCode::UNAUTHORIZED,
            AppError::AuthorizationError(_) => StatusCode::FORBIDDEN,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFoundError(_) => StatusCode::NOT_FOUND,
            AppError::ConflictError(_) => StatusCode::CONFLICT,
            AppError::PolicyViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::PaymentError(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn reason(violation: &EditViolation) -> Value {
    let mut value = serde_json::to_value(violation).unwrap_or_else(|_| json!({}));
    if let Value::Object(map) = &mut value {
        map.insert("message".to_string(), Value::String(violation.to_string()));
    }
    value
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, reasons) = match &self {
            AppError::PolicyViolation(violations) => (self.to_string(), violations.iter().map(reason).collect()),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                ("Internal Server Error".to_string(), Vec::new())
            }
            AppError::Unavailable(msg) => {
                tracing::error!("Service unavailable: {}", msg);
                (self.to_string(), Vec::new())
            }
            _ => (self.to_string(), Vec::new()),
        };

        let body = Json(json!({
            "error": message,
            "reasons": reasons,
        }));

        (status, body).into_response()
    }
}

impl From<EditError> for AppError {
    fn from(err: EditError) -> Self {
        match err {
            EditError::NotFound(id) => AppError::NotFoundError(format!("Booking {} not found", id)),
            EditError::Validation(msg) => AppError::ValidationError(msg),
            EditError::Forbidden(msg) => AppError::AuthorizationError(msg),
            EditError::PolicyViolation(violations) => AppError::PolicyViolation(violations),
            err @ EditError::PaymentFailure(_) if err.is_retryable() => AppError::Unavailable(err.to_string()),
            err @ EditError::PaymentFailure(_) => AppError::PaymentError(err.to_string()),
            err @ EditError::InventoryConflict { .. } => AppError::ConflictError(err.to_string()),
            EditError::IdempotencyConflict(msg) => AppError::ConflictError(msg),
            EditError::System(msg) => AppError::Unavailable(msg),
        }
    }
}

impl From<AuditError> for AppError {
    fn from(err: AuditError) -> Self {
        if err.is_validation() {
            AppError::ValidationError(err.to_string())
        } else {
            AppError::InternalServerError(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairway_core::BookingStatus;

    #[test]
    fn test_violations_render_as_reasons() {
        let err = AppError::PolicyViolation(vec![
            EditViolation::NoChanges,
            EditViolation::NotEditable {
                status: BookingStatus::Completed,
            },
        ]);
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let value = reason(&EditViolation::NotEditable {
            status: BookingStatus::Completed,
        });
        assert_eq!(value["code"], "not_editable");
        assert_eq!(value["status"], "completed");
        assert_eq!(value["message"], "bookings in status completed cannot be edited");
    }

    #[test]
    fn test_edit_error_mapping() {
        let err: AppError = EditError::InventoryConflict { payment_reversed: true }.into();
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let err: AppError = EditError::Forbidden("booking belongs to another customer".to_string()).into();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let err: AppError = EditError::System("audit store down".to_string()).into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
