use axum::{extract::FromRequestParts, http::request::Parts, http::HeaderMap};
use fairway_core::{Actor, ActorRole};

use crate::error::AppError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_NAME_HEADER: &str = "x-actor-name";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

// ============================================================================
// Caller context
// ============================================================================

/// The caller, as described by the `X-Actor-*` headers. Authentication
/// happens upstream; these headers are trusted.
#[derive(Debug, Clone)]
pub struct CurrentActor(pub Actor);

impl CurrentActor {
    /// Reject callers that are not staff, admin or system
    pub fn require_staff(&self) -> Result<&Actor, AppError> {
        if self.0.role.is_administrative() {
            Ok(&self.0)
        } else {
            Err(AppError::AuthorizationError(format!(
                "role {} cannot perform this action",
                self.0.role.as_str()
            )))
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn parse_role(value: &str) -> Option<ActorRole> {
    [ActorRole::Customer, ActorRole::Staff, ActorRole::Admin, ActorRole::System]
        .into_iter()
        .find(|role| role.as_str().eq_ignore_ascii_case(value))
}

impl<S> FromRequestParts<S> for CurrentActor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(&parts.headers, ACTOR_ID_HEADER)
            .ok_or_else(|| AppError::AuthenticationError("missing X-Actor-Id header".to_string()))?;

        let role = match header(&parts.headers, ACTOR_ROLE_HEADER) {
            Some(value) => parse_role(value)
                .ok_or_else(|| AppError::ValidationError(format!("unknown actor role {}", value)))?,
            None => ActorRole::Customer,
        };
        let name = header(&parts.headers, ACTOR_NAME_HEADER).unwrap_or(id);

        Ok(CurrentActor(Actor::new(id, name, role)))
    }
}

/// The `Idempotency-Key` header, required on commit endpoints
pub fn idempotency_key(headers: &HeaderMap) -> Result<String, AppError> {
    header(headers, IDEMPOTENCY_KEY_HEADER)
        .map(str::to_string)
        .ok_or_else(|| AppError::ValidationError("missing Idempotency-Key header".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_parse_role() {
        assert_eq!(parse_role("STAFF"), Some(ActorRole::Staff));
        assert_eq!(parse_role("customer"), Some(ActorRole::Customer));
        assert_eq!(parse_role("golfer"), None);
    }

    #[test]
    fn test_idempotency_key_required() {
        let mut headers = HeaderMap::new();
        assert!(idempotency_key(&headers).is_err());

        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static(" edit-7 "));
        assert_eq!(idempotency_key(&headers).unwrap(), "edit-7");
    }
}
