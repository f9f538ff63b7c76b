//! Actor context middleware.
//!
//! Extracts the acting user from request headers. These headers are set by
//! the frontend gateway after authenticating the user; verification actions
//! record them on the affected rows.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

/// Acting user extracted from request headers.
#[derive(Debug, Clone)]
pub struct ActorContext {
    /// User ID making the request.
    pub user_id: String,
    /// Display name, when the gateway forwards one.
    pub user_name: Option<String>,
}

impl ActorContext {
    /// Name to stamp on audit columns: display name when present, else the id.
    pub fn audit_name(&self) -> &str {
        self.user_name.as_deref().unwrap_or(&self.user_id)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ActorContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("X-User-ID")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::AuthError(anyhow::anyhow!(
                    "Missing X-User-ID header (required from gateway)"
                ))
            })?;

        let user_name = parts
            .headers
            .get("X-User-Name")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let span = tracing::Span::current();
        span.record("user_id", user_id);

        Ok(ActorContext {
            user_id: user_id.to_string(),
            user_name,
        })
    }
}
