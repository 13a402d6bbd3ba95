use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use super::errors::AppError;
use super::AppState;
use crate::access::{Caller, Grant};

/// Resolve the bearer token to a [`Caller`] and attach it to the request.
pub async fn require_caller(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(&request)
        .ok_or_else(|| AppError::unauthorized("missing bearer token"))?;

    let username = state.tokens.verify(token).ok_or_else(|| {
        debug!("Rejected bearer token for {}", request.uri().path());
        AppError::unauthorized("invalid token")
    })?;

    let grant = Grant::for_user(state.identity.as_ref(), &username);
    request.extensions_mut().insert(Caller { username, grant });
    Ok(next.run(request).await)
}

fn extract_bearer_token(request: &Request) -> Option<&str> {
    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}
