use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::admin::AdminState;

pub async fn admin_auth_middleware(
    State(state): State<AdminState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match token {
        Some(t) if !state.api_key.is_empty() && t == &*state.api_key => Ok(next.run(request).await),
        _ => {
            tracing::debug!(path = %request.uri().path(), "Admin request rejected");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
