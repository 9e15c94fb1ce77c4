use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::permissions::{authorize, Action, Principal, Resource};

/// Route layer: role check for the route's resource. The action comes from
/// the HTTP method; the resulting `Grant` is handed to the handler.
pub async fn require_permission(
    State(resource): State<Resource>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = request
        .extensions()
        .get::<Principal>()
        .copied()
        .ok_or_else(|| ApiError::unauthorized("User validation required before permission check"))?;

    let action = Action::from_method(request.method());
    let grant = authorize(&principal, action, resource).map_err(|e| {
        tracing::info!("Denied {:?} {:?} for user {} ({})", action, resource, principal.user_id, principal.role);
        ApiError::from(e)
    })?;

    request.extensions_mut().insert(grant);
    Ok(next.run(request).await)
}
