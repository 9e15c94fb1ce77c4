use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::load;
use crate::handlers::protected::{audit, today};
use crate::middleware::{ApiResponse, ApiResult};
use crate::permissions::{Grant, Principal};
use crate::services::invoice_service::{validate_items, LineInput};
use crate::services::{DocumentWithItems, InvoiceService};
use crate::state::AppState;
use crate::validation::FieldErrors;

#[derive(Debug, Deserialize)]
pub struct ReplaceItems {
    pub items: Vec<LineInput>,
}

/// PUT /api/invoices/:id/items - replace every line and recompute totals
pub async fn put(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReplaceItems>,
) -> ApiResult<DocumentWithItems> {
    let document = load(&state.pool, &principal, &grant, id).await?;

    let mut errors = FieldErrors::new();
    validate_items(&payload.items, &mut errors);
    errors.finish()?;

    let (document, items) = InvoiceService::new(state.pool.clone())
        .replace_items(principal.company_id, document.id, &payload.items)
        .await?;

    audit(&state, &principal, &grant, document.id);
    Ok(ApiResponse::success(DocumentWithItems::new(document, items, today())))
}
