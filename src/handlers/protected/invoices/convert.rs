use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use super::load;
use crate::handlers::protected::{audit, today};
use crate::middleware::{ApiResponse, ApiResult};
use crate::permissions::{authorize, Action, Grant, Principal, Resource};
use crate::services::{DocumentWithItems, InvoiceService};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ConvertQuote {
    pub issue_date: Option<NaiveDate>,
}

/// POST /api/quotes/:id/convert - the caller also needs to create invoices
pub async fn post(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
    payload: Option<Json<ConvertQuote>>,
) -> ApiResult<DocumentWithItems> {
    let quote = load(&state.pool, &principal, &grant, id).await?;
    let invoice_grant = authorize(&principal, Action::Create, Resource::Invoice)?;

    let today = today();
    let issue_date = payload.and_then(|Json(body)| body.issue_date).unwrap_or(today);
    let (invoice, items) = InvoiceService::new(state.pool.clone())
        .convert_quote(principal.company_id, principal.user_id, quote.id, issue_date)
        .await?;

    audit(&state, &principal, &grant, quote.id);
    audit(&state, &principal, &invoice_grant, invoice.id);
    Ok(ApiResponse::created(DocumentWithItems::new(invoice, items, today)))
}
