use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use super::{kind_of, normalize_currency, repository};
use crate::database::models::{DocumentStatus, Invoice};
use crate::handlers::protected::{audit, tasks::ensure_project, today};
use crate::middleware::{ApiResponse, ApiResult, ValidatedCompany};
use crate::permissions::{Grant, Principal};
use crate::services::invoice_service::{validate_items, LineInput, NewDocument};
use crate::services::{DocumentWithItems, InvoiceService};
use crate::state::AppState;
use crate::types::{Page, Pagination};
use crate::validation::FieldErrors;

#[derive(Debug, Default, Deserialize)]
pub struct DocumentFilter {
    pub status: Option<DocumentStatus>,
    pub project_id: Option<Uuid>,
    /// Case-insensitive match on the client name or number
    pub q: Option<String>,
}

/// GET /api/invoices, GET /api/quotes
pub async fn get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Query(page): Query<Pagination>,
    Query(filter): Query<DocumentFilter>,
) -> ApiResult<Page<Invoice>> {
    let today = today();
    let repo = repository(&state.pool);
    let mut qb = repo.select(principal.company_id);
    qb.push(" AND kind = ").push_bind(kind_of(&grant));
    if grant.is_restricted() {
        qb.push(" AND created_by = ").push_bind(principal.user_id);
    }
    match filter.status {
        // Overdue is never stored
        Some(DocumentStatus::Overdue) => {
            qb.push(" AND status IN ('sent', 'partially_paid') AND due_date < ").push_bind(today);
        }
        Some(status @ (DocumentStatus::Sent | DocumentStatus::PartiallyPaid)) => {
            qb.push(" AND status = ").push_bind(status);
            qb.push(" AND (due_date IS NULL OR due_date >= ").push_bind(today).push(")");
        }
        Some(status) => {
            qb.push(" AND status = ").push_bind(status);
        }
        None => {}
    }
    if let Some(project_id) = filter.project_id {
        qb.push(" AND project_id = ").push_bind(project_id);
    }
    if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = format!("%{}%", q);
        qb.push(" AND (client_name ILIKE ").push_bind(pattern.clone());
        qb.push(" OR number ILIKE ").push_bind(pattern).push(")");
    }

    let window = page.resolve(&state.config.query);
    let mut documents = repo.fetch_page(qb, "issue_date DESC, sequence DESC", window).await?;
    for document in &mut documents {
        document.status = document.effective_status(today);
    }
    Ok(ApiResponse::success(Page::new(documents, window)))
}

#[derive(Debug, Deserialize)]
pub struct CreateDocument {
    pub client_name: String,
    pub client_email: Option<String>,
    pub project_id: Option<Uuid>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub currency: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub items: Vec<LineInput>,
}

/// POST /api/invoices, POST /api/quotes - always created as a draft
pub async fn post(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Extension(ValidatedCompany(company)): Extension<ValidatedCompany>,
    Json(payload): Json<CreateDocument>,
) -> ApiResult<DocumentWithItems> {
    let today = today();
    let issue_date = payload.issue_date.unwrap_or(today);

    let mut errors = FieldErrors::new();
    let client_name = errors.text("client_name", &payload.client_name, 200);
    let client_email = payload
        .client_email
        .as_deref()
        .filter(|e| !e.trim().is_empty())
        .map(|e| errors.email("client_email", e));
    let notes = errors.optional_text("notes", payload.notes.as_deref(), 10_000);
    let currency = match payload.currency.as_deref() {
        Some(code) => normalize_currency(code).unwrap_or_else(|| {
            errors.add("currency", "must be a three-letter currency code");
            company.currency.clone()
        }),
        None => company.currency.clone(),
    };
    if let Some(due) = payload.due_date {
        errors.check(due >= issue_date, "due_date", "must not be before issue_date");
    }
    validate_items(&payload.items, &mut errors);
    errors.finish()?;

    if let Some(project_id) = payload.project_id {
        ensure_project(&state.pool, principal.company_id, project_id).await?;
    }

    let new = NewDocument {
        kind: kind_of(&grant),
        project_id: payload.project_id,
        client_name,
        client_email,
        issue_date,
        due_date: payload.due_date,
        currency,
        notes,
        items: payload.items,
    };
    let (document, items) = InvoiceService::new(state.pool.clone())
        .create(principal.company_id, principal.user_id, new)
        .await?;

    audit(&state, &principal, &grant, document.id);
    Ok(ApiResponse::created(DocumentWithItems::new(document, items, today)))
}
