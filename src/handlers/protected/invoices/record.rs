use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use super::{kind_of, label, load, load_for_update, normalize_currency, repository};
use crate::database::models::{DocumentKind, DocumentStatus, Invoice, Payment};
use crate::error::ApiError;
use crate::handlers::protected::{audit, tasks::ensure_project, today};
use crate::middleware::{ApiResponse, ApiResult};
use crate::permissions::{authorize, Action, Grant, Principal, Resource};
use crate::services::{DocumentWithItems, InvoiceService};
use crate::state::AppState;
use crate::types::double_option;
use crate::validation::FieldErrors;

/// GET /api/invoices/:id, GET /api/quotes/:id
pub async fn get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
) -> ApiResult<DocumentWithItems> {
    let document = load(&state.pool, &principal, &grant, id).await?;
    let items = InvoiceService::new(state.pool.clone()).items(document.id).await?;
    Ok(ApiResponse::success(DocumentWithItems::new(document, items, today())))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateDocument {
    pub client_name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub client_email: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub project_id: Option<Option<Uuid>>,
    pub issue_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<NaiveDate>>,
    pub currency: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
    pub status: Option<DocumentStatus>,
}

impl UpdateDocument {
    fn edits_header(&self) -> bool {
        self.client_name.is_some()
            || self.client_email.is_some()
            || self.project_id.is_some()
            || self.issue_date.is_some()
            || self.due_date.is_some()
            || self.currency.is_some()
            || self.notes.is_some()
    }
}

/// Paid, void and converted documents accept no changes at all, and a
/// status change must be one a user may request directly
pub(crate) fn check_update(document: &Invoice, next: Option<DocumentStatus>) -> Result<(), ApiError> {
    if document.status.is_final() {
        return Err(ApiError::unprocessable(format!(
            "{} is {:?} and can no longer change",
            document.number, document.status
        )));
    }
    let Some(next) = next else {
        return Ok(());
    };
    if next == document.status {
        return Ok(());
    }
    if !document.status.can_move_to(document.kind, next) {
        return Err(ApiError::unprocessable(format!(
            "{} cannot move from {:?} to {:?}",
            document.number, document.status, next
        )));
    }
    if next == DocumentStatus::Void && document.amount_paid > Decimal::ZERO {
        return Err(ApiError::unprocessable(format!(
            "{} has payments recorded; delete them before voiding",
            document.number
        )));
    }
    Ok(())
}

/// PATCH /api/invoices/:id, PATCH /api/quotes/:id
pub async fn patch(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateDocument>,
) -> ApiResult<DocumentWithItems> {
    // Held until commit so a payment cannot land between the check and the write
    let mut tx = state.pool.begin().await?;
    let current = load_for_update(&mut tx, &principal, &grant, id).await?;
    check_update(&current, payload.status)?;

    if payload.edits_header() && current.status != DocumentStatus::Draft {
        return Err(ApiError::unprocessable(format!(
            "{} has been issued; only its status can change",
            current.number
        )));
    }

    let mut errors = FieldErrors::new();
    let client_name = payload.client_name.as_deref().map(|n| errors.text("client_name", n, 200));
    let client_email = payload.client_email.as_ref().map(|e| match e.as_deref().map(str::trim) {
        Some(e) if !e.is_empty() => Some(errors.email("client_email", e)),
        _ => None,
    });
    let notes = payload
        .notes
        .as_ref()
        .map(|n| errors.optional_text("notes", n.as_deref(), 10_000));
    let currency = payload.currency.as_deref().and_then(|code| {
        let normalized = normalize_currency(code);
        errors.check(normalized.is_some(), "currency", "must be a three-letter currency code");
        normalized
    });
    let issue_date = payload.issue_date.unwrap_or(current.issue_date);
    let due_date = payload.due_date.unwrap_or(current.due_date);
    if let Some(due) = due_date {
        errors.check(due >= issue_date, "due_date", "must not be before issue_date");
    }
    errors.finish()?;

    if let Some(Some(project_id)) = payload.project_id {
        ensure_project(&state.pool, principal.company_id, project_id).await?;
    }

    let mut qb = QueryBuilder::<Postgres>::new("UPDATE invoices SET updated_at = now()");
    if let Some(client_name) = client_name {
        qb.push(", client_name = ").push_bind(client_name);
    }
    if let Some(client_email) = client_email {
        qb.push(", client_email = ").push_bind(client_email);
    }
    if let Some(project_id) = payload.project_id {
        qb.push(", project_id = ").push_bind(project_id);
    }
    if let Some(issue_date) = payload.issue_date {
        qb.push(", issue_date = ").push_bind(issue_date);
    }
    if let Some(due_date) = payload.due_date {
        qb.push(", due_date = ").push_bind(due_date);
    }
    if let Some(currency) = currency {
        qb.push(", currency = ").push_bind(currency);
    }
    if let Some(notes) = notes {
        qb.push(", notes = ").push_bind(notes);
    }
    if let Some(status) = payload.status {
        qb.push(", status = ").push_bind(status);
    }
    qb.push(" WHERE company_id = ").push_bind(principal.company_id);
    qb.push(" AND id = ").push_bind(id);
    qb.push(" AND deleted_at IS NULL RETURNING *");

    let document: Invoice = qb.build_query_as().fetch_one(&mut *tx).await?;
    tx.commit().await?;
    if payload.status.is_some_and(|s| s != current.status) {
        tracing::info!("{} moved from {:?} to {:?}", document.number, current.status, document.status);
    }
    let items = InvoiceService::new(state.pool.clone()).items(document.id).await?;

    audit(&state, &principal, &grant, document.id);
    Ok(ApiResponse::success(DocumentWithItems::new(document, items, today())))
}

/// DELETE /api/invoices/:id, DELETE /api/quotes/:id - drafts only;
/// issued invoices are voided instead
pub async fn delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    let document = load(&state.pool, &principal, &grant, id).await?;
    let deletable = match document.kind {
        DocumentKind::Invoice => document.status == DocumentStatus::Draft,
        DocumentKind::Quote => !matches!(document.status, DocumentStatus::Converted),
    };
    if !deletable {
        return Err(ApiError::unprocessable(format!(
            "{} {} is {:?} and cannot be deleted",
            label(kind_of(&grant)),
            document.number,
            document.status
        )));
    }

    repository(&state.pool).delete(principal.company_id, id).await?;
    audit(&state, &principal, &grant, id);
    Ok(ApiResponse::no_content())
}

/// GET /api/invoices/:id/payments
pub async fn payments(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<Payment>> {
    let document = load(&state.pool, &principal, &grant, id).await?;
    authorize(&principal, Action::Read, Resource::Payment)?;
    let payments = InvoiceService::new(state.pool.clone())
        .payments_for(principal.company_id, document.id)
        .await?;
    Ok(ApiResponse::success(payments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn document(kind: DocumentKind, status: DocumentStatus, paid: i64) -> Invoice {
        let now = Utc::now();
        Invoice {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            kind,
            sequence: 1,
            number: kind.format_number(1),
            status,
            project_id: None,
            client_name: "Umbrella".to_string(),
            client_email: None,
            issue_date: now.date_naive(),
            due_date: None,
            currency: "USD".to_string(),
            notes: None,
            subtotal: Decimal::from(200),
            tax_total: Decimal::ZERO,
            total: Decimal::from(200),
            amount_paid: Decimal::from(paid),
            source_quote_id: None,
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn final_documents_are_immutable() {
        for status in [DocumentStatus::Paid, DocumentStatus::Void] {
            let doc = document(DocumentKind::Invoice, status, 0);
            assert!(check_update(&doc, None).is_err());
        }
        let converted = document(DocumentKind::Quote, DocumentStatus::Converted, 0);
        assert!(check_update(&converted, Some(DocumentStatus::Draft)).is_err());
    }

    #[test]
    fn status_changes_follow_the_kind() {
        let draft = document(DocumentKind::Invoice, DocumentStatus::Draft, 0);
        assert!(check_update(&draft, Some(DocumentStatus::Sent)).is_ok());
        assert!(check_update(&draft, Some(DocumentStatus::Paid)).is_err());
        assert!(check_update(&draft, Some(DocumentStatus::Draft)).is_ok());

        let quote = document(DocumentKind::Quote, DocumentStatus::Sent, 0);
        assert!(check_update(&quote, Some(DocumentStatus::Accepted)).is_ok());
        assert!(check_update(&quote, Some(DocumentStatus::Converted)).is_err());
    }

    #[test]
    fn locked_rows_with_a_new_payment_reject_stale_status_changes() {
        // What a PATCH sees once a concurrent payment has committed
        let mut paid_meanwhile = document(DocumentKind::Invoice, DocumentStatus::PartiallyPaid, 50);
        for next in [DocumentStatus::Void, DocumentStatus::Sent, DocumentStatus::Draft] {
            let err = check_update(&paid_meanwhile, Some(next)).unwrap_err();
            assert_eq!(err.status_code(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
        }
        assert!(check_update(&paid_meanwhile, Some(DocumentStatus::PartiallyPaid)).is_ok());

        paid_meanwhile.status = DocumentStatus::Paid;
        paid_meanwhile.amount_paid = Decimal::from(200);
        assert!(check_update(&paid_meanwhile, Some(DocumentStatus::Void)).is_err());
    }

    #[test]
    fn invoices_with_payments_cannot_be_voided() {
        let partly_paid = document(DocumentKind::Invoice, DocumentStatus::Sent, 50);
        let err = check_update(&partly_paid, Some(DocumentStatus::Void)).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);

        let unpaid = document(DocumentKind::Invoice, DocumentStatus::Sent, 0);
        assert!(check_update(&unpaid, Some(DocumentStatus::Void)).is_ok());
    }
}
