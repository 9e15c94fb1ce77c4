use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::{Invoice, Payment, PaymentMethod};
use crate::database::Repository;
use crate::handlers::protected::{audit, today};
use crate::middleware::{ApiResponse, ApiResult};
use crate::permissions::{Grant, Principal};
use crate::services::invoice_service::NewPayment;
use crate::services::InvoiceService;
use crate::state::AppState;
use crate::types::{Page, Pagination};
use crate::validation::FieldErrors;

pub(crate) fn repository(pool: &PgPool) -> Repository<Payment> {
    Repository::new("payments", "Payment", pool.clone()).hard_delete()
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentFilter {
    pub invoice_id: Option<Uuid>,
    pub method: Option<PaymentMethod>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// GET /api/payments?invoice_id=&method=&from=&to=
pub async fn payments_get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Query(page): Query<Pagination>,
    Query(filter): Query<PaymentFilter>,
) -> ApiResult<Page<Payment>> {
    let repo = repository(&state.pool);
    let mut qb = repo.select(principal.company_id);
    if grant.is_restricted() {
        qb.push(" AND recorded_by = ").push_bind(principal.user_id);
    }
    if let Some(invoice_id) = filter.invoice_id {
        qb.push(" AND invoice_id = ").push_bind(invoice_id);
    }
    if let Some(method) = filter.method {
        qb.push(" AND method = ").push_bind(method);
    }
    if let Some(from) = filter.from {
        qb.push(" AND paid_on >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        qb.push(" AND paid_on <= ").push_bind(to);
    }

    let window = page.resolve(&state.config.query);
    let payments = repo.fetch_page(qb, "paid_on DESC, created_at DESC", window).await?;
    Ok(ApiResponse::success(Page::new(payments, window)))
}

#[derive(Debug, Deserialize)]
pub struct CreatePayment {
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub method: Option<PaymentMethod>,
    pub reference: Option<String>,
    pub paid_on: Option<NaiveDate>,
}

/// A recorded payment with the invoice it moved
#[derive(Debug, Serialize)]
pub struct PaymentReceipt {
    pub payment: Payment,
    pub invoice: Invoice,
}

/// POST /api/payments
pub async fn payments_post(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Json(payload): Json<CreatePayment>,
) -> ApiResult<PaymentReceipt> {
    let mut errors = FieldErrors::new();
    let reference = errors.optional_text("reference", payload.reference.as_deref(), 200);
    let paid_on = payload.paid_on.unwrap_or_else(today);
    errors.check(paid_on <= today(), "paid_on", "must not be in the future");
    errors.finish()?;

    let new = NewPayment {
        invoice_id: payload.invoice_id,
        amount: payload.amount,
        method: payload.method.unwrap_or(PaymentMethod::BankTransfer),
        reference,
        paid_on,
    };
    let (payment, mut invoice) = InvoiceService::new(state.pool.clone())
        .record_payment(principal.company_id, principal.user_id, new)
        .await?;
    invoice.status = invoice.effective_status(today());
    tracing::info!(
        "Payment of {} recorded against {} ({:?})",
        payment.amount,
        invoice.number,
        invoice.status
    );

    audit(&state, &principal, &grant, payment.id);
    Ok(ApiResponse::created(PaymentReceipt { payment, invoice }))
}

/// GET /api/payments/:id
pub async fn payment_get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
) -> ApiResult<Payment> {
    let payment = repository(&state.pool).find(principal.company_id, id).await?;
    grant.check(&principal, &payment.ownership())?;
    Ok(ApiResponse::success(payment))
}

/// DELETE /api/payments/:id - reverses the payment on its invoice
pub async fn payment_delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
) -> ApiResult<Invoice> {
    let payment = repository(&state.pool).find(principal.company_id, id).await?;
    grant.check(&principal, &payment.ownership())?;

    let mut invoice = InvoiceService::new(state.pool.clone())
        .delete_payment(principal.company_id, payment.id)
        .await?;
    invoice.status = invoice.effective_status(today());

    audit(&state, &principal, &grant, id);
    Ok(ApiResponse::success(invoice))
}
