//! Invoices and quotes: numbering, totals, conversion and payments.
//!
//! Both kinds live in the `invoices` table. Numbers are allocated per
//! company and kind under a transaction-scoped advisory lock, so concurrent
//! creates never collide on `(company_id, kind, sequence)`.

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::database::models::{DocumentKind, DocumentStatus, Invoice, InvoiceItem, Payment, PaymentMethod};
use crate::database::DatabaseError;
use crate::error::ApiError;
use crate::validation::{FieldErrors, MAX_AMOUNT};

#[derive(Debug, thiserror::Error)]
pub enum InvoiceError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    /// The document's status does not allow the operation
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    InvalidAmount(String),
}

impl From<sqlx::Error> for InvoiceError {
    fn from(err: sqlx::Error) -> Self {
        InvoiceError::Database(err.into())
    }
}

impl From<InvoiceError> for ApiError {
    fn from(err: InvoiceError) -> Self {
        match err {
            InvoiceError::Database(e) => e.into(),
            InvoiceError::InvalidState(msg) => ApiError::unprocessable(msg),
            InvoiceError::InvalidAmount(msg) => ApiError::invalid_field("amount", msg),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineInput {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub tax_rate: Decimal,
}

/// Header fields of a new invoice or quote
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub kind: DocumentKind,
    pub project_id: Option<Uuid>,
    pub client_name: String,
    pub client_email: Option<String>,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub currency: String,
    pub notes: Option<String>,
    pub items: Vec<LineInput>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub paid_on: NaiveDate,
}

/// An invoice or quote with its line items, as returned by the API
#[derive(Debug, Clone, Serialize)]
pub struct DocumentWithItems {
    #[serde(flatten)]
    pub document: Invoice,
    pub balance_due: Decimal,
    pub items: Vec<InvoiceItem>,
}

impl DocumentWithItems {
    /// Applies the derived `overdue` status for `today`
    pub fn new(mut document: Invoice, items: Vec<InvoiceItem>, today: NaiveDate) -> Self {
        document.status = document.effective_status(today);
        Self {
            balance_due: document.balance_due(),
            document,
            items,
        }
    }
}

/// Money is kept to cents, with halves rounded away from zero
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Totals {
    pub line_totals: Vec<Decimal>,
    pub subtotal: Decimal,
    pub tax_total: Decimal,
    pub total: Decimal,
}

/// Largest quantity a `NUMERIC(12, 3)` column holds
pub const MAX_QUANTITY: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 3);

pub fn compute_totals(items: &[LineInput]) -> Result<Totals, InvoiceError> {
    let overflow = || InvoiceError::InvalidAmount(format!("document total must not exceed {}", MAX_AMOUNT));

    let mut line_totals = Vec::with_capacity(items.len());
    let mut subtotal = Decimal::ZERO;
    let mut tax_total = Decimal::ZERO;

    for item in items {
        let line = round_money(item.quantity.checked_mul(item.unit_price).ok_or_else(overflow)?);
        let tax = round_money(
            line.checked_mul(item.tax_rate)
                .and_then(|taxed| taxed.checked_div(Decimal::ONE_HUNDRED))
                .ok_or_else(overflow)?,
        );
        if line > MAX_AMOUNT {
            return Err(overflow());
        }
        line_totals.push(line);
        subtotal = subtotal.checked_add(line).ok_or_else(overflow)?;
        tax_total = tax_total.checked_add(tax).ok_or_else(overflow)?;
    }

    let total = subtotal.checked_add(tax_total).ok_or_else(overflow)?;
    if total > MAX_AMOUNT {
        return Err(overflow());
    }
    Ok(Totals {
        line_totals,
        subtotal,
        tax_total,
        total,
    })
}

/// Problems are reported as `items[2].quantity`; a document whose total
/// does not fit is reported on `items`
pub fn validate_items(items: &[LineInput], errors: &mut FieldErrors) {
    let mut lines_ok = true;
    for (i, item) in items.iter().enumerate() {
        let field = |name: &str| format!("items[{}].{}", i, name);
        let mut check = |ok: bool, name: &str, problem: &str| {
            if !ok {
                lines_ok = false;
                errors.add(&field(name), problem);
            }
        };
        check(!item.description.trim().is_empty(), "description", "description is required");
        check(item.quantity > Decimal::ZERO, "quantity", "must be greater than zero");
        check(item.quantity <= MAX_QUANTITY, "quantity", "must be less than one billion");
        check(!item.unit_price.is_sign_negative() || item.unit_price.is_zero(), "unit_price", "must not be negative");
        check(item.unit_price <= MAX_AMOUNT, "unit_price", "must not exceed 999999999999.99");
        check(
            item.tax_rate >= Decimal::ZERO && item.tax_rate <= Decimal::ONE_HUNDRED,
            "tax_rate",
            "must be between 0 and 100",
        );
    }

    if lines_ok {
        if let Err(InvoiceError::InvalidAmount(msg)) = compute_totals(items) {
            errors.add("items", msg);
        }
    }
}

const SELECT_INVOICE: &str = "SELECT * FROM invoices WHERE company_id = $1 AND id = $2 AND deleted_at IS NULL";

pub struct InvoiceService {
    pool: PgPool,
}

impl InvoiceService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        company_id: Uuid,
        created_by: Uuid,
        new: NewDocument,
    ) -> Result<(Invoice, Vec<InvoiceItem>), InvoiceError> {
        let mut tx = self.pool.begin().await?;
        let created = Self::insert_document(&mut tx, company_id, created_by, &new, None).await?;
        tx.commit().await?;
        tracing::debug!("Created {} {}", created.0.kind.prefix(), created.0.number);
        Ok(created)
    }

    async fn insert_document(
        tx: &mut Transaction<'_, Postgres>,
        company_id: Uuid,
        created_by: Uuid,
        new: &NewDocument,
        source_quote_id: Option<Uuid>,
    ) -> Result<(Invoice, Vec<InvoiceItem>), InvoiceError> {
        let sequence = Self::next_sequence(tx, company_id, new.kind).await?;
        let totals = compute_totals(&new.items)?;

        let document: Invoice = sqlx::query_as(
            "INSERT INTO invoices (
                company_id, kind, sequence, number, status, project_id, client_name, client_email,
                issue_date, due_date, currency, notes, subtotal, tax_total, total, source_quote_id, created_by
             ) VALUES ($1, $2, $3, $4, 'draft', $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
             RETURNING *",
        )
        .bind(company_id)
        .bind(new.kind)
        .bind(sequence)
        .bind(new.kind.format_number(sequence))
        .bind(new.project_id)
        .bind(&new.client_name)
        .bind(&new.client_email)
        .bind(new.issue_date)
        .bind(new.due_date)
        .bind(&new.currency)
        .bind(&new.notes)
        .bind(totals.subtotal)
        .bind(totals.tax_total)
        .bind(totals.total)
        .bind(source_quote_id)
        .bind(created_by)
        .fetch_one(&mut **tx)
        .await?;

        let items = Self::insert_items(tx, document.id, &new.items, &totals).await?;
        Ok((document, items))
    }

    /// Serialized per company and kind by an advisory lock held until commit
    async fn next_sequence(
        tx: &mut Transaction<'_, Postgres>,
        company_id: Uuid,
        kind: DocumentKind,
    ) -> Result<i32, InvoiceError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("{}:{}", company_id, kind.prefix()))
            .execute(&mut **tx)
            .await?;

        let (next,): (i32,) =
            sqlx::query_as("SELECT COALESCE(MAX(sequence), 0) + 1 FROM invoices WHERE company_id = $1 AND kind = $2")
                .bind(company_id)
                .bind(kind)
                .fetch_one(&mut **tx)
                .await?;
        Ok(next)
    }

    async fn insert_items(
        tx: &mut Transaction<'_, Postgres>,
        invoice_id: Uuid,
        items: &[LineInput],
        totals: &Totals,
    ) -> Result<Vec<InvoiceItem>, InvoiceError> {
        let mut saved = Vec::with_capacity(items.len());
        for (position, (item, line_total)) in items.iter().zip(&totals.line_totals).enumerate() {
            let row: InvoiceItem = sqlx::query_as(
                "INSERT INTO invoice_items (invoice_id, position, description, quantity, unit_price, tax_rate, line_total)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 RETURNING *",
            )
            .bind(invoice_id)
            .bind(position as i32)
            .bind(item.description.trim())
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.tax_rate)
            .bind(line_total)
            .fetch_one(&mut **tx)
            .await?;
            saved.push(row);
        }
        Ok(saved)
    }

    pub async fn items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, InvoiceError> {
        let items = sqlx::query_as("SELECT * FROM invoice_items WHERE invoice_id = $1 ORDER BY position")
            .bind(invoice_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    /// Swap every line item and recompute totals. Drafts only.
    pub async fn replace_items(
        &self,
        company_id: Uuid,
        document_id: Uuid,
        items: &[LineInput],
    ) -> Result<(Invoice, Vec<InvoiceItem>), InvoiceError> {
        let mut tx = self.pool.begin().await?;
        let document = Self::lock_document(&mut tx, company_id, document_id).await?;
        if document.status != DocumentStatus::Draft {
            return Err(InvoiceError::InvalidState(format!(
                "{} is no longer a draft; items cannot change",
                document.number
            )));
        }

        sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
            .bind(document.id)
            .execute(&mut *tx)
            .await?;
        let totals = compute_totals(items)?;
        let saved = Self::insert_items(&mut tx, document.id, items, &totals).await?;

        let document: Invoice = sqlx::query_as(
            "UPDATE invoices SET subtotal = $1, tax_total = $2, total = $3, updated_at = now()
             WHERE id = $4 RETURNING *",
        )
        .bind(totals.subtotal)
        .bind(totals.tax_total)
        .bind(totals.total)
        .bind(document.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((document, saved))
    }

    /// Turn a sent or accepted quote into a draft invoice with the same items
    pub async fn convert_quote(
        &self,
        company_id: Uuid,
        created_by: Uuid,
        quote_id: Uuid,
        issue_date: NaiveDate,
    ) -> Result<(Invoice, Vec<InvoiceItem>), InvoiceError> {
        let mut tx = self.pool.begin().await?;
        let quote = Self::lock_document(&mut tx, company_id, quote_id).await?;
        if quote.kind != DocumentKind::Quote {
            return Err(DatabaseError::NotFound(format!("Quote {} not found", quote_id)).into());
        }
        if !matches!(quote.status, DocumentStatus::Sent | DocumentStatus::Accepted) {
            return Err(InvoiceError::InvalidState(format!(
                "Only sent or accepted quotes can be converted; {} is {:?}",
                quote.number, quote.status
            )));
        }

        let items: Vec<InvoiceItem> = sqlx::query_as("SELECT * FROM invoice_items WHERE invoice_id = $1 ORDER BY position")
            .bind(quote.id)
            .fetch_all(&mut *tx)
            .await?;

        let new = NewDocument {
            kind: DocumentKind::Invoice,
            project_id: quote.project_id,
            client_name: quote.client_name.clone(),
            client_email: quote.client_email.clone(),
            issue_date,
            due_date: quote.due_date.filter(|due| *due >= issue_date),
            currency: quote.currency.clone(),
            notes: quote.notes.clone(),
            items: items
                .into_iter()
                .map(|item| LineInput {
                    description: item.description,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    tax_rate: item.tax_rate,
                })
                .collect(),
        };
        let created = Self::insert_document(&mut tx, company_id, created_by, &new, Some(quote.id)).await?;

        sqlx::query("UPDATE invoices SET status = 'converted', updated_at = now() WHERE id = $1")
            .bind(quote.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!("Converted {} into {}", quote.number, created.0.number);
        Ok(created)
    }

    /// Row-locks the document until the transaction ends. Payments take the
    /// same lock, so status checks made under it see the current balance.
    pub(crate) async fn find_for_update(
        tx: &mut Transaction<'_, Postgres>,
        company_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Invoice>, InvoiceError> {
        let document = sqlx::query_as(&format!("{} FOR UPDATE", SELECT_INVOICE))
            .bind(company_id)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(document)
    }

    async fn lock_document(
        tx: &mut Transaction<'_, Postgres>,
        company_id: Uuid,
        id: Uuid,
    ) -> Result<Invoice, InvoiceError> {
        Self::find_for_update(tx, company_id, id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Invoice {} not found", id)).into())
    }

    /// Insert a payment and move the invoice's `amount_paid` and status with it
    pub async fn record_payment(
        &self,
        company_id: Uuid,
        recorded_by: Uuid,
        new: NewPayment,
    ) -> Result<(Payment, Invoice), InvoiceError> {
        if new.amount <= Decimal::ZERO {
            return Err(InvoiceError::InvalidAmount("must be greater than zero".to_string()));
        }
        if new.amount != round_money(new.amount) {
            return Err(InvoiceError::InvalidAmount("must have at most two decimal places".to_string()));
        }

        let mut tx = self.pool.begin().await?;
        let invoice = Self::lock_document(&mut tx, company_id, new.invoice_id).await?;
        check_payable(&invoice, new.amount)?;

        let payment: Payment = sqlx::query_as(
            "INSERT INTO payments (company_id, invoice_id, amount, method, reference, paid_on, recorded_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(company_id)
        .bind(invoice.id)
        .bind(new.amount)
        .bind(new.method)
        .bind(&new.reference)
        .bind(new.paid_on)
        .bind(recorded_by)
        .fetch_one(&mut *tx)
        .await?;

        let invoice = Self::apply_paid(&mut tx, &invoice, invoice.amount_paid + new.amount).await?;
        tx.commit().await?;
        Ok((payment, invoice))
    }

    /// Remove a payment and roll its amount back off the invoice
    pub async fn delete_payment(&self, company_id: Uuid, payment_id: Uuid) -> Result<Invoice, InvoiceError> {
        let mut tx = self.pool.begin().await?;
        let payment: Option<Payment> =
            sqlx::query_as("SELECT * FROM payments WHERE company_id = $1 AND id = $2 FOR UPDATE")
                .bind(company_id)
                .bind(payment_id)
                .fetch_optional(&mut *tx)
                .await?;
        let payment = payment.ok_or_else(|| DatabaseError::NotFound(format!("Payment {} not found", payment_id)))?;

        let invoice = Self::lock_document(&mut tx, company_id, payment.invoice_id).await?;
        sqlx::query("DELETE FROM payments WHERE id = $1")
            .bind(payment.id)
            .execute(&mut *tx)
            .await?;

        let remaining = (invoice.amount_paid - payment.amount).max(Decimal::ZERO);
        let invoice = Self::apply_paid(&mut tx, &invoice, remaining).await?;
        tx.commit().await?;
        Ok(invoice)
    }

    async fn apply_paid(
        tx: &mut Transaction<'_, Postgres>,
        invoice: &Invoice,
        amount_paid: Decimal,
    ) -> Result<Invoice, InvoiceError> {
        let status = invoice.status_for_paid(amount_paid);
        let updated = sqlx::query_as(
            "UPDATE invoices SET amount_paid = $1, status = $2, updated_at = now()
             WHERE id = $3 RETURNING *",
        )
        .bind(amount_paid)
        .bind(status)
        .bind(invoice.id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(updated)
    }

    pub async fn payments_for(&self, company_id: Uuid, invoice_id: Uuid) -> Result<Vec<Payment>, InvoiceError> {
        let payments = sqlx::query_as(
            "SELECT * FROM payments WHERE company_id = $1 AND invoice_id = $2 ORDER BY paid_on, created_at",
        )
        .bind(company_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }
}

/// Payments go against issued, unpaid invoices and never exceed the balance
pub fn check_payable(invoice: &Invoice, amount: Decimal) -> Result<(), InvoiceError> {
    if invoice.kind != DocumentKind::Invoice {
        return Err(InvoiceError::InvalidState("Payments can only be recorded against invoices".to_string()));
    }
    match invoice.status {
        DocumentStatus::Sent | DocumentStatus::PartiallyPaid | DocumentStatus::Overdue => {}
        DocumentStatus::Draft => {
            return Err(InvoiceError::InvalidState(format!("{} has not been sent yet", invoice.number)))
        }
        other => {
            return Err(InvoiceError::InvalidState(format!(
                "{} is {:?} and cannot take payments",
                invoice.number, other
            )))
        }
    }
    let balance = invoice.balance_due();
    if amount > balance {
        return Err(InvoiceError::InvalidAmount(format!("exceeds the outstanding balance of {}", balance)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn line(quantity: &str, unit_price: &str, tax_rate: &str) -> LineInput {
        LineInput {
            description: "Consulting".to_string(),
            quantity: quantity.parse().unwrap(),
            unit_price: unit_price.parse().unwrap(),
            tax_rate: tax_rate.parse().unwrap(),
        }
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn invoice(kind: DocumentKind, status: DocumentStatus, total: &str, paid: &str) -> Invoice {
        let now = Utc::now();
        Invoice {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            kind,
            sequence: 3,
            number: kind.format_number(3),
            status,
            project_id: None,
            client_name: "Initech".to_string(),
            client_email: None,
            issue_date: now.date_naive(),
            due_date: None,
            currency: "USD".to_string(),
            notes: None,
            subtotal: dec(total),
            tax_total: Decimal::ZERO,
            total: dec(total),
            amount_paid: dec(paid),
            source_quote_id: None,
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn halves_round_away_from_zero() {
        assert_eq!(round_money(dec("2.345")), dec("2.35"));
        assert_eq!(round_money(dec("2.355")), dec("2.36"));
        assert_eq!(round_money(dec("-2.345")), dec("-2.35"));
        assert_eq!(round_money(dec("2.344")), dec("2.34"));
    }

    #[test]
    fn totals_sum_rounded_lines() {
        let totals =
            compute_totals(&[line("3", "19.99", "20"), line("1.5", "10.005", "0"), line("2", "0.125", "10")]).unwrap();
        assert_eq!(totals.line_totals, vec![dec("59.97"), dec("15.01"), dec("0.25")]);
        assert_eq!(totals.subtotal, dec("75.23"));
        // 11.994 → 11.99, 0 and 0.025 → 0.03
        assert_eq!(totals.tax_total, dec("12.02"));
        assert_eq!(totals.total, dec("87.25"));
    }

    #[test]
    fn empty_documents_total_zero() {
        let totals = compute_totals(&[]).unwrap();
        assert_eq!(totals.total, Decimal::ZERO);
        assert!(totals.line_totals.is_empty());
    }

    #[test]
    fn bad_items_are_reported_by_index() {
        let mut errors = FieldErrors::new();
        validate_items(&[line("1", "5", "0"), line("0", "-1", "150")], &mut errors);
        let body = errors.finish().unwrap_err().to_json();
        let fields = &body["field_errors"];
        assert!(fields.get("items[0].quantity").is_none());
        assert!(fields["items[1].quantity"].is_string());
        assert!(fields["items[1].unit_price"].is_string());
        assert!(fields["items[1].tax_rate"].is_string());
    }

    #[test]
    fn column_limits_are_exact() {
        assert_eq!(MAX_QUANTITY, dec("999999999.999"));
    }

    #[test]
    fn oversized_items_are_field_errors() {
        let huge = line("100000000000000000", "100000000000000000", "0");
        assert!(matches!(compute_totals(&[huge.clone()]), Err(InvoiceError::InvalidAmount(_))));

        let mut errors = FieldErrors::new();
        validate_items(&[huge], &mut errors);
        let body = errors.finish().unwrap_err().to_json();
        assert!(body["field_errors"]["items[0].quantity"].is_string());
        assert!(body["field_errors"]["items[0].unit_price"].is_string());
    }

    #[test]
    fn totals_beyond_the_column_are_rejected() {
        // Each line fits on its own; together with tax they do not
        let big = line("999999999", "999.99", "0");
        let mut errors = FieldErrors::new();
        validate_items(&[big.clone(), big.clone()], &mut errors);
        let body = errors.finish().unwrap_err().to_json();
        assert!(body["field_errors"]["items"].is_string());
        assert!(body["field_errors"].get("items[0].quantity").is_none());

        let mut errors = FieldErrors::new();
        validate_items(&[big], &mut errors);
        assert!(errors.is_empty());
    }

    #[test]
    fn payments_need_an_open_invoice() {
        let sent = invoice(DocumentKind::Invoice, DocumentStatus::Sent, "100", "40");
        assert!(check_payable(&sent, dec("60")).is_ok());
        assert!(matches!(check_payable(&sent, dec("60.01")), Err(InvoiceError::InvalidAmount(_))));

        for status in [DocumentStatus::Draft, DocumentStatus::Void, DocumentStatus::Paid] {
            let closed = invoice(DocumentKind::Invoice, status, "100", "0");
            assert!(matches!(check_payable(&closed, dec("1")), Err(InvoiceError::InvalidState(_))));
        }

        let quote = invoice(DocumentKind::Quote, DocumentStatus::Accepted, "100", "0");
        assert!(matches!(check_payable(&quote, dec("1")), Err(InvoiceError::InvalidState(_))));
    }

    #[test]
    fn documents_report_balance_and_overdue() {
        let mut inv = invoice(DocumentKind::Invoice, DocumentStatus::PartiallyPaid, "100", "25");
        let today = Utc::now().date_naive();
        inv.due_date = today.pred_opt();
        let shown = DocumentWithItems::new(inv, Vec::new(), today);
        assert_eq!(shown.document.status, DocumentStatus::Overdue);
        assert_eq!(shown.balance_due, dec("75"));

        let value = serde_json::to_value(&shown).unwrap();
        assert_eq!(value["status"], "overdue");
        assert_eq!(value["number"], "INV-0003");
    }
}
