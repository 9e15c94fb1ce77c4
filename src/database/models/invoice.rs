use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::permissions::{Ownership, Resource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "document_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Invoice,
    Quote,
}

impl DocumentKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentKind::Invoice => "INV",
            DocumentKind::Quote => "QUO",
        }
    }

    pub fn resource(&self) -> Resource {
        match self {
            DocumentKind::Invoice => Resource::Invoice,
            DocumentKind::Quote => Resource::Quote,
        }
    }

    /// `INV-0007`
    pub fn format_number(&self, sequence: i32) -> String {
        format!("{}-{:04}", self.prefix(), sequence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "document_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Sent,
    PartiallyPaid,
    Paid,
    Overdue,
    Void,
    Accepted,
    Declined,
    Converted,
}

impl DocumentStatus {
    /// Transitions a user may request directly. Payment states and
    /// `converted` are reached through their own operations.
    pub fn can_move_to(&self, kind: DocumentKind, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        match kind {
            DocumentKind::Invoice => matches!(
                (self, next),
                (Draft, Sent) | (Draft, Void) | (Sent, Void) | (Overdue, Void)
            ),
            DocumentKind::Quote => matches!(
                (self, next),
                (Draft, Sent) | (Sent, Accepted) | (Sent, Declined) | (Draft, Declined) | (Declined, Draft)
            ),
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, DocumentStatus::Paid | DocumentStatus::Void | DocumentStatus::Converted)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub company_id: Uuid,
    pub kind: DocumentKind,
    pub sequence: i32,
    pub number: String,
    pub status: DocumentStatus,
    pub project_id: Option<Uuid>,
    pub client_name: String,
    pub client_email: Option<String>,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub currency: String,
    pub notes: Option<String>,
    pub subtotal: Decimal,
    pub tax_total: Decimal,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub source_quote_id: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn ownership(&self) -> Ownership {
        Ownership::new(self.company_id).owned_by(self.created_by)
    }

    pub fn balance_due(&self) -> Decimal {
        self.total - self.amount_paid
    }

    /// Stored status, with `overdue` derived for unpaid invoices past due
    pub fn effective_status(&self, today: NaiveDate) -> DocumentStatus {
        let unpaid = matches!(self.status, DocumentStatus::Sent | DocumentStatus::PartiallyPaid);
        match (self.kind, self.due_date) {
            (DocumentKind::Invoice, Some(due)) if unpaid && due < today => DocumentStatus::Overdue,
            _ => self.status,
        }
    }

    /// Status after `amount_paid` changes
    pub fn status_for_paid(&self, amount_paid: Decimal) -> DocumentStatus {
        if amount_paid >= self.total && self.total > Decimal::ZERO {
            DocumentStatus::Paid
        } else if amount_paid > Decimal::ZERO {
            DocumentStatus::PartiallyPaid
        } else {
            DocumentStatus::Sent
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct InvoiceItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub position: i32,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    pub line_total: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice(status: DocumentStatus, due: Option<NaiveDate>) -> Invoice {
        let now = Utc::now();
        Invoice {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            kind: DocumentKind::Invoice,
            sequence: 1,
            number: DocumentKind::Invoice.format_number(1),
            status,
            project_id: None,
            client_name: "Globex".to_string(),
            client_email: None,
            issue_date: now.date_naive(),
            due_date: due,
            currency: "USD".to_string(),
            notes: None,
            subtotal: Decimal::from(100),
            tax_total: Decimal::ZERO,
            total: Decimal::from(100),
            amount_paid: Decimal::ZERO,
            source_quote_id: None,
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn numbers_are_zero_padded() {
        assert_eq!(DocumentKind::Invoice.format_number(7), "INV-0007");
        assert_eq!(DocumentKind::Quote.format_number(12345), "QUO-12345");
    }

    #[test]
    fn sent_invoices_past_due_are_overdue() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let yesterday = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(
            invoice(DocumentStatus::Sent, Some(yesterday)).effective_status(today),
            DocumentStatus::Overdue
        );
        assert_eq!(
            invoice(DocumentStatus::Draft, Some(yesterday)).effective_status(today),
            DocumentStatus::Draft
        );
        assert_eq!(
            invoice(DocumentStatus::Sent, Some(today)).effective_status(today),
            DocumentStatus::Sent
        );
    }

    #[test]
    fn payments_move_status() {
        let inv = invoice(DocumentStatus::Sent, None);
        assert_eq!(inv.status_for_paid(Decimal::ZERO), DocumentStatus::Sent);
        assert_eq!(
            inv.status_for_paid(Decimal::new(405, 1)),
            DocumentStatus::PartiallyPaid
        );
        assert_eq!(inv.status_for_paid(Decimal::from(100)), DocumentStatus::Paid);
    }

    #[test]
    fn manual_transitions_follow_the_document_kind() {
        use DocumentStatus::*;
        assert!(Draft.can_move_to(DocumentKind::Invoice, Sent));
        assert!(!Sent.can_move_to(DocumentKind::Invoice, Paid));
        assert!(!Sent.can_move_to(DocumentKind::Invoice, Accepted));
        assert!(Sent.can_move_to(DocumentKind::Quote, Accepted));
        assert!(!Accepted.can_move_to(DocumentKind::Quote, Converted));
    }
}
