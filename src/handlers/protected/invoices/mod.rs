//! One handler set serves `/api/invoices` and `/api/quotes`. The route's
//! permission layer decides the resource, and the resource decides the kind.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::database::models::{DocumentKind, Invoice};
use crate::database::Repository;
use crate::error::ApiError;
use crate::permissions::{Grant, Principal, Resource};
use crate::services::InvoiceService;

pub mod collection;
pub mod convert;
pub mod items;
pub mod record;

pub use collection::get as documents_get;
pub use collection::post as documents_post;
pub use convert::post as quote_convert;
pub use items::put as document_items_put;
pub use record::delete as document_delete;
pub use record::get as document_get;
pub use record::patch as document_patch;
pub use record::payments as invoice_payments_get;

pub(crate) fn repository(pool: &PgPool) -> Repository<Invoice> {
    Repository::new("invoices", "Invoice", pool.clone())
}

pub(crate) fn kind_of(grant: &Grant) -> DocumentKind {
    match grant.resource {
        Resource::Quote => DocumentKind::Quote,
        _ => DocumentKind::Invoice,
    }
}

/// Load a document of the route's kind and check the grant against it
pub(crate) async fn load(pool: &PgPool, principal: &Principal, grant: &Grant, id: Uuid) -> Result<Invoice, ApiError> {
    let kind = kind_of(grant);
    let document = repository(pool)
        .find_optional(principal.company_id, id)
        .await?
        .filter(|doc| doc.kind == kind)
        .ok_or_else(|| ApiError::not_found(format!("{} {} not found", label(kind), id)))?;
    grant.check(principal, &document.ownership())?;
    Ok(document)
}

/// Like `load`, but holds the row lock until `tx` ends
pub(crate) async fn load_for_update(
    tx: &mut Transaction<'_, Postgres>,
    principal: &Principal,
    grant: &Grant,
    id: Uuid,
) -> Result<Invoice, ApiError> {
    let kind = kind_of(grant);
    let document = InvoiceService::find_for_update(tx, principal.company_id, id)
        .await?
        .filter(|doc| doc.kind == kind)
        .ok_or_else(|| ApiError::not_found(format!("{} {} not found", label(kind), id)))?;
    grant.check(principal, &document.ownership())?;
    Ok(document)
}

pub(crate) fn label(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::Invoice => "Invoice",
        DocumentKind::Quote => "Quote",
    }
}

/// ISO 4217 shape: three ASCII letters, stored uppercase
pub(crate) fn normalize_currency(value: &str) -> Option<String> {
    let code = value.trim().to_ascii_uppercase();
    (code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic())).then_some(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{Action, Scope};

    fn grant(resource: Resource) -> Grant {
        Grant {
            resource,
            action: Action::Read,
            scope: Scope::Company,
        }
    }

    #[test]
    fn route_resource_picks_the_kind() {
        assert_eq!(kind_of(&grant(Resource::Invoice)), DocumentKind::Invoice);
        assert_eq!(kind_of(&grant(Resource::Quote)), DocumentKind::Quote);
    }

    #[test]
    fn currencies_are_three_letters() {
        assert_eq!(normalize_currency(" eur "), Some("EUR".to_string()));
        assert_eq!(normalize_currency("EURO"), None);
        assert_eq!(normalize_currency("U5D"), None);
    }
}
