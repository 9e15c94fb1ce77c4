// Protected handlers: every route here runs behind jwt → company → user,
// and resource routes additionally behind `require_permission`.

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::permissions::{Grant, Principal};
use crate::services::audit;
use crate::state::AppState;

pub mod auth;
pub mod company;
pub mod conversations;
pub mod invoices;
pub mod leads;
pub mod payments;
pub mod projects;
pub mod tasks;
pub mod users;

/// Audit the mutation a grant was issued for
pub(crate) fn audit(state: &AppState, principal: &Principal, grant: &Grant, id: Uuid) {
    audit::record(&state.config.security, principal, grant.action, grant.resource, id);
}

pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}
