use uuid::Uuid;

use crate::config::SecurityConfig;
use crate::permissions::{Action, Principal, Resource};

/// Log a completed mutation under the `audit` target
pub fn record(security: &SecurityConfig, principal: &Principal, action: Action, resource: Resource, id: Uuid) {
    if !security.enable_audit_logging {
        return;
    }
    tracing::info!(
        target: "audit",
        company_id = %principal.company_id,
        user_id = %principal.user_id,
        role = %principal.role,
        action = ?action,
        resource = ?resource,
        record_id = %id,
        "{:?} {:?} {}",
        action,
        resource,
        id
    );
}
