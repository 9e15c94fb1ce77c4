//! Role-based, company-scoped authorization.
//!
//! Every protected request resolves to an `(Action, Resource)` pair. The
//! caller's role maps that pair to a `Scope` through the static policy in
//! [`policy`]. A `Scope::Company` grant covers any record in the caller's
//! company; `Scope::Own` only covers records the caller owns (owner,
//! assignee, member, sender, depending on the resource).

pub mod policy;

use axum::http::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use policy::scope_for;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Manager,
    Employee,
    Accountant,
    Viewer,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Owner,
        Role::Admin,
        Role::Manager,
        Role::Employee,
        Role::Accountant,
        Role::Viewer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Employee => "employee",
            Role::Accountant => "accountant",
            Role::Viewer => "viewer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown role '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Read, Action::Create, Action::Update, Action::Delete];

    /// HTTP verb to action. Unknown verbs are treated as writes.
    pub fn from_method(method: &Method) -> Self {
        match *method {
            Method::GET | Method::HEAD | Method::OPTIONS => Action::Read,
            Method::POST => Action::Create,
            Method::PUT | Method::PATCH => Action::Update,
            Method::DELETE => Action::Delete,
            _ => Action::Update,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Company,
    User,
    Project,
    Task,
    Lead,
    Invoice,
    Quote,
    Payment,
    Conversation,
    Message,
}

impl Resource {
    pub const ALL: [Resource; 10] = [
        Resource::Company,
        Resource::User,
        Resource::Project,
        Resource::Task,
        Resource::Lead,
        Resource::Invoice,
        Resource::Quote,
        Resource::Payment,
        Resource::Conversation,
        Resource::Message,
    ];
}

/// How much of the company a grant covers. Ordered: `None < Own < Company`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    None,
    Own,
    Company,
}

/// The authenticated caller, as confirmed against the database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub role: Role,
}

/// Who a target record belongs to
#[derive(Debug, Clone, Default)]
pub struct Ownership {
    pub company_id: Uuid,
    pub owners: Vec<Uuid>,
}

impl Ownership {
    pub fn new(company_id: Uuid) -> Self {
        Self {
            company_id,
            owners: Vec::new(),
        }
    }

    pub fn owned_by(mut self, user_id: Uuid) -> Self {
        self.owners.push(user_id);
        self
    }

    pub fn with_owners(mut self, owners: impl IntoIterator<Item = Uuid>) -> Self {
        self.owners.extend(owners);
        self
    }

    pub fn optionally_owned_by(self, user_id: Option<Uuid>) -> Self {
        match user_id {
            Some(id) => self.owned_by(id),
            None => self,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("{role} may not {action:?} {resource:?}")]
    Denied {
        role: Role,
        action: Action,
        resource: Resource,
    },

    #[error("{resource:?} is not yours to {action:?}")]
    NotOwner { action: Action, resource: Resource },

    // Records of other companies are reported as missing
    #[error("{0:?} not found")]
    NotFound(Resource),
}

/// Outcome of a successful role check, attached to the request for handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    pub resource: Resource,
    pub action: Action,
    pub scope: Scope,
}

impl Grant {
    /// True when handlers must narrow queries to records the caller owns
    pub fn is_restricted(&self) -> bool {
        self.scope == Scope::Own
    }

    /// Record-level check for a target of this grant's resource
    pub fn check(&self, principal: &Principal, target: &Ownership) -> Result<(), PermissionError> {
        if target.company_id != principal.company_id {
            return Err(PermissionError::NotFound(self.resource));
        }
        match self.scope {
            Scope::Company => Ok(()),
            Scope::Own if target.owners.contains(&principal.user_id) => Ok(()),
            Scope::Own => Err(PermissionError::NotOwner {
                action: self.action,
                resource: self.resource,
            }),
            Scope::None => Err(PermissionError::NotOwner {
                action: self.action,
                resource: self.resource,
            }),
        }
    }
}

/// Role check for an action on a resource type
pub fn authorize(principal: &Principal, action: Action, resource: Resource) -> Result<Grant, PermissionError> {
    match scope_for(principal.role, action, resource) {
        Scope::None => Err(PermissionError::Denied {
            role: principal.role,
            action,
            resource,
        }),
        scope => Ok(Grant {
            resource,
            action,
            scope,
        }),
    }
}

/// Convenience for handlers that need a second grant (e.g. a task handler
/// reading the parent project)
pub fn authorize_record(
    principal: &Principal,
    action: Action,
    resource: Resource,
    target: &Ownership,
) -> Result<Grant, PermissionError> {
    let grant = authorize(principal, action, resource)?;
    grant.check(principal, target)?;
    Ok(grant)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(role: Role) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            role,
        }
    }

    #[test]
    fn methods_map_to_actions() {
        assert_eq!(Action::from_method(&Method::GET), Action::Read);
        assert_eq!(Action::from_method(&Method::POST), Action::Create);
        assert_eq!(Action::from_method(&Method::PATCH), Action::Update);
        assert_eq!(Action::from_method(&Method::PUT), Action::Update);
        assert_eq!(Action::from_method(&Method::DELETE), Action::Delete);
    }

    #[test]
    fn viewer_cannot_create_projects() {
        let viewer = principal(Role::Viewer);
        let err = authorize(&viewer, Action::Create, Resource::Project).unwrap_err();
        assert!(matches!(err, PermissionError::Denied { role: Role::Viewer, .. }));
    }

    #[test]
    fn other_company_records_look_missing() {
        let admin = principal(Role::Admin);
        let grant = authorize(&admin, Action::Read, Resource::Project).unwrap();
        let foreign = Ownership::new(Uuid::new_v4()).owned_by(admin.user_id);
        assert_eq!(grant.check(&admin, &foreign), Err(PermissionError::NotFound(Resource::Project)));
    }

    #[test]
    fn own_scope_requires_ownership() {
        let employee = principal(Role::Employee);
        let grant = authorize(&employee, Action::Update, Resource::Task).unwrap();
        assert!(grant.is_restricted());

        let mine = Ownership::new(employee.company_id).owned_by(employee.user_id);
        assert!(grant.check(&employee, &mine).is_ok());

        let theirs = Ownership::new(employee.company_id).owned_by(Uuid::new_v4());
        assert!(matches!(
            grant.check(&employee, &theirs),
            Err(PermissionError::NotOwner { .. })
        ));
    }

    #[test]
    fn company_scope_covers_unowned_records() {
        let manager = principal(Role::Manager);
        let grant = authorize_record(
            &manager,
            Action::Update,
            Resource::Task,
            &Ownership::new(manager.company_id),
        )
        .unwrap();
        assert_eq!(grant.scope, Scope::Company);
    }

    #[test]
    fn roles_parse_from_their_names() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("superuser".parse::<Role>().is_err());
    }
}
