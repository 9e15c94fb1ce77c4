//! Rules around roles that the static policy cannot express.
//!
//! Owner rules take `owners`, the company's active owners as read under a row
//! lock in the same transaction as the write, so two owners demoting each
//! other cannot both see a second owner.

use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::database::models::User;
use crate::database::DatabaseError;
use crate::error::ApiError;
use crate::permissions::{Principal, Role};

/// Locks the company's active owner rows, in id order, until `tx` ends
pub async fn lock_owners(tx: &mut Transaction<'_, Postgres>, company_id: Uuid) -> Result<Vec<Uuid>, DatabaseError> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM users
         WHERE company_id = $1 AND role = 'owner' AND is_active = TRUE AND deleted_at IS NULL
         ORDER BY id
         FOR UPDATE",
    )
    .bind(company_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Re-reads a live user under a row lock
pub async fn lock_user(tx: &mut Transaction<'_, Postgres>, company_id: Uuid, id: Uuid) -> Result<User, DatabaseError> {
    let user: Option<User> = sqlx::query_as(
        "SELECT * FROM users WHERE company_id = $1 AND id = $2 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(company_id)
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;
    user.ok_or_else(|| DatabaseError::NotFound(format!("User {} not found", id)))
}

/// The token's role may predate a demotion that committed meanwhile
fn acts_as_owner(actor: &Principal, owners: &[Uuid]) -> bool {
    actor.role == Role::Owner && owners.contains(&actor.user_id)
}

/// Checks a role change requested by `actor` for `target_id`
pub fn check_role_change(
    actor: &Principal,
    target_id: Uuid,
    current: Role,
    next: Role,
    owners: &[Uuid],
) -> Result<(), ApiError> {
    if current == next {
        return Ok(());
    }
    if actor.user_id == target_id {
        return Err(ApiError::forbidden("You cannot change your own role"));
    }
    if (next == Role::Owner || current == Role::Owner) && !acts_as_owner(actor, owners) {
        return Err(ApiError::forbidden("Only owners can grant or revoke the owner role"));
    }
    if current == Role::Owner && owners.iter().all(|id| *id == target_id) {
        return Err(ApiError::unprocessable("The last owner cannot be demoted"));
    }
    Ok(())
}

/// Only owners may create other owners
pub fn check_role_grant(actor: &Principal, role: Role) -> Result<(), ApiError> {
    if role == Role::Owner && actor.role != Role::Owner {
        return Err(ApiError::forbidden("Only owners can grant the owner role"));
    }
    Ok(())
}

/// Deleting or deactivating a user: never yourself, and never the last owner
pub fn check_removal(actor: &Principal, target_id: Uuid, target_role: Role, owners: &[Uuid]) -> Result<(), ApiError> {
    if actor.user_id == target_id {
        return Err(ApiError::unprocessable("You cannot delete your own account"));
    }
    if target_role == Role::Owner {
        if !acts_as_owner(actor, owners) {
            return Err(ApiError::forbidden("Only owners can remove an owner"));
        }
        if owners.iter().all(|id| *id == target_id) {
            return Err(ApiError::unprocessable("The last owner cannot be deleted"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn actor(role: Role) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            role,
        }
    }

    #[test]
    fn admins_cannot_mint_owners() {
        let admin = actor(Role::Admin);
        let owners = [Uuid::new_v4()];
        let err = check_role_change(&admin, Uuid::new_v4(), Role::Manager, Role::Owner, &owners).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert!(check_role_grant(&admin, Role::Owner).is_err());
        assert!(check_role_grant(&admin, Role::Manager).is_ok());
        assert!(check_role_change(&admin, Uuid::new_v4(), Role::Viewer, Role::Manager, &owners).is_ok());
    }

    #[test]
    fn nobody_changes_their_own_role() {
        let owner = actor(Role::Owner);
        let owners = [owner.user_id, Uuid::new_v4()];
        assert!(check_role_change(&owner, owner.user_id, Role::Owner, Role::Admin, &owners).is_err());
        assert!(check_role_change(&owner, owner.user_id, Role::Owner, Role::Owner, &owners).is_ok());
    }

    #[test]
    fn the_last_owner_stays() {
        let owner = actor(Role::Owner);
        let other = Uuid::new_v4();
        let err = check_role_change(&owner, other, Role::Owner, Role::Admin, &[other]).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        let both = [owner.user_id, other];
        assert!(check_role_change(&owner, other, Role::Owner, Role::Admin, &both).is_ok());

        assert!(check_removal(&owner, other, Role::Owner, &both).is_ok());
        assert!(check_removal(&actor(Role::Admin), other, Role::Owner, &both).is_err());
        assert!(check_removal(&owner, owner.user_id, Role::Owner, &both).is_err());
    }

    #[test]
    fn owners_demoting_each_other_leave_one_owner() {
        let alice = actor(Role::Owner);
        let bob = Principal {
            company_id: alice.company_id,
            ..actor(Role::Owner)
        };

        // Alice's request takes the lock first and sees both owners
        let before = [alice.user_id, bob.user_id];
        assert!(check_role_change(&alice, bob.user_id, Role::Owner, Role::Admin, &before).is_ok());

        // Bob's request waits on the lock, then reads the committed state.
        // His token still says owner, but the locked rows do not.
        let after = [alice.user_id];
        let err = check_role_change(&bob, alice.user_id, Role::Owner, Role::Admin, &after).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert!(check_removal(&bob, alice.user_id, Role::Owner, &after).is_err());
    }
}
