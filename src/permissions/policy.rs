use super::{Action, Resource, Role, Scope};

use Action::*;
use Scope::{Company as C, None as N, Own as O};

/// Scopes in `[read, create, update, delete]` order
type Row = [Scope; 4];

const ALL: Row = [C, C, C, C];
const READ_ONLY: Row = [C, N, N, N];
const NOTHING: Row = [N, N, N, N];

fn row(role: Role, resource: Resource) -> Row {
    use Resource as R;
    use Role::*;

    match (resource, role) {
        // Company settings; create happens through registration only
        (R::Company, Owner) => [C, N, C, C],
        (R::Company, Admin) => [C, N, C, N],
        (R::Company, _) => [C, N, N, N],

        // Everyone sees the directory and edits their own profile
        (R::User, Owner | Admin) => ALL,
        (R::User, _) => [C, N, O, N],

        (R::Project, Owner | Admin | Manager) => ALL,
        (R::Project, Employee) => [O, N, O, N],
        (R::Project, Accountant | Viewer) => READ_ONLY,

        (R::Task, Owner | Admin | Manager) => ALL,
        (R::Task, Employee) => [O, C, O, O],
        (R::Task, Viewer) => READ_ONLY,
        (R::Task, Accountant) => NOTHING,

        (R::Lead, Owner | Admin | Manager) => ALL,
        (R::Lead, Employee) => [O, C, O, N],
        (R::Lead, Viewer) => READ_ONLY,
        (R::Lead, Accountant) => NOTHING,

        (R::Invoice, Owner | Admin) => ALL,
        (R::Invoice, Manager | Accountant) => [C, C, C, N],
        (R::Invoice, Viewer) => READ_ONLY,
        (R::Invoice, Employee) => NOTHING,

        (R::Quote, Owner | Admin | Manager) => ALL,
        (R::Quote, Accountant) => [C, C, C, N],
        (R::Quote, Viewer) => READ_ONLY,
        (R::Quote, Employee) => NOTHING,

        (R::Payment, Owner | Admin | Accountant) => ALL,
        (R::Payment, Manager) => READ_ONLY,
        (R::Payment, Employee | Viewer) => NOTHING,

        // Conversations are private to their members, whatever the role
        (R::Conversation, Owner | Admin) => [O, C, O, C],
        (R::Conversation, _) => [O, C, O, O],

        (R::Message, Owner | Admin) => [O, O, O, C],
        (R::Message, _) => [O, O, O, O],
    }
}

/// Static role × action × resource policy
pub fn scope_for(role: Role, action: Action, resource: Resource) -> Scope {
    let row = row(role, resource);
    match action {
        Read => row[0],
        Create => row[1],
        Update => row[2],
        Delete => row[3],
    }
}

/// Every resource the role can touch, with its per-action scopes
pub fn matrix_for(role: Role) -> Vec<(Resource, Vec<(Action, Scope)>)> {
    Resource::ALL
        .into_iter()
        .map(|resource| {
            let scopes: Vec<(Action, Scope)> = Action::ALL
                .into_iter()
                .map(|action| (action, scope_for(role, action, resource)))
                .collect();
            (resource, scopes)
        })
        .filter(|(_, scopes)| scopes.iter().any(|(_, s)| *s != N))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_can_delete_company_but_admin_cannot() {
        assert_eq!(scope_for(Role::Owner, Delete, Resource::Company), C);
        assert_eq!(scope_for(Role::Admin, Delete, Resource::Company), N);
        assert_eq!(scope_for(Role::Admin, Update, Resource::Company), C);
    }

    #[test]
    fn nobody_creates_companies_through_the_api() {
        for role in Role::ALL {
            assert_eq!(scope_for(role, Create, Resource::Company), N);
        }
    }

    #[test]
    fn conversations_are_never_company_readable() {
        for role in Role::ALL {
            assert_eq!(scope_for(role, Read, Resource::Conversation), O);
            assert_eq!(scope_for(role, Read, Resource::Message), O);
        }
    }

    #[test]
    fn accountants_handle_money_but_not_work() {
        assert_eq!(scope_for(Role::Accountant, Create, Resource::Payment), C);
        assert_eq!(scope_for(Role::Accountant, Delete, Resource::Invoice), N);
        assert_eq!(scope_for(Role::Accountant, Read, Resource::Task), N);
        assert_eq!(scope_for(Role::Accountant, Read, Resource::Project), C);
    }

    #[test]
    fn employees_work_on_their_own_records() {
        assert_eq!(scope_for(Role::Employee, Read, Resource::Task), O);
        assert_eq!(scope_for(Role::Employee, Create, Resource::Task), C);
        assert_eq!(scope_for(Role::Employee, Read, Resource::Invoice), N);
        assert_eq!(scope_for(Role::Employee, Update, Resource::User), O);
    }

    #[test]
    fn viewers_only_read() {
        for resource in Resource::ALL {
            if matches!(resource, Resource::Conversation | Resource::Message | Resource::User) {
                continue;
            }
            for action in [Create, Update, Delete] {
                assert_eq!(scope_for(Role::Viewer, action, resource), N, "{:?} {:?}", action, resource);
            }
        }
    }

    #[test]
    fn matrix_skips_unreachable_resources() {
        let matrix = matrix_for(Role::Employee);
        assert!(matrix.iter().all(|(r, _)| *r != Resource::Invoice && *r != Resource::Payment));
        assert!(matrix.iter().any(|(r, _)| *r == Resource::Task));
    }
}
