// Stockguard
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Authorization decisions
//!
//! The evaluator is a pure function of one consistent snapshot of the tables. It never writes
//! audit entries and never errors: a user with no roles, an unknown role name or an unknown
//! resource simply yields `false`.

use crate::identity::UserId;
use crate::rbac::permissions::EffectivePermission;
use crate::rbac::roles::Role;
use crate::store::Tables;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// What a protected operation demands of its caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Requirement {
    /// Caller must hold at least one of the named roles
    AnyRole(Vec<String>),
    /// Caller must hold a role granting exactly this resource/action pair
    Permission { resource: String, action: String },
}

impl Requirement {
    pub fn any_role<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Requirement::AnyRole(names.into_iter().map(Into::into).collect())
    }

    pub fn permission(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Requirement::Permission {
            resource: resource.into(),
            action: action.into(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::AnyRole(names) => write!(f, "any role of [{}]", names.join(", ")),
            Requirement::Permission { resource, action } => write!(f, "permission {}:{}", resource, action),
        }
    }
}

/// Outcome of evaluating a [`Requirement`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Read-only evaluator over a snapshot of the tables
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    tables: &'a Tables,
}

impl<'a> Evaluator<'a> {
    pub fn new(tables: &'a Tables) -> Self {
        Self { tables }
    }

    /// Roles currently assigned to the user
    pub fn roles_of(&self, user_id: UserId) -> Vec<&'a Role> {
        self.tables.roles_of(user_id)
    }

    /// Whether any of the user's roles grants exactly `resource`/`action`
    pub fn has_permission(&self, user_id: UserId, resource: &str, action: &str) -> bool {
        self.roles_of(user_id)
            .into_iter()
            .any(|role| self.tables.graph.permissions_of(role.id).iter().any(|permission| permission.matches(resource, action)))
    }

    pub fn has_role(&self, user_id: UserId, role_name: &str) -> bool {
        self.roles_of(user_id).iter().any(|role| role.name == role_name)
    }

    pub fn has_any_role<S: AsRef<str>>(&self, user_id: UserId, role_names: &[S]) -> bool {
        let roles = self.roles_of(user_id);
        role_names.iter().any(|name| roles.iter().any(|role| role.name == name.as_ref()))
    }

    /// Every permission the user holds paired with the role granting it
    ///
    /// A permission granted by several roles appears once per role. The result is sorted by
    /// resource, action and role name.
    pub fn effective_permissions(&self, user_id: UserId) -> Vec<EffectivePermission> {
        let mut effective: Vec<EffectivePermission> = self
            .roles_of(user_id)
            .into_iter()
            .flat_map(|role| {
                self.tables.graph.permissions_of(role.id).into_iter().map(move |permission| EffectivePermission {
                    permission: permission.clone(),
                    granting_role_id: role.id,
                    granting_role: role.name.clone(),
                })
            })
            .collect();

        effective.sort_by(|a, b| {
            a.permission
                .resource
                .cmp(&b.permission.resource)
                .then_with(|| a.permission.action.cmp(&b.permission.action))
                .then_with(|| a.granting_role.cmp(&b.granting_role))
        });
        effective
    }

    /// Evaluate a requirement for a user
    pub fn check(&self, user_id: UserId, requirement: &Requirement) -> Decision {
        let allowed = match requirement {
            Requirement::AnyRole(names) => self.has_any_role(user_id, names.as_slice()),
            Requirement::Permission { resource, action } => self.has_permission(user_id, resource, action),
        };

        debug!(user_id = %user_id, requirement = %requirement, allowed, "Authorization decision");

        if allowed {
            return Decision::Allow;
        }

        let reason = match requirement {
            Requirement::AnyRole(names) if names.is_empty() => "No role can satisfy an empty role requirement".to_string(),
            Requirement::AnyRole(names) => format!("Requires one of the roles: {}", names.join(", ")),
            Requirement::Permission { resource, action } => {
                format!("Insufficient permissions: '{}' on '{}' is not granted to any of your roles", action, resource)
            }
        };
        Decision::Deny { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        tables: Tables,
        manager: UserId,
        viewer: UserId,
        nobody: UserId,
    }

    fn fixture() -> Fixture {
        let mut tables = Tables::default();
        let manager_role = tables.graph.create_role("Manager", "").unwrap();
        let viewer_role = tables.graph.create_role("Viewer", "").unwrap();

        for action in ["create", "read", "update", "delete"] {
            let permission = tables.graph.create_permission("", "inventory", action).unwrap();
            tables.graph.grant(manager_role, permission).unwrap();
            if action == "read" {
                tables.graph.grant(viewer_role, permission).unwrap();
            }
        }
        let dashboard = tables.graph.create_permission("", "dashboard", "read").unwrap();
        tables.graph.grant(manager_role, dashboard).unwrap();
        tables.graph.grant(viewer_role, dashboard).unwrap();

        let manager = tables.users.create("manager", "manager@example.com", String::new()).unwrap();
        let viewer = tables.users.create("viewer", "viewer@example.com", String::new()).unwrap();
        let nobody = tables.users.create("nobody", "nobody@example.com", String::new()).unwrap();
        tables.assign(manager, manager_role, None).unwrap();
        tables.assign(viewer, viewer_role, None).unwrap();

        Fixture { tables, manager, viewer, nobody }
    }

    #[test]
    fn test_manager_permissions() {
        let f = fixture();
        let evaluator = Evaluator::new(&f.tables);

        assert!(evaluator.has_permission(f.manager, "inventory", "delete"));
        assert!(evaluator.has_permission(f.manager, "dashboard", "read"));
        assert!(!evaluator.has_permission(f.manager, "users", "delete"));
        assert!(evaluator.has_role(f.manager, "Manager"));
        assert!(!evaluator.has_role(f.manager, "Admin"));
        assert!(evaluator.has_any_role(f.manager, &["Admin", "Manager"]));
    }

    #[test]
    fn test_viewer_is_read_only() {
        let f = fixture();
        let evaluator = Evaluator::new(&f.tables);

        assert!(evaluator.has_permission(f.viewer, "inventory", "read"));
        for action in ["create", "update", "delete"] {
            assert!(!evaluator.has_permission(f.viewer, "inventory", action));
        }
    }

    #[test]
    fn test_no_roles_means_nothing() {
        let f = fixture();
        let evaluator = Evaluator::new(&f.tables);

        assert!(!evaluator.has_permission(f.nobody, "dashboard", "read"));
        assert!(!evaluator.has_any_role(f.nobody, &["Manager", "Viewer"]));
        assert!(evaluator.effective_permissions(f.nobody).is_empty());
        assert!(!evaluator.has_permission(UserId(404), "inventory", "read"));
    }

    #[test]
    fn test_matching_is_exact() {
        let f = fixture();
        let evaluator = Evaluator::new(&f.tables);

        assert!(!evaluator.has_permission(f.manager, "Inventory", "read"));
        assert!(!evaluator.has_permission(f.manager, "inventory", "*"));
        assert!(!evaluator.has_role(f.manager, "manager"));
    }

    #[test]
    fn test_effective_permissions_sorted() {
        let f = fixture();
        let keys: Vec<String> = Evaluator::new(&f.tables)
            .effective_permissions(f.manager)
            .into_iter()
            .map(|effective| format!("{}@{}", effective.permission.key(), effective.granting_role))
            .collect();

        assert_eq!(
            keys,
            vec![
                "dashboard:read@Manager",
                "inventory:create@Manager",
                "inventory:delete@Manager",
                "inventory:read@Manager",
                "inventory:update@Manager",
            ]
        );
    }

    #[test]
    fn test_check_reasons() {
        let f = fixture();
        let evaluator = Evaluator::new(&f.tables);

        assert_eq!(evaluator.check(f.manager, &Requirement::permission("inventory", "update")), Decision::Allow);

        match evaluator.check(f.viewer, &Requirement::permission("inventory", "delete")) {
            Decision::Deny { reason } => assert!(reason.contains("delete")),
            Decision::Allow => panic!("viewer must not delete inventory"),
        }

        let empty = evaluator.check(f.manager, &Requirement::AnyRole(Vec::new()));
        assert!(!empty.is_allowed());
    }
}
