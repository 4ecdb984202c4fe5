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

//! Role definitions and the role-permission graph

use crate::error::{AuthzError, AuthzResult};
use crate::rbac::permissions::{Permission, PermissionId, RolePermission};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Role identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoleId(pub u64);

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Named capability bundle. Grants live in the [`RoleGraph`], not on the role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    pub id: RoleId,

    /// Unique role name
    pub name: String,

    pub description: String,

    pub created_at: DateTime<Utc>,
}

impl Role {
    pub fn new(id: RoleId, name: String, description: String) -> Self {
        Self {
            id,
            name,
            description,
            created_at: Utc::now(),
        }
    }
}

/// Roles, permissions and the grant edges between them
///
/// This is a flat allow-list: a permission is either granted to a role or it is not.
/// There is no inheritance between roles and no negative grant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleGraph {
    roles: BTreeMap<RoleId, Role>,
    permissions: BTreeMap<PermissionId, Permission>,
    grants: BTreeSet<RolePermission>,
    next_role_id: u64,
    next_permission_id: u64,
}

impl RoleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a role with a unique name
    pub fn create_role(&mut self, name: &str, description: &str) -> AuthzResult<RoleId> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AuthzError::invalid("Role name must not be empty"));
        }
        if self.find_role_by_name(name).is_some() {
            return Err(AuthzError::Conflict {
                message: format!("Role '{}' already exists", name),
            });
        }

        self.next_role_id += 1;
        let id = RoleId(self.next_role_id);
        self.roles.insert(id, Role::new(id, name.to_string(), description.to_string()));
        Ok(id)
    }

    /// Rename a role and/or change its description
    pub fn update_role(&mut self, id: RoleId, name: Option<&str>, description: Option<&str>) -> AuthzResult<()> {
        if let Some(name) = name.map(str::trim) {
            if name.is_empty() {
                return Err(AuthzError::invalid("Role name must not be empty"));
            }
            if self.find_role_by_name(name).is_some_and(|existing| existing.id != id) {
                return Err(AuthzError::Conflict {
                    message: format!("Role '{}' already exists", name),
                });
            }
        }

        let role = self.roles.get_mut(&id).ok_or_else(|| AuthzError::not_found("Role", id))?;
        if let Some(name) = name {
            role.name = name.trim().to_string();
        }
        if let Some(description) = description {
            role.description = description.to_string();
        }
        Ok(())
    }

    /// Delete a role together with all of its grants
    pub fn delete_role(&mut self, id: RoleId) -> AuthzResult<Role> {
        let role = self.roles.remove(&id).ok_or_else(|| AuthzError::not_found("Role", id))?;
        self.grants.retain(|grant| grant.role_id != id);
        Ok(role)
    }

    pub fn get_role(&self, id: RoleId) -> Option<&Role> {
        self.roles.get(&id)
    }

    pub fn require_role(&self, id: RoleId) -> AuthzResult<&Role> {
        self.roles.get(&id).ok_or_else(|| AuthzError::not_found("Role", id))
    }

    pub fn find_role_by_name(&self, name: &str) -> Option<&Role> {
        self.roles.values().find(|role| role.name == name)
    }

    /// All roles ordered by id
    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    /// Create a permission with a unique (resource, action) pair
    pub fn create_permission(&mut self, name: &str, resource: &str, action: &str) -> AuthzResult<PermissionId> {
        let (resource, action) = (resource.trim(), action.trim());
        if resource.is_empty() || action.is_empty() {
            return Err(AuthzError::invalid("Permission resource and action must not be empty"));
        }
        if let Some(existing) = self.find_permission(resource, action) {
            return Err(AuthzError::Conflict {
                message: format!("Permission '{}' already exists as '{}'", existing.key(), existing.name),
            });
        }

        self.next_permission_id += 1;
        let id = PermissionId(self.next_permission_id);
        let name = if name.trim().is_empty() { format!("{}:{}", resource, action) } else { name.trim().to_string() };
        self.permissions.insert(id, Permission::new(id, name, resource.to_string(), action.to_string()));
        Ok(id)
    }

    /// Delete a permission together with every grant referencing it
    pub fn delete_permission(&mut self, id: PermissionId) -> AuthzResult<Permission> {
        let permission = self.permissions.remove(&id).ok_or_else(|| AuthzError::not_found("Permission", id))?;
        self.grants.retain(|grant| grant.permission_id != id);
        Ok(permission)
    }

    pub fn get_permission(&self, id: PermissionId) -> Option<&Permission> {
        self.permissions.get(&id)
    }

    pub fn find_permission(&self, resource: &str, action: &str) -> Option<&Permission> {
        self.permissions.values().find(|p| p.matches(resource, action))
    }

    /// All permissions ordered by id
    pub fn permissions(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.values()
    }

    /// Grant a permission to a role. Returns false if the grant already existed.
    pub fn grant(&mut self, role_id: RoleId, permission_id: PermissionId) -> AuthzResult<bool> {
        self.require_role(role_id)?;
        if !self.permissions.contains_key(&permission_id) {
            return Err(AuthzError::not_found("Permission", permission_id));
        }

        Ok(self.grants.insert(RolePermission { role_id, permission_id }))
    }

    /// Revoke a grant. Revoking a grant that does not exist is a no-op.
    pub fn revoke(&mut self, role_id: RoleId, permission_id: PermissionId) -> bool {
        self.grants.remove(&RolePermission { role_id, permission_id })
    }

    /// Permissions granted to a role, ordered by permission id. Unknown roles grant nothing.
    pub fn permissions_of(&self, role_id: RoleId) -> Vec<&Permission> {
        self.grants
            .range(RolePermission { role_id, permission_id: PermissionId(0) }..=RolePermission { role_id, permission_id: PermissionId(u64::MAX) })
            .filter_map(|grant| self.permissions.get(&grant.permission_id))
            .collect()
    }

    /// Roles holding a grant for the given permission
    pub fn roles_granting(&self, permission_id: PermissionId) -> Vec<&Role> {
        self.grants
            .iter()
            .filter(|grant| grant.permission_id == permission_id)
            .filter_map(|grant| self.roles.get(&grant.role_id))
            .collect()
    }

    pub fn grant_count(&self) -> usize {
        self.grants.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(perms: Vec<&Permission>) -> Vec<PermissionId> {
        perms.into_iter().map(|p| p.id).collect()
    }

    #[test]
    fn test_role_creation() {
        let mut graph = RoleGraph::new();
        let id = graph.create_role("Manager", "Inventory management").unwrap();

        let role = graph.get_role(id).unwrap();
        assert_eq!(role.name, "Manager");
        assert!(graph.permissions_of(id).is_empty());

        assert!(matches!(graph.create_role("Manager", "again"), Err(AuthzError::Conflict { .. })));
        assert!(matches!(graph.create_role("  ", ""), Err(AuthzError::InvalidInput { .. })));
    }

    #[test]
    fn test_permission_uniqueness() {
        let mut graph = RoleGraph::new();
        graph.create_permission("Read Inventory", "inventory", "read").unwrap();

        let dup = graph.create_permission("Other label", "inventory", "read");
        assert!(matches!(dup, Err(AuthzError::Conflict { .. })));

        let unnamed = graph.create_permission("", "logs", "read").unwrap();
        assert_eq!(graph.get_permission(unnamed).unwrap().name, "logs:read");
    }

    #[test]
    fn test_grant_is_idempotent() {
        let mut graph = RoleGraph::new();
        let role = graph.create_role("Viewer", "").unwrap();
        let perm = graph.create_permission("Read Inventory", "inventory", "read").unwrap();

        assert!(graph.grant(role, perm).unwrap());
        let once = ids(graph.permissions_of(role));
        assert!(!graph.grant(role, perm).unwrap());

        assert_eq!(ids(graph.permissions_of(role)), once);
        assert_eq!(graph.grant_count(), 1);
    }

    #[test]
    fn test_revoke_missing_grant_is_noop() {
        let mut graph = RoleGraph::new();
        let role = graph.create_role("Viewer", "").unwrap();
        let perm = graph.create_permission("Read Inventory", "inventory", "read").unwrap();

        assert!(!graph.revoke(role, perm));
        assert!(!graph.revoke(RoleId(99), PermissionId(99)));

        graph.grant(role, perm).unwrap();
        assert!(graph.revoke(role, perm));
        assert!(graph.permissions_of(role).is_empty());
    }

    #[test]
    fn test_grant_unknown_ids() {
        let mut graph = RoleGraph::new();
        let role = graph.create_role("Viewer", "").unwrap();

        assert!(matches!(graph.grant(role, PermissionId(7)), Err(AuthzError::NotFound { .. })));
        assert!(matches!(graph.grant(RoleId(7), PermissionId(1)), Err(AuthzError::NotFound { .. })));
    }

    #[test]
    fn test_delete_cascades_grants() {
        let mut graph = RoleGraph::new();
        let manager = graph.create_role("Manager", "").unwrap();
        let viewer = graph.create_role("Viewer", "").unwrap();
        let read = graph.create_permission("Read Inventory", "inventory", "read").unwrap();
        let create = graph.create_permission("Create Inventory", "inventory", "create").unwrap();

        graph.grant(manager, read).unwrap();
        graph.grant(manager, create).unwrap();
        graph.grant(viewer, read).unwrap();

        graph.delete_permission(read).unwrap();
        assert_eq!(ids(graph.permissions_of(manager)), vec![create]);
        assert!(graph.permissions_of(viewer).is_empty());

        graph.delete_role(manager).unwrap();
        assert!(graph.permissions_of(manager).is_empty());
        assert!(graph.roles_granting(create).is_empty());
        assert_eq!(graph.grant_count(), 0);
    }

    #[test]
    fn test_permissions_of_does_not_leak_between_roles() {
        let mut graph = RoleGraph::new();
        let a = graph.create_role("A", "").unwrap();
        let b = graph.create_role("B", "").unwrap();
        let p1 = graph.create_permission("", "inventory", "read").unwrap();
        let p2 = graph.create_permission("", "inventory", "update").unwrap();

        graph.grant(a, p1).unwrap();
        graph.grant(b, p2).unwrap();

        assert_eq!(ids(graph.permissions_of(a)), vec![p1]);
        assert_eq!(ids(graph.permissions_of(b)), vec![p2]);
    }

    #[test]
    fn test_update_role() {
        let mut graph = RoleGraph::new();
        let a = graph.create_role("Auditor", "").unwrap();
        graph.create_role("Viewer", "").unwrap();

        graph.update_role(a, Some("Inspector"), Some("Reads logs")).unwrap();
        assert_eq!(graph.get_role(a).unwrap().name, "Inspector");
        assert!(matches!(graph.update_role(a, Some("Viewer"), None), Err(AuthzError::Conflict { .. })));
        assert!(graph.update_role(a, Some("Inspector"), None).is_ok());
    }
}
