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

//! User-role assignments

use crate::identity::UserId;
use crate::rbac::roles::RoleId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Assignment edge between a user and a role
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRoleAssignment {
    pub user_id: UserId,
    pub role_id: RoleId,

    /// Assignment timestamp
    pub assigned_at: DateTime<Utc>,

    /// Who assigned this role; `None` for bootstrap
    pub assigned_by: Option<UserId>,
}

impl UserRoleAssignment {
    pub fn new(user_id: UserId, role_id: RoleId, assigned_by: Option<UserId>) -> Self {
        Self {
            user_id,
            role_id,
            assigned_at: Utc::now(),
            assigned_by,
        }
    }
}

/// Assignment edges grouped by user
///
/// Referential checks against the user and role tables are done by the store; this type
/// only maintains the edges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignmentStore {
    by_user: BTreeMap<UserId, BTreeMap<RoleId, UserRoleAssignment>>,
}

impl AssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a role. Re-assigning a held role keeps the original provenance and returns false.
    pub fn assign(&mut self, user_id: UserId, role_id: RoleId, assigned_by: Option<UserId>) -> bool {
        let held = self.by_user.entry(user_id).or_default();
        if held.contains_key(&role_id) {
            return false;
        }
        held.insert(role_id, UserRoleAssignment::new(user_id, role_id, assigned_by));
        true
    }

    /// Remove a single assignment. Missing assignments are a no-op.
    pub fn unassign(&mut self, user_id: UserId, role_id: RoleId) -> bool {
        let Some(held) = self.by_user.get_mut(&user_id) else {
            return false;
        };
        let removed = held.remove(&role_id).is_some();
        if held.is_empty() {
            self.by_user.remove(&user_id);
        }
        removed
    }

    /// Remove every assignment of a user, returning how many were removed
    pub fn unassign_all(&mut self, user_id: UserId) -> usize {
        self.by_user.remove(&user_id).map(|held| held.len()).unwrap_or(0)
    }

    /// Replace a user's role set: delete every edge, then insert the new ones
    ///
    /// Callers run this inside a store transaction so that readers never observe the
    /// intermediate empty set.
    pub fn set_roles(&mut self, user_id: UserId, role_ids: &BTreeSet<RoleId>, assigned_by: Option<UserId>) {
        self.unassign_all(user_id);
        for role_id in role_ids {
            self.assign(user_id, *role_id, assigned_by);
        }
    }

    pub fn roles_of(&self, user_id: UserId) -> BTreeSet<RoleId> {
        self.by_user.get(&user_id).map(|held| held.keys().copied().collect()).unwrap_or_default()
    }

    pub fn assignments_of(&self, user_id: UserId) -> Vec<&UserRoleAssignment> {
        self.by_user.get(&user_id).map(|held| held.values().collect()).unwrap_or_default()
    }

    pub fn users_with_role(&self, role_id: RoleId) -> Vec<UserId> {
        self.by_user.iter().filter(|(_, held)| held.contains_key(&role_id)).map(|(user_id, _)| *user_id).collect()
    }

    /// Drop every edge pointing at a role, returning how many were removed
    pub fn remove_role(&mut self, role_id: RoleId) -> usize {
        let mut removed = 0;
        for held in self.by_user.values_mut() {
            if held.remove(&role_id).is_some() {
                removed += 1;
            }
        }
        self.by_user.retain(|_, held| !held.is_empty());
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_is_idempotent() {
        let mut store = AssignmentStore::new();
        let (user, role) = (UserId(1), RoleId(1));

        assert!(store.assign(user, role, Some(UserId(9))));
        let first = store.assignments_of(user)[0].clone();

        assert!(!store.assign(user, role, Some(UserId(10))));
        let assignments = store.assignments_of(user);
        assert_eq!(assignments.len(), 1);
        assert_eq!(*assignments[0], first);
    }

    #[test]
    fn test_set_roles_replaces() {
        let mut store = AssignmentStore::new();
        let user = UserId(1);
        store.assign(user, RoleId(1), None);
        store.assign(user, RoleId(2), None);

        let next: BTreeSet<RoleId> = [RoleId(2), RoleId(3)].into_iter().collect();
        store.set_roles(user, &next, Some(UserId(5)));

        assert_eq!(store.roles_of(user), next);
        assert!(store.assignments_of(user).iter().all(|a| a.assigned_by == Some(UserId(5))));
    }

    #[test]
    fn test_set_roles_to_empty() {
        let mut store = AssignmentStore::new();
        store.assign(UserId(1), RoleId(1), None);
        store.set_roles(UserId(1), &BTreeSet::new(), None);
        assert!(store.roles_of(UserId(1)).is_empty());
    }

    #[test]
    fn test_unassign() {
        let mut store = AssignmentStore::new();
        store.assign(UserId(1), RoleId(1), None);

        assert!(!store.unassign(UserId(1), RoleId(2)));
        assert!(!store.unassign(UserId(2), RoleId(1)));
        assert!(store.unassign(UserId(1), RoleId(1)));
        assert!(store.roles_of(UserId(1)).is_empty());
        assert_eq!(store.unassign_all(UserId(1)), 0);
    }

    #[test]
    fn test_remove_role_cascade() {
        let mut store = AssignmentStore::new();
        store.assign(UserId(1), RoleId(1), None);
        store.assign(UserId(2), RoleId(1), None);
        store.assign(UserId(2), RoleId(2), None);

        assert_eq!(store.users_with_role(RoleId(1)), vec![UserId(1), UserId(2)]);
        assert_eq!(store.remove_role(RoleId(1)), 2);
        assert!(store.users_with_role(RoleId(1)).is_empty());
        assert_eq!(store.roles_of(UserId(2)), [RoleId(2)].into_iter().collect());
    }
}
