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

//! Entity tables and the transaction boundary
//!
//! All entities live in one arena ([`Tables`]) keyed by id. Relationships are explicit edge
//! tables that are joined at decision time. Mutations run in [`RbacStore::transaction`]:
//! the closure works on a staged copy, and the copy replaces the live tables only after the
//! transaction's audit records and the new state have been persisted. Readers hold the read
//! lock and therefore see either the state before a commit or the state after it.

use crate::error::{AuthzError, AuthzResult};
use crate::identity::{IdentityProvider, User, UserDirectory, UserId};
use crate::persistence::{AuditJournal, MemoryBackend, MemoryJournal, StateBackend};
use crate::rbac::assignments::AssignmentStore;
use crate::rbac::audit::{AccessLogEntry, AccessRecord, AuditLog};
use crate::rbac::permissions::{Permission, PermissionId};
use crate::rbac::roles::{Role, RoleGraph, RoleId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, warn};

/// Conceptual tables: users, roles, permissions, grants and assignments
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tables {
    pub users: UserDirectory,
    pub graph: RoleGraph,
    pub assignments: AssignmentStore,
}

impl Tables {
    /// Assign a role to a user. Both must exist; re-assignment returns false.
    pub fn assign(&mut self, user_id: UserId, role_id: RoleId, assigned_by: Option<UserId>) -> AuthzResult<bool> {
        self.users.require(user_id)?;
        self.graph.require_role(role_id)?;
        Ok(self.assignments.assign(user_id, role_id, assigned_by))
    }

    pub fn unassign(&mut self, user_id: UserId, role_id: RoleId) -> bool {
        self.assignments.unassign(user_id, role_id)
    }

    pub fn unassign_all(&mut self, user_id: UserId) -> usize {
        self.assignments.unassign_all(user_id)
    }

    /// Replace a user's whole role set after checking every referenced row exists
    pub fn set_roles(&mut self, user_id: UserId, role_ids: &[RoleId], assigned_by: Option<UserId>) -> AuthzResult<()> {
        self.users.require(user_id)?;
        let role_ids: BTreeSet<RoleId> = role_ids.iter().copied().collect();
        for role_id in &role_ids {
            self.graph.require_role(*role_id)?;
        }

        self.assignments.set_roles(user_id, &role_ids, assigned_by);
        Ok(())
    }

    /// Roles currently assigned to a user, ordered by role id
    pub fn roles_of(&self, user_id: UserId) -> Vec<&Role> {
        self.assignments.roles_of(user_id).into_iter().filter_map(|role_id| self.graph.get_role(role_id)).collect()
    }

    /// Delete a role, its grants and every assignment of it
    pub fn delete_role(&mut self, role_id: RoleId) -> AuthzResult<Role> {
        let role = self.graph.delete_role(role_id)?;
        let unassigned = self.assignments.remove_role(role_id);
        debug!(role_id = %role_id, unassigned, "Role removed with cascade");
        Ok(role)
    }

    /// Delete a permission and every grant of it
    pub fn delete_permission(&mut self, permission_id: PermissionId) -> AuthzResult<Permission> {
        self.graph.delete_permission(permission_id)
    }

    /// Delete a user and their assignments. Audit history is kept.
    pub fn delete_user(&mut self, user_id: UserId) -> AuthzResult<User> {
        let user = self.users.remove(user_id)?;
        self.assignments.unassign_all(user_id);
        Ok(user)
    }
}

/// A staged copy of the tables plus the audit records to commit with it
#[derive(Debug)]
pub struct Transaction {
    tables: Tables,
    records: Vec<AccessRecord>,
}

impl Transaction {
    fn begin(tables: Tables) -> Self {
        Self { tables, records: Vec::new() }
    }

    /// Queue an audit record; it is written only if the transaction commits
    pub fn record(&mut self, record: AccessRecord) {
        self.records.push(record);
    }
}

impl Deref for Transaction {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        &self.tables
    }
}

impl DerefMut for Transaction {
    fn deref_mut(&mut self) -> &mut Tables {
        &mut self.tables
    }
}

/// Transactional store for the RBAC tables and the audit log
pub struct RbacStore {
    tables: RwLock<Tables>,
    audit: AuditLog,
    backend: Arc<dyn StateBackend>,
}

impl std::fmt::Debug for RbacStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RbacStore").field("audit", &self.audit).finish_non_exhaustive()
    }
}

impl RbacStore {
    /// Open a store, loading state and audit history from the given backends
    pub async fn open(backend: Arc<dyn StateBackend>, journal: Arc<dyn AuditJournal>) -> AuthzResult<Self> {
        let tables = backend.load().await?.unwrap_or_default();
        let audit = AuditLog::open(journal).await?;

        Ok(Self {
            tables: RwLock::new(tables),
            audit,
            backend,
        })
    }

    /// Store that lives only as long as the process
    pub async fn in_memory() -> AuthzResult<Self> {
        Self::open(Arc::new(MemoryBackend), Arc::new(MemoryJournal::new())).await
    }

    /// Read-only view of the current committed state
    pub async fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().await
    }

    /// Run `f` against a staged copy of the tables and commit it atomically
    ///
    /// Commit order: queued audit records are journaled, then the new state is saved, then
    /// it replaces the live tables. Any error along the way leaves the live tables as they
    /// were, so a caller never sees a granted change that was not audited. When the save fails
    /// after the journal write, a failure entry naming the journaled ids is appended.
    pub async fn transaction<T, F>(&self, f: F) -> AuthzResult<T>
    where
        F: FnOnce(&mut Transaction) -> AuthzResult<T>,
    {
        let mut live = self.tables.write().await;
        let mut tx = Transaction::begin(live.clone());

        let value = f(&mut tx)?;

        let Transaction { tables, records } = tx;
        let journaled = self.audit.append_batch(records).await?;
        if let Err(e) = self.backend.save(&tables).await {
            self.compensate(&journaled, &e).await;
            return Err(e);
        }
        *live = tables;

        Ok(value)
    }

    /// Record that journaled entries describe a change that was never applied
    async fn compensate(&self, journaled: &[AccessLogEntry], cause: &AuthzError) {
        if journaled.is_empty() {
            return;
        }

        let ids: Vec<String> = journaled.iter().map(|entry| entry.id.to_string()).collect();
        let record = AccessRecord::new(journaled[0].actor, "Rolled back unsaved change", "system", false).with_detail(format!(
            "State save failed after entries [{}] were journaled: {}",
            ids.join(", "),
            cause
        ));

        match self.audit.append(record).await {
            Ok(entry) => warn!(entry_id = %entry.id, reverted = %ids.join(","), "Recorded rollback of unsaved change"),
            Err(e) => warn!(error = %e, reverted = %ids.join(","), "Failed to record rollback of unsaved change"),
        }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }
}

#[async_trait]
impl IdentityProvider for RbacStore {
    async fn user_by_id(&self, id: UserId) -> AuthzResult<Option<User>> {
        Ok(self.read().await.users.get(id).cloned())
    }
}
