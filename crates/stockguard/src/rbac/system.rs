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

//! RBAC system facade
//!
//! `RbacSystem` is what the surrounding application talks to. Administrative mutations pass
//! through [`Gate::mutate`]: the caller must hold the matching `users:*` or `roles:*`
//! permission, and the check, the change and its single audit entry commit together.

use crate::bootstrap::{self, SeedReport};
use crate::config::Config;
use crate::error::{AuthzError, AuthzResult};
use crate::identity::{Argon2Verifier, CredentialVerifier, IdentityProvider, RequestContext, User, UserId};
use crate::persistence::{AuditJournal, FileJournal, FileSnapshot, MemoryBackend, MemoryJournal, StateBackend};
use crate::rbac::assignments::UserRoleAssignment;
use crate::rbac::audit::{AccessLogEntry, AccessLogFilter, AccessRecord, ActionCategory, AuditStatistics, Page};
use crate::rbac::evaluator::{Evaluator, Requirement};
use crate::rbac::middleware::{Access, Gate, GateOutcome, Guarded};
use crate::rbac::permissions::{EffectivePermission, Permission, PermissionId};
use crate::rbac::roles::{Role, RoleId};
use crate::store::{RbacStore, Transaction};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Main RBAC system that coordinates the store, the gate and the audit log
#[derive(Clone)]
pub struct RbacSystem {
    config: Config,

    store: Arc<RbacStore>,

    /// Enforcement point shared by every guarded call
    gate: Gate,

    verifier: Arc<dyn CredentialVerifier>,
}

impl RbacSystem {
    /// Create a system over an existing store
    pub fn new(config: Config, store: Arc<RbacStore>) -> Self {
        Self {
            config,
            gate: Gate::new(store.clone()),
            store,
            verifier: Arc::new(Argon2Verifier),
        }
    }

    /// Open the configured backends and seed the defaults if asked to
    pub async fn open(config: Config) -> AuthzResult<Self> {
        let journal: Arc<dyn AuditJournal> = match &config.journal_path {
            Some(path) => Arc::new(FileJournal::open(path)?),
            None => Arc::new(MemoryJournal::new()),
        };
        let backend: Arc<dyn StateBackend> = match &config.state_path {
            Some(path) => Arc::new(FileSnapshot::new(path)),
            None => Arc::new(MemoryBackend),
        };

        let store = Arc::new(RbacStore::open(backend, journal).await?);
        let system = Self::new(config, store);

        if system.config.seed_defaults {
            system.seed_defaults().await?;
        }

        info!(
            journal = ?system.config.journal_path,
            state = ?system.config.state_path,
            "RBAC system initialized"
        );
        Ok(system)
    }

    /// Use a different credential scheme
    pub fn with_verifier(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Resolve gate identities through a provider other than the store
    pub fn with_identity_provider(mut self, identities: Arc<dyn IdentityProvider>) -> Self {
        self.gate = self.gate.with_identity_provider(identities);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<RbacStore> {
        &self.store
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Create the default roles, permissions and administrator where missing
    pub async fn seed_defaults(&self) -> AuthzResult<SeedReport> {
        bootstrap::seed_defaults(&self.store, self.verifier.as_ref(), &self.config).await
    }

    // Sessions

    /// Check a username and secret, recording the outcome either way
    pub async fn authenticate(&self, username: &str, secret: &str, ctx: &RequestContext) -> AuthzResult<User> {
        let candidate = self.store.read().await.users.find_by_username(username).cloned();
        let login = Access::new(ActionCategory::Login, "User login", "auth");

        let actor = candidate.as_ref().map(|user| user.id);
        let verified = candidate.filter(|user| user.is_active && self.verifier.verify(&user.credential, secret));
        let Some(user) = verified else {
            let record = login.record(ctx, actor, false).with_detail(format!("Failed login attempt for username '{}'", username));
            self.store.audit().append(record).await?;

            warn!(username = %username, client_ip = ?ctx.origin.client_ip, "Failed login attempt");
            return Err(AuthzError::Unauthenticated {
                message: "Invalid username or password".to_string(),
            });
        };

        let user = self
            .store
            .transaction(|tx| {
                tx.users.record_login(user.id, Utc::now())?;
                tx.record(login.record(ctx, Some(user.id), true).with_resource_id(user.id));
                tx.users.require(user.id).cloned()
            })
            .await?;

        info!(user_id = %user.id, username = %user.username, "User logged in");
        Ok(user)
    }

    /// Record the end of the caller's session; a context without a session is a no-op
    pub async fn logout(&self, ctx: &RequestContext) -> AuthzResult<()> {
        let Some(user_id) = ctx.session_user else {
            return Ok(());
        };

        let record = Access::new(ActionCategory::Logout, "User logout", "auth").with_resource_id(user_id).record(ctx, Some(user_id), true);
        self.store.audit().append(record).await?;

        info!(user_id = %user_id, "User logged out");
        Ok(())
    }

    /// The active user behind the caller's session, if any
    pub async fn current_identity(&self, ctx: &RequestContext) -> AuthzResult<Option<User>> {
        match ctx.session_user {
            Some(user_id) => Ok(self.store.user_by_id(user_id).await?.filter(|user| user.is_active)),
            None => Ok(None),
        }
    }

    // Enforcement

    pub async fn guard(&self, ctx: &RequestContext, requirement: &Requirement, access: &Access) -> AuthzResult<GateOutcome> {
        self.gate.guard(ctx, requirement, access).await
    }

    pub async fn protect<T, F, Fut>(&self, ctx: &RequestContext, requirement: &Requirement, access: &Access, op: F) -> AuthzResult<Guarded<T>>
    where
        F: FnOnce(User) -> Fut,
        Fut: Future<Output = AuthzResult<T>>,
    {
        self.gate.protect(ctx, requirement, access, op).await
    }

    /// Check if a user has permission to perform an action on a resource
    pub async fn has_permission(&self, user_id: UserId, resource: &str, action: &str) -> bool {
        let start_time = Instant::now();
        let tables = self.store.read().await;
        let has_permission = Evaluator::new(&tables).has_permission(user_id, resource, action);

        let duration = start_time.elapsed();
        if duration > Duration::from_millis(5) {
            warn!(
                user_id = %user_id,
                resource = %resource,
                action = %action,
                duration_ms = %duration.as_millis(),
                "Slow permission check detected"
            );
        }

        has_permission
    }

    pub async fn has_role(&self, user_id: UserId, role_name: &str) -> bool {
        Evaluator::new(&*self.store.read().await).has_role(user_id, role_name)
    }

    pub async fn has_any_role<S: AsRef<str>>(&self, user_id: UserId, role_names: &[S]) -> bool {
        Evaluator::new(&*self.store.read().await).has_any_role(user_id, role_names)
    }

    pub async fn roles_of(&self, user_id: UserId) -> Vec<Role> {
        self.store.read().await.roles_of(user_id).into_iter().cloned().collect()
    }

    /// Assignment rows of a user, including who assigned each role and when
    pub async fn user_role_assignments(&self, user_id: UserId) -> Vec<UserRoleAssignment> {
        self.store.read().await.assignments.assignments_of(user_id).into_iter().cloned().collect()
    }

    /// Every permission the user holds together with the role that grants it
    pub async fn permissions_for_user(&self, user_id: UserId) -> Vec<EffectivePermission> {
        Evaluator::new(&*self.store.read().await).effective_permissions(user_id)
    }

    // Audit

    /// Record an arbitrary access event
    pub async fn record_access(&self, record: AccessRecord) -> AuthzResult<AccessLogEntry> {
        self.store.audit().append(record).await
    }

    /// Newest-first page of the whole access log
    pub async fn list_access_logs(&self, page: usize, page_size: Option<usize>) -> Page<AccessLogEntry> {
        self.query_access_logs(&AccessLogFilter::default(), page, page_size).await
    }

    pub async fn query_access_logs(&self, filter: &AccessLogFilter, page: usize, page_size: Option<usize>) -> Page<AccessLogEntry> {
        let page_size = self.config.effective_page_size(page_size);
        self.store.audit().query(filter, page, page_size).await
    }

    pub async fn audit_statistics(&self) -> AuditStatistics {
        self.store.audit().statistics().await
    }

    // Users

    pub async fn list_users(&self) -> Vec<User> {
        self.store.read().await.users.iter().cloned().collect()
    }

    /// Create a user holding no roles
    pub async fn create_user(&self, ctx: &RequestContext, username: &str, email: &str, secret: &str) -> AuthzResult<UserId> {
        if secret.is_empty() {
            return Err(AuthzError::invalid("Password must not be empty"));
        }
        let credential = self.verifier.hash(secret)?;

        let access = Access::new(ActionCategory::Create, "Create user", "users");
        let user_id = self
            .administer(ctx, Requirement::permission("users", "create"), access, |tx, record| {
                let user_id = tx.users.create(username, email, credential)?;
                record.resource_id = Some(user_id.to_string());
                record.detail = Some(format!("Username: {}", username));
                Ok(user_id)
            })
            .await?;

        info!(user_id = %user_id, username = %username, "User created");
        Ok(user_id)
    }

    /// Delete a user and their role assignments; their audit history stays
    pub async fn delete_user(&self, ctx: &RequestContext, user_id: UserId) -> AuthzResult<User> {
        let access = Access::new(ActionCategory::Delete, "Delete user", "users").with_resource_id(user_id);
        let user = self
            .administer(ctx, Requirement::permission("users", "delete"), access, |tx, record| {
                let user = tx.delete_user(user_id)?;
                record.detail = Some(format!("Username: {}", user.username));
                Ok(user)
            })
            .await?;

        info!(user_id = %user_id, username = %user.username, "User deleted");
        Ok(user)
    }

    pub async fn set_user_active(&self, ctx: &RequestContext, user_id: UserId, active: bool) -> AuthzResult<()> {
        let action = if active { "Activate user" } else { "Deactivate user" };
        let access = Access::new(ActionCategory::Update, action, "users").with_resource_id(user_id);
        self.administer(ctx, Requirement::permission("users", "update"), access, |tx, _| tx.users.set_active(user_id, active))
            .await?;

        info!(user_id = %user_id, active, "User activation changed");
        Ok(())
    }

    // Assignments

    /// Replace the user's role set in one commit; the context's user is recorded as assigner
    pub async fn set_user_roles(&self, ctx: &RequestContext, user_id: UserId, role_ids: &[RoleId]) -> AuthzResult<()> {
        let access = Access::new(ActionCategory::RoleChange, "Update user roles", "users").with_resource_id(user_id);
        let names = self
            .administer(ctx, Requirement::permission("users", "update"), access, |tx, record| {
                tx.set_roles(user_id, role_ids, ctx.session_user)?;
                let names: Vec<String> = tx.roles_of(user_id).iter().map(|role| role.name.clone()).collect();
                record.detail = Some(format!("Roles: [{}]", names.join(", ")));
                Ok(names)
            })
            .await?;

        info!(user_id = %user_id, roles = ?names, assigned_by = ?ctx.session_user, "User roles replaced");
        Ok(())
    }

    /// Give a user one more role; returns false if they already held it
    pub async fn assign_role(&self, ctx: &RequestContext, user_id: UserId, role_id: RoleId) -> AuthzResult<bool> {
        let access = Access::new(ActionCategory::RoleChange, "Assign role", "users").with_resource_id(user_id);
        let assigned = self
            .administer(ctx, Requirement::permission("users", "update"), access, |tx, record| {
                let assigned = tx.assign(user_id, role_id, ctx.session_user)?;
                record.detail = Some(role_detail(role_id, assigned));
                Ok(assigned)
            })
            .await?;

        debug!(user_id = %user_id, role_id = %role_id, assigned, "Role assignment");
        Ok(assigned)
    }

    /// Take a role away from a user; returns false if they did not hold it
    pub async fn unassign_role(&self, ctx: &RequestContext, user_id: UserId, role_id: RoleId) -> AuthzResult<bool> {
        let access = Access::new(ActionCategory::RoleChange, "Unassign role", "users").with_resource_id(user_id);
        let removed = self
            .administer(ctx, Requirement::permission("users", "update"), access, |tx, record| {
                let removed = tx.unassign(user_id, role_id);
                record.detail = Some(role_detail(role_id, removed));
                Ok(removed)
            })
            .await?;

        debug!(user_id = %user_id, role_id = %role_id, removed, "Role unassignment");
        Ok(removed)
    }

    // Roles and permissions

    pub async fn list_roles(&self) -> Vec<Role> {
        self.store.read().await.graph.roles().cloned().collect()
    }

    pub async fn list_permissions(&self) -> Vec<Permission> {
        self.store.read().await.graph.permissions().cloned().collect()
    }

    /// Permissions granted to a role; empty for an unknown role
    pub async fn permissions_of_role(&self, role_id: RoleId) -> Vec<Permission> {
        self.store.read().await.graph.permissions_of(role_id).into_iter().cloned().collect()
    }

    pub async fn create_role(&self, ctx: &RequestContext, name: &str, description: &str) -> AuthzResult<RoleId> {
        let access = Access::new(ActionCategory::Create, "Create role", "roles");
        let role_id = self
            .administer(ctx, Requirement::permission("roles", "create"), access, |tx, record| {
                let role_id = tx.graph.create_role(name, description)?;
                record.resource_id = Some(role_id.to_string());
                record.detail = Some(format!("Name: {}", name));
                Ok(role_id)
            })
            .await?;

        info!(role_id = %role_id, name = %name, "Role created");
        Ok(role_id)
    }

    pub async fn update_role(&self, ctx: &RequestContext, role_id: RoleId, name: Option<&str>, description: Option<&str>) -> AuthzResult<()> {
        let access = Access::new(ActionCategory::Update, "Update role", "roles").with_resource_id(role_id);
        self.administer(ctx, Requirement::permission("roles", "update"), access, |tx, _| tx.graph.update_role(role_id, name, description))
            .await?;

        info!(role_id = %role_id, "Role updated");
        Ok(())
    }

    /// Delete a role together with its grants and assignments
    pub async fn delete_role(&self, ctx: &RequestContext, role_id: RoleId) -> AuthzResult<Role> {
        let access = Access::new(ActionCategory::Delete, "Delete role", "roles").with_resource_id(role_id);
        let role = self
            .administer(ctx, Requirement::permission("roles", "delete"), access, |tx, record| {
                let holders = tx.assignments.users_with_role(role_id).len();
                let role = tx.delete_role(role_id)?;
                record.detail = Some(format!("Name: {}, removed from {} users", role.name, holders));
                Ok(role)
            })
            .await?;

        info!(role_id = %role_id, name = %role.name, "Role deleted");
        Ok(role)
    }

    pub async fn create_permission(&self, ctx: &RequestContext, name: &str, resource: &str, action: &str) -> AuthzResult<PermissionId> {
        let access = Access::new(ActionCategory::Create, "Create permission", "permissions");
        let permission_id = self
            .administer(ctx, Requirement::permission("roles", "create"), access, |tx, record| {
                let permission_id = tx.graph.create_permission(name, resource, action)?;
                record.resource_id = Some(permission_id.to_string());
                record.detail = Some(format!("Key: {}:{}", resource, action));
                Ok(permission_id)
            })
            .await?;

        info!(permission_id = %permission_id, resource = %resource, action = %action, "Permission created");
        Ok(permission_id)
    }

    /// Delete a permission and every grant referencing it
    pub async fn delete_permission(&self, ctx: &RequestContext, permission_id: PermissionId) -> AuthzResult<Permission> {
        let access = Access::new(ActionCategory::Delete, "Delete permission", "permissions").with_resource_id(permission_id);
        let permission = self
            .administer(ctx, Requirement::permission("roles", "delete"), access, |tx, record| {
                let permission = tx.delete_permission(permission_id)?;
                record.detail = Some(format!("Key: {}", permission.key()));
                Ok(permission)
            })
            .await?;

        info!(permission_id = %permission_id, key = %permission.key(), "Permission deleted");
        Ok(permission)
    }

    /// Grant a permission to a role; returns false if the grant already existed
    pub async fn grant(&self, ctx: &RequestContext, role_id: RoleId, permission_id: PermissionId) -> AuthzResult<bool> {
        let access = Access::new(ActionCategory::RoleChange, "Grant permission", "roles").with_resource_id(role_id);
        let granted = self
            .administer(ctx, Requirement::permission("roles", "update"), access, |tx, record| {
                let granted = tx.graph.grant(role_id, permission_id)?;
                record.detail = Some(permission_detail(permission_id, granted));
                Ok(granted)
            })
            .await?;

        debug!(role_id = %role_id, permission_id = %permission_id, granted, "Permission grant");
        Ok(granted)
    }

    /// Revoke a permission from a role; revoking a missing grant is a no-op
    pub async fn revoke(&self, ctx: &RequestContext, role_id: RoleId, permission_id: PermissionId) -> AuthzResult<bool> {
        let access = Access::new(ActionCategory::RoleChange, "Revoke permission", "roles").with_resource_id(role_id);
        let revoked = self
            .administer(ctx, Requirement::permission("roles", "update"), access, |tx, record| {
                let revoked = tx.graph.revoke(role_id, permission_id);
                record.detail = Some(permission_detail(permission_id, revoked));
                Ok(revoked)
            })
            .await?;

        debug!(role_id = %role_id, permission_id = %permission_id, revoked, "Permission revoke");
        Ok(revoked)
    }

    /// Run an administrative change through the gate; a denial becomes `Err(Forbidden)`
    async fn administer<T, F>(&self, ctx: &RequestContext, requirement: Requirement, access: Access, op: F) -> AuthzResult<T>
    where
        F: FnOnce(&mut Transaction, &mut AccessRecord) -> AuthzResult<T>,
    {
        self.gate.mutate(ctx, &requirement, &access, op).await?.into_result()
    }
}

fn role_detail(role_id: RoleId, changed: bool) -> String {
    if changed {
        format!("Role {}", role_id)
    } else {
        format!("Role {} (unchanged)", role_id)
    }
}

fn permission_detail(permission_id: PermissionId, changed: bool) -> String {
    if changed {
        format!("Permission {}", permission_id)
    } else {
        format!("Permission {} (unchanged)", permission_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::{ADMIN_ROLE, VIEWER_ROLE};

    struct PlainVerifier;

    impl CredentialVerifier for PlainVerifier {
        fn hash(&self, secret: &str) -> AuthzResult<String> {
            Ok(format!("plain:{}", secret))
        }

        fn verify(&self, stored: &str, presented: &str) -> bool {
            stored == format!("plain:{}", presented)
        }
    }

    /// Seeded system plus a session context for the default administrator
    async fn system() -> (RbacSystem, RequestContext) {
        let store = Arc::new(RbacStore::in_memory().await.unwrap());
        let system = RbacSystem::new(Config::default(), store).with_verifier(Arc::new(PlainVerifier));
        system.seed_defaults().await.unwrap();
        let admin = system.authenticate("admin", "admin123", &RequestContext::anonymous()).await.unwrap();
        (system, RequestContext::for_user(admin.id))
    }

    async fn role_named(system: &RbacSystem, name: &str) -> RoleId {
        system.list_roles().await.into_iter().find(|role| role.name == name).map(|role| role.id).unwrap()
    }

    #[tokio::test]
    async fn test_open_seeds_defaults() {
        let system = RbacSystem::open(Config::default()).await.unwrap();

        let names: Vec<String> = system.list_roles().await.into_iter().map(|role| role.name).collect();
        assert_eq!(names, vec!["Admin", "Manager", "Viewer"]);

        let admin = system.authenticate("admin", "admin123", &RequestContext::anonymous()).await.unwrap();
        assert!(system.has_role(admin.id, "Admin").await);
        assert!(admin.last_login.is_some());
    }

    #[tokio::test]
    async fn test_failed_logins_are_audited() {
        let (system, admin_ctx) = system().await;
        let ctx = RequestContext::anonymous().with_client_ip("192.0.2.1").with_user_agent("curl/8.0");
        let user_id = system.create_user(&admin_ctx, "viewer", "viewer@example.com", "secret").await.unwrap();

        let wrong = system.authenticate("viewer", "guess", &ctx).await;
        assert!(matches!(wrong, Err(AuthzError::Unauthenticated { .. })));
        let unknown = system.authenticate("ghost", "guess", &ctx).await;
        assert!(matches!(unknown, Err(AuthzError::Unauthenticated { .. })));

        let failures = system
            .query_access_logs(&AccessLogFilter { success: Some(false), ..AccessLogFilter::default() }, 1, None)
            .await;
        assert_eq!(failures.total, 2);
        assert_eq!(failures.items[0].actor, None);
        assert_eq!(failures.items[1].actor, Some(user_id));
        assert_eq!(failures.items[0].user_agent.as_deref(), Some("curl/8.0"));
    }

    #[tokio::test]
    async fn test_inactive_user_cannot_log_in() {
        let (system, admin_ctx) = system().await;
        let user_id = system.create_user(&admin_ctx, "viewer", "viewer@example.com", "secret").await.unwrap();
        system.set_user_active(&admin_ctx, user_id, false).await.unwrap();

        assert!(system.authenticate("viewer", "secret", &RequestContext::anonymous()).await.is_err());
        assert!(system.current_identity(&RequestContext::for_user(user_id)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_logout_is_recorded() {
        let (system, admin_ctx) = system().await;
        let user_id = system.create_user(&admin_ctx, "viewer", "viewer@example.com", "secret").await.unwrap();

        system.logout(&RequestContext::for_user(user_id)).await.unwrap();
        system.logout(&RequestContext::anonymous()).await.unwrap();

        let page = system.query_access_logs(&AccessLogFilter::for_actor(user_id), 1, None).await;
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].action, "User logout");
    }

    #[tokio::test]
    async fn test_admin_mutations_audit_and_cascade() {
        let (system, admin_ctx) = system().await;
        let before = system.audit_statistics().await.total_entries;

        let user_id = system.create_user(&admin_ctx, "auditor", "auditor@example.com", "secret").await.unwrap();
        let role_id = system.create_role(&admin_ctx, "Auditor", "").await.unwrap();
        let permission_id = system.create_permission(&admin_ctx, "", "reports", "export").await.unwrap();

        assert!(system.grant(&admin_ctx, role_id, permission_id).await.unwrap());
        assert!(!system.grant(&admin_ctx, role_id, permission_id).await.unwrap());
        assert!(system.assign_role(&admin_ctx, user_id, role_id).await.unwrap());
        assert!(system.has_permission(user_id, "reports", "export").await);

        system.delete_role(&admin_ctx, role_id).await.unwrap();
        assert!(!system.has_permission(user_id, "reports", "export").await);
        assert!(system.roles_of(user_id).await.is_empty());

        let stats = system.audit_statistics().await;
        assert_eq!(stats.total_entries, before + 7);
        assert_eq!(stats.failed_entries, 0);

        let newest = system.list_access_logs(1, Some(1)).await;
        assert_eq!(newest.items[0].action, "Delete role");
        assert_eq!(newest.items[0].resource_id, Some(role_id.to_string()));
        assert_eq!(newest.items[0].detail.as_deref(), Some("Name: Auditor, removed from 1 users"));
    }

    #[tokio::test]
    async fn test_set_user_roles_records_assigner() {
        let (system, admin_ctx) = system().await;
        let admin = admin_ctx.session_user.unwrap();
        let user = system.create_user(&admin_ctx, "viewer", "viewer@example.com", "secret").await.unwrap();
        let viewer = role_named(&system, VIEWER_ROLE).await;

        let before = system.store().audit().len().await;
        system.set_user_roles(&admin_ctx, user, &[viewer]).await.unwrap();
        assert_eq!(system.store().audit().len().await, before + 1);

        let assignments = system.user_role_assignments(user).await;
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].assigned_by, Some(admin));

        let missing = system.set_user_roles(&admin_ctx, user, &[RoleId(999)]).await;
        assert!(matches!(missing, Err(AuthzError::NotFound { .. })));
        assert_eq!(system.roles_of(user).await.len(), 1);

        let page = system.list_access_logs(1, Some(2)).await;
        assert_eq!(page.total, before + 2);
        assert!(!page.items[0].success);
        assert_eq!(page.items[0].actor, Some(admin));
        assert!(page.items[1].success);
        assert_eq!(page.items[1].detail.as_deref(), Some("Roles: [Viewer]"));
    }

    #[tokio::test]
    async fn test_viewer_cannot_grant_themselves_admin() {
        let (system, admin_ctx) = system().await;
        let viewer = system.create_user(&admin_ctx, "viewer", "viewer@example.com", "secret").await.unwrap();
        system.set_user_roles(&admin_ctx, viewer, &[role_named(&system, VIEWER_ROLE).await]).await.unwrap();
        let admin_role = role_named(&system, ADMIN_ROLE).await;
        let viewer_ctx = RequestContext::for_user(viewer);

        let before = system.store().audit().len().await;
        let escalation = system.assign_role(&viewer_ctx, viewer, admin_role).await;
        assert!(matches!(escalation, Err(AuthzError::Forbidden { .. })));
        let replace = system.set_user_roles(&viewer_ctx, viewer, &[admin_role]).await;
        assert!(matches!(replace, Err(AuthzError::Forbidden { .. })));
        assert!(!system.has_role(viewer, ADMIN_ROLE).await);

        let page = system.query_access_logs(&AccessLogFilter::for_actor(viewer), 1, None).await;
        assert_eq!(system.store().audit().len().await, before + 2);
        assert_eq!(page.total, 2);
        assert!(page.items.iter().all(|entry| !entry.success && entry.resource == "users"));
    }

    #[tokio::test]
    async fn test_admin_calls_require_a_session() {
        let (system, _) = system().await;
        let before = system.store().audit().len().await;

        let created = system.create_role(&RequestContext::anonymous(), "Auditor", "").await;
        assert!(matches!(created, Err(AuthzError::Unauthenticated { .. })));
        assert!(system.list_roles().await.iter().all(|role| role.name != "Auditor"));
        assert_eq!(system.store().audit().len().await, before + 1);
    }
}
