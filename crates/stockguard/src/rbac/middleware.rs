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

//! Access gate for protected operations
//!
//! Every traversal of the gate writes exactly one audit entry: a failure entry for missing or
//! inactive identities and for denials, a success entry otherwise. The entry is durable
//! before the caller is told the outcome.

use crate::error::{AuthzError, AuthzResult};
use crate::identity::{IdentityProvider, RequestContext, User, UserId};
use crate::rbac::audit::{AccessRecord, ActionCategory, Severity};
use crate::rbac::evaluator::{Decision, Evaluator, Requirement};
use crate::store::{RbacStore, Transaction};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Description of the operation being attempted, as it will appear in the audit log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    pub category: ActionCategory,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
}

impl Access {
    pub fn new(category: ActionCategory, action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            category,
            action: action.into(),
            resource: resource.into(),
            resource_id: None,
        }
    }

    /// Read-only navigation to a resource
    pub fn view(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self::new(ActionCategory::View, format!("View {}", resource), resource)
    }

    pub fn create(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self::new(ActionCategory::Create, format!("Create {}", resource), resource)
    }

    pub fn update(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self::new(ActionCategory::Update, format!("Update {}", resource), resource)
    }

    pub fn delete(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self::new(ActionCategory::Delete, format!("Delete {}", resource), resource)
    }

    pub fn with_resource_id(mut self, resource_id: impl ToString) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }

    /// Build the audit record for this access made under `ctx`
    pub fn record(&self, ctx: &RequestContext, actor: Option<UserId>, success: bool) -> AccessRecord {
        let mut record = AccessRecord::new(actor, self.action.clone(), self.resource.clone(), success)
            .with_origin(ctx.origin.clone())
            .with_request_id(ctx.request_id.clone())
            .with_severity(self.category.severity());
        record.resource_id = self.resource_id.clone();
        record
    }
}

/// Result of a guard check that did not fail outright
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Allowed(User),
    Forbidden { reason: String },
}

impl GateOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateOutcome::Allowed(_))
    }

    /// Turn a denial into [`AuthzError::Forbidden`]
    pub fn into_user(self) -> AuthzResult<User> {
        match self {
            GateOutcome::Allowed(user) => Ok(user),
            GateOutcome::Forbidden { reason } => Err(AuthzError::Forbidden { reason }),
        }
    }
}

/// Result of running an operation behind the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guarded<T> {
    Completed(T),
    Forbidden { reason: String },
}

impl<T> Guarded<T> {
    /// Turn a denial into [`AuthzError::Forbidden`]
    pub fn into_result(self) -> AuthzResult<T> {
        match self {
            Guarded::Completed(value) => Ok(value),
            Guarded::Forbidden { reason } => Err(AuthzError::Forbidden { reason }),
        }
    }
}

/// Enforcement point in front of protected operations
#[derive(Clone)]
pub struct Gate {
    store: Arc<RbacStore>,
    identities: Arc<dyn IdentityProvider>,
}

impl Gate {
    /// Gate that resolves identities from the store itself
    pub fn new(store: Arc<RbacStore>) -> Self {
        let identities: Arc<dyn IdentityProvider> = store.clone();
        Self { store, identities }
    }

    /// Resolve identities through a different provider
    pub fn with_identity_provider(mut self, identities: Arc<dyn IdentityProvider>) -> Self {
        self.identities = identities;
        self
    }

    /// Check `requirement` for the caller of `ctx` and log the attempt
    ///
    /// Returns `Err(Unauthenticated)` when the session holds no active user, and
    /// `Err(PersistenceFailure)` when the audit entry could not be written. In the latter case
    /// the caller must not proceed.
    pub async fn guard(&self, ctx: &RequestContext, requirement: &Requirement, access: &Access) -> AuthzResult<GateOutcome> {
        let user = match self.resolve(ctx, access).await? {
            Ok(user) => user,
            Err(message) => return Err(AuthzError::Unauthenticated { message }),
        };

        let decision = {
            let tables = self.store.read().await;
            Evaluator::new(&tables).check(user.id, requirement)
        };

        match decision {
            Decision::Allow => {
                let mut record = access.record(ctx, Some(user.id), true);
                if access.category.is_sensitive() {
                    record = record.with_detail(format!("Granted by {}", requirement));
                }
                self.store.audit().append(record).await?;

                debug!(user_id = %user.id, resource = %access.resource, category = access.category.as_str(), "Access granted");
                Ok(GateOutcome::Allowed(user))
            }
            Decision::Deny { reason } => {
                let record = access.record(ctx, Some(user.id), false).with_detail(reason.clone()).with_severity(Severity::Sensitive);
                self.store.audit().append(record).await?;

                warn!(user_id = %user.id, resource = %access.resource, reason = %reason, "Access denied");
                Ok(GateOutcome::Forbidden { reason })
            }
        }
    }

    /// Run `op` only if the caller satisfies `requirement`
    ///
    /// The success entry is committed before `op` starts; if that write fails, `op` never runs.
    pub async fn protect<T, F, Fut>(&self, ctx: &RequestContext, requirement: &Requirement, access: &Access, op: F) -> AuthzResult<Guarded<T>>
    where
        F: FnOnce(User) -> Fut,
        Fut: Future<Output = AuthzResult<T>>,
    {
        match self.guard(ctx, requirement, access).await? {
            GateOutcome::Allowed(user) => Ok(Guarded::Completed(op(user).await?)),
            GateOutcome::Forbidden { reason } => Ok(Guarded::Forbidden { reason }),
        }
    }

    /// Run a state change only if the caller satisfies `requirement`
    ///
    /// The check and `op` share one store transaction, and the traversal leaves a single entry:
    /// the success record `op` filled in, committed with the change, or a failure record when
    /// the check or `op` fails.
    pub async fn mutate<T, F>(&self, ctx: &RequestContext, requirement: &Requirement, access: &Access, op: F) -> AuthzResult<Guarded<T>>
    where
        F: FnOnce(&mut Transaction, &mut AccessRecord) -> AuthzResult<T>,
    {
        let user = match self.resolve(ctx, access).await? {
            Ok(user) => user,
            Err(message) => return Err(AuthzError::Unauthenticated { message }),
        };

        let outcome = self
            .store
            .transaction(|tx| {
                let decision = Evaluator::new(&**tx).check(user.id, requirement);
                match decision {
                    Decision::Allow => {
                        let mut record = access.record(ctx, Some(user.id), true);
                        let value = op(tx, &mut record)?;
                        tx.record(record);
                        Ok(Ok(value))
                    }
                    Decision::Deny { reason } => {
                        tx.record(access.record(ctx, Some(user.id), false).with_detail(reason.clone()).with_severity(Severity::Sensitive));
                        Ok(Err(reason))
                    }
                }
            })
            .await;

        match outcome {
            Ok(Ok(value)) => {
                debug!(user_id = %user.id, resource = %access.resource, action = %access.action, "Change applied");
                Ok(Guarded::Completed(value))
            }
            Ok(Err(reason)) => {
                warn!(user_id = %user.id, resource = %access.resource, reason = %reason, "Change denied");
                Ok(Guarded::Forbidden { reason })
            }
            Err(e @ AuthzError::PersistenceFailure { .. }) => Err(e),
            Err(e) => {
                let record = access.record(ctx, Some(user.id), false).with_detail(e.to_string()).with_severity(Severity::Sensitive);
                self.store.audit().append(record).await?;

                warn!(user_id = %user.id, resource = %access.resource, error = %e, "Change rejected");
                Err(e)
            }
        }
    }

    /// Resolve the session user, logging a failure entry when there is no usable identity
    async fn resolve(&self, ctx: &RequestContext, access: &Access) -> AuthzResult<Result<User, String>> {
        let (actor, message) = match ctx.session_user {
            None => (None, "Authentication required".to_string()),
            Some(id) => match self.identities.user_by_id(id).await? {
                Some(user) if user.is_active => return Ok(Ok(user)),
                Some(user) => (Some(user.id), format!("Account '{}' is disabled", user.username)),
                None => (None, format!("Session refers to unknown user {}", id)),
            },
        };

        let record = access
            .record(ctx, actor, false)
            .with_detail(message.clone())
            .with_severity(Severity::Sensitive);
        self.store.audit().append(record).await?;

        warn!(resource = %access.resource, reason = %message, "Unauthenticated access attempt");
        Ok(Err(message))
    }
}
