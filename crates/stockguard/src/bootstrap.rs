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

//! Default roles, permissions and the bootstrap administrator

use crate::config::Config;
use crate::error::AuthzResult;
use crate::identity::CredentialVerifier;
use crate::rbac::audit::AccessRecord;
use crate::store::{RbacStore, Transaction};
use tracing::info;

/// Resources guarded by the default permission set
pub const RESOURCES: [&str; 5] = ["dashboard", "inventory", "users", "roles", "logs"];

/// Actions defined for every default resource
pub const ACTIONS: [&str; 4] = ["create", "read", "update", "delete"];

pub const ADMIN_ROLE: &str = "Admin";
pub const MANAGER_ROLE: &str = "Manager";
pub const VIEWER_ROLE: &str = "Viewer";

/// Default roles with their descriptions and the `(resource, action)` pairs they receive
pub fn default_roles() -> Vec<(&'static str, &'static str, Vec<(&'static str, &'static str)>)> {
    let everything = RESOURCES.iter().flat_map(|resource| ACTIONS.iter().map(move |action| (*resource, *action))).collect();
    let manager = std::iter::once(("dashboard", "read")).chain(ACTIONS.iter().map(|action| ("inventory", *action))).collect();
    let viewer = vec![("dashboard", "read"), ("inventory", "read")];

    vec![
        (ADMIN_ROLE, "Full access to every feature", everything),
        (MANAGER_ROLE, "Manages inventory and views the dashboard", manager),
        (VIEWER_ROLE, "Read-only access to inventory and the dashboard", viewer),
    ]
}

/// What a seeding run changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub permissions_created: usize,
    pub roles_created: usize,
    pub grants_added: usize,
    pub admin_created: bool,
}

impl SeedReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Create whatever part of the default setup is missing, in one transaction
///
/// Existing rows are left untouched, so running this on every start is safe.
pub async fn seed_defaults(store: &RbacStore, verifier: &dyn CredentialVerifier, config: &Config) -> AuthzResult<SeedReport> {
    let admin_missing = store.read().await.users.find_by_username(&config.admin_username).is_none();
    let admin_credential = if admin_missing { Some(verifier.hash(&config.admin_password)?) } else { None };

    let report = store.transaction(|tx| seed(tx, config, admin_credential)).await?;

    if report.is_noop() {
        info!("Default roles already present");
    } else {
        info!(
            permissions_created = report.permissions_created,
            roles_created = report.roles_created,
            grants_added = report.grants_added,
            admin_created = report.admin_created,
            "Seeded default roles and permissions"
        );
    }
    Ok(report)
}

fn seed(tx: &mut Transaction, config: &Config, admin_credential: Option<String>) -> AuthzResult<SeedReport> {
    let mut report = SeedReport::default();

    for resource in RESOURCES {
        for action in ACTIONS {
            if tx.graph.find_permission(resource, action).is_none() {
                tx.graph.create_permission(&format!("{} {}", action, resource), resource, action)?;
                report.permissions_created += 1;
            }
        }
    }

    for (name, description, grants) in default_roles() {
        let existing = tx.graph.find_role_by_name(name).map(|role| role.id);
        let role_id = match existing {
            Some(role_id) => role_id,
            None => {
                report.roles_created += 1;
                tx.graph.create_role(name, description)?
            }
        };

        for (resource, action) in grants {
            if let Some(permission_id) = tx.graph.find_permission(resource, action).map(|p| p.id) {
                if tx.graph.grant(role_id, permission_id)? {
                    report.grants_added += 1;
                }
            }
        }
    }

    if let Some(credential) = admin_credential {
        if tx.users.find_by_username(&config.admin_username).is_none() {
            let admin = tx.users.create(&config.admin_username, &config.admin_email, credential)?;
            if let Some(role_id) = tx.graph.find_role_by_name(ADMIN_ROLE).map(|r| r.id) {
                tx.assign(admin, role_id, None)?;
            }
            report.admin_created = true;
        }
    }

    if !report.is_noop() {
        let detail = format!(
            "{} permissions, {} roles, {} grants, admin created: {}",
            report.permissions_created, report.roles_created, report.grants_added, report.admin_created
        );
        tx.record(AccessRecord::new(None, "Seeded default roles and permissions", "system", true).with_detail(detail));
    }

    Ok(report)
}
