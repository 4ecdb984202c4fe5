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

//! Permission definitions

use crate::rbac::roles::RoleId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Permission identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PermissionId(pub u64);

impl fmt::Display for PermissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Atomic capability identified by its (resource, action) pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Permission {
    pub id: PermissionId,

    /// Human-readable label, e.g. "Create Inventory"
    pub name: String,

    /// Resource identifier (e.g., "inventory", "users", "logs")
    pub resource: String,

    /// Action identifier (e.g., "create", "read", "update", "delete")
    pub action: String,

    pub created_at: DateTime<Utc>,
}

impl Permission {
    pub fn new(id: PermissionId, name: String, resource: String, action: String) -> Self {
        Self {
            id,
            name,
            resource,
            action,
            created_at: Utc::now(),
        }
    }

    /// Get the permission key used in log output and reports
    pub fn key(&self) -> String {
        format!("{}:{}", self.resource, self.action)
    }

    /// Exact match on resource and action. There are no wildcards.
    pub fn matches(&self, resource: &str, action: &str) -> bool {
        self.resource == resource && self.action == action
    }
}

/// Grant edge between a role and a permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RolePermission {
    pub role_id: RoleId,
    pub permission_id: PermissionId,
}

/// A permission a user holds, together with the role that grants it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EffectivePermission {
    pub permission: Permission,
    pub granting_role_id: RoleId,
    pub granting_role: String,
}
