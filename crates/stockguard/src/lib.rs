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

//! Stockguard authorization core
//!
//! Role-based access control for an inventory application: roles grant exact
//! resource/action permissions, users hold roles, a gate enforces requirements in front of
//! protected operations, and every decision lands in a durable audit log.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod identity;
pub mod persistence;
pub mod rbac;
pub mod store;

pub use config::Config;
pub use error::{AuthzError, AuthzResult};
pub use identity::{RequestContext, User, UserId};
pub use rbac::{Access, Requirement, RbacSystem};
