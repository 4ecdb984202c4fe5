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

//! Identities, credentials and request context
//!
//! Credential material is opaque to the rest of the core. It is only ever handed to a
//! [`CredentialVerifier`], which by default stores argon2 PHC strings.

use crate::error::{AuthzError, AuthzResult};
use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// User identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user known to the authorization core
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,

    /// Opaque credential material, only interpreted by a [`CredentialVerifier`]
    pub credential: String,

    /// Inactive users cannot authenticate and are treated as anonymous by the gate
    pub is_active: bool,

    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    /// Create a new active user
    pub fn new(id: UserId, username: String, email: String, credential: String) -> Self {
        Self {
            id,
            username,
            email,
            credential,
            is_active: true,
            created_at: Utc::now(),
            last_login: None,
        }
    }
}

/// User table keyed by id, with unique usernames and emails
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserDirectory {
    users: BTreeMap<UserId, User>,
    next_id: u64,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new user, rejecting duplicate usernames or emails
    pub fn create(&mut self, username: &str, email: &str, credential: String) -> AuthzResult<UserId> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() || email.is_empty() {
            return Err(AuthzError::invalid("Username and email must not be empty"));
        }

        if self.users.values().any(|u| u.username == username) {
            return Err(AuthzError::Conflict {
                message: format!("Username '{}' is already taken", username),
            });
        }
        if self.users.values().any(|u| u.email.eq_ignore_ascii_case(email)) {
            return Err(AuthzError::Conflict {
                message: format!("Email '{}' is already registered", email),
            });
        }

        self.next_id += 1;
        let id = UserId(self.next_id);
        self.users.insert(id, User::new(id, username.to_string(), email.to_string(), credential));
        Ok(id)
    }

    pub fn get(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    /// Get a user or fail with `NotFound`
    pub fn require(&self, id: UserId) -> AuthzResult<&User> {
        self.users.get(&id).ok_or_else(|| AuthzError::not_found("User", id))
    }

    pub fn contains(&self, id: UserId) -> bool {
        self.users.contains_key(&id)
    }

    pub fn find_by_username(&self, username: &str) -> Option<&User> {
        self.users.values().find(|u| u.username == username)
    }

    /// Remove a user. Edges referencing the user are cleaned up by the store.
    pub fn remove(&mut self, id: UserId) -> AuthzResult<User> {
        self.users.remove(&id).ok_or_else(|| AuthzError::not_found("User", id))
    }

    pub fn set_active(&mut self, id: UserId, active: bool) -> AuthzResult<()> {
        let user = self.users.get_mut(&id).ok_or_else(|| AuthzError::not_found("User", id))?;
        user.is_active = active;
        Ok(())
    }

    pub fn record_login(&mut self, id: UserId, at: DateTime<Utc>) -> AuthzResult<()> {
        let user = self.users.get_mut(&id).ok_or_else(|| AuthzError::not_found("User", id))?;
        user.last_login = Some(at);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Turns secrets into stored credential material and checks presented secrets against it
pub trait CredentialVerifier: Send + Sync {
    /// Produce stored credential material for a secret
    fn hash(&self, secret: &str) -> AuthzResult<String>;

    /// Check a presented secret against stored credential material
    fn verify(&self, stored: &str, presented: &str) -> bool;
}

/// argon2id credentials in PHC string format
#[derive(Debug, Default, Clone)]
pub struct Argon2Verifier;

impl CredentialVerifier for Argon2Verifier {
    fn hash(&self, secret: &str) -> AuthzResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthzError::invalid(format!("Failed to hash credential: {}", e)))
    }

    fn verify(&self, stored: &str, presented: &str) -> bool {
        match PasswordHash::new(stored) {
            Ok(parsed) => Argon2::default().verify_password(presented.as_bytes(), &parsed).is_ok(),
            Err(_) => false,
        }
    }
}

/// Caller origin recorded on audit entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginMeta {
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Per-request context handed to the core by the surrounding web layer
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// User id held by the caller's session, if any
    pub session_user: Option<UserId>,
    pub origin: OriginMeta,
    pub request_id: String,
}

impl RequestContext {
    /// Context for a caller without a session
    pub fn anonymous() -> Self {
        Self {
            session_user: None,
            origin: OriginMeta::default(),
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Context for a caller whose session holds `user_id`
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            session_user: Some(user_id),
            ..Self::anonymous()
        }
    }

    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.origin.client_ip = Some(client_ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.origin.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

/// Looks up identities by id on behalf of the gate
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn user_by_id(&self, id: UserId) -> AuthzResult<Option<User>>;
}
