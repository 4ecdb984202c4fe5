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

//! Error handling for the authorization core

use thiserror::Error;

/// Errors surfaced by the authorization core
#[derive(Error, Debug)]
pub enum AuthzError {
    #[error("Unauthenticated: {message}")]
    Unauthenticated { message: String },

    #[error("Forbidden: {reason}")]
    Forbidden { reason: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Persistence failure: {message}")]
    PersistenceFailure { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
}

impl AuthzError {
    /// Get the error type identifier
    pub fn kind(&self) -> &'static str {
        match self {
            AuthzError::Unauthenticated { .. } => "unauthenticated",
            AuthzError::Forbidden { .. } => "forbidden",
            AuthzError::NotFound { .. } => "not_found",
            AuthzError::Conflict { .. } => "conflict",
            AuthzError::InvalidInput { .. } => "invalid_input",
            AuthzError::PersistenceFailure { .. } | AuthzError::IoError(_) | AuthzError::SerdeJsonError(_) => "persistence_failure",
        }
    }

    /// Whether the error came from the storage layer and is fatal for the request
    pub fn is_persistence_failure(&self) -> bool {
        self.kind() == "persistence_failure"
    }

    pub(crate) fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        AuthzError::NotFound {
            message: format!("{} '{}' not found", what, id),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        AuthzError::InvalidInput { message: message.into() }
    }
}

/// Result type for authorization operations
pub type AuthzResult<T> = Result<T, AuthzError>;
