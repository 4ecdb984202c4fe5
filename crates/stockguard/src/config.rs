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

//! Configuration management for the authorization core

use std::env;
use std::path::PathBuf;

/// Configuration for the authorization core
#[derive(Debug, Clone)]
pub struct Config {
    /// Audit journal file; `None` keeps the audit log in memory only
    pub journal_path: Option<PathBuf>,

    /// State snapshot file; `None` keeps users, roles and assignments in memory only
    pub state_path: Option<PathBuf>,

    /// Page size used when a caller does not ask for one
    pub default_page_size: usize,

    /// Upper bound on the page size of audit log queries
    pub max_page_size: usize,

    /// Seed the default roles, permissions and admin account on startup
    pub seed_defaults: bool,

    /// Username of the bootstrap administrator
    pub admin_username: String,

    /// Email of the bootstrap administrator
    pub admin_email: String,

    /// Initial password of the bootstrap administrator
    pub admin_password: String,

    /// Tracing filter directive, e.g. "info" or "stockguard=debug"
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            journal_path: None,
            state_path: None,
            default_page_size: 20,
            max_page_size: 100,
            seed_defaults: true,
            admin_username: "admin".to_string(),
            admin_email: "admin@example.com".to_string(),
            admin_password: "admin123".to_string(),
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            journal_path: env::var("STOCKGUARD_JOURNAL_PATH").ok().filter(|v| !v.is_empty()).map(PathBuf::from),

            state_path: env::var("STOCKGUARD_STATE_PATH").ok().filter(|v| !v.is_empty()).map(PathBuf::from),

            default_page_size: env::var("STOCKGUARD_DEFAULT_PAGE_SIZE")
                .map(|v| v.parse().unwrap_or(defaults.default_page_size))
                .unwrap_or(defaults.default_page_size),

            max_page_size: env::var("STOCKGUARD_MAX_PAGE_SIZE").map(|v| v.parse().unwrap_or(defaults.max_page_size)).unwrap_or(defaults.max_page_size),

            seed_defaults: env::var("STOCKGUARD_SEED_DEFAULTS").map(|v| v.parse().unwrap_or(true)).unwrap_or(true),

            admin_username: env::var("STOCKGUARD_ADMIN_USERNAME").unwrap_or(defaults.admin_username),

            admin_email: env::var("STOCKGUARD_ADMIN_EMAIL").unwrap_or(defaults.admin_email),

            admin_password: env::var("STOCKGUARD_ADMIN_PASSWORD").unwrap_or(defaults.admin_password),

            log_filter: env::var("STOCKGUARD_LOG").unwrap_or(defaults.log_filter),
        }
    }

    /// Clamp a requested page size into `[1, max_page_size]`, falling back to the default
    pub fn effective_page_size(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_page_size).clamp(1, self.max_page_size.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.journal_path.is_none());
        assert_eq!(config.default_page_size, 20);
        assert!(config.seed_defaults);
    }

    #[test]
    fn test_effective_page_size() {
        let config = Config::default();
        assert_eq!(config.effective_page_size(None), 20);
        assert_eq!(config.effective_page_size(Some(0)), 1);
        assert_eq!(config.effective_page_size(Some(5000)), 100);
    }
}
