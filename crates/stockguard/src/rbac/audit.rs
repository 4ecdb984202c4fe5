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

//! Audit logging for access decisions and sensitive actions
//!
//! Entries are append-only. An append is durable (written to the journal) before it becomes
//! visible to queries, and a failed journal write fails the append.

use crate::error::AuthzResult;
use crate::identity::{OriginMeta, UserId};
use crate::persistence::AuditJournal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Access log entry identifier, assigned in append order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccessLogId(pub u64);

impl fmt::Display for AccessLogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How much attention an entry deserves in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Read-only navigational access
    Routine,
    /// Mutations, role changes, login/logout and every denial
    Sensitive,
}

/// Category of the operation behind an access attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionCategory {
    View,
    Create,
    Update,
    Delete,
    RoleChange,
    Login,
    Logout,
}

impl ActionCategory {
    pub fn severity(&self) -> Severity {
        match self {
            ActionCategory::View => Severity::Routine,
            _ => Severity::Sensitive,
        }
    }

    pub fn is_sensitive(&self) -> bool {
        self.severity() == Severity::Sensitive
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionCategory::View => "view",
            ActionCategory::Create => "create",
            ActionCategory::Update => "update",
            ActionCategory::Delete => "delete",
            ActionCategory::RoleChange => "role_change",
            ActionCategory::Login => "login",
            ActionCategory::Logout => "logout",
        }
    }
}

/// An access attempt to be recorded; becomes an [`AccessLogEntry`] once appended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRecord {
    /// Acting user; `None` for anonymous callers and bootstrap
    pub actor: Option<UserId>,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub success: bool,
    pub origin: OriginMeta,
    pub detail: Option<String>,
    pub severity: Severity,
    pub request_id: Option<String>,
}

impl AccessRecord {
    /// Create a new record with sensitive severity
    pub fn new(actor: Option<UserId>, action: impl Into<String>, resource: impl Into<String>, success: bool) -> Self {
        Self {
            actor,
            action: action.into(),
            resource: resource.into(),
            resource_id: None,
            success,
            origin: OriginMeta::default(),
            detail: None,
            severity: Severity::Sensitive,
            request_id: None,
        }
    }

    pub fn with_resource_id(mut self, resource_id: impl ToString) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn with_origin(mut self, origin: OriginMeta) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Immutable audit entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessLogEntry {
    pub id: AccessLogId,
    pub timestamp: DateTime<Utc>,
    pub actor: Option<UserId>,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub success: bool,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub detail: Option<String>,
    pub severity: Severity,
    pub request_id: Option<String>,
}

impl AccessLogEntry {
    fn from_record(id: AccessLogId, timestamp: DateTime<Utc>, record: AccessRecord) -> Self {
        Self {
            id,
            timestamp,
            actor: record.actor,
            action: record.action,
            resource: record.resource,
            resource_id: record.resource_id,
            success: record.success,
            client_ip: record.origin.client_ip,
            user_agent: record.origin.user_agent,
            detail: record.detail,
            severity: record.severity,
            request_id: record.request_id,
        }
    }
}

/// Filter for audit log queries; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct AccessLogFilter {
    pub actor: Option<UserId>,
    pub resource: Option<String>,
    pub success: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AccessLogFilter {
    pub fn for_actor(actor: UserId) -> Self {
        Self { actor: Some(actor), ..Self::default() }
    }

    pub fn matches(&self, entry: &AccessLogEntry) -> bool {
        self.actor.is_none_or(|actor| entry.actor == Some(actor))
            && self.resource.as_deref().is_none_or(|resource| entry.resource == resource)
            && self.success.is_none_or(|success| entry.success == success)
            && self.since.is_none_or(|since| entry.timestamp >= since)
            && self.until.is_none_or(|until| entry.timestamp <= until)
    }
}

/// One page of query results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,

    /// 1-based page number
    pub page: usize,
    pub page_size: usize,

    /// Number of matching items across all pages
    pub total: usize,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.page_size.max(1))
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }
}

/// Audit statistics
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AuditStatistics {
    pub total_entries: usize,
    pub successful_entries: usize,
    pub failed_entries: usize,
    pub entries_by_resource: BTreeMap<String, usize>,
}

/// Append-only audit log backed by an [`AuditJournal`]
pub struct AuditLog {
    entries: RwLock<Vec<AccessLogEntry>>,
    journal: Arc<dyn AuditJournal>,
}

impl fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLog").finish_non_exhaustive()
    }
}

impl AuditLog {
    /// Open the log, replaying whatever the journal already holds
    pub async fn open(journal: Arc<dyn AuditJournal>) -> AuthzResult<Self> {
        let mut entries = journal.replay().await?;
        entries.sort_by_key(|entry| entry.id);

        Ok(Self {
            entries: RwLock::new(entries),
            journal,
        })
    }

    /// Append a single record
    pub async fn append(&self, record: AccessRecord) -> AuthzResult<AccessLogEntry> {
        let mut appended = self.append_batch(vec![record]).await?;
        Ok(appended.remove(0))
    }

    /// Append records in order. Nothing becomes visible unless the journal write succeeds.
    pub async fn append_batch(&self, records: Vec<AccessRecord>) -> AuthzResult<Vec<AccessLogEntry>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut entries = self.entries.write().await;
        let last_id = entries.last().map(|entry| entry.id.0).unwrap_or(0);
        let now = Utc::now();

        let batch: Vec<AccessLogEntry> = records
            .into_iter()
            .enumerate()
            .map(|(offset, record)| AccessLogEntry::from_record(AccessLogId(last_id + 1 + offset as u64), now, record))
            .collect();

        self.journal.append(&batch).await?;

        for entry in &batch {
            log_entry(entry);
        }
        entries.extend(batch.iter().cloned());

        Ok(batch)
    }

    /// Newest-first page of entries matching `filter`
    ///
    /// Ordering is by timestamp descending with ties broken by id descending.
    pub async fn query(&self, filter: &AccessLogFilter, page: usize, page_size: usize) -> Page<AccessLogEntry> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let entries = self.entries.read().await;

        let mut matching: Vec<&AccessLogEntry> = entries.iter().filter(|entry| filter.matches(entry)).collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));

        let total = matching.len();
        let items = matching.into_iter().skip((page - 1).saturating_mul(page_size)).take(page_size).cloned().collect();

        Page { items, page, page_size, total }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Get audit statistics
    pub async fn statistics(&self) -> AuditStatistics {
        let entries = self.entries.read().await;

        let mut stats = AuditStatistics {
            total_entries: entries.len(),
            ..AuditStatistics::default()
        };

        for entry in entries.iter() {
            if entry.success {
                stats.successful_entries += 1;
            } else {
                stats.failed_entries += 1;
            }
            *stats.entries_by_resource.entry(entry.resource.clone()).or_insert(0) += 1;
        }

        stats
    }
}

fn log_entry(entry: &AccessLogEntry) {
    let actor = entry.actor.map(|id| id.to_string()).unwrap_or_else(|| "anonymous".to_string());

    if entry.success {
        info!(
            entry_id = %entry.id,
            actor = %actor,
            action = %entry.action,
            resource = %entry.resource,
            resource_id = ?entry.resource_id,
            severity = ?entry.severity,
            client_ip = ?entry.client_ip,
            request_id = ?entry.request_id,
            "Access recorded"
        );
    } else {
        warn!(
            entry_id = %entry.id,
            actor = %actor,
            action = %entry.action,
            resource = %entry.resource,
            resource_id = ?entry.resource_id,
            detail = ?entry.detail,
            client_ip = ?entry.client_ip,
            request_id = ?entry.request_id,
            "Access failure recorded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryJournal;

    async fn create_test_log() -> AuditLog {
        AuditLog::open(Arc::new(MemoryJournal::new())).await.unwrap()
    }

    #[test]
    fn test_record_builder() {
        let record = AccessRecord::new(Some(UserId(1)), "Deleted item", "inventory", true)
            .with_resource_id(17)
            .with_detail("Deleted item: Laptop")
            .with_origin(OriginMeta {
                client_ip: Some("127.0.0.1".to_string()),
                user_agent: None,
            });

        assert_eq!(record.resource_id.as_deref(), Some("17"));
        assert_eq!(record.severity, Severity::Sensitive);
        assert_eq!(record.origin.client_ip.as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn test_category_severity() {
        assert_eq!(ActionCategory::View.severity(), Severity::Routine);
        assert!(ActionCategory::RoleChange.is_sensitive());
        assert!(ActionCategory::Logout.is_sensitive());
    }

    #[tokio::test]
    async fn test_append_assigns_sequential_ids() {
        let log = create_test_log().await;

        let first = log.append(AccessRecord::new(Some(UserId(1)), "Viewed dashboard", "dashboard", true)).await.unwrap();
        let batch = log
            .append_batch(vec![
                AccessRecord::new(Some(UserId(1)), "Created item", "inventory", true),
                AccessRecord::new(Some(UserId(2)), "Created item", "inventory", false),
            ])
            .await
            .unwrap();

        assert_eq!(first.id, AccessLogId(1));
        assert_eq!(batch[0].id, AccessLogId(2));
        assert_eq!(batch[1].id, AccessLogId(3));
        assert_eq!(log.len().await, 3);
    }

    #[tokio::test]
    async fn test_query_newest_first_with_stable_ties() {
        let log = create_test_log().await;

        // one batch shares a timestamp, so ordering falls back to id
        let records = (0..5).map(|i| AccessRecord::new(Some(UserId(1)), format!("action {}", i), "inventory", true)).collect();
        log.append_batch(records).await.unwrap();

        let page = log.query(&AccessLogFilter::default(), 1, 10).await;
        let ids: Vec<u64> = page.items.iter().map(|e| e.id.0).collect();
        assert_eq!(ids, vec![5, 4, 3, 2, 1]);
        assert_eq!(page.total, 5);
        assert!(!page.has_next());
    }

    #[tokio::test]
    async fn test_query_pagination() {
        let log = create_test_log().await;
        for i in 0..7 {
            log.append(AccessRecord::new(Some(UserId(1)), format!("action {}", i), "inventory", true)).await.unwrap();
        }

        let first = log.query(&AccessLogFilter::default(), 1, 3).await;
        let third = log.query(&AccessLogFilter::default(), 3, 3).await;
        let beyond = log.query(&AccessLogFilter::default(), 9, 3).await;

        assert_eq!(first.items.len(), 3);
        assert_eq!(first.total_pages(), 3);
        assert!(first.has_next());
        assert_eq!(third.items.len(), 1);
        assert_eq!(third.items[0].id, AccessLogId(1));
        assert!(beyond.items.is_empty());

        // page 0 is treated as the first page
        let zero = log.query(&AccessLogFilter::default(), 0, 3).await;
        assert_eq!(zero.page, 1);
        assert_eq!(zero.items[0].id, AccessLogId(7));
    }

    #[tokio::test]
    async fn test_query_filters() {
        let log = create_test_log().await;
        log.append(AccessRecord::new(Some(UserId(1)), "Viewed inventory", "inventory", true)).await.unwrap();
        log.append(AccessRecord::new(Some(UserId(2)), "Viewed users", "users", false)).await.unwrap();
        log.append(AccessRecord::new(None, "Failed login", "auth", false)).await.unwrap();

        let by_actor = log.query(&AccessLogFilter::for_actor(UserId(2)), 1, 10).await;
        assert_eq!(by_actor.total, 1);
        assert_eq!(by_actor.items[0].resource, "users");

        let failures = log
            .query(
                &AccessLogFilter {
                    success: Some(false),
                    ..AccessLogFilter::default()
                },
                1,
                10,
            )
            .await;
        assert_eq!(failures.total, 2);

        let inventory = log
            .query(
                &AccessLogFilter {
                    resource: Some("inventory".to_string()),
                    ..AccessLogFilter::default()
                },
                1,
                10,
            )
            .await;
        assert_eq!(inventory.total, 1);
    }

    #[tokio::test]
    async fn test_statistics() {
        let log = create_test_log().await;
        log.append(AccessRecord::new(Some(UserId(1)), "a", "inventory", true)).await.unwrap();
        log.append(AccessRecord::new(Some(UserId(1)), "b", "inventory", false)).await.unwrap();
        log.append(AccessRecord::new(Some(UserId(1)), "c", "logs", true)).await.unwrap();

        let stats = log.statistics().await;
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.successful_entries, 2);
        assert_eq!(stats.failed_entries, 1);
        assert_eq!(stats.entries_by_resource.get("inventory"), Some(&2));
    }
}
