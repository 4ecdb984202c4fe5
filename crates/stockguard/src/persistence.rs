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

//! Durable storage seams
//!
//! The store commits in two steps: audit entries go to an [`AuditJournal`], then the entity
//! tables go to a [`StateBackend`]. Both have an in-memory and a file implementation.

use crate::error::{AuthzError, AuthzResult};
use crate::rbac::audit::AccessLogEntry;
use crate::store::Tables;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Append-only sink for audit entries
#[async_trait]
pub trait AuditJournal: Send + Sync {
    /// Durably append entries; on error none of them may be considered written
    async fn append(&self, entries: &[AccessLogEntry]) -> AuthzResult<()>;

    /// Read back every entry written so far, oldest first
    async fn replay(&self) -> AuthzResult<Vec<AccessLogEntry>>;
}

/// Durable home of the entity tables
#[async_trait]
pub trait StateBackend: Send + Sync {
    async fn load(&self) -> AuthzResult<Option<Tables>>;

    async fn save(&self, tables: &Tables) -> AuthzResult<()>;
}

/// Journal that keeps entries for the lifetime of the process only
#[derive(Debug, Default)]
pub struct MemoryJournal {
    entries: Mutex<Vec<AccessLogEntry>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditJournal for MemoryJournal {
    async fn append(&self, entries: &[AccessLogEntry]) -> AuthzResult<()> {
        self.entries.lock().extend_from_slice(entries);
        Ok(())
    }

    async fn replay(&self) -> AuthzResult<Vec<AccessLogEntry>> {
        Ok(self.entries.lock().clone())
    }
}

/// State backend that never persists anything
#[derive(Debug, Default)]
pub struct MemoryBackend;

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn load(&self) -> AuthzResult<Option<Tables>> {
        Ok(None)
    }

    async fn save(&self, _tables: &Tables) -> AuthzResult<()> {
        Ok(())
    }
}

/// Run blocking file I/O off the async worker threads
async fn blocking<T, F>(path: &Path, op: F) -> AuthzResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> AuthzResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(op).await.map_err(|e| AuthzError::PersistenceFailure {
        message: format!("I/O task for {} did not complete: {}", path.display(), e),
    })?
}

/// Cut a journal back to its last complete line
///
/// A crash mid-append leaves a fragment without a trailing newline. Appending after it
/// would glue the next entry onto the fragment, so the fragment is dropped first.
fn truncate_torn_tail(path: &Path) -> std::io::Result<u64> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }

    let mut contents = Vec::with_capacity(len as usize);
    file.read_to_end(&mut contents)?;
    if contents.last() == Some(&b'\n') {
        return Ok(0);
    }

    let keep = contents.iter().rposition(|b| *b == b'\n').map(|i| i as u64 + 1).unwrap_or(0);
    file.set_len(keep)?;
    file.sync_all()?;
    Ok(len - keep)
}

/// JSON-lines journal file, synced to disk on every append
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl FileJournal {
    pub fn open(path: impl AsRef<Path>) -> AuthzResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path).map_err(|e| AuthzError::PersistenceFailure {
            message: format!("Failed to open audit journal {}: {}", path.display(), e),
        })?;

        let dropped = truncate_torn_tail(&path).map_err(|e| AuthzError::PersistenceFailure {
            message: format!("Failed to repair audit journal {}: {}", path.display(), e),
        })?;
        if dropped > 0 {
            warn!(path = %path.display(), bytes = dropped, "Dropped truncated final journal line");
        }

        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditJournal for FileJournal {
    async fn append(&self, entries: &[AccessLogEntry]) -> AuthzResult<()> {
        let mut buffer = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut buffer, entry)?;
            buffer.push(b'\n');
        }

        let file = self.file.clone();
        let path = self.path.clone();
        blocking(&self.path, move || {
            let mut file = file.lock();
            let start = file.metadata()?.len();

            let write = |file: &mut File| -> std::io::Result<()> {
                file.write_all(&buffer)?;
                file.flush()?;
                file.sync_data()
            };

            write(&mut *file).map_err(|e| {
                // a partial write must not leave a fragment for the next append to extend
                if let Err(rollback) = file.set_len(start) {
                    warn!(path = %path.display(), error = %rollback, "Failed to roll back partial journal write");
                }
                AuthzError::PersistenceFailure {
                    message: format!("Failed to write audit journal {}: {}", path.display(), e),
                }
            })
        })
        .await?;

        debug!(path = %self.path.display(), count = entries.len(), "Audit journal appended");
        Ok(())
    }

    async fn replay(&self) -> AuthzResult<Vec<AccessLogEntry>> {
        let path = self.path.clone();
        blocking(&self.path, move || {
            let file = File::open(&path)?;
            let lines: Vec<String> = BufReader::new(file).lines().collect::<Result<_, _>>()?;
            let last_line = lines.iter().rposition(|line| !line.trim().is_empty());

            let mut entries = Vec::new();
            for (index, line) in lines.iter().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<AccessLogEntry>(line) {
                    Ok(entry) => entries.push(entry),
                    // a torn final line is what a crash mid-append leaves behind
                    Err(e) if Some(index) == last_line => {
                        warn!(path = %path.display(), error = %e, "Ignoring truncated final journal line");
                    }
                    Err(e) => {
                        return Err(AuthzError::PersistenceFailure {
                            message: format!("Corrupt audit journal {} at line {}: {}", path.display(), index + 1, e),
                        });
                    }
                }
            }

            Ok(entries)
        })
        .await
    }
}

/// Whole-state JSON snapshot, replaced atomically through a temporary file
#[derive(Debug)]
pub struct FileSnapshot {
    path: PathBuf,
}

impl FileSnapshot {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateBackend for FileSnapshot {
    async fn load(&self) -> AuthzResult<Option<Tables>> {
        let path = self.path.clone();
        blocking(&self.path, move || {
            if !path.exists() {
                return Ok(None);
            }
            let raw = fs::read(&path)?;
            let tables = serde_json::from_slice(&raw).map_err(|e| AuthzError::PersistenceFailure {
                message: format!("Corrupt state snapshot {}: {}", path.display(), e),
            })?;
            Ok(Some(tables))
        })
        .await
    }

    async fn save(&self, tables: &Tables) -> AuthzResult<()> {
        let raw = serde_json::to_vec(tables)?;
        let path = self.path.clone();
        let temp = self.temp_path();

        blocking(&self.path, move || {
            let write = || -> std::io::Result<()> {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                let mut file = File::create(&temp)?;
                file.write_all(&raw)?;
                file.sync_all()?;
                fs::rename(&temp, &path)
            };

            write().map_err(|e| AuthzError::PersistenceFailure {
                message: format!("Failed to save state snapshot {}: {}", path.display(), e),
            })
        })
        .await
    }
}
