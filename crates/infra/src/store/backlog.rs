//! Durable job backlog.
//!
//! A backlog maps [`JobId`]s to the parameters of export jobs that have not
//! yet succeeded. The export process records an entry *before* running the
//! job and removes it only once the job reported success, so a crash at any
//! point in between leaves the entry for the next invocation.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use dwh_core::JobId;

use super::StoreError;
use super::persist::{read_optional, write_atomic};

/// One not-yet-successful export job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogEntry<P> {
    pub job_id: JobId,
    pub parameters: P,
    pub created_at: DateTime<Utc>,
}

/// Backlog abstraction.
pub trait Backlog: Send + Sync {
    /// Job parameters stored with each entry.
    type Params;

    /// Namespace of this backlog (e.g. `events`).
    fn name(&self) -> &str;

    /// Insert or overwrite an entry. Durable when this returns.
    fn put(&self, job_id: JobId, parameters: &Self::Params) -> Result<(), StoreError>;

    /// Delete an entry. Returns `false` if it was not there.
    fn remove(&self, job_id: JobId) -> Result<bool, StoreError>;

    /// All entries as of now, ordered by job id.
    ///
    /// The result is detached from the store: removing entries while walking
    /// it is fine.
    fn snapshot(&self) -> Result<Vec<BacklogEntry<Self::Params>>, StoreError>;

    /// Get an entry by ID.
    fn get(&self, job_id: JobId) -> Result<Option<BacklogEntry<Self::Params>>, StoreError>;

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.snapshot()?.len())
    }

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

/// Check that a backlog name maps to exactly one file name.
pub fn validate_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry<P> {
    parameters: P,
    created_at: DateTime<Utc>,
}

/// Backlog stored as one JSON document per name: `<dir>/<name>.json`.
#[derive(Debug)]
pub struct FileBacklog<P> {
    name: String,
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
    _params: PhantomData<fn() -> P>,
}

impl<P> FileBacklog<P>
where
    P: Serialize + DeserializeOwned + Clone,
{
    /// Open (lazily) the backlog `name` under `dir`.
    ///
    /// Nothing is created on disk until the first `put`.
    pub fn open(dir: impl AsRef<Path>, name: impl Into<String>) -> Result<Self, StoreError> {
        let name = name.into();
        validate_name(&name)?;
        let path = dir.as_ref().join(format!("{name}.json"));
        Ok(Self {
            name,
            path,
            lock: Mutex::new(()),
            _params: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<JobId, StoredEntry<P>>, StoreError> {
        match read_optional(&self.path)? {
            None => Ok(BTreeMap::new()),
            Some(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(BTreeMap::new()),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::corrupt(&self.path, e.to_string())),
        }
    }

    fn save(&self, entries: &BTreeMap<JobId, StoredEntry<P>>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(entries)
            .map_err(|e| StoreError::corrupt(&self.path, e.to_string()))?;
        write_atomic(&self.path, &bytes)
    }
}

impl<P> Backlog for FileBacklog<P>
where
    P: Serialize + DeserializeOwned + Clone,
{
    type Params = P;

    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, job_id: JobId, parameters: &P) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load()?;
        let created_at = entries
            .get(&job_id)
            .map(|e| e.created_at)
            .unwrap_or_else(Utc::now);
        entries.insert(
            job_id,
            StoredEntry {
                parameters: parameters.clone(),
                created_at,
            },
        );
        self.save(&entries)?;
        tracing::debug!(backlog = %self.name, job_id = %job_id, "backlog entry stored");
        Ok(())
    }

    fn remove(&self, job_id: JobId) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load()?;
        if entries.remove(&job_id).is_none() {
            return Ok(false);
        }
        self.save(&entries)?;
        tracing::debug!(backlog = %self.name, job_id = %job_id, "backlog entry removed");
        Ok(true)
    }

    fn snapshot(&self) -> Result<Vec<BacklogEntry<P>>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self
            .load()?
            .into_iter()
            .map(|(job_id, e)| BacklogEntry {
                job_id,
                parameters: e.parameters,
                created_at: e.created_at,
            })
            .collect())
    }

    fn get(&self, job_id: JobId) -> Result<Option<BacklogEntry<P>>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.remove(&job_id).map(|e| BacklogEntry {
            job_id,
            parameters: e.parameters,
            created_at: e.created_at,
        }))
    }
}

/// In-memory backlog for tests/dev.
#[derive(Debug)]
pub struct InMemoryBacklog<P> {
    name: String,
    entries: Mutex<BTreeMap<JobId, BacklogEntry<P>>>,
}

impl<P> InMemoryBacklog<P> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<P> Backlog for InMemoryBacklog<P>
where
    P: Clone + Send,
{
    type Params = P;

    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, job_id: JobId, parameters: &P) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let created_at = entries
            .get(&job_id)
            .map(|e| e.created_at)
            .unwrap_or_else(Utc::now);
        entries.insert(
            job_id,
            BacklogEntry {
                job_id,
                parameters: parameters.clone(),
                created_at,
            },
        );
        Ok(())
    }

    fn remove(&self, job_id: JobId) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.remove(&job_id).is_some())
    }

    fn snapshot(&self) -> Result<Vec<BacklogEntry<P>>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.values().cloned().collect())
    }

    fn get(&self, job_id: JobId) -> Result<Option<BacklogEntry<P>>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(&job_id).cloned())
    }
}
