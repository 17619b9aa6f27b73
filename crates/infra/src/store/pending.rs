//! Pending remote-jobs queue.
//!
//! Holds the ids of uploads the portal accepted but has not finished
//! processing yet. The export jobs append to it and the status watcher drains
//! it; the two only ever meet through the file.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use dwh_core::RemoteJobId;

use super::StoreError;
use super::persist::{read_optional, write_atomic};

/// Durable set of remote job ids.
pub trait PendingJobsQueue: Send + Sync {
    /// Add an id. Adding an id already queued is a no-op.
    fn append(&self, id: &RemoteJobId) -> Result<(), StoreError>;

    /// Remove an id. Returns `false` if it was not queued.
    fn remove(&self, id: &RemoteJobId) -> Result<bool, StoreError>;

    /// Current content, read fresh from storage.
    fn items(&self) -> Result<Vec<RemoteJobId>, StoreError>;

    /// Drop every id.
    fn clear(&self) -> Result<(), StoreError>;

    fn contains(&self, id: &RemoteJobId) -> Result<bool, StoreError> {
        Ok(self.items()?.contains(id))
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.items()?.len())
    }

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

impl<Q> PendingJobsQueue for Arc<Q>
where
    Q: PendingJobsQueue + ?Sized,
{
    fn append(&self, id: &RemoteJobId) -> Result<(), StoreError> {
        (**self).append(id)
    }

    fn remove(&self, id: &RemoteJobId) -> Result<bool, StoreError> {
        (**self).remove(id)
    }

    fn items(&self) -> Result<Vec<RemoteJobId>, StoreError> {
        (**self).items()
    }

    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }
}

/// Queue stored as one id per line.
#[derive(Debug)]
pub struct FilePendingJobsQueue {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FilePendingJobsQueue {
    /// A missing file is an empty queue; it is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<RemoteJobId>, StoreError> {
        let Some(bytes) = read_optional(&self.path)? else {
            return Ok(Vec::new());
        };
        let text = String::from_utf8(bytes)
            .map_err(|e| StoreError::corrupt(&self.path, e.to_string()))?;

        let mut ids: Vec<RemoteJobId> = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let id = RemoteJobId::new(line)
                .map_err(|e| StoreError::corrupt(&self.path, e.to_string()))?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn save(&self, ids: &[RemoteJobId]) -> Result<(), StoreError> {
        let mut text = String::new();
        for id in ids {
            text.push_str(id.as_str());
            text.push('\n');
        }
        write_atomic(&self.path, text.as_bytes())
    }
}

impl PendingJobsQueue for FilePendingJobsQueue {
    fn append(&self, id: &RemoteJobId) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids = self.load()?;
        if ids.contains(id) {
            tracing::debug!(remote_job_id = %id, "remote job already pending");
            return Ok(());
        }
        ids.push(id.clone());
        self.save(&ids)
    }

    fn remove(&self, id: &RemoteJobId) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids = self.load()?;
        let before = ids.len();
        ids.retain(|i| i != id);
        if ids.len() == before {
            return Ok(false);
        }
        self.save(&ids)?;
        Ok(true)
    }

    fn items(&self) -> Result<Vec<RemoteJobId>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.load()
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.save(&[])
    }
}

/// In-memory queue for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryPendingJobsQueue {
    ids: Mutex<Vec<RemoteJobId>>,
}

impl InMemoryPendingJobsQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = RemoteJobId>,
    {
        let queue = Self::new();
        {
            let mut guard = queue.ids.lock().unwrap_or_else(PoisonError::into_inner);
            for id in ids {
                if !guard.contains(&id) {
                    guard.push(id);
                }
            }
        }
        queue
    }
}

impl PendingJobsQueue for InMemoryPendingJobsQueue {
    fn append(&self, id: &RemoteJobId) -> Result<(), StoreError> {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        if !ids.contains(id) {
            ids.push(id.clone());
        }
        Ok(())
    }

    fn remove(&self, id: &RemoteJobId) -> Result<bool, StoreError> {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        let before = ids.len();
        ids.retain(|i| i != id);
        Ok(ids.len() != before)
    }

    fn items(&self) -> Result<Vec<RemoteJobId>, StoreError> {
        Ok(self.ids.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).clear();
        Ok(())
    }
}
