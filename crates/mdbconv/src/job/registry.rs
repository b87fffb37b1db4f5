//! In-memory job registry.
//!
//! The map lock is held only to insert, look up or remove cells; each job
//! has its own lock. When both are needed the map lock is taken first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::ConvertError;

use super::model::{Job, JobSnapshot};

/// One job plus the coordination state around it.
pub struct JobCell {
    id: String,
    job: RwLock<Job>,
    cancel_requested: AtomicBool,
    /// Serialises table discovery so the reader runs once per job.
    discovery: Mutex<()>,
}

impl JobCell {
    pub fn new(job: Job) -> Self {
        Self {
            id: job.id.clone(),
            job: RwLock::new(job),
            cancel_requested: AtomicBool::new(false),
            discovery: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Job> {
        match self.job.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job {} lock was poisoned, recovering", self.id);
                poisoned.into_inner()
            }
        }
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Job> {
        match self.job.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job {} lock was poisoned, recovering", self.id);
                poisoned.into_inner()
            }
        }
    }

    /// Runs `f` under the write lock. Keep `f` free of I/O.
    pub fn update<T>(&self, f: impl FnOnce(&mut Job) -> T) -> T {
        let mut job = self.write();
        f(&mut job)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.read().snapshot()
    }

    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn discovery_guard(&self) -> MutexGuard<'_, ()> {
        match self.discovery.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<JobCell>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<JobCell>>> {
        match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn map_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<JobCell>>> {
        match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn insert(&self, job: Job) -> Arc<JobCell> {
        let cell = Arc::new(JobCell::new(job));
        self.map_mut()
            .insert(cell.id().to_string(), Arc::clone(&cell));
        cell
    }

    pub fn get(&self, job_id: &str) -> Result<Arc<JobCell>, ConvertError> {
        self.find(job_id)
            .ok_or_else(|| ConvertError::NotFound(format!("job {}", job_id)))
    }

    pub fn find(&self, job_id: &str) -> Option<Arc<JobCell>> {
        self.map().get(job_id).cloned()
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.map().contains_key(job_id)
    }

    pub fn remove(&self, job_id: &str) -> Option<Arc<JobCell>> {
        self.map_mut().remove(job_id)
    }

    /// Removes the job only if `predicate` holds for it, atomically with
    /// respect to other registry removals.
    pub fn remove_if<F>(&self, job_id: &str, predicate: F) -> Option<Arc<JobCell>>
    where
        F: FnOnce(&Job) -> bool,
    {
        let mut map = self.map_mut();
        let keep = match map.get(job_id) {
            Some(cell) => !predicate(&*cell.read()),
            None => return None,
        };
        if keep {
            None
        } else {
            map.remove(job_id)
        }
    }

    pub fn cells(&self) -> Vec<Arc<JobCell>> {
        self.map().values().cloned().collect()
    }

    pub fn snapshot_all(&self) -> Vec<JobSnapshot> {
        self.cells().iter().map(|cell| cell.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}
