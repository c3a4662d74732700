use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::ports::{JobRepository, RepositoryError};
use crate::scheduler::{FileId, Job, JobId, JobStatus, JobUpdate};

#[derive(Debug, Default)]
struct Tables {
    jobs: HashMap<JobId, Job>,
    // insertion order per file
    by_file: HashMap<FileId, Vec<JobId>>,
    by_status: HashMap<JobStatus, HashSet<JobId>>,
}

impl Tables {
    fn index_status(&mut self, id: JobId, from: Option<JobStatus>, to: JobStatus) {
        if let Some(from) = from {
            if let Some(ids) = self.by_status.get_mut(&from) {
                ids.remove(&id);
            }
        }
        self.by_status.entry(to).or_default().insert(id);
    }

    fn remove(&mut self, id: &JobId) -> Option<Job> {
        let job = self.jobs.remove(id)?;
        if let Some(ids) = self.by_file.get_mut(&job.file_id) {
            ids.retain(|other| other != id);
            if ids.is_empty() {
                self.by_file.remove(&job.file_id);
            }
        }
        if let Some(ids) = self.by_status.get_mut(&job.status) {
            ids.remove(id);
        }
        Some(job)
    }
}

/// Process-local job store with secondary indexes by file and status.
///
/// Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    tables: RwLock<Tables>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tables.read().await.jobs.is_empty()
    }
}

#[async_trait::async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, job: &Job) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.jobs.contains_key(&job.id) {
            return Err(RepositoryError::ConstraintViolation(format!(
                "job {} already exists",
                job.id
            )));
        }
        tables.jobs.insert(job.id, job.clone());
        tables.by_file.entry(job.file_id).or_default().push(job.id);
        tables.index_status(job.id, None, job.status);
        Ok(())
    }

    async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, RepositoryError> {
        Ok(self.tables.read().await.jobs.get(&id).cloned())
    }

    async fn list_by_file(&self, file_id: FileId) -> Result<Vec<Job>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut jobs: Vec<Job> = tables
            .by_file
            .get(&file_id)
            .map(|ids| {
                ids.iter()
                    .rev()
                    .filter_map(|id| tables.jobs.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        // Stable sort keeps reverse insertion order for equal timestamps
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut jobs: Vec<Job> = tables
            .by_status
            .get(&status)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.jobs.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn update(&self, id: JobId, update: JobUpdate) -> Result<Job, RepositoryError> {
        let mut tables = self.tables.write().await;
        let job = tables
            .jobs
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("job {}", id)))?;

        let from = job.status;
        job.apply(update)?;
        let updated = job.clone();

        if from != updated.status {
            tables.index_status(id, Some(from), updated.status);
        }
        Ok(updated)
    }

    async fn delete_terminal_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        let mut tables = self.tables.write().await;
        let expired: Vec<JobId> = [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled]
            .iter()
            .filter_map(|status| tables.by_status.get(status))
            .flatten()
            .filter(|id| {
                tables
                    .jobs
                    .get(*id)
                    .is_some_and(|job| job.is_terminal() && job.created_at <= cutoff)
            })
            .copied()
            .collect();

        for id in &expired {
            tables.remove(id);
        }
        Ok(expired.len())
    }
}
