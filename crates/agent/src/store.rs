//! Storage abstractions: task/job entities and per-job metadata.
//!
//! The relational and key-value stores are external collaborators; the
//! core consumes them through traits and ships in-memory
//! implementations. A real backend implements the same traits out of
//! tree.

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;

use cpnet_common::{JobStatus, RewardState, TaskStatus};

use crate::entity::{JobEntity, JobMetadata, TaskEntity};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store error: {0}")]
    Backend(String),
}

// ════════════════════════════════════════════════════════════════════════════
// TASK STORE
// ════════════════════════════════════════════════════════════════════════════

pub trait TaskStore: Send + Sync {
    /// Insert or replace by id.
    fn save(&self, task: TaskEntity) -> Result<(), StoreError>;

    fn get(&self, id: i64) -> Result<Option<TaskEntity>, StoreError>;

    /// Tasks filtered by status set (empty = all), newest first,
    /// optionally limited.
    fn list(
        &self,
        statuses: &[TaskStatus],
        limit: Option<usize>,
    ) -> Result<Vec<TaskEntity>, StoreError>;

    /// Submitted tasks whose reward state is still unclaimed.
    fn list_unrewarded(&self) -> Result<Vec<TaskEntity>, StoreError>;
}

#[derive(Default)]
pub struct MemTaskStore {
    tasks: RwLock<HashMap<i64, TaskEntity>>,
}

impl MemTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemTaskStore {
    fn save(&self, task: TaskEntity) -> Result<(), StoreError> {
        self.tasks.write().insert(task.id, task);
        Ok(())
    }

    fn get(&self, id: i64) -> Result<Option<TaskEntity>, StoreError> {
        Ok(self.tasks.read().get(&id).cloned())
    }

    fn list(
        &self,
        statuses: &[TaskStatus],
        limit: Option<usize>,
    ) -> Result<Vec<TaskEntity>, StoreError> {
        let mut tasks: Vec<TaskEntity> = self
            .tasks
            .read()
            .values()
            .filter(|t| statuses.is_empty() || statuses.contains(&t.status))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.create_time.cmp(&a.create_time).then(b.id.cmp(&a.id)));
        if let Some(n) = limit {
            tasks.truncate(n);
        }
        Ok(tasks)
    }

    fn list_unrewarded(&self) -> Result<Vec<TaskEntity>, StoreError> {
        let mut tasks: Vec<TaskEntity> = self
            .tasks
            .read()
            .values()
            .filter(|t| t.status == TaskStatus::Submitted && t.reward_state == RewardState::Unclaimed)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// JOB STORE
// ════════════════════════════════════════════════════════════════════════════

pub trait JobStore: Send + Sync {
    /// Insert or replace by job uuid.
    fn save(&self, job: JobEntity) -> Result<(), StoreError>;

    fn get(&self, job_uuid: &str) -> Result<Option<JobEntity>, StoreError>;

    /// Non-deleted jobs, newest first.
    fn list(&self) -> Result<Vec<JobEntity>, StoreError>;

    /// Soft delete: set the flag and a terminal status, keep the row.
    fn soft_delete(&self, job_uuid: &str, status: JobStatus) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemJobStore {
    jobs: RwLock<HashMap<String, JobEntity>>,
}

impl MemJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemJobStore {
    fn save(&self, job: JobEntity) -> Result<(), StoreError> {
        self.jobs.write().insert(job.job_uuid.clone(), job);
        Ok(())
    }

    fn get(&self, job_uuid: &str) -> Result<Option<JobEntity>, StoreError> {
        Ok(self.jobs.read().get(job_uuid).cloned())
    }

    fn list(&self) -> Result<Vec<JobEntity>, StoreError> {
        let mut jobs: Vec<JobEntity> = self
            .jobs
            .read()
            .values()
            .filter(|j| !j.deleted)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.create_time.cmp(&a.create_time));
        Ok(jobs)
    }

    fn soft_delete(&self, job_uuid: &str, status: JobStatus) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(job_uuid) {
            job.deleted = true;
            job.status = status;
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// METADATA STORE
// ════════════════════════════════════════════════════════════════════════════

/// Namespaced key-value store holding one [`JobMetadata`] per placed
/// job. The reaper's "read all, then batch-delete" pattern depends on
/// prefix enumeration and exact-key batch deletion.
pub trait MetaStore: Send + Sync {
    fn put(&self, key: &str, metadata: JobMetadata) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<Option<JobMetadata>, StoreError>;

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Delete exactly the given keys; unknown keys are ignored.
    fn delete_many(&self, keys: &[String]) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemMetaStore {
    entries: RwLock<HashMap<String, JobMetadata>>,
}

impl MemMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetaStore for MemMetaStore {
    fn put(&self, key: &str, metadata: JobMetadata) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), metadata);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<JobMetadata>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .entries
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn delete_many(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpnet_common::ResourceClass;

    fn task(id: i64, status: TaskStatus, create_time: i64) -> TaskEntity {
        let mut t = TaskEntity::new(
            id,
            format!("task-{id}"),
            "fil-c2-512M".into(),
            "0xabc".into(),
            ResourceClass::CpuOnly,
            "https://params".into(),
            create_time,
        );
        t.status = status;
        t
    }

    #[test]
    fn task_list_orders_newest_first_with_limit() {
        let store = MemTaskStore::new();
        store.save(task(1, TaskStatus::Submitted, 100)).unwrap();
        store.save(task(2, TaskStatus::Failed, 300)).unwrap();
        store.save(task(3, TaskStatus::Running, 200)).unwrap();

        let all = store.list(&[], None).unwrap();
        assert_eq!(all.iter().map(|t| t.id).collect::<Vec<_>>(), vec![2, 3, 1]);

        let limited = store.list(&[], Some(2)).unwrap();
        assert_eq!(limited.len(), 2);

        let failed = store.list(&[TaskStatus::Failed], None).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, 2);
    }

    #[test]
    fn unrewarded_selects_submitted_unclaimed_only() {
        let store = MemTaskStore::new();
        store.save(task(1, TaskStatus::Submitted, 1)).unwrap();
        store.save(task(2, TaskStatus::Failed, 2)).unwrap();
        let mut rewarded = task(3, TaskStatus::Submitted, 3);
        rewarded.reward_state = RewardState::Rewarded;
        store.save(rewarded).unwrap();

        let unrewarded = store.list_unrewarded().unwrap();
        assert_eq!(unrewarded.len(), 1);
        assert_eq!(unrewarded[0].id, 1);
    }

    #[test]
    fn job_soft_delete_keeps_the_row() {
        let store = MemJobStore::new();
        store
            .save(JobEntity::new("Job-1", "0xowner".into(), "img".into(), 10, 1))
            .unwrap();
        store.soft_delete("job-1", JobStatus::Terminated).unwrap();

        assert!(store.list().unwrap().is_empty());
        let job = store.get("job-1").unwrap().expect("row kept");
        assert!(job.deleted);
        assert_eq!(job.status, JobStatus::Terminated);
    }

    #[test]
    fn meta_prefix_enumeration_and_batch_delete() {
        let store = MemMetaStore::new();
        let md = JobMetadata {
            wallet_address: "0xw".into(),
            task_uuid: "t".into(),
            space_uuid: "s".into(),
            expire_time: 0,
        };
        store.put("cp:space:a", md.clone()).unwrap();
        store.put("cp:space:b", md.clone()).unwrap();
        store.put("other:c", md).unwrap();

        let keys = store.keys_with_prefix("cp:space:").unwrap();
        assert_eq!(keys, vec!["cp:space:a".to_string(), "cp:space:b".to_string()]);

        store.delete_many(&keys).unwrap();
        assert!(store.keys_with_prefix("cp:space:").unwrap().is_empty());
        assert!(store.get("other:c").unwrap().is_some());
        // Deleting already-removed keys is a no-op.
        store.delete_many(&keys).unwrap();
    }
}
