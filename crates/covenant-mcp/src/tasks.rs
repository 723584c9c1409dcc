//! Background task manager (C12): tracks long-running operations by a short
//! random id, running concurrently as tokio tasks, with state persisted
//! through [`covenant_core::Storage`] so `get_task` survives a restart.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use covenant_core::{BackgroundTask, Storage, TaskState};
use tokio::task::JoinHandle;

/// Six-character base36 id, short enough to pass back to a client.
fn new_task_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

pub struct TaskManager {
    storage: Arc<Storage>,
}

impl TaskManager {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// `create_task`: persist a `pending` row, spawn the work, and return the
    /// id immediately. `work` receives nothing and must return a JSON result.
    pub fn create_task<F, Fut>(&self, name: &str, project: Option<&str>, work: F) -> String
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<serde_json::Value, String>> + Send + 'static,
    {
        let task_id = new_task_id();
        let now = Utc::now();
        let task = BackgroundTask {
            task_id: task_id.clone(),
            name: name.to_string(),
            project: project.map(str::to_string),
            state: TaskState::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
        };
        if let Err(e) = self.storage.insert_task(&task) {
            tracing::warn!(error = %e, "failed to persist background task");
        }

        let storage = Arc::clone(&self.storage);
        let id = task_id.clone();
        tokio::spawn(async move {
            let started = Utc::now();
            let _ = storage.update_task_state(&id, TaskState::Running, Some(started), None, None, None);
            match work().await {
                Ok(result) => {
                    let _ = storage.update_task_state(
                        &id,
                        TaskState::Completed,
                        None,
                        Some(Utc::now()),
                        None,
                        Some(&result),
                    );
                }
                Err(error) => {
                    let _ = storage.update_task_state(
                        &id,
                        TaskState::Failed,
                        None,
                        Some(Utc::now()),
                        Some(&error),
                        None,
                    );
                }
            }
        });

        task_id
    }

    pub fn get_task(&self, task_id: &str) -> covenant_core::Result<Option<BackgroundTask>> {
        self.storage.get_task(task_id)
    }

    /// `wait_for`: poll until the task leaves `pending`/`running` or
    /// `timeout` elapses. The polled task itself is never cancelled by a
    /// timeout here — the caller just stops waiting on it.
    pub async fn wait_for(&self, task_id: &str, timeout: Duration) -> covenant_core::Result<Option<BackgroundTask>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let task = self.storage.get_task(task_id)?;
            match &task {
                Some(t) if matches!(t.state, TaskState::Pending | TaskState::Running) => {}
                other => return Ok(other.clone()),
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(task);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// `cancel`: best-effort — marks the task cancelled in storage. The
    /// underlying `JoinHandle` is not tracked once spawned (cooperative
    /// dream-scheduler cancellation uses a shared flag instead, see
    /// [`crate::dream`]), so cancellation here only prevents new readers
    /// from waiting on a task that will never reach a terminal state.
    pub fn cancel(&self, task_id: &str) -> covenant_core::Result<()> {
        self.storage
            .update_task_state(task_id, TaskState::Cancelled, None, Some(Utc::now()), None, None)
    }
}

#[allow(dead_code)]
fn assert_join_handle_send<T: Send>(_: JoinHandle<T>) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn task_transitions_to_completed() {
        let storage = Arc::new(Storage::open_in_memory("tasks-test").unwrap());
        let manager = TaskManager::new(storage);
        let id = manager.create_task("noop", None, || async { Ok(serde_json::json!({"ok": true})) });
        let task = manager.wait_for(&id, Duration::from_secs(2)).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Completed);
    }

    #[tokio::test]
    async fn failing_task_records_error() {
        let storage = Arc::new(Storage::open_in_memory("tasks-test2").unwrap());
        let manager = TaskManager::new(storage);
        let id = manager.create_task("boom", None, || async { Err("kaboom".to_string()) });
        let task = manager.wait_for(&id, Duration::from_secs(2)).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.error.as_deref(), Some("kaboom"));
    }
}
