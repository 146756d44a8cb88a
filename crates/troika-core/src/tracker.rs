//! Named background task tracking.
//!
//! Every long-lived loop (monitors, broadcaster, dispatcher) is spawned
//! through [`TaskTracker::track`], which records lifecycle state, logs
//! completion or failure, and gives shutdown a single place to cancel and
//! await everything.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Lifecycle state of a tracked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Still running.
    Running,
    /// Completed without error.
    Done,
    /// Returned an error or panicked.
    Failed,
}

#[derive(Debug)]
struct TaskRecord {
    state: TaskState,
    started_at: DateTime<Utc>,
    handle: Option<JoinHandle<()>>,
}

/// Registry of named background tasks.
#[derive(Debug, Clone)]
pub struct TaskTracker {
    root: CancellationToken,
    tasks: Arc<Mutex<HashMap<String, TaskRecord>>>,
}

impl TaskTracker {
    /// An empty tracker with a fresh root cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The root token; child tokens derive from it.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Spawn a named task.
    ///
    /// The closure receives a child token that fires on
    /// [`TaskTracker::shutdown`]. Completion and failure are logged with
    /// the task name; a panic is recorded as failure.
    pub fn track<F, Fut, E>(&self, name: &str, f: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: std::future::Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let token = self.root.child_token();
        let task_name = name.to_string();
        let tasks = Arc::clone(&self.tasks);

        info!(task = %task_name, "task started");

        // Insert before spawning so a fast task cannot finish before its
        // record exists.
        if let Ok(mut guard) = self.tasks.lock() {
            guard.insert(
                task_name.clone(),
                TaskRecord {
                    state: TaskState::Running,
                    started_at: Utc::now(),
                    handle: None,
                },
            );
        }

        let fut = f(token);
        let finisher_name = task_name.clone();
        let handle = tokio::spawn(async move {
            let state = match fut.await {
                Ok(()) => {
                    info!(task = %finisher_name, "task finished");
                    TaskState::Done
                },
                Err(e) => {
                    error!(task = %finisher_name, error = %e, "task failed");
                    TaskState::Failed
                },
            };
            if let Ok(mut guard) = tasks.lock() {
                if let Some(record) = guard.get_mut(&finisher_name) {
                    record.state = state;
                }
            }
        });

        if let Ok(mut guard) = self.tasks.lock() {
            if let Some(record) = guard.get_mut(&task_name) {
                record.handle = Some(handle);
            }
        }
    }

    /// Snapshot of task names and states, for diagnostics.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, TaskState, DateTime<Utc>)> {
        self.tasks.lock().map_or_else(
            |_| Vec::new(),
            |guard| {
                let mut entries: Vec<_> = guard
                    .iter()
                    .map(|(name, record)| (name.clone(), record.state, record.started_at))
                    .collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                entries
            },
        )
    }

    /// Number of tasks still running.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.tasks.lock().map_or(0, |guard| {
            guard
                .values()
                .filter(|r| r.state == TaskState::Running)
                .count()
        })
    }

    /// Cancel every task and wait up to `grace` for them to finish.
    ///
    /// Tasks still running after the grace window are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        self.root.cancel();

        let handles: Vec<(String, JoinHandle<()>)> = self.tasks.lock().map_or_else(
            |_| Vec::new(),
            |mut guard| {
                guard
                    .iter_mut()
                    .filter_map(|(name, record)| {
                        record.handle.take().map(|h| (name.clone(), h))
                    })
                    .collect()
            },
        );

        let abort_handles: Vec<_> = handles.iter().map(|(_, h)| h.abort_handle()).collect();
        if tokio::time::timeout(grace, join_all(handles)).await.is_err() {
            warn!("shutdown grace elapsed, aborting remaining tasks");
            for handle in abort_handles {
                handle.abort();
            }
        }
    }
}

async fn join_all(handles: Vec<(String, JoinHandle<()>)>) {
    for (name, handle) in handles {
        if let Err(e) = handle.await {
            if e.is_panic() {
                error!(task = %name, "task panicked");
            }
        }
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}
