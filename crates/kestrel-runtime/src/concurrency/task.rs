//! Task spawning and tracking
//!
//! Each task runs to completion on the blocking pool of the shared tokio
//! runtime. Tasks block on channel operations, so they never run on the async
//! worker threads.

use super::runtime;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;

/// Process-wide task id counter
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifier of a spawned task, for logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        TaskId(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Set of tasks spawned from one runtime instance
#[derive(Default)]
pub struct TaskSet {
    handles: Mutex<Vec<(TaskId, JoinHandle<()>)>>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` on its own execution unit
    pub fn spawn<F>(&self, job: F) -> TaskId
    where
        F: FnOnce(TaskId) + Send + 'static,
    {
        let id = TaskId::next();
        let handle = runtime().spawn_blocking(move || job(id));
        self.handles.lock().push((id, handle));
        id
    }

    /// Tasks spawned and not yet joined
    pub fn pending(&self) -> usize {
        self.handles.lock().iter().filter(|(_, h)| !h.is_finished()).count()
    }

    /// Block until every task, including tasks spawned while waiting, finishes
    ///
    /// Must not be called from inside an async context.
    pub fn join_all(&self) {
        loop {
            let batch = std::mem::take(&mut *self.handles.lock());
            if batch.is_empty() {
                return;
            }
            for (id, handle) in batch {
                if let Err(err) = runtime().block_on(handle) {
                    tracing::warn!(task = %id, error = %err, "task did not complete");
                }
            }
        }
    }
}

impl fmt::Debug for TaskSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSet")
            .field("tracked", &self.handles.lock().len())
            .finish()
    }
}
