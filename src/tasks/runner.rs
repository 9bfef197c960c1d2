//! Background task execution
//!
//! Every submitted operation runs on its own named worker thread. Workers
//! publish [`TaskEvent`]s over a channel owned by the runner; the controlling
//! thread drains them at its own pace. Status and progress are also kept in
//! shared snapshots so a caller can poll a single task without consuming the
//! event stream.
//!
//! At most one undrained [`TaskEvent::Progress`] exists per task. Reports
//! made while one is queued only update it, and the drained event carries
//! the latest values, so a caller that never drains holds a bounded backlog.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::core::util::panic_message;
use crate::error::TaskError;
use crate::tasks::cancel::CancelToken;
use crate::tasks::progress::{Progress, ProgressSink};

pub type TaskId = u64;

/// Latest progress per task whose progress event has not been drained yet
type PendingProgress = Arc<Mutex<HashMap<TaskId, Progress>>>;

/// Lifecycle state of a task; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Cancelled,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Cancelled | TaskStatus::Completed | TaskStatus::Failed
        )
    }

    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Running => 1,
            TaskStatus::Cancelled | TaskStatus::Completed | TaskStatus::Failed => 2,
        }
    }
}

/// Point-in-time view of a task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskProgress {
    pub id: TaskId,
    pub label: String,
    pub status: TaskStatus,
    pub cancel_requested: bool,
    #[serde(flatten)]
    pub progress: Progress,
}

/// Messages posted by workers to the controlling thread
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Started {
        id: TaskId,
        label: String,
    },
    Progress {
        id: TaskId,
        progress: Progress,
    },
    Finished {
        id: TaskId,
        status: TaskStatus,
        error: Option<String>,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskEvent::Started { id, .. }
            | TaskEvent::Progress { id, .. }
            | TaskEvent::Finished { id, .. } => *id,
        }
    }
}

/// Final result of a task
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed(T),
    /// The operation returned after cancellation was requested; the value is
    /// whatever partial result it produced
    Cancelled(T),
    Failed(TaskError),
}

impl<T> TaskOutcome<T> {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Completed(_) => TaskStatus::Completed,
            TaskOutcome::Cancelled(_) => TaskStatus::Cancelled,
            TaskOutcome::Failed(_) => TaskStatus::Failed,
        }
    }

    /// The produced value, partial or not
    pub fn into_result(self) -> Result<T, TaskError> {
        match self {
            TaskOutcome::Completed(value) | TaskOutcome::Cancelled(value) => Ok(value),
            TaskOutcome::Failed(err) => Err(err),
        }
    }
}

struct TaskShared {
    id: TaskId,
    label: String,
    status: Mutex<TaskStatus>,
    progress: Mutex<Progress>,
    cancel: CancelToken,
}

impl TaskShared {
    /// Apply `next` unless it would move the status backwards or out of a
    /// terminal state
    fn advance(&self, next: TaskStatus) -> bool {
        let mut status = self.status.lock();
        if status.is_terminal() || next.rank() < status.rank() {
            return false;
        }
        *status = next;
        true
    }

    fn snapshot(&self) -> TaskProgress {
        TaskProgress {
            id: self.id,
            label: self.label.clone(),
            status: *self.status.lock(),
            cancel_requested: self.cancel.is_cancelled(),
            progress: self.progress.lock().clone(),
        }
    }
}

/// Handed to the operation running on a worker
pub struct TaskContext {
    shared: Arc<TaskShared>,
    events: Sender<TaskEvent>,
    pending: PendingProgress,
}

impl TaskContext {
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.shared.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}

impl ProgressSink for TaskContext {
    fn report(&self, processed: u64, estimated_total: u64, current: &Path) {
        let progress = Progress {
            processed,
            estimated_total,
            current_path: Some(current.to_path_buf()),
        };
        *self.shared.progress.lock() = progress.clone();

        let mut pending = self.pending.lock();
        if let Some(queued) = pending.get_mut(&self.shared.id) {
            *queued = progress;
            return;
        }
        pending.insert(self.shared.id, progress.clone());
        let _ = self.events.send(TaskEvent::Progress {
            id: self.shared.id,
            progress,
        });
    }
}

/// Caller's handle on a submitted task
pub struct TaskHandle<T> {
    shared: Arc<TaskShared>,
    join: JoinHandle<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Request cancellation; returns immediately
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    pub fn progress(&self) -> TaskProgress {
        self.shared.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Block until the worker exits
    pub fn wait(self) -> TaskOutcome<T> {
        match self.join.join() {
            Ok(Ok(value)) => {
                if *self.shared.status.lock() == TaskStatus::Cancelled {
                    TaskOutcome::Cancelled(value)
                } else {
                    TaskOutcome::Completed(value)
                }
            }
            Ok(Err(err)) => TaskOutcome::Failed(err),
            Err(payload) => TaskOutcome::Failed(TaskError::Panicked {
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

/// Runs operations on worker threads and tracks them until they finish
pub struct TaskRunner {
    max_concurrent: Option<usize>,
    next_id: AtomicU64,
    active: Arc<Mutex<HashMap<TaskId, Arc<TaskShared>>>>,
    events_tx: Sender<TaskEvent>,
    events_rx: Mutex<Receiver<TaskEvent>>,
    pending: PendingProgress,
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new(None)
    }
}

impl TaskRunner {
    /// Create a runner; `max_concurrent` caps the number of in-flight tasks
    pub fn new(max_concurrent: Option<usize>) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            max_concurrent,
            next_id: AtomicU64::new(1),
            active: Arc::new(Mutex::new(HashMap::new())),
            events_tx,
            events_rx: Mutex::new(events_rx),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn max_concurrent(&self) -> Option<usize> {
        self.max_concurrent
    }

    /// Start `op` on a new worker thread
    pub fn submit<T, F>(&self, label: impl Into<String>, op: F) -> Result<TaskHandle<T>, TaskError>
    where
        T: Send + 'static,
        F: FnOnce(&TaskContext) -> Result<T, TaskError> + Send + 'static,
    {
        let label = label.into();
        let shared = {
            let mut active = self.active.lock();
            if let Some(limit) = self.max_concurrent {
                if active.len() >= limit {
                    return Err(TaskError::AtCapacity { limit });
                }
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let shared = Arc::new(TaskShared {
                id,
                label: label.clone(),
                status: Mutex::new(TaskStatus::Pending),
                progress: Mutex::new(Progress::default()),
                cancel: CancelToken::new(),
            });
            active.insert(id, Arc::clone(&shared));
            shared
        };

        let context = TaskContext {
            shared: Arc::clone(&shared),
            events: self.events_tx.clone(),
            pending: Arc::clone(&self.pending),
        };
        let active = Arc::clone(&self.active);

        let spawned = thread::Builder::new()
            .name(format!("task-{}", shared.id))
            .spawn(move || run_worker(context, active, op));

        match spawned {
            Ok(join) => {
                tracing::debug!(id = shared.id, label = %label, "task submitted");
                Ok(TaskHandle { shared, join })
            }
            Err(err) => {
                self.active.lock().remove(&shared.id);
                Err(TaskError::Spawn {
                    message: err.to_string(),
                })
            }
        }
    }

    /// Set the task's cancellation flag; returns immediately
    pub fn cancel<T>(&self, handle: &TaskHandle<T>) {
        tracing::debug!(id = handle.id(), "cancellation requested");
        handle.cancel();
    }

    pub fn progress_of<T>(&self, handle: &TaskHandle<T>) -> TaskProgress {
        handle.progress()
    }

    /// Block until the task finishes
    pub fn wait<T>(&self, handle: TaskHandle<T>) -> TaskOutcome<T> {
        handle.wait()
    }

    /// Snapshots of tasks that have not reached a terminal state, by id
    pub fn active(&self) -> Vec<TaskProgress> {
        let mut tasks: Vec<TaskProgress> =
            self.active.lock().values().map(|t| t.snapshot()).collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    /// Every event posted since the last drain
    pub fn drain_events(&self) -> Vec<TaskEvent> {
        let rx = self.events_rx.lock();
        rx.try_iter().map(|event| self.settle(event)).collect()
    }

    /// The next event, waiting at most `timeout`
    pub fn next_event(&self, timeout: Duration) -> Option<TaskEvent> {
        match self.events_rx.lock().recv_timeout(timeout) {
            Ok(event) => Some(self.settle(event)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Swap a drained progress event's values for the latest report
    fn settle(&self, event: TaskEvent) -> TaskEvent {
        match event {
            TaskEvent::Progress { id, progress } => {
                let latest = self.pending.lock().remove(&id);
                TaskEvent::Progress {
                    id,
                    progress: latest.unwrap_or(progress),
                }
            }
            other => other,
        }
    }
}

fn run_worker<T, F>(
    context: TaskContext,
    active: Arc<Mutex<HashMap<TaskId, Arc<TaskShared>>>>,
    op: F,
) -> Result<T, TaskError>
where
    F: FnOnce(&TaskContext) -> Result<T, TaskError>,
{
    let shared = Arc::clone(&context.shared);
    shared.advance(TaskStatus::Running);
    let _ = context.events.send(TaskEvent::Started {
        id: shared.id,
        label: shared.label.clone(),
    });

    let result = match panic::catch_unwind(AssertUnwindSafe(|| op(&context))) {
        Ok(result) => result,
        Err(payload) => Err(TaskError::Panicked {
            message: panic_message(payload.as_ref()),
        }),
    };

    let status = match &result {
        Ok(_) if shared.cancel.is_cancelled() => TaskStatus::Cancelled,
        Ok(_) => TaskStatus::Completed,
        Err(_) => TaskStatus::Failed,
    };
    shared.advance(status);
    active.lock().remove(&shared.id);

    let error = result.as_ref().err().map(|e| e.to_string());
    match &error {
        Some(message) => {
            tracing::warn!(id = shared.id, label = %shared.label, error = %message, "task failed")
        }
        None => tracing::debug!(id = shared.id, label = %shared.label, ?status, "task finished"),
    }
    let _ = context.events.send(TaskEvent::Finished {
        id: shared.id,
        status,
        error,
    });
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Barrier;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_submit_and_wait_completed() {
        let runner = TaskRunner::default();
        let handle = runner.submit("sum", |_ctx| Ok(2 + 2)).unwrap();
        match runner.wait(handle) {
            TaskOutcome::Completed(value) => assert_eq!(value, 4),
            other => panic!("unexpected outcome: {:?}", other.status()),
        }
        assert!(runner.active().is_empty());
    }

    #[test]
    fn test_error_becomes_failed() {
        let runner = TaskRunner::default();
        let handle = runner
            .submit("broken", |_ctx| -> Result<(), TaskError> {
                Err(TaskError::Other("disk on fire".to_string()))
            })
            .unwrap();
        match runner.wait(handle) {
            TaskOutcome::Failed(err) => assert!(err.to_string().contains("disk on fire")),
            other => panic!("unexpected outcome: {:?}", other.status()),
        }
    }

    #[test]
    fn test_panic_becomes_failed() {
        let runner = TaskRunner::default();
        let handle = runner
            .submit("panics", |_ctx| -> Result<(), TaskError> { panic!("worker blew up") })
            .unwrap();
        match runner.wait(handle) {
            TaskOutcome::Failed(TaskError::Panicked { message }) => {
                assert!(message.contains("worker blew up"))
            }
            other => panic!("unexpected outcome: {:?}", other.status()),
        }
    }

    #[test]
    fn test_cancel_yields_cancelled_with_partial_value() {
        let runner = TaskRunner::default();
        let started = Arc::new(Barrier::new(2));
        let worker_started = Arc::clone(&started);
        let handle = runner
            .submit("loop", move |ctx| {
                worker_started.wait();
                let mut rounds = 0u64;
                while !ctx.is_cancelled() {
                    rounds += 1;
                    thread::sleep(Duration::from_millis(1));
                }
                Ok(rounds)
            })
            .unwrap();

        started.wait();
        runner.cancel(&handle);
        assert!(runner.progress_of(&handle).cancel_requested);
        match runner.wait(handle) {
            TaskOutcome::Cancelled(_) => {}
            other => panic!("unexpected outcome: {:?}", other.status()),
        }
    }

    #[test]
    fn test_capacity_limit() {
        let runner = TaskRunner::new(Some(1));
        let release = Arc::new(Barrier::new(2));
        let worker_release = Arc::clone(&release);
        let first = runner
            .submit("blocker", move |_ctx| {
                worker_release.wait();
                Ok(())
            })
            .unwrap();

        let second = runner.submit("second", |_ctx| Ok(()));
        assert!(matches!(second, Err(TaskError::AtCapacity { limit: 1 })));

        release.wait();
        assert_eq!(runner.wait(first).status(), TaskStatus::Completed);
        // The finished task no longer counts
        let third = runner.submit("third", |_ctx| Ok(())).unwrap();
        assert_eq!(runner.wait(third).status(), TaskStatus::Completed);
    }

    #[test]
    fn test_events_flow_in_order() {
        let runner = TaskRunner::default();
        let handle = runner
            .submit("reporting", |ctx| {
                ctx.report(1, 2, Path::new("a.txt"));
                ctx.report(2, 2, Path::new("b.txt"));
                Ok(())
            })
            .unwrap();
        let id = handle.id();
        runner.wait(handle);

        let events = runner.drain_events();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.task_id() == id));
        assert!(matches!(events[0], TaskEvent::Started { .. }));
        // Both reports landed before the drain and were merged into one
        assert_eq!(
            events[1],
            TaskEvent::Progress {
                id,
                progress: Progress {
                    processed: 2,
                    estimated_total: 2,
                    current_path: Some(PathBuf::from("b.txt")),
                },
            }
        );
        assert_eq!(
            events[2],
            TaskEvent::Finished {
                id,
                status: TaskStatus::Completed,
                error: None
            }
        );
        assert!(runner.drain_events().is_empty());
    }

    #[test]
    fn test_progress_after_drain_posts_new_event() {
        let runner = TaskRunner::default();
        let reported = Arc::new(Barrier::new(2));
        let resume = Arc::new(Barrier::new(2));
        let (worker_reported, worker_resume) = (Arc::clone(&reported), Arc::clone(&resume));
        let handle = runner
            .submit("two phases", move |ctx| {
                for i in 1..=100 {
                    ctx.report(i, 200, Path::new("first"));
                }
                worker_reported.wait();
                worker_resume.wait();
                ctx.report(200, 200, Path::new("second"));
                Ok(())
            })
            .unwrap();

        reported.wait();
        let first: Vec<TaskEvent> = runner.drain_events();
        let progress: Vec<&TaskEvent> = first
            .iter()
            .filter(|e| matches!(e, TaskEvent::Progress { .. }))
            .collect();
        assert_eq!(progress.len(), 1);
        match progress[0] {
            TaskEvent::Progress { progress, .. } => assert_eq!(progress.processed, 100),
            _ => unreachable!(),
        }

        resume.wait();
        runner.wait(handle);
        let second = runner.drain_events();
        assert!(second.iter().any(|e| matches!(
            e,
            TaskEvent::Progress { progress, .. } if progress.processed == 200
        )));
    }

    #[test]
    fn test_concurrent_tasks_are_isolated() {
        let runner = TaskRunner::default();
        let started = Arc::new(Barrier::new(3));
        let release = Arc::new(Barrier::new(2));

        let looping = {
            let started = Arc::clone(&started);
            runner
                .submit("looping", move |ctx| {
                    started.wait();
                    while !ctx.is_cancelled() {
                        thread::sleep(Duration::from_millis(1));
                    }
                    Ok(0u32)
                })
                .unwrap()
        };
        let steady = {
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            runner
                .submit("steady", move |ctx| {
                    started.wait();
                    release.wait();
                    assert!(!ctx.is_cancelled());
                    Ok(7u32)
                })
                .unwrap()
        };
        started.wait();

        let panicking = runner
            .submit("panicking", |_ctx| -> Result<u32, TaskError> { panic!("boom") })
            .unwrap();
        assert_eq!(runner.wait(panicking).status(), TaskStatus::Failed);

        runner.cancel(&looping);
        assert!(!runner.progress_of(&steady).cancel_requested);
        assert_eq!(runner.wait(looping).status(), TaskStatus::Cancelled);

        assert_eq!(runner.progress_of(&steady).status, TaskStatus::Running);
        release.wait();
        match runner.wait(steady) {
            TaskOutcome::Completed(value) => assert_eq!(value, 7),
            other => panic!("unexpected outcome: {:?}", other.status()),
        }
        assert!(runner.active().is_empty());
    }

    #[test]
    fn test_next_event_times_out_when_idle() {
        let runner = TaskRunner::default();
        assert_eq!(runner.next_event(Duration::from_millis(10)), None);

        let handle = runner.submit("quick", |_ctx| Ok(())).unwrap();
        let event = runner.next_event(TIMEOUT).unwrap();
        assert!(matches!(event, TaskEvent::Started { .. }));
        runner.wait(handle);
    }

    #[test]
    fn test_progress_snapshot_and_active_list() {
        let runner = TaskRunner::default();
        let reported = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let (worker_reported, worker_release) = (Arc::clone(&reported), Arc::clone(&release));
        let handle = runner
            .submit("scan", move |ctx| {
                ctx.report(5, 10, Path::new("src/lib.rs"));
                worker_reported.wait();
                worker_release.wait();
                Ok(())
            })
            .unwrap();

        reported.wait();
        let snapshot = runner.progress_of(&handle);
        assert_eq!(snapshot.status, TaskStatus::Running);
        assert_eq!(snapshot.progress.processed, 5);
        assert_eq!(snapshot.progress.estimated_total, 10);
        assert_eq!(snapshot.label, "scan");

        let active = runner.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, handle.id());

        release.wait();
        runner.wait(handle);
        assert!(runner.active().is_empty());
    }

    #[test]
    fn test_status_never_moves_backwards() {
        let shared = TaskShared {
            id: 1,
            label: "t".to_string(),
            status: Mutex::new(TaskStatus::Pending),
            progress: Mutex::new(Progress::default()),
            cancel: CancelToken::new(),
        };
        assert!(shared.advance(TaskStatus::Running));
        assert!(!shared.advance(TaskStatus::Pending));
        assert!(shared.advance(TaskStatus::Completed));
        assert!(!shared.advance(TaskStatus::Failed));
        assert_eq!(*shared.status.lock(), TaskStatus::Completed);
    }
}
