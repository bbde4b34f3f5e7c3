//! Self-healing task supervisor.

use crate::queue::EventQueue;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// How long an idle worker waits before re-checking for shutdown.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// A background unit of work kept alive until explicitly cancelled.
pub trait SupervisedTask: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Runs the work item.
    ///
    /// Implementations should observe `token` in their blocking loops and
    /// return promptly once it reports cancellation. Returning without a
    /// prior cancellation makes the supervisor resubmit the task.
    fn run(&self, token: &CancelToken);
}

/// Cooperative interruption flag shared between a task and its handle.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    signal: Condvar,
}

impl CancelToken {
    fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                lock: Mutex::new(()),
                signal: Condvar::new(),
            }),
        }
    }

    /// Returns true once the task has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Marks the token cancelled and wakes any parked waiter.
    fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock.lock();
        self.inner.signal.notify_all();
    }

    /// Parks for up to `timeout` or until cancelled; returns `is_cancelled`.
    ///
    /// Tasks use this instead of `thread::sleep` so cancellation interrupts
    /// their pauses.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let mut guard = self.inner.lock.lock();
        if !self.is_cancelled() {
            self.inner.signal.wait_for(&mut guard, timeout);
        }
        self.is_cancelled()
    }
}

/// One queued execution of a supervised task.
#[derive(Clone)]
struct Submission {
    id: u64,
    task: Arc<dyn SupervisedTask>,
    token: CancelToken,
}

impl PartialEq for Submission {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Submission {}

impl Hash for Submission {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

struct Shared {
    pending: EventQueue<Submission>,
    /// Cancellations recorded by task id, written before the interrupt is
    /// issued. The resubmission path consults this, which closes the race
    /// where a task finishes naturally at the same instant it is cancelled.
    cancelled: Mutex<HashSet<u64>>,
    tokens: Mutex<HashMap<u64, CancelToken>>,
    shutdown: AtomicBool,
}

/// Runs background work on a worker pool, automatically resubmitting any
/// task that terminates without being cancelled first.
///
/// A connection read-loop dying on a transient I/O blip therefore respawns
/// on its own; permanent shutdown requires an explicit
/// [`TaskHandle::cancel`].
pub struct TaskSupervisor {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl TaskSupervisor {
    /// Creates a supervisor with `worker_count` worker threads.
    pub fn new(worker_count: usize) -> Self {
        let shared = Arc::new(Shared {
            pending: EventQueue::new(),
            cancelled: Mutex::new(HashSet::new()),
            tokens: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("peerbox-worker-{}", index))
                .spawn(move || worker_loop(&shared))
                .expect("worker thread spawn");
            workers.push(handle);
        }

        Self {
            shared,
            workers: Mutex::new(workers),
            next_id: AtomicU64::new(1),
        }
    }

    /// Submits a task; it runs asynchronously on the pool.
    ///
    /// The returned handle is the only way to stop the task permanently.
    pub fn submit(&self, task: Arc<dyn SupervisedTask>) -> TaskHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let token = CancelToken::new();
        self.shared.tokens.lock().insert(id, token.clone());
        self.shared.pending.add(Submission {
            id,
            task: Arc::clone(&task),
            token: token.clone(),
        });
        debug!(task = task.name(), id, "submitted supervised task");

        TaskHandle {
            id,
            token,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of submissions waiting for a worker.
    pub fn pending(&self) -> usize {
        self.shared.pending.len()
    }

    /// Cancels everything and joins the worker threads.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        {
            let tokens = self.shared.tokens.lock();
            let mut cancelled = self.shared.cancelled.lock();
            for (id, token) in tokens.iter() {
                cancelled.insert(*id);
                token.cancel();
            }
        }
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared) {
    while !shared.shutdown.load(Ordering::SeqCst) {
        let Some(submission) = shared.pending.take_timeout(IDLE_POLL) else {
            continue;
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            submission.task.run(&submission.token);
        }));
        if outcome.is_err() {
            warn!(
                task = submission.task.name(),
                id = submission.id,
                "supervised task panicked"
            );
        }

        let was_cancelled = shared.cancelled.lock().remove(&submission.id);
        if was_cancelled || shared.shutdown.load(Ordering::SeqCst) {
            shared.tokens.lock().remove(&submission.id);
        } else {
            debug!(
                task = submission.task.name(),
                id = submission.id,
                "supervised task terminated, resubmitting"
            );
            shared.pending.add(submission);
        }
    }
}

/// Handle for cancelling a supervised task.
pub struct TaskHandle {
    id: u64,
    token: CancelToken,
    shared: Arc<Shared>,
}

impl TaskHandle {
    /// Identity of the underlying task.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns true once `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Marks the task intentionally stopped and interrupts it.
    ///
    /// The cancellation is recorded before the interrupt so the supervisor
    /// never resubmits the task, even if it completes naturally at the
    /// same moment.
    pub fn cancel(&self) {
        self.shared.cancelled.lock().insert(self.id);
        self.token.cancel();

        // If the task was still waiting for a worker it never runs at all;
        // clean its bookkeeping here since no worker will.
        let id = self.id;
        if self.shared.pending.remove_if(|s| s.id == id) > 0 {
            self.shared.cancelled.lock().remove(&id);
        }
        self.shared.tokens.lock().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingTask {
        runs: AtomicUsize,
        hold: Duration,
    }

    impl CountingTask {
        fn new(hold: Duration) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                hold,
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    impl SupervisedTask for CountingTask {
        fn name(&self) -> &str {
            "counting"
        }

        fn run(&self, token: &CancelToken) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            token.wait_timeout(self.hold);
        }
    }

    struct PanickingTask {
        runs: AtomicUsize,
    }

    impl SupervisedTask for PanickingTask {
        fn name(&self) -> &str {
            "panicking"
        }

        fn run(&self, _token: &CancelToken) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            panic!("boom");
        }
    }

    #[test]
    fn returning_task_is_resubmitted() {
        let supervisor = TaskSupervisor::new(2);
        let task = CountingTask::new(Duration::from_millis(5));
        let handle = supervisor.submit(task.clone());

        std::thread::sleep(Duration::from_millis(120));
        assert!(task.runs() >= 2, "expected respawns, got {}", task.runs());

        handle.cancel();
        supervisor.shutdown();
    }

    #[test]
    fn panicking_task_is_resubmitted() {
        let supervisor = TaskSupervisor::new(1);
        let task = Arc::new(PanickingTask {
            runs: AtomicUsize::new(0),
        });
        let handle = supervisor.submit(task.clone());

        std::thread::sleep(Duration::from_millis(120));
        assert!(task.runs.load(Ordering::SeqCst) >= 2);

        handle.cancel();
        supervisor.shutdown();
    }

    #[test]
    fn cancelled_task_is_not_resubmitted() {
        let supervisor = TaskSupervisor::new(2);
        // Long hold: the task parks on its token until cancelled.
        let task = CountingTask::new(Duration::from_secs(60));
        let handle = supervisor.submit(task.clone());

        // Let it start.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(task.runs(), 1);

        handle.cancel();
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(task.runs(), 1, "cancelled task was resubmitted");

        supervisor.shutdown();
    }

    #[test]
    fn cancel_racing_natural_completion_never_resubmits() {
        // The task returns immediately, so cancellation and natural
        // completion land within the same instant.
        for _ in 0..20 {
            let supervisor = TaskSupervisor::new(2);
            let task = CountingTask::new(Duration::ZERO);
            let handle = supervisor.submit(task.clone());
            handle.cancel();

            std::thread::sleep(Duration::from_millis(30));
            let settled = task.runs();
            std::thread::sleep(Duration::from_millis(30));
            assert_eq!(task.runs(), settled, "run count kept growing after cancel");
            assert!(settled <= 1, "task ran {} times after cancel", settled);

            supervisor.shutdown();
        }
    }

    #[test]
    fn cancel_before_first_run_drops_the_submission() {
        let supervisor = TaskSupervisor::new(1);
        // Occupy the single worker so the next submission stays queued.
        let blocker = CountingTask::new(Duration::from_secs(60));
        let blocker_handle = supervisor.submit(blocker.clone());
        std::thread::sleep(Duration::from_millis(30));

        let task = CountingTask::new(Duration::ZERO);
        let handle = supervisor.submit(task.clone());
        assert_eq!(supervisor.pending(), 1);

        handle.cancel();
        assert_eq!(supervisor.pending(), 0);

        blocker_handle.cancel();
        supervisor.shutdown();
        assert_eq!(task.runs(), 0);
    }

    #[test]
    fn shutdown_stops_the_pool() {
        let supervisor = TaskSupervisor::new(2);
        let task = CountingTask::new(Duration::from_millis(5));
        let _handle = supervisor.submit(task.clone());

        std::thread::sleep(Duration::from_millis(50));
        supervisor.shutdown();

        let settled = task.runs();
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(task.runs(), settled);
    }
}
