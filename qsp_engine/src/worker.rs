//! Single-owner worker thread with a serial task queue.
//!
//! A `Worker<R>` spawns one named thread that constructs the owned resource
//! `R` in place, then runs submitted closures against it one at a time, in
//! submission order, each under the worker's re-entrant lock. The engine
//! thread and the audio worker are two configurations of this type.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

use crate::lock::ReentrantLock;
use crate::rendezvous::rendezvous;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("worker {0} is not ready")]
    NotReady(String),
    #[error("worker {0} has stopped")]
    Stopped(String),
    #[error("worker {0} cannot wait on itself")]
    SameThread(String),
    #[error("worker {0} dropped the task before completing it")]
    Disconnected(String),
    #[error("failed to spawn worker {name}: {reason}")]
    Spawn { name: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Starting,
    Ready,
    RunningTask,
    Stopping,
    Stopped,
}

impl WorkerState {
    fn accepts_tasks(self) -> bool {
        matches!(self, WorkerState::Ready | WorkerState::RunningTask)
    }
}

/// Resource owned exclusively by a worker thread.
pub trait Owned: 'static {
    /// Called on the worker thread when a task panics; the panic does not
    /// propagate further.
    fn on_fault(&mut self, _message: &str) {}

    /// One-time release of the resource before the thread exits.
    fn teardown(&mut self) {}
}

type Task<R> = Box<dyn FnOnce(&mut R) + Send + 'static>;

enum Message<R> {
    Run(Task<R>),
    Stop,
}

#[derive(Debug)]
struct Shared {
    name: String,
    state: Mutex<WorkerState>,
    changed: Condvar,
    stop_requested: AtomicBool,
    lock: Arc<ReentrantLock>,
    thread: OnceLock<ThreadId>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: WorkerState) {
        *self.state() = next;
        self.changed.notify_all();
    }
}

/// Cloneable submission side of a worker's queue.
pub struct TaskQueue<R> {
    sender: Sender<Message<R>>,
    shared: Arc<Shared>,
}

impl<R> Clone for TaskQueue<R> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<R: Owned> TaskQueue<R> {
    /// Enqueues `task`; it runs after every task enqueued before it from the
    /// same thread.
    pub fn submit<F>(&self, task: F) -> Result<(), WorkerError>
    where
        F: FnOnce(&mut R) + Send + 'static,
    {
        let state = *self.shared.state();
        if !state.accepts_tasks() || self.shared.stop_requested.load(Ordering::SeqCst) {
            log::warn!(
                "[qsp_engine::worker] {} is {:?}; dropping submitted task",
                self.shared.name,
                state
            );
            return Err(WorkerError::NotReady(self.shared.name.clone()));
        }
        self.sender
            .send(Message::Run(Box::new(task)))
            .map_err(|_| WorkerError::Stopped(self.shared.name.clone()))
    }

    /// Runs `task` on the worker and blocks the caller until it finished.
    pub fn call<T, F>(&self, task: F) -> Result<T, WorkerError>
    where
        T: Send + 'static,
        F: FnOnce(&mut R) -> T + Send + 'static,
    {
        if self.is_worker_thread() {
            return Err(WorkerError::SameThread(self.shared.name.clone()));
        }
        let (reply, pending) = rendezvous();
        self.submit(move |resource| reply.send(task(resource)))?;
        pending
            .wait()
            .ok_or_else(|| WorkerError::Disconnected(self.shared.name.clone()))
    }

    pub fn is_worker_thread(&self) -> bool {
        self.shared.thread.get() == Some(&thread::current().id())
    }
}

pub struct Worker<R> {
    shared: Arc<Shared>,
    queue: Option<TaskQueue<R>>,
    join: Option<JoinHandle<()>>,
}

impl<R: Owned> Worker<R> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_lock(name, Arc::new(ReentrantLock::new()))
    }

    /// Creates a worker whose tasks run under `lock`, so code holding a
    /// clone of it can re-enter on the worker thread.
    pub fn with_lock(name: impl Into<String>, lock: Arc<ReentrantLock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(WorkerState::Created),
                changed: Condvar::new(),
                stop_requested: AtomicBool::new(false),
                lock,
                thread: OnceLock::new(),
            }),
            queue: None,
            join: None,
        }
    }

    /// Spawns the thread. `init` builds the resource on the worker thread,
    /// so `R` itself never crosses threads.
    pub fn start<F>(&mut self, init: F) -> Result<(), WorkerError>
    where
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
    {
        if *self.shared.state() != WorkerState::Created {
            log::warn!(
                "[qsp_engine::worker] {} already started; ignoring start",
                self.shared.name
            );
            return Ok(());
        }
        self.shared.set_state(WorkerState::Starting);

        let (sender, receiver) = crossbeam_channel::unbounded();
        let shared = self.shared.clone();
        let join = thread::Builder::new()
            .name(self.shared.name.clone())
            .spawn(move || worker_loop(shared, init, receiver))
            .map_err(|err| {
                self.shared.set_state(WorkerState::Stopped);
                WorkerError::Spawn {
                    name: self.shared.name.clone(),
                    reason: err.to_string(),
                }
            })?;

        self.queue = Some(TaskQueue {
            sender,
            shared: self.shared.clone(),
        });
        self.join = Some(join);
        Ok(())
    }

    /// Blocks until the worker finished initialising (or failed to).
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state();
        loop {
            match *state {
                WorkerState::Ready | WorkerState::RunningTask => return true,
                WorkerState::Stopping | WorkerState::Stopped | WorkerState::Created => {
                    return false
                }
                WorkerState::Starting => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .shared
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn submit<F>(&self, task: F) -> Result<(), WorkerError>
    where
        F: FnOnce(&mut R) + Send + 'static,
    {
        match self.queue.as_ref() {
            Some(queue) => queue.submit(task),
            None => {
                log::warn!(
                    "[qsp_engine::worker] {} has not been started; dropping submitted task",
                    self.shared.name
                );
                Err(WorkerError::NotReady(self.shared.name.clone()))
            }
        }
    }

    pub fn call<T, F>(&self, task: F) -> Result<T, WorkerError>
    where
        T: Send + 'static,
        F: FnOnce(&mut R) -> T + Send + 'static,
    {
        match self.queue.as_ref() {
            Some(queue) => queue.call(task),
            None => Err(WorkerError::NotReady(self.shared.name.clone())),
        }
    }

    pub fn queue(&self) -> Option<TaskQueue<R>> {
        self.queue.clone()
    }

    /// Asks the loop to exit once the in-flight task (if any) completes,
    /// discarding queued tasks, then joins the thread. Idempotent.
    pub fn stop(&mut self) {
        let Some(queue) = self.queue.take() else {
            return;
        };
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        let _ = queue.sender.send(Message::Stop);
        drop(queue);

        let Some(join) = self.join.take() else {
            return;
        };
        if join.thread().id() == thread::current().id() {
            log::warn!(
                "[qsp_engine::worker] {} asked to stop from its own thread; not joining",
                self.shared.name
            );
            return;
        }
        if join.join().is_err() {
            log::error!(
                "[qsp_engine::worker] {} thread terminated abnormally",
                self.shared.name
            );
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.shared.state()
    }

    /// True while a task holds the worker lock.
    pub fn is_busy(&self) -> bool {
        self.shared.lock.is_locked()
    }

    pub fn is_worker_thread(&self) -> bool {
        self.shared.thread.get() == Some(&thread::current().id())
    }

    pub fn lock(&self) -> &Arc<ReentrantLock> {
        &self.shared.lock
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

impl<R> Drop for Worker<R> {
    fn drop(&mut self) {
        if let Some(queue) = self.queue.take() {
            self.shared.stop_requested.store(true, Ordering::SeqCst);
            let _ = queue.sender.send(Message::Stop);
        }
        if let Some(join) = self.join.take() {
            if join.thread().id() != thread::current().id() {
                let _ = join.join();
            }
        }
    }
}

fn worker_loop<R, F>(shared: Arc<Shared>, init: F, receiver: Receiver<Message<R>>)
where
    R: Owned,
    F: FnOnce() -> anyhow::Result<R>,
{
    let _ = shared.thread.set(thread::current().id());

    let mut resource = match init() {
        Ok(resource) => resource,
        Err(err) => {
            log::error!(
                "[qsp_engine::worker] {} failed to initialise: {err:#}",
                shared.name
            );
            shared.set_state(WorkerState::Stopped);
            return;
        }
    };
    shared.set_state(WorkerState::Ready);
    log::info!("[qsp_engine::worker] {} ready", shared.name);

    for message in receiver.iter() {
        if shared.stop_requested.load(Ordering::SeqCst) {
            break;
        }
        let task = match message {
            Message::Run(task) => task,
            Message::Stop => break,
        };

        let guard = shared.lock.lock();
        shared.set_state(WorkerState::RunningTask);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(&mut resource)));
        if let Err(payload) = outcome {
            let message = panic_message(payload.as_ref());
            log::error!(
                "[qsp_engine::worker] task on {} failed: {message}",
                shared.name
            );
            let fault = panic::catch_unwind(AssertUnwindSafe(|| resource.on_fault(&message)));
            if fault.is_err() {
                log::error!(
                    "[qsp_engine::worker] fault handler on {} failed as well",
                    shared.name
                );
            }
        }
        shared.set_state(WorkerState::Ready);
        drop(guard);
    }

    shared.set_state(WorkerState::Stopping);
    {
        let _guard = shared.lock.lock();
        resource.teardown();
    }
    drop(resource);
    shared.set_state(WorkerState::Stopped);
    log::info!("[qsp_engine::worker] {} stopped", shared.name);
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter {
        seen: Vec<u32>,
        faults: Vec<String>,
        torn_down: Option<Arc<AtomicBool>>,
    }

    impl Owned for Counter {
        fn on_fault(&mut self, message: &str) {
            self.faults.push(message.to_string());
        }

        fn teardown(&mut self) {
            if let Some(flag) = self.torn_down.as_ref() {
                flag.store(true, Ordering::SeqCst);
            }
        }
    }

    fn started(torn_down: Option<Arc<AtomicBool>>) -> Worker<Counter> {
        let mut worker = Worker::new("test_worker");
        worker
            .start(move || {
                Ok(Counter {
                    torn_down,
                    ..Counter::default()
                })
            })
            .expect("spawn worker");
        assert!(worker.wait_until_ready(Duration::from_secs(5)));
        worker
    }

    #[test]
    fn submit_before_start_is_rejected() {
        let worker: Worker<Counter> = Worker::new("idle");
        assert_eq!(worker.state(), WorkerState::Created);
        let result = worker.submit(|counter| counter.seen.push(1));
        assert!(matches!(result, Err(WorkerError::NotReady(_))));
    }

    #[test]
    fn tasks_run_in_submission_order() {
        let worker = started(None);
        for value in 0..50 {
            worker.submit(move |counter| counter.seen.push(value)).expect("submit");
        }
        let seen = worker.call(|counter| counter.seen.clone()).expect("call");
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn panicking_task_is_absorbed() {
        let worker = started(None);
        worker
            .submit(|_| panic!("boom"))
            .expect("submit panicking task");
        let faults = worker.call(|counter| counter.faults.clone()).expect("call");
        assert_eq!(faults, vec!["boom".to_string()]);
        assert!(worker.state().accepts_tasks());
    }

    #[test]
    fn busy_flag_reflects_running_task() {
        let worker = started(None);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        let (entered_tx, entered_rx) = crossbeam_channel::bounded::<()>(0);
        worker
            .submit(move |_| {
                entered_tx.send(()).expect("entered");
                release_rx.recv().expect("release");
            })
            .expect("submit");
        entered_rx.recv().expect("task entered");
        assert!(worker.is_busy());
        release_tx.send(()).expect("release task");
        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.is_busy() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!worker.is_busy());
    }

    #[test]
    fn stop_finishes_current_task_and_is_idempotent() {
        let torn_down = Arc::new(AtomicBool::new(false));
        let mut worker = started(Some(torn_down.clone()));
        let finished = Arc::new(AtomicUsize::new(0));
        let (entered_tx, entered_rx) = crossbeam_channel::bounded::<()>(0);
        {
            let finished = finished.clone();
            worker
                .submit(move |_| {
                    entered_tx.send(()).expect("entered");
                    thread::sleep(Duration::from_millis(50));
                    finished.fetch_add(1, Ordering::SeqCst);
                })
                .expect("submit");
        }
        entered_rx.recv().expect("task entered");

        worker.stop();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(torn_down.load(Ordering::SeqCst));

        worker.stop();
        assert!(worker.submit(|_| ()).is_err());
    }

    #[test]
    fn call_from_worker_thread_fails_fast() {
        let worker = started(None);
        let queue = worker.queue().expect("queue");
        let nested = worker
            .call(move |_| queue.call(|_| ()).err())
            .expect("outer call");
        assert!(matches!(nested, Some(WorkerError::SameThread(_))));
    }
}
