// src/engine/executor.rs
//
// Background load/save tasks.
//
// Task lifecycle: Queued -> Running -> Completed.
// - Work runs on a rayon pool. A save holds the handle's exclusivity lock
//   for the whole commit, so saves on one handle never overlap while saves
//   on different handles run in parallel.
// - Results are never handed to callbacks on a worker thread. Workers push
//   a completion onto a queue; the owner of the executor drains it with
//   run_pending()/run_until_idle() and callbacks run there, once each.
// - A save task holds its own reference to the handle until its callback
//   has returned.

use crate::engine::common::run_with_panic_policy;
use crate::engine::handle::{ImageHandle, SharedImage};
use crate::engine::library::{ImageCrateLibrary, ImageLibrary};
use crate::engine::limits::LoadOptions;
use crate::engine::pool;
use crate::error::{Result, StagedImageError};
use parking_lot::{Condvar, Mutex};
use rayon::ThreadPool;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    Load,
    Save,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    /// Finished on the worker; the callback has not run yet
    Completed,
}

/// Executor settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Dedicated pool size. `None` shares the global pool.
    pub workers: Option<usize>,
    /// Thread name prefix for a dedicated pool; the global pool keeps its own.
    pub thread_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: None,
            thread_name: pool::DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl ExecutorConfig {
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

type Delivery = Box<dyn FnOnce() + Send>;

struct Completion {
    id: TaskId,
    deliver: Delivery,
}

struct TaskRecord {
    kind: TaskKind,
    state: TaskState,
}

struct Shared {
    completions: Mutex<VecDeque<Completion>>,
    ready: Condvar,
    tasks: Mutex<HashMap<TaskId, TaskRecord>>,
    next_id: AtomicU64,
}

impl Shared {
    fn register(&self, kind: TaskKind) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.tasks.lock().insert(
            id,
            TaskRecord {
                kind,
                state: TaskState::Queued,
            },
        );
        debug!(%id, ?kind, "task queued");
        id
    }

    fn transition(&self, id: TaskId, state: TaskState) {
        if let Some(record) = self.tasks.lock().get_mut(&id) {
            debug!(%id, kind = ?record.kind, from = ?record.state, to = ?state, "task state");
            record.state = state;
        }
    }

    fn complete(&self, id: TaskId, deliver: Delivery) {
        self.transition(id, TaskState::Completed);
        self.completions.lock().push_back(Completion { id, deliver });
        self.ready.notify_all();
    }
}

enum PoolRef {
    Global(&'static ThreadPool),
    Dedicated(ThreadPool),
}

impl PoolRef {
    fn get(&self) -> &ThreadPool {
        match self {
            PoolRef::Global(pool) => pool,
            PoolRef::Dedicated(pool) => pool,
        }
    }
}

/// Runs loads and saves in the background and delivers their results to
/// the thread that drains it.
pub struct TaskExecutor {
    pool: PoolRef,
    shared: Arc<Shared>,
}

impl TaskExecutor {
    /// Executor on the shared global pool.
    pub fn new() -> Result<Self> {
        Self::with_config(ExecutorConfig::default())
    }

    pub fn with_config(config: ExecutorConfig) -> Result<Self> {
        let pool = match config.workers {
            Some(workers) => {
                PoolRef::Dedicated(pool::build_pool(workers, &config.thread_name)?)
            }
            None => PoolRef::Global(pool::get_pool()?),
        };
        Ok(Self {
            pool,
            shared: Arc::new(Shared {
                completions: Mutex::new(VecDeque::new()),
                ready: Condvar::new(),
                tasks: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    /// Queue a load of `path` with the default library.
    pub fn open_path<F>(&self, path: impl Into<PathBuf>, callback: F) -> TaskId
    where
        F: FnOnce(Result<SharedImage<ImageCrateLibrary>>) + Send + 'static,
    {
        self.open(
            Arc::new(ImageCrateLibrary),
            path,
            LoadOptions::default(),
            callback,
        )
    }

    /// Queue a load. The callback receives the new handle, or the error;
    /// a failed load has released everything it decoded before the
    /// callback runs.
    ///
    /// A load takes no lock: the handle does not exist until it finishes.
    /// A library panic while loading is therefore reported as
    /// [`StagedImageError::Executor`], where the same panic during a save
    /// is a [`StagedImageError::LockRelease`].
    pub fn open<L, F>(
        &self,
        library: Arc<L>,
        path: impl Into<PathBuf>,
        options: LoadOptions,
        callback: F,
    ) -> TaskId
    where
        L: ImageLibrary,
        F: FnOnce(Result<SharedImage<L>>) + Send + 'static,
    {
        let id = self.shared.register(TaskKind::Load);
        let shared = Arc::clone(&self.shared);
        let path = path.into();

        self.pool.get().spawn(move || {
            shared.transition(id, TaskState::Running);
            let result = run_with_panic_policy("load", || {
                ImageHandle::open_with(library, &path, &options)
            })
            .unwrap_or_else(|message| Err(StagedImageError::executor(message)))
            .map(SharedImage::from);

            if let Err(err) = &result {
                warn!(%id, path = %path.display(), error = %err, "load task failed");
            }
            shared.complete(id, Box::new(move || callback(result)));
        });
        id
    }

    /// Queue a save of `image` to `path`.
    ///
    /// The task keeps `image` alive until its callback returns. On failure
    /// the handle is untouched and can be saved again.
    pub fn save<L, F>(&self, image: &SharedImage<L>, path: impl Into<PathBuf>, callback: F) -> TaskId
    where
        L: ImageLibrary,
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let id = self.shared.register(TaskKind::Save);
        let shared = Arc::clone(&self.shared);
        let image = image.clone();
        let path = path.into();

        self.pool.get().spawn(move || {
            let result = commit_exclusive(&shared, id, &image, &path);
            if let Err(err) = &result {
                warn!(%id, path = %path.display(), error = %err, "save task failed");
            }
            shared.complete(
                id,
                Box::new(move || {
                    callback(result);
                    drop(image);
                }),
            );
        });
        id
    }

    /// Run callbacks for the tasks finished so far. Returns how many ran.
    ///
    /// Each task is marked delivered before its callback runs. A panicking
    /// callback unwinds out of this call; completions behind it stay queued
    /// for the next one.
    pub fn run_pending(&self) -> usize {
        // Work queued by the callbacks themselves waits for the next call.
        let ready = self.shared.completions.lock().len();
        let mut delivered = 0;
        while delivered < ready {
            let Some(completion) = self.shared.completions.lock().pop_front() else {
                break;
            };
            self.shared.tasks.lock().remove(&completion.id);
            debug!(id = %completion.id, "task delivered");
            delivered += 1;
            (completion.deliver)();
        }
        delivered
    }

    /// Block until every queued task has run its callback.
    pub fn run_until_idle(&self) -> usize {
        let mut delivered = 0;
        loop {
            delivered += self.run_pending();
            if self.in_flight() == 0 {
                return delivered;
            }
            self.wait_for_completion(None);
        }
    }

    /// Like `run_until_idle`, giving up after `timeout`. Returns false if
    /// tasks were still outstanding.
    pub fn run_until_idle_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if self.in_flight() == 0 {
                return true;
            }
            if Instant::now() >= deadline || !self.wait_for_completion(Some(deadline)) {
                self.run_pending();
                return self.in_flight() == 0;
            }
        }
    }

    /// Tasks registered and not yet delivered.
    pub fn in_flight(&self) -> usize {
        self.shared.tasks.lock().len()
    }

    /// State of an undelivered task; `None` once its callback has run.
    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.shared.tasks.lock().get(&id).map(|record| record.state)
    }

    /// Wait for at least one completion. Returns false on timeout.
    fn wait_for_completion(&self, deadline: Option<Instant>) -> bool {
        let mut queue = self.shared.completions.lock();
        while queue.is_empty() {
            match deadline {
                Some(deadline) => {
                    if self.shared.ready.wait_until(&mut queue, deadline).timed_out() {
                        return !queue.is_empty();
                    }
                }
                None => self.shared.ready.wait(&mut queue),
            }
        }
        true
    }
}

impl fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("workers", &self.pool.get().current_num_threads())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Commit under the handle's lock.
///
/// A poisoned lock fails the task before the body runs. A panic in the
/// body is reported as a lock-release failure and replaces whatever the
/// body would have returned.
fn commit_exclusive<L: ImageLibrary>(
    shared: &Shared,
    id: TaskId,
    image: &SharedImage<L>,
    path: &Path,
) -> Result<()> {
    let guard = image.acquire()?;
    shared.transition(id, TaskState::Running);
    let outcome = run_with_panic_policy("save", || guard.commit(path));
    drop(guard);
    outcome.unwrap_or_else(|message| Err(StagedImageError::lock_release(message)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::library::recording::{Call, RecordingLibrary};
    use crate::error::ErrorKind;
    use std::sync::mpsc;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn executor() -> TaskExecutor {
        TaskExecutor::with_config(ExecutorConfig::default().workers(2)).unwrap()
    }

    fn load(
        executor: &TaskExecutor,
        library: &Arc<RecordingLibrary>,
    ) -> SharedImage<RecordingLibrary> {
        let (tx, rx) = mpsc::channel();
        executor.open(
            Arc::clone(library),
            "src.png",
            LoadOptions::default(),
            move |result| tx.send(result).unwrap(),
        );
        assert!(executor.run_until_idle_timeout(TIMEOUT));
        rx.recv().unwrap().unwrap()
    }

    #[test]
    fn load_delivers_handle_on_caller_thread() {
        let executor = executor();
        let library = Arc::new(RecordingLibrary::new(64, 32));
        let caller = std::thread::current().id();
        let (tx, rx) = mpsc::channel();
        let id = executor.open(
            Arc::clone(&library),
            "src.png",
            LoadOptions::default(),
            move |result: Result<SharedImage<RecordingLibrary>>| {
                tx.send((std::thread::current().id(), result.map(|img| img.width())))
                    .unwrap();
            },
        );
        assert!(executor.state(id).is_some());
        assert!(executor.run_until_idle_timeout(TIMEOUT));
        let (thread, width) = rx.recv().unwrap();
        assert_eq!(thread, caller);
        assert_eq!(width.unwrap(), 64);
        assert_eq!(executor.state(id), None);
        assert_eq!(executor.in_flight(), 0);
    }

    #[test]
    fn callbacks_wait_for_drain() {
        let executor = executor();
        let library = Arc::new(RecordingLibrary::new(8, 8));
        let image = load(&executor, &library);
        let (tx, rx) = mpsc::channel();
        let id = executor.save(&image, "out.png", move |r| tx.send(r).unwrap());

        // The worker finishes on its own, but nothing is delivered yet.
        let deadline = Instant::now() + TIMEOUT;
        while executor.state(id) != Some(TaskState::Completed) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(executor.state(id), Some(TaskState::Completed));
        assert!(rx.try_recv().is_err());

        assert_eq!(executor.run_pending(), 1);
        assert!(rx.recv().unwrap().is_ok());
    }

    #[test]
    fn panicking_callback_leaves_other_tasks_deliverable() {
        let executor = TaskExecutor::with_config(ExecutorConfig::default().workers(1)).unwrap();
        let mut library = RecordingLibrary::new(8, 8);
        library.fail_decode = Some(ErrorKind::FileDoesNotExist);
        let library = Arc::new(library);

        let first = executor.open(
            Arc::clone(&library),
            "a.png",
            LoadOptions::default(),
            |_: Result<SharedImage<RecordingLibrary>>| panic!("callback failed"),
        );
        let (tx, rx) = mpsc::channel();
        let second = executor.open(
            Arc::clone(&library),
            "b.png",
            LoadOptions::default(),
            move |result: Result<SharedImage<RecordingLibrary>>| {
                tx.send(result.is_err()).unwrap();
            },
        );

        // both finished and queued before anything is drained
        let deadline = Instant::now() + TIMEOUT;
        let completed = |id| executor.state(id) == Some(TaskState::Completed);
        while !(completed(first) && completed(second)) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(completed(first) && completed(second));

        let drained = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            executor.run_until_idle_timeout(TIMEOUT)
        }));
        assert!(drained.is_err());
        assert_eq!(executor.state(first), None);

        assert!(executor.run_until_idle_timeout(TIMEOUT));
        assert_eq!(executor.in_flight(), 0);
        assert!(rx.recv_timeout(TIMEOUT).unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn failed_load_reports_error_and_leaks_nothing() {
        let executor = executor();
        let mut library = RecordingLibrary::new(8, 8);
        library.fail_decode = Some(ErrorKind::FileDoesNotExist);
        let library = Arc::new(library);
        let (tx, rx) = mpsc::channel();
        executor.open(
            Arc::clone(&library),
            "missing.png",
            LoadOptions::default(),
            move |result: Result<SharedImage<RecordingLibrary>>| {
                tx.send(result.map(|_| ())).unwrap();
            },
        );
        assert!(executor.run_until_idle_timeout(TIMEOUT));
        let err = rx.recv().unwrap().unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::FileDoesNotExist));
        assert_eq!(library.live(), 0);
    }

    #[test]
    fn save_pins_handle_until_callback_returns() {
        let executor = executor();
        let library = Arc::new(RecordingLibrary::new(8, 8));
        let image = load(&executor, &library);
        let observer = image.clone();

        let (tx, rx) = mpsc::channel();
        let witness = observer.clone();
        executor.save(&image, "out.png", move |r| {
            // `observer`, `witness` and the task's own pin; `image` is dropped by now
            // caller's `image`, `observer`, `witness` and the task's own pin
            tx.send((r, witness.ref_count())).unwrap();
        });
        drop(image);
        assert!(executor.run_until_idle_timeout(TIMEOUT));
        let (result, refs_in_callback) = rx.recv().unwrap();
        assert!(result.is_ok());
        assert_eq!(refs_in_callback, 3);
        // pin and witness released after the callback
        assert_eq!(observer.ref_count(), 1);
        assert_eq!(library.live(), 1);
    }

    #[test]
    fn failed_save_leaves_handle_usable() {
        let executor = executor();
        let library = Arc::new(RecordingLibrary::new(100, 50));
        let image = load(&executor, &library);
        image.crop(1.0, crate::ops::CropAlign::None).unwrap();
        *library.fail_encode.lock() = Some(ErrorKind::OutOfDiskSpace);

        let (tx, rx) = mpsc::channel();
        executor.save(&image, "out.png", move |r| tx.send(r).unwrap());
        assert!(executor.run_until_idle_timeout(TIMEOUT));
        let err = rx.recv().unwrap().unwrap_err();
        assert_eq!(err, StagedImageError::save("out.png", ErrorKind::OutOfDiskSpace));
        assert_eq!((image.width(), image.height()), (50, 50));

        *library.fail_encode.lock() = None;
        assert!(image.save("again.png").is_ok());
        assert!(library.calls().iter().any(|c| matches!(
            c,
            Call::Encode { path, .. } if path == "again.png"
        )));
    }

    #[test]
    fn poisoned_lock_skips_body() {
        let executor = executor();
        let library = Arc::new(RecordingLibrary::new(8, 8));
        let image = load(&executor, &library);
        let clone = image.clone();
        let _ = std::thread::spawn(move || clone.with(|_| panic!("poison"))).join();
        library.clear();

        let (tx, rx) = mpsc::channel();
        executor.save(&image, "out.png", move |r| tx.send(r).unwrap());
        assert!(executor.run_until_idle_timeout(TIMEOUT));
        let err = rx.recv().unwrap().unwrap_err();
        assert!(matches!(err, StagedImageError::LockAcquire { .. }));
        assert!(library.calls().is_empty());

        // poison cleared; next save runs
        let (tx, rx) = mpsc::channel();
        executor.save(&image, "out.png", move |r| tx.send(r).unwrap());
        assert!(executor.run_until_idle_timeout(TIMEOUT));
        assert!(rx.recv().unwrap().is_ok());
    }

    #[test]
    fn callbacks_may_queue_more_work() {
        let executor = Arc::new(executor());
        let library = Arc::new(RecordingLibrary::new(8, 8));
        let image = load(&executor, &library);

        let (tx, rx) = mpsc::channel();
        let inner_executor = Arc::clone(&executor);
        let inner_image = image.clone();
        executor.save(&image, "first.png", move |first| {
            let tx2 = tx.clone();
            tx.send(first).unwrap();
            inner_executor.save(&inner_image, "second.png", move |second| {
                tx2.send(second).unwrap();
            });
        });
        assert!(executor.run_until_idle_timeout(TIMEOUT));
        assert!(rx.recv().unwrap().is_ok());
        assert!(rx.recv().unwrap().is_ok());
    }
}
