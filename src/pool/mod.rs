pub mod futex;

use core::mem::MaybeUninit;
use core::num::NonZeroUsize;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, LockResult, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

/// Hard cap on worker threads; past this point directory trees are
/// bound by the disk, not the scheduler.
pub const MAX_WORKERS: usize = 64;

/// Low bit of the wait word. Keeping it in the least significant
/// position means the timeline's wrapping `fetch_add(2)` can never
/// carry into it.
const CANCELED: u32 = 1;

const INITIAL_RING: usize = 1024;

/// Mutex-protected task ring: FIFO for its owning worker, LIFO for
/// thieves, growable by doubling and rebasing when a push finds it full.
struct TaskRing<T> {
    buf: Box<[MaybeUninit<T>]>,
    head: usize,
    len: usize,
    canceled: bool,
}

impl<T> TaskRing<T> {
    fn new() -> Self {
        Self {
            buf: Box::new_uninit_slice(INITIAL_RING),
            head: 0,
            len: 0,
            canceled: false,
        }
    }

    const fn mask(&self) -> usize {
        self.buf.len() - 1
    }

    fn push_back(&mut self, task: T) {
        if self.len == self.buf.len() {
            self.grow();
        }
        let index = (self.head + self.len) & self.mask();
        self.buf[index].write(task);
        self.len += 1;
    }

    fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let index = self.head;
        self.head = (self.head + 1) & self.mask();
        self.len -= 1;
        // SAFETY: slot `index` held a live task (it was inside [head, head+len))
        Some(unsafe { self.buf[index].assume_init_read() })
    }

    fn pop_back(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        let index = (self.head + self.len) & self.mask();
        // SAFETY: as in pop_front
        Some(unsafe { self.buf[index].assume_init_read() })
    }

    /// Doubles capacity, rebasing the live span to index 0.
    fn grow(&mut self) {
        let old_capacity = self.buf.len();
        let mut grown: Box<[MaybeUninit<T>]> = Box::new_uninit_slice(old_capacity * 2);
        for i in 0..self.len {
            let src = (self.head + i) & (old_capacity - 1);
            // SAFETY: moving each live task exactly once into the new ring
            grown[i].write(unsafe { self.buf[src].assume_init_read() });
        }
        self.buf = grown;
        self.head = 0;
    }

    fn clear(&mut self) {
        while self.pop_front().is_some() {}
    }
}

impl<T> Drop for TaskRing<T> {
    fn drop(&mut self) {
        self.clear();
    }
}

struct Runner<T> {
    queue: Mutex<TaskRing<T>>,
}

struct Shared<T> {
    runners: Box<[Runner<T>]>,
    /// Futex word: bit 0 = canceled, bits 1.. = wrapping timeline bumped
    /// on every empty-to-non-empty queue transition.
    wait: AtomicU32,
    /// Round-robin cursor for pushes arriving from outside the pool.
    next: AtomicUsize,
}

#[inline]
fn relock<'a, T>(result: LockResult<MutexGuard<'a, T>>) -> MutexGuard<'a, T> {
    // A worker panicking mid-push must not wedge the rest of the pool.
    result.unwrap_or_else(PoisonError::into_inner)
}

impl<T> Shared<T> {
    fn queue_to(&self, index: usize, task: T) {
        let was_empty;
        {
            let mut queue = relock(self.runners[index].queue.lock());
            if queue.canceled {
                return; // task dropped, traversal is being torn down
            }
            was_empty = queue.len == 0;
            queue.push_back(task);
        }
        if was_empty {
            // Publish the transition, then wake anyone parked on the old
            // timeline. The release pairs with the acquire snapshot in
            // get_task.
            self.wait.fetch_add(2, Ordering::Release);
            futex::wake_all(&self.wait);
        }
    }

    fn run(&self, task: T) {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.runners.len();
        self.queue_to(index, task);
    }

    fn canceled(&self) -> bool {
        self.wait.load(Ordering::Acquire) & CANCELED != 0
    }

    /**
    Blocks until a task is available or the pool is canceled.

    Own queue first (front, FIFO, via `try_lock` so a racing producer
    never stalls the worker), then every runner in order stealing from
    the back (LIFO, the freshest and deepest work), then a futex sleep on
    the timeline snapshot taken before the scan, which makes a publish
    between scan and sleep impossible to miss.
    */
    fn get_task(&self, index: usize) -> Option<T> {
        loop {
            if let Ok(mut own) = self.runners[index].queue.try_lock() {
                if let Some(task) = own.pop_front() {
                    return Some(task);
                }
            }

            let snapshot = self.wait.load(Ordering::Acquire);
            if snapshot & CANCELED != 0 {
                return None;
            }

            for runner in &self.runners {
                let task = relock(runner.queue.lock()).pop_back();
                if let Some(task) = task {
                    // Cancellation beats a stolen task: the queues were
                    // already cleared, this one just slipped through.
                    if self.canceled() {
                        return None;
                    }
                    return Some(task);
                }
            }

            futex::wait(&self.wait, snapshot);
        }
    }

    fn cancel(&self) {
        self.wait.fetch_or(CANCELED, Ordering::AcqRel);
        for runner in &self.runners {
            let mut queue = relock(runner.queue.lock());
            queue.clear();
            queue.canceled = true;
        }
        futex::wake_all(&self.wait);
    }
}

/// A worker-side handle: tasks pushed through it land on the worker's
/// own queue, so a directory's children stay with the thread that
/// listed it unless somebody steals them.
pub struct WorkerScope<'pool, T> {
    shared: &'pool Shared<T>,
    index: usize,
}

impl<T> WorkerScope<'_, T> {
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    pub fn run(&self, task: T) {
        self.shared.queue_to(self.index, task);
    }

    pub fn cancel(&self) {
        self.shared.cancel();
    }
}

/**
A fixed-size pool of workers with per-worker task queues, work
stealing, and futex-based idle blocking.

Startup is deliberately phased: all queues are allocated first, then
the per-worker `init` runs (receiving a scope, so it may already queue
tasks), and threads are spawned last, so a task queued during init is
therefore visible to every worker by the time any of them runs.

The pool has no implicit drain-and-exit: it runs until [`cancel`]
(reachable from any thread, and from workers via their scope), after
which [`join`] returns every worker's state. The traversal uses that to
collect the per-worker path arenas.

[`cancel`]: Pool::cancel
[`join`]: Pool::join
*/
pub struct Pool<T, W> {
    shared: Arc<Shared<T>>,
    threads: Vec<JoinHandle<W>>,
}

impl<T, W> Pool<T, W>
where
    T: Send + 'static,
    W: Send + 'static,
{
    pub fn spawn<I, F>(workers: NonZeroUsize, mut init: I, handler: F) -> Self
    where
        I: FnMut(&WorkerScope<'_, T>) -> W,
        F: Fn(&mut W, &WorkerScope<'_, T>, T) + Send + Sync + 'static,
    {
        let count = workers.get().min(MAX_WORKERS);
        let shared = Arc::new(Shared {
            runners: (0..count)
                .map(|_| Runner {
                    queue: Mutex::new(TaskRing::new()),
                })
                .collect(),
            wait: AtomicU32::new(0),
            next: AtomicUsize::new(0),
        });

        // Phase two: worker state construction, before any thread exists.
        let states: Vec<W> = (0..count)
            .map(|index| {
                init(&WorkerScope {
                    shared: &shared,
                    index,
                })
            })
            .collect();

        let handler = Arc::new(handler);
        let threads = states
            .into_iter()
            .enumerate()
            .map(|(index, mut state)| {
                let shared = Arc::clone(&shared);
                let handler = Arc::clone(&handler);
                std::thread::spawn(move || {
                    let scope = WorkerScope {
                        shared: &shared,
                        index,
                    };
                    while let Some(task) = shared.get_task(index) {
                        handler(&mut state, &scope, task);
                    }
                    state
                })
            })
            .collect();

        Self { shared, threads }
    }

    /// Queues a task from outside the pool, round-robin across runners.
    pub fn run(&self, task: T) {
        self.shared.run(task);
    }

    /// Stops the pool: sets the canceled bit, clears every queue under
    /// its lock, and wakes all idle workers. Safe from any thread and
    /// idempotent.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Waits for every worker to exit and returns their states in
    /// worker order. A worker panic is propagated here.
    pub fn join(self) -> Vec<W> {
        self.threads
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .collect()
    }
}
