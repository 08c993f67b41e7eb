// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Deferred task runner
//!
//! Lets any thread hand work to the event-loop thread. Tasks sit in a priority
//! queue ordered by `(execute_time, creation_time)`, so tasks due at the same
//! moment run in the order they were posted. Posting also pokes a capacity-1
//! wakeup channel so the loop's wait returns promptly; if a wakeup is already
//! pending the poke is skipped.
//!
//! There is no cancellation. A posted task always runs; callers that need to
//! "cancel" should capture a shared flag and check it inside the task.

use crate::mainloop::{MainloopContext, MainloopProcessor};
use crate::{Error, Result};
use core::cmp::Ordering;
use core::time::Duration;
use parking_lot::Mutex;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// A unit of deferred work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct DelayedTask {
    execute_time: Instant,
    creation_time: Instant,
    // Tie-breaker for tasks created within the same clock tick.
    sequence: u64,
    task: Task,
}

impl DelayedTask {
    fn order_key(&self) -> (Instant, Instant, u64) {
        (self.execute_time, self.creation_time, self.sequence)
    }
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.order_key() == other.order_key()
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    // Reversed: BinaryHeap is a max-heap and the earliest task must be on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other.order_key().cmp(&self.order_key())
    }
}

#[derive(Default)]
struct TaskQueue {
    tasks: BinaryHeap<DelayedTask>,
    next_sequence: u64,
}

struct Shared {
    queue: Mutex<TaskQueue>,
    wakeup: mpsc::Sender<()>,
}

impl Shared {
    fn push(&self, delay: Duration, task: Task) {
        let now = Instant::now();
        {
            let mut queue = self.queue.lock();
            if self.wakeup.is_closed() {
                log::debug!("Task runner is gone, dropping posted task");
                return;
            }
            let sequence = queue.next_sequence;
            queue.next_sequence += 1;
            queue.tasks.push(DelayedTask {
                execute_time: now + delay,
                creation_time: now,
                sequence,
                task,
            });
        }

        // Full means a wakeup is already pending; closed means the loop is gone.
        let _ = self.wakeup.try_send(());
    }
}

/// Cloneable, thread-safe handle for posting tasks to a [`TaskRunner`]
#[derive(Clone)]
pub struct TaskHandle {
    shared: Arc<Shared>,
}

impl TaskHandle {
    /// Run `task` on the loop thread as soon as possible
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        self.shared.push(Duration::ZERO, Box::new(task));
    }

    /// Run `task` on the loop thread no earlier than `delay` from now
    pub fn post_delayed(&self, delay: Duration, task: impl FnOnce() + Send + 'static) {
        self.shared.push(delay, Box::new(task));
    }

    /// Run `task` on the loop thread and block until it returns its result.
    ///
    /// Must not be called from the loop thread: the task could never run and
    /// the caller would block forever.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Aborted`] if the runner is dropped before the task
    /// runs.
    pub fn post_and_wait<T, F>(&self, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.post(move || {
            let _ = tx.send(task());
        });
        rx.blocking_recv().map_err(|_| Error::Aborted)
    }
}

/// Ordered deferred-task queue driven by the event loop
pub struct TaskRunner {
    shared: Arc<Shared>,
    wakeup: mpsc::Receiver<()>,
}

impl TaskRunner {
    /// Create an empty runner
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(TaskQueue::default()),
                wakeup: tx,
            }),
            wakeup: rx,
        }
    }

    /// A handle that can post from other threads
    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// See [`TaskHandle::post`]
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        self.shared.push(Duration::ZERO, Box::new(task));
    }

    /// See [`TaskHandle::post_delayed`]
    pub fn post_delayed(&self, delay: Duration, task: impl FnOnce() + Send + 'static) {
        self.shared.push(delay, Box::new(task));
    }

    /// Number of tasks not yet run
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().tasks.len()
    }

    /// Wait until woken by a post or until `context`'s timeout elapses
    pub async fn wait(&mut self, context: &MainloopContext) {
        let _ = tokio::time::timeout(context.timeout(), self.wakeup.recv()).await;
    }

    fn drain_wakeups(&mut self) {
        while self.wakeup.try_recv().is_ok() {}
    }

    /// Run every task that is due.
    ///
    /// Tasks posted while draining, even with zero delay, run on the next
    /// iteration. The lock is not held while a task runs, so tasks may post.
    fn run_due_tasks(&mut self) {
        let now = Instant::now();
        let sequence_limit = self.shared.queue.lock().next_sequence;

        loop {
            let task = {
                let mut queue = self.shared.queue.lock();
                let due = matches!(
                    queue.tasks.peek(),
                    Some(next) if next.execute_time <= now && next.sequence < sequence_limit
                );
                if due {
                    queue.tasks.pop()
                } else {
                    None
                }
            };

            match task {
                Some(delayed) => (delayed.task)(),
                None => break,
            }
        }
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        self.wakeup.close();
        // Dropping the pending tasks releases anyone blocked in post_and_wait.
        let pending = core::mem::take(&mut self.shared.queue.lock().tasks);
        drop(pending);
    }
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MainloopProcessor for TaskRunner {
    fn update(&mut self, context: &mut MainloopContext) {
        let queue = self.shared.queue.lock();
        if let Some(next) = queue.tasks.peek() {
            context.shrink_timeout(next.execute_time.saturating_duration_since(Instant::now()));
        }
    }

    fn process(&mut self, _context: &MainloopContext) {
        self.drain_wakeups();
        self.run_due_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn run_iteration(runner: &mut TaskRunner) {
        let mut context = MainloopContext::new(Duration::from_secs(10));
        runner.update(&mut context);
        runner.process(&context);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_tasks_run_in_due_order() {
        let mut runner = TaskRunner::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (name, delay) in [("A", 10), ("B", 9), ("C", 10)] {
            let order = Arc::clone(&order);
            runner.post_delayed(Duration::from_millis(delay), move || {
                order.lock().push(name);
            });
        }

        run_iteration(&mut runner);
        assert!(order.lock().is_empty());

        tokio::time::advance(Duration::from_millis(20)).await;
        run_iteration(&mut runner);

        assert_eq!(*order.lock(), vec!["B", "A", "C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_equal_delays_keep_post_order() {
        let mut runner = TaskRunner::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50 {
            let order = Arc::clone(&order);
            runner.post(move || order.lock().push(i));
        }

        run_iteration(&mut runner);
        assert_eq!(*order.lock(), (0..50).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_not_run_before_delay() {
        let mut runner = TaskRunner::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        runner.post_delayed(Duration::from_millis(10), move || {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        });

        let mut context = MainloopContext::new(Duration::from_secs(10));
        runner.update(&mut context);
        assert_eq!(context.timeout(), Duration::from_millis(10));

        tokio::time::advance(Duration::from_millis(9)).await;
        run_iteration(&mut runner);
        assert_eq!(ran.load(AtomicOrdering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(1)).await;
        run_iteration(&mut runner);
        assert_eq!(ran.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(runner.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_can_post_without_deadlock() {
        let mut runner = TaskRunner::new();
        let handle = runner.handle();
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ran);
        runner.post(move || {
            let counter = Arc::clone(&counter);
            handle.post(move || {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
            });
        });

        run_iteration(&mut runner);
        assert_eq!(ran.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(runner.pending(), 1);

        run_iteration(&mut runner);
        assert_eq!(ran.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_wakes_waiting_loop() {
        let mut runner = TaskRunner::new();
        runner.post(|| {});

        let started = Instant::now();
        runner.wait(&MainloopContext::new(Duration::from_secs(3600))).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_concurrent_posts_are_not_lost() {
        let mut runner = TaskRunner::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..10)
            .map(|_| {
                let handle = runner.handle();
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    handle.post(move || {
                        counter.fetch_add(1, AtomicOrdering::SeqCst);
                    });
                })
            })
            .collect();

        let deadline = Instant::now() + Duration::from_secs(5);
        while counter.load(AtomicOrdering::SeqCst) < 10 && Instant::now() < deadline {
            let mut context = MainloopContext::new(Duration::from_millis(50));
            runner.update(&mut context);
            runner.wait(&context).await;
            runner.process(&context);
        }

        for thread in threads {
            thread.join().unwrap();
        }
        run_iteration(&mut runner);

        assert_eq!(counter.load(AtomicOrdering::SeqCst), 10);
        assert_eq!(runner.pending(), 0);
    }

    #[tokio::test]
    async fn test_post_and_wait_returns_result() {
        let mut runner = TaskRunner::new();
        let handle = runner.handle();

        let waiter = std::thread::spawn(move || handle.post_and_wait(|| 6 * 7));

        while !waiter.is_finished() {
            let mut context = MainloopContext::new(Duration::from_millis(20));
            runner.update(&mut context);
            runner.wait(&context).await;
            runner.process(&context);
        }

        assert_eq!(waiter.join().unwrap(), Ok(42));
    }

    #[test]
    fn test_post_and_wait_aborted_when_runner_dropped() {
        let runner = TaskRunner::new();
        let handle = runner.handle();

        let waiter = std::thread::spawn(move || handle.post_and_wait(|| 1));
        std::thread::sleep(Duration::from_millis(50));
        drop(runner);

        assert_eq!(waiter.join().unwrap(), Err(Error::Aborted));
    }
}
