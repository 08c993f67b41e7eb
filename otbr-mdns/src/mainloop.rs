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

//! Single-threaded event loop plumbing
//!
//! Each iteration has two phases. In `update` every processor lowers the wait
//! budget to its next deadline; the loop then sleeps until the budget runs out
//! or the [`TaskRunner`] is woken from another thread; in `process` every
//! processor handles whatever became ready.

use crate::task_runner::{TaskHandle, TaskRunner};
use core::time::Duration;

/// Per-iteration wait budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MainloopContext {
    timeout: Duration,
}

impl MainloopContext {
    /// Start an iteration that waits at most `max_timeout`
    pub fn new(max_timeout: Duration) -> Self {
        Self {
            timeout: max_timeout,
        }
    }

    /// Current wait budget
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Lower the wait budget to `timeout`; never raises it
    pub fn shrink_timeout(&mut self, timeout: Duration) {
        self.timeout = self.timeout.min(timeout);
    }
}

/// Something driven by the event loop
pub trait MainloopProcessor {
    /// Lower `context`'s timeout to this processor's next deadline
    fn update(&mut self, context: &mut MainloopContext);

    /// Handle whatever became ready during the wait
    fn process(&mut self, context: &MainloopContext);
}

/// The event loop: owns the [`TaskRunner`] and drives other processors
pub struct Mainloop {
    task_runner: TaskRunner,
    max_timeout: Duration,
}

impl Mainloop {
    /// Create a loop whose iterations never wait longer than `max_timeout`
    pub fn new(max_timeout: Duration) -> Self {
        Self {
            task_runner: TaskRunner::new(),
            max_timeout,
        }
    }

    /// The loop's task runner
    pub fn task_runner(&self) -> &TaskRunner {
        &self.task_runner
    }

    /// A cloneable handle for posting tasks from any thread
    pub fn handle(&self) -> TaskHandle {
        self.task_runner.handle()
    }

    /// Run one update / wait / process iteration
    pub async fn run_once(&mut self, processors: &mut [&mut dyn MainloopProcessor]) {
        let mut context = MainloopContext::new(self.max_timeout);

        self.task_runner.update(&mut context);
        for processor in processors.iter_mut() {
            processor.update(&mut context);
        }

        self.task_runner.wait(&context).await;

        self.task_runner.process(&context);
        for processor in processors.iter_mut() {
            processor.process(&context);
        }
    }

    /// Iterate until `done` returns true
    pub async fn run_until(
        &mut self,
        processors: &mut [&mut dyn MainloopProcessor],
        mut done: impl FnMut() -> bool,
    ) {
        while !done() {
            self.run_once(processors).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Deadline {
        after: Duration,
        processed: usize,
    }

    impl MainloopProcessor for Deadline {
        fn update(&mut self, context: &mut MainloopContext) {
            context.shrink_timeout(self.after);
        }

        fn process(&mut self, _context: &MainloopContext) {
            self.processed += 1;
        }
    }

    #[test]
    fn test_shrink_never_raises() {
        let mut context = MainloopContext::new(Duration::from_secs(1));
        context.shrink_timeout(Duration::from_secs(5));
        assert_eq!(context.timeout(), Duration::from_secs(1));
        context.shrink_timeout(Duration::from_millis(10));
        assert_eq!(context.timeout(), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_processor_deadline_bounds_wait() {
        let mut mainloop = Mainloop::new(Duration::from_secs(3600));
        let mut deadline = Deadline {
            after: Duration::from_millis(5),
            processed: 0,
        };

        let started = tokio::time::Instant::now();
        mainloop.run_once(&mut [&mut deadline]).await;

        assert_eq!(deadline.processed, 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
