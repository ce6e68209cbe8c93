// Copyright 2024 The rbldns developers.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Thread groups and thread pools.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

////////////////////////////////////////////////////////////////////////
// THREAD GROUPS                                                      //
////////////////////////////////////////////////////////////////////////

/// A group of threads shut down together.
///
/// Long-running tasks started in a `ThreadGroup` are expected to check
/// [`ThreadGroup::is_shutting_down`] between blocking operations (all
/// of which carry short timeouts) and to exit promptly once shutdown
/// has begun. [`ThreadGroup::await_shutdown`] then waits, up to a
/// deadline, for every thread in the group to finish.
pub struct ThreadGroup {
    records: Mutex<GroupRecords>,

    /// Notified when shutdown is initiated and when the last thread
    /// exits. Used with the `records` mutex.
    shutdown_wakeup: Condvar,
}

#[derive(Default)]
struct GroupRecords {
    thread_count: usize,
    shutting_down: bool,
}

impl ThreadGroup {
    /// Creates a new thread group.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(GroupRecords::default()),
            shutdown_wakeup: Condvar::new(),
        })
    }

    /// Starts a named thread in the group. The thread executes `task`
    /// once. Fails if the group is already shutting down.
    pub fn spawn<F>(self: &Arc<Self>, name: &str, task: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut records = self.records.lock().unwrap();
        if records.shutting_down {
            return Err(Error::ShuttingDown);
        }

        let group = self.clone();
        thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                // The guard decrements the count even if the task
                // panics, so await_shutdown cannot wait forever.
                let _guard = CountGuard { group: &group };
                task();
            })
            .map_err(Error::Io)?;
        records.thread_count += 1;
        Ok(())
    }

    /// Returns whether shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.records.lock().unwrap().shutting_down
    }

    /// Initiates shutdown. New threads can no longer be started.
    pub fn shut_down(&self) {
        let mut records = self.records.lock().unwrap();
        records.shutting_down = true;
        self.shutdown_wakeup.notify_all();
    }

    /// Waits up to `timeout` for every thread in the group to exit.
    /// Returns whether they all did.
    pub fn await_shutdown(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut records = self.records.lock().unwrap();
        while records.thread_count > 0 {
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) => remaining,
                None => return false,
            };
            let (guard, _) = self
                .shutdown_wakeup
                .wait_timeout(records, remaining)
                .unwrap();
            records = guard;
        }
        true
    }
}

struct CountGuard<'a> {
    group: &'a ThreadGroup,
}

impl Drop for CountGuard<'_> {
    fn drop(&mut self) {
        let mut records = self.group.records.lock().unwrap();
        records.thread_count -= 1;
        if records.thread_count == 0 {
            self.group.shutdown_wakeup.notify_all();
        }
    }
}

////////////////////////////////////////////////////////////////////////
// THREAD POOLS                                                       //
////////////////////////////////////////////////////////////////////////

/// A task submitted to a [`ThreadPool`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A fixed pool of worker threads consuming a task queue.
///
/// The workers run as threads of the [`ThreadGroup`] passed to
/// [`ThreadPool::start`]. Once [`ThreadPool::shut_down`] is called,
/// tasks still queued are discarded and idle workers exit; a task
/// already executing runs to completion.
pub struct ThreadPool {
    state: Mutex<PoolState>,
    available: Condvar,
}

#[derive(Default)]
struct PoolState {
    queue: VecDeque<Task>,
    shutting_down: bool,
}

impl ThreadPool {
    /// Starts a pool of `workers` threads in `group`.
    pub fn start(group: &Arc<ThreadGroup>, name: &str, workers: usize) -> Result<Arc<Self>, Error> {
        let pool = Arc::new(Self {
            state: Mutex::new(PoolState::default()),
            available: Condvar::new(),
        });
        for i in 0..workers {
            let pool = pool.clone();
            group.spawn(&format!("{} worker {}", name, i), move || {
                pool.run_worker();
            })?;
        }
        Ok(pool)
    }

    /// Submits a task for execution by some worker.
    pub fn submit(&self, task: Task) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.shutting_down {
            return Err(Error::ShuttingDown);
        }
        state.queue.push_back(task);
        self.available.notify_one();
        Ok(())
    }

    /// Shuts the pool down, waking every idle worker.
    pub fn shut_down(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutting_down = true;
        self.available.notify_all();
    }

    fn run_worker(&self) {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.shutting_down {
                return;
            }
            if let Some(task) = state.queue.pop_front() {
                drop(state);
                task();
                state = self.state.lock().unwrap();
            } else {
                state = self.available.wait(state).unwrap();
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error starting a thread or submitting a task.
#[derive(Debug)]
pub enum Error {
    /// The group or pool is shutting down.
    ShuttingDown,

    /// The underlying spawn failed.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ShuttingDown => f.write_str("shutting down"),
            Self::Io(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ShuttingDown => None,
            Self::Io(err) => Some(err),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
