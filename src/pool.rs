//! Fixed-size worker pool over a blocking task queue.
//!
//! Workers block in `wait_and_pop`; dropping the pool requests stop and
//! wakes everyone, letting each worker finish the task it is on. Results
//! come back through per-task channels so the caller can collect them in
//! submission order.

use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<Task>,
    stopped: bool,
}

#[derive(Default)]
struct TaskQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

impl TaskQueue {
    fn push(&self, task: Task) {
        let mut state = self.state.lock().unwrap();
        state.tasks.push_back(task);
        self.cv.notify_one();
    }

    /// Block until a task arrives or stop is requested.
    fn wait_and_pop(&self) -> Option<Task> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.stopped {
                return None;
            }
            if let Some(task) = state.tasks.pop_front() {
                return Some(task);
            }
            state = self.cv.wait(state).unwrap();
        }
    }

    fn stop(&self) {
        self.state.lock().unwrap().stopped = true;
        self.cv.notify_all();
    }
}

pub struct ThreadPool {
    queue: Arc<TaskQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Pool sized to the hardware parallelism, minimum one worker.
    pub fn new() -> Self {
        let size = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(1);
        Self::with_size(size)
    }

    pub fn with_size(size: usize) -> Self {
        let size = size.max(1);
        let queue = Arc::new(TaskQueue::default());
        let workers = (0..size)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    while let Some(task) = queue.wait_and_pop() {
                        task();
                    }
                })
            })
            .collect();
        Self { queue, workers }
    }

    /// Queue a task; the returned receiver yields its result exactly once.
    pub fn push<T, F>(&self, task: F) -> Receiver<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = channel();
        self.queue.push(Box::new(move || {
            let _ = tx.send(task());
        }));
        rx
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.queue.stop();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
