//! Work-stealing deque for task scheduling

use crate::scheduler::Task;
use crossbeam_deque::{Injector, Stealer, Worker};
use std::sync::Arc;

/// Work-stealing deque for a single worker
pub struct WorkerDeque {
    /// Local worker deque (LIFO for own tasks)
    worker: Worker<Arc<Task>>,

    /// Stealer handles for other workers
    stealers: Vec<Stealer<Arc<Task>>>,

    /// Global injector for tasks without affinity
    injector: Arc<Injector<Arc<Task>>>,
}

impl WorkerDeque {
    /// Create a new WorkerDeque
    pub fn new(
        worker: Worker<Arc<Task>>,
        stealers: Vec<Stealer<Arc<Task>>>,
        injector: Arc<Injector<Arc<Task>>>,
    ) -> Self {
        Self {
            worker,
            stealers,
            injector,
        }
    }

    /// Push a task to the local deque (LIFO)
    pub fn push(&self, task: Arc<Task>) {
        self.worker.push(task);
    }

    /// Pop a task from the local deque (LIFO) - most recent task
    pub fn pop(&self) -> Option<Arc<Task>> {
        self.worker.pop()
    }

    /// Try to get work: local pop, then steal, then inject
    pub fn find_work(&self) -> Option<Arc<Task>> {
        // 1. Try local deque (LIFO - cache locality)
        if let Some(task) = self.worker.pop() {
            return Some(task);
        }

        // 2. Try stealing from other workers (FIFO - load balancing)
        loop {
            if let Some(task) = self.steal_from_others() {
                return Some(task);
            }

            // 3. Try global injector
            match self.injector.steal() {
                crossbeam_deque::Steal::Success(task) => return Some(task),
                crossbeam_deque::Steal::Empty => break,
                crossbeam_deque::Steal::Retry => continue,
            }
        }

        None
    }

    /// Steal from other workers (FIFO from their deque bottom)
    fn steal_from_others(&self) -> Option<Arc<Task>> {
        use rand::Rng;

        if self.stealers.is_empty() {
            return None;
        }

        // Randomly select a victim to reduce contention
        let mut rng = rand::thread_rng();
        let start = rng.gen_range(0..self.stealers.len());

        // Try each stealer starting from random position
        for i in 0..self.stealers.len() {
            let index = (start + i) % self.stealers.len();
            let stealer = &self.stealers[index];

            // Retry loop for stealing (handle concurrent modifications)
            loop {
                match stealer.steal() {
                    crossbeam_deque::Steal::Success(task) => return Some(task),
                    crossbeam_deque::Steal::Empty => break,
                    crossbeam_deque::Steal::Retry => continue,
                }
            }
        }

        None
    }

    /// Get the number of tasks in the local deque (approximate)
    pub fn len(&self) -> usize {
        // Note: This is an approximation due to concurrent access
        let mut count = 0;
        let mut temp = Vec::new();

        // Pop all items to count
        while let Some(task) = self.worker.pop() {
            count += 1;
            temp.push(task);
        }

        // Push them back
        for task in temp.into_iter().rev() {
            self.worker.push(task);
        }

        count
    }

    /// Check if the local deque is empty (approximate)
    pub fn is_empty(&self) -> bool {
        self.worker.is_empty()
    }
}

// Implement Clone to allow sharing between worker threads
impl Clone for WorkerDeque {
    fn clone(&self) -> Self {
        // Note: We can't actually clone the Worker, so we create a new one
        // This is only used for sharing the stealers and injector
        // The actual worker deque is thread-local
        panic!("WorkerDeque cannot be cloned - each worker has its own deque");
    }
}
