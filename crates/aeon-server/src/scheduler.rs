//! Task scheduler — §4.14. A thread-safe FIFO of `FnOnce()` closures; the
//! only supported way for the heartbeat or download worker threads to touch
//! the registry or scripting host, which otherwise live exclusively on the
//! tick thread.

use crossbeam::queue::SegQueue;

type Task = Box<dyn FnOnce() + Send>;

pub struct TaskScheduler {
    queue: SegQueue<Task>,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    /// Appends a task to run on the main/tick thread. Callable from any
    /// thread.
    pub fn schedule_on_main_thread(&self, task: impl FnOnce() + Send + 'static) {
        self.queue.push(Box::new(task));
    }

    /// Drains every queued task and runs each exactly once, in FIFO order.
    /// Must be called from the tick thread.
    pub fn process_tasks(&self) {
        while let Some(task) = self.queue.pop() {
            task();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn tasks_run_exactly_once_in_fifo_order() {
        let scheduler = TaskScheduler::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            scheduler.schedule_on_main_thread(move || order.lock().push(i));
        }
        scheduler.process_tasks();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn process_tasks_is_a_no_op_when_empty() {
        let scheduler = TaskScheduler::new();
        scheduler.process_tasks();
        assert!(scheduler.is_empty());
    }

    #[test]
    fn tasks_scheduled_from_another_thread_are_visible() {
        let scheduler = Arc::new(TaskScheduler::new());
        let ran = Arc::new(AtomicU32::new(0));
        let scheduler2 = scheduler.clone();
        let ran2 = ran.clone();
        let handle = std::thread::spawn(move || {
            scheduler2.schedule_on_main_thread(move || {
                ran2.fetch_add(1, Ordering::SeqCst);
            });
        });
        handle.join().unwrap();
        scheduler.process_tasks();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
