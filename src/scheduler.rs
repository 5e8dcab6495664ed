use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::protocol::Priority;

type Task = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default)]
struct Queues {
    critical: VecDeque<Task>,
    high: VecDeque<Task>,
    normal: VecDeque<Task>,
    low: VecDeque<Task>,
}

impl Queues {
    fn push(&mut self, priority: Priority, task: Task) {
        match priority {
            Priority::Critical => self.critical.push_back(task),
            Priority::High => self.high.push_back(task),
            Priority::Normal => self.normal.push_back(task),
            Priority::Low => self.low.push_back(task),
        }
    }

    /// Highest non-empty class first, strict FIFO within a class.
    fn pop(&mut self) -> Option<Task> {
        self.critical
            .pop_front()
            .or_else(|| self.high.pop_front())
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front())
    }
}

/// Bounds the number of in-flight message-processing tasks while honoring priority order.
///
/// Four FIFO queues behind one mutex stand in for the Python original's per-priority
/// `heapq` (see §9: the effective behavior is priority-scan order, not the heap's negated-key
/// trick). A `tokio::sync::Notify` wakes the dispatch loop whenever work is enqueued or a slot
/// frees up; `Arc`-cloned so the loop can run as its own task without borrowing the scheduler.
pub struct QosScheduler {
    queues: Mutex<Queues>,
    in_flight: AtomicUsize,
    max_concurrent: usize,
    notify: Notify,
}

impl QosScheduler {
    pub fn spawn(max_concurrent: usize) -> Arc<Self> {
        let scheduler = Arc::new(QosScheduler {
            queues: Mutex::new(Queues::default()),
            in_flight: AtomicUsize::new(0),
            max_concurrent,
            notify: Notify::new(),
        });
        let driver = scheduler.clone();
        tokio::spawn(async move { driver.drive().await });
        scheduler
    }

    /// Accepts a unit of work and returns immediately; the task itself may run later, bounded
    /// by `max_concurrent` and ordered by `priority`.
    pub fn enqueue<F>(&self, priority: Priority, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.queues.lock().unwrap().push(priority, Box::pin(task));
        self.notify.notify_one();
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    async fn drive(self: Arc<Self>) {
        loop {
            loop {
                if self.in_flight.load(Ordering::SeqCst) >= self.max_concurrent {
                    break;
                }
                let next = { self.queues.lock().unwrap().pop() };
                let Some(task) = next else { break };

                self.in_flight.fetch_add(1, Ordering::SeqCst);
                let me = self.clone();
                tokio::spawn(async move {
                    // `_guard`'s Drop runs even if `task` panics (unwind, not abort), so the
                    // in-flight slot is always freed — fault isolation per §4.4.
                    let _guard = InFlightGuard(&me);
                    task.await;
                });
            }
            self.notify.notified().await;
        }
    }
}

struct InFlightGuard<'a>(&'a QosScheduler);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.0.notify.notify_one();
    }
}
