use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A pending acquisition request. Settled exactly once: `wake` receives
/// `true` on grant, `false` on timeout or shutdown.
#[derive(Debug)]
pub struct Waiter {
    pub id: u64,
    pub resource: String,
    pub owner: String,
    pub requested_at: Instant,
    pub priority: Option<i32>,
    pub wake: oneshot::Sender<bool>,
}

/// Per-resource FIFO queues of waiters, plus a side table from request id to
/// its timeout task for O(1) cancellation. Invariant: every queued waiter has
/// exactly one registered timer; a granted or timed-out waiter has none.
#[derive(Debug, Default)]
pub struct WaitQueues {
    queues: HashMap<String, VecDeque<Waiter>>,
    timers: HashMap<u64, JoinHandle<()>>,
}

impl WaitQueues {
    pub fn new() -> Self {
        WaitQueues {
            queues: HashMap::new(),
            timers: HashMap::new(),
        }
    }

    pub fn enqueue(&mut self, waiter: Waiter) {
        self.queues
            .entry(waiter.resource.clone())
            .or_default()
            .push_back(waiter);
    }

    pub fn pop_front(&mut self, resource: &str) -> Option<Waiter> {
        let queue = self.queues.get_mut(resource)?;
        let waiter = queue.pop_front();
        if queue.is_empty() {
            self.queues.remove(resource);
        }
        waiter
    }

    /// Remove a specific request from its queue, wherever it sits.
    pub fn remove(&mut self, resource: &str, id: u64) -> Option<Waiter> {
        let queue = self.queues.get_mut(resource)?;
        let pos = queue.iter().position(|w| w.id == id)?;
        let waiter = queue.remove(pos);
        if queue.is_empty() {
            self.queues.remove(resource);
        }
        waiter
    }

    pub fn register_timer(&mut self, id: u64, handle: JoinHandle<()>) {
        self.timers.insert(id, handle);
    }

    /// Detach the timer for a request; the caller decides whether to abort it.
    pub fn take_timer(&mut self, id: u64) -> Option<JoinHandle<()>> {
        self.timers.remove(&id)
    }

    pub fn waiters(&self) -> impl Iterator<Item = &Waiter> {
        self.queues.values().flat_map(|queue| queue.iter())
    }

    pub fn total_waiting(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// Abort every registered timer and take every queued waiter. Used on
    /// shutdown.
    pub fn drain_all(&mut self) -> Vec<Waiter> {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
        self.queues
            .drain()
            .flat_map(|(_, queue)| queue)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiter(id: u64, resource: &str, owner: &str) -> Waiter {
        let (wake, _rx) = oneshot::channel();
        Waiter {
            id,
            resource: resource.to_string(),
            owner: owner.to_string(),
            requested_at: Instant::now(),
            priority: None,
            wake,
        }
    }

    #[test]
    fn queues_are_fifo_per_resource() {
        let mut queues = WaitQueues::new();
        queues.enqueue(waiter(1, "r1", "a"));
        queues.enqueue(waiter(2, "r1", "b"));
        queues.enqueue(waiter(3, "r2", "c"));

        assert_eq!(queues.total_waiting(), 3);
        assert_eq!(queues.pop_front("r1").unwrap().id, 1);
        assert_eq!(queues.pop_front("r1").unwrap().id, 2);
        assert!(queues.pop_front("r1").is_none());
        assert_eq!(queues.pop_front("r2").unwrap().id, 3);
        assert_eq!(queues.total_waiting(), 0);
    }

    #[test]
    fn remove_takes_a_request_out_of_the_middle() {
        let mut queues = WaitQueues::new();
        queues.enqueue(waiter(1, "r1", "a"));
        queues.enqueue(waiter(2, "r1", "b"));
        queues.enqueue(waiter(3, "r1", "c"));

        assert_eq!(queues.remove("r1", 2).unwrap().owner, "b");
        assert!(queues.remove("r1", 2).is_none());
        assert_eq!(queues.pop_front("r1").unwrap().id, 1);
        assert_eq!(queues.pop_front("r1").unwrap().id, 3);
    }

    #[test]
    fn empty_queues_are_cleaned_up() {
        let mut queues = WaitQueues::new();
        queues.enqueue(waiter(1, "r1", "a"));
        queues.pop_front("r1");
        assert!(queues.queues.is_empty());

        queues.enqueue(waiter(2, "r1", "a"));
        queues.remove("r1", 2);
        assert!(queues.queues.is_empty());
    }

    #[test]
    fn drain_all_empties_every_queue() {
        let mut queues = WaitQueues::new();
        queues.enqueue(waiter(1, "r1", "a"));
        queues.enqueue(waiter(2, "r2", "b"));

        let drained = queues.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(queues.total_waiting(), 0);
    }
}
