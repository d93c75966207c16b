use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::detector;
use crate::error::LockError;
use crate::resolver;
use crate::table::LockTable;
use crate::wait_queue::{WaitQueues, Waiter};

pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Interval between background deadlock sweeps. `None` disables the
    /// sweep task entirely; `detect_and_resolve` is still available.
    pub sweep_interval: Option<Duration>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AcquireOptions {
    pub timeout: Duration,
    pub priority: Option<i32>,
    /// Return `false` immediately instead of queueing when the lock is busy.
    pub nowait: bool,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        AcquireOptions {
            timeout: DEFAULT_ACQUIRE_TIMEOUT,
            priority: None,
            nowait: false,
        }
    }
}

/// Read-only diagnostics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct LockStats {
    pub active_locks: usize,
    pub waiting_requests: usize,
    pub owners: usize,
    /// Mean queue-to-grant latency over requests granted out of the queue.
    pub average_wait_time_ms: f64,
    pub grants: u64,
    pub timeouts: u64,
    pub deadlocks_resolved: u64,
}

struct ManagerState {
    table: LockTable,
    queues: WaitQueues,
    next_lock_id: u64,
    next_request_id: u64,
    grants: u64,
    timeouts: u64,
    deadlocks_resolved: u64,
    wait_samples: u64,
    wait_total: Duration,
    sweep: Option<JoinHandle<()>>,
    closed: bool,
}

/// In-process exclusive lock manager with deadlock detection and resolution.
///
/// All state sits behind one mutex and no await point ever runs while it is
/// held, so acquire/release/sweep mutations are serialized and a queued
/// request is settled exactly once: whichever path removes the waiter from
/// its queue owns the wakeup. Background tasks hold only weak references and
/// cannot outlive the manager.
pub struct LockManager {
    state: Arc<Mutex<ManagerState>>,
}

impl LockManager {
    /// Create a manager with the default 5s background sweep. Must be called
    /// from within a tokio runtime.
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        let state = Arc::new(Mutex::new(ManagerState {
            table: LockTable::new(),
            queues: WaitQueues::new(),
            next_lock_id: 1,
            next_request_id: 1,
            grants: 0,
            timeouts: 0,
            deadlocks_resolved: 0,
            wait_samples: 0,
            wait_total: Duration::ZERO,
            sweep: None,
            closed: false,
        }));
        if let Some(period) = config.sweep_interval {
            let weak = Arc::downgrade(&state);
            let handle = tokio::spawn(Self::sweep_loop(weak, period));
            state.lock().unwrap().sweep = Some(handle);
        }
        info!("lock manager started");
        LockManager { state }
    }

    /// Acquire the exclusive lock on `resource` for `owner`.
    ///
    /// Resolves `Ok(true)` when granted (immediately, or later out of the
    /// wait queue), `Ok(false)` on timeout or when `nowait` finds the lock
    /// busy, and `Err(LockError::DeadlockDetected)` when queueing the request
    /// would close a cycle in the wait-for graph. Re-acquiring a lock already
    /// held by `owner` returns `Ok(true)` without creating a second lock.
    pub async fn acquire(
        &self,
        resource: &str,
        owner: &str,
        options: AcquireOptions,
    ) -> Result<bool, LockError> {
        let wake_rx = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(LockError::Shutdown);
            }

            let holder = match state.table.holder(resource).map(|lock| lock.owner.clone()) {
                None => {
                    let lock_id = state.next_lock_id;
                    state.next_lock_id += 1;
                    state
                        .table
                        .grant(resource, owner, lock_id, options.priority, Instant::now());
                    state.grants += 1;
                    debug!(resource = %resource, owner = %owner, lock_id, "lock granted");
                    return Ok(true);
                }
                Some(holder) if holder == owner => {
                    debug!(resource = %resource, owner = %owner, "lock already held by requester");
                    return Ok(true);
                }
                Some(holder) => holder,
            };

            if options.nowait {
                debug!(resource = %resource, owner = %owner, "lock busy, nowait");
                return Ok(false);
            }

            // Eager check: would this request, queued behind the current
            // holder, close a cycle?
            let mut graph = detector::build_graph(&state.table, &state.queues);
            graph
                .entry(owner.to_string())
                .or_default()
                .insert(holder);
            if let Some(cycle) = detector::cycle_through(&graph, owner) {
                warn!(resource = %resource, owner = %owner, cycle = ?cycle, "acquisition rejected, would deadlock");
                return Err(LockError::DeadlockDetected {
                    owner: owner.to_string(),
                    resource: resource.to_string(),
                    cycle,
                });
            }

            let request_id = state.next_request_id;
            state.next_request_id += 1;
            let (wake, wake_rx) = oneshot::channel();
            state.queues.enqueue(Waiter {
                id: request_id,
                resource: resource.to_string(),
                owner: owner.to_string(),
                requested_at: Instant::now(),
                priority: options.priority,
                wake,
            });
            let timer = tokio::spawn(Self::timeout_task(
                Arc::downgrade(&self.state),
                resource.to_string(),
                request_id,
                options.timeout,
            ));
            state.queues.register_timer(request_id, timer);
            debug!(
                resource = %resource,
                owner = %owner,
                request_id,
                timeout_ms = options.timeout.as_millis() as u64,
                "lock busy, request queued"
            );
            wake_rx
        };

        Ok(wake_rx.await.unwrap_or(false))
    }

    /// Release `owner`'s lock on `resource`. Releasing a lock the owner does
    /// not hold is logged and ignored.
    pub fn release(&self, resource: &str, owner: &str) {
        let woken = {
            let mut state = self.state.lock().unwrap();
            Self::release_locked(&mut state, resource, owner)
        };
        for (wake, granted) in woken {
            let _ = wake.send(granted);
        }
    }

    /// Release plus FIFO hand-off, all under the state mutex: when a waiter
    /// exists the resource is never observably free between the two owners.
    /// Returns the wakeups to deliver once the mutex is dropped.
    fn release_locked(
        state: &mut ManagerState,
        resource: &str,
        owner: &str,
    ) -> Vec<(oneshot::Sender<bool>, bool)> {
        if !state.table.release(resource, owner) {
            warn!(resource = %resource, owner = %owner, "release ignored, lock not held by this owner");
            return Vec::new();
        }
        debug!(resource = %resource, owner = %owner, "lock released");

        let mut woken = Vec::new();
        if let Some(next) = state.queues.pop_front(resource) {
            if let Some(timer) = state.queues.take_timer(next.id) {
                timer.abort();
            }
            let lock_id = state.next_lock_id;
            state.next_lock_id += 1;
            let now = Instant::now();
            state
                .table
                .grant(resource, &next.owner, lock_id, next.priority, now);
            state.grants += 1;
            state.wait_samples += 1;
            state.wait_total += now.duration_since(next.requested_at);
            debug!(
                resource = %resource,
                owner = %next.owner,
                request_id = next.id,
                "lock handed off to next waiter"
            );
            woken.push((next.wake, true));
        }
        woken
    }

    async fn timeout_task(
        state: Weak<Mutex<ManagerState>>,
        resource: String,
        request_id: u64,
        timeout: Duration,
    ) {
        time::sleep(timeout).await;
        let Some(state) = state.upgrade() else { return };
        let expired = {
            let mut state = state.lock().unwrap();
            let waiter = state.queues.remove(&resource, request_id);
            if waiter.is_some() {
                state.queues.take_timer(request_id);
                state.timeouts += 1;
            }
            waiter
        };
        if let Some(waiter) = expired {
            debug!(
                resource = %waiter.resource,
                owner = %waiter.owner,
                request_id,
                "lock wait timed out"
            );
            let _ = waiter.wake.send(false);
        }
    }

    async fn sweep_loop(state: Weak<Mutex<ManagerState>>, period: Duration) {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        loop {
            ticker.tick().await;
            let Some(state) = state.upgrade() else { break };
            Self::run_sweep(&state);
        }
    }

    /// One full detection pass: rebuild the graph, resolve every cycle found.
    /// Each resolution hands off at least one contested lock, so the number
    /// of waiters strictly decreases and the pass terminates.
    fn run_sweep(state: &Arc<Mutex<ManagerState>>) -> usize {
        let mut resolved = 0;
        loop {
            let mut woken = Vec::new();
            {
                let mut state = state.lock().unwrap();
                if state.closed {
                    break;
                }
                let graph = detector::build_graph(&state.table, &state.queues);
                let Some(cycle) = detector::find_cycle(&graph) else { break };
                let Some(victim) =
                    resolver::select_victim(&cycle, &state.table).map(str::to_string)
                else {
                    break;
                };
                error!(cycle = ?cycle, victim = %victim, "deadlock detected, force-releasing victim locks");
                for resource in state.table.owned_resources(&victim) {
                    woken.extend(Self::release_locked(&mut state, &resource, &victim));
                }
                state.deadlocks_resolved += 1;
                resolved += 1;
            }
            for (wake, granted) in woken {
                let _ = wake.send(granted);
            }
        }
        resolved
    }

    /// Run one detection pass immediately, outside the periodic schedule.
    /// Returns the number of cycles resolved.
    pub fn detect_and_resolve(&self) -> usize {
        Self::run_sweep(&self.state)
    }

    pub fn stats(&self) -> LockStats {
        let state = self.state.lock().unwrap();
        let average_wait_time_ms = if state.wait_samples == 0 {
            0.0
        } else {
            state.wait_total.as_secs_f64() * 1000.0 / state.wait_samples as f64
        };
        LockStats {
            active_locks: state.table.active_locks(),
            waiting_requests: state.queues.total_waiting(),
            owners: state.table.owner_count(),
            average_wait_time_ms,
            grants: state.grants,
            timeouts: state.timeouts,
            deadlocks_resolved: state.deadlocks_resolved,
        }
    }

    /// Tear the manager down: stop the sweep, abort every pending timer,
    /// resolve every queued waiter `false`, clear both indices. Idempotent;
    /// later `acquire` calls fail with `LockError::Shutdown`.
    pub fn shutdown(&self) {
        let drained = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.closed = true;
            if let Some(sweep) = state.sweep.take() {
                sweep.abort();
            }
            let drained = state.queues.drain_all();
            state.table.clear();
            drained
        };
        info!(pending = drained.len(), "lock manager shut down");
        for waiter in drained {
            let _ = waiter.wake.send(false);
        }
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
