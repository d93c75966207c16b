use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    /// Queueing the request would close a cycle in the wait-for graph.
    /// Raised synchronously, before the request is ever enqueued.
    #[error("deadlock: {owner} waiting on {resource} would close cycle {cycle:?}")]
    DeadlockDetected {
        owner: String,
        resource: String,
        cycle: Vec<String>,
    },

    /// The manager has been shut down and accepts no new requests.
    #[error("lock manager has been shut down")]
    Shutdown,
}
