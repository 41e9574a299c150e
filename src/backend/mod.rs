//! Backend Adapter: a narrow, typed interface over the ordered-set KV
//! backend (spec §6.2). `Protocol` (in `crate::protocol`) is the only layer
//! that reasons about invariants. Everything here is mechanical.
//!
//! Two implementations exist: [`redis_backend::RedisBackend`], the real
//! thing, and [`memory::InMemoryBackend`], an in-process fake used by the
//! unit tests so the Channel Protocol's invariants (spec §8) can be
//! verified without a live server.

pub mod lock;
pub mod memory;
pub mod redis_backend;

use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

pub use memory::InMemoryBackend;
pub use redis_backend::RedisBackend;

/// One member of an ordered set, as returned by a range-with-scores query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: u64,
}

/// A single step of a pipelined, all-or-nothing transaction (spec §6.2).
#[derive(Debug, Clone)]
pub enum PipelineOp {
    ZAdd {
        key: String,
        member: String,
        score: u64,
    },
    ZRem {
        key: String,
        member: String,
    },
    ZRemRangeByScore {
        key: String,
        min: u64,
        max: u64,
    },
    Del {
        key: String,
    },
    ZCard {
        key: String,
    },
}

/// Result of one pipelined step. Only the steps that produce a
/// caller-visible value populate anything beyond `Done`.
#[derive(Debug, Clone)]
pub enum PipelineValue {
    Done,
    Int(i64),
}

/// The minimal backend surface the Channel Protocol needs: atomic integer
/// increment, ordered-set insert/range/remove, cardinality, key deletion,
/// pipelined all-or-nothing transactions, and a named advisory lock with a
/// lease timeout (spec §6.2).
pub trait Backend {
    /// Atomically increments the integer counter at `key` and returns the
    /// new value. The counter behaves as if starting at 0.
    fn incr(&mut self, key: &str) -> Result<u64>;

    /// Returns all members of the ordered set at `key`, in score order.
    /// An absent set is treated as empty.
    fn zrange_with_scores(&mut self, key: &str) -> Result<Vec<ScoredMember>>;

    /// Returns members with `min < score <= max`, in score order. An
    /// absent set is treated as empty.
    fn zrange_by_score(&mut self, key: &str, min_exclusive: u64, max: u64) -> Result<Vec<String>>;

    /// Cardinality of the ordered set at `key`. An absent set is 0.
    fn zcard(&mut self, key: &str) -> Result<u64>;

    /// Executes a batch of writes as a single all-or-nothing transaction
    /// and returns one [`PipelineValue`] per op, in order.
    fn exec_pipeline(&mut self, ops: &[PipelineOp]) -> Result<Vec<PipelineValue>>;

    /// Attempts, without blocking or retrying, to acquire the named
    /// advisory lock for `ttl_ms`. Returns `Some(token)` on success;
    /// `token` must be presented back to [`Backend::release_lock`] so a
    /// stale holder can never release someone else's lock.
    fn try_acquire_lock(&mut self, name: &str, ttl_ms: u64) -> Result<Option<String>>;

    /// Releases the named lock iff it is still held by `token`. A no-op
    /// (not an error) if the lease already expired or was taken over by
    /// another peer.
    fn release_lock(&mut self, name: &str, token: &str) -> Result<()>;

    /// Round-trip check that the backend is reachable.
    fn ping(&mut self) -> Result<()>;
}

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Acquires `name` with the given lease/timeout, runs `body`, and releases
/// the lock on every exit path, including when `body` returns an error.
/// This is the scoped-acquisition discipline spec §5 and §9 require of
/// advisory locks.
pub fn with_lock<B, T>(
    backend: &mut B,
    name: &str,
    timeout_ms: u64,
    body: impl FnOnce(&mut B) -> Result<T>,
) -> Result<T>
where
    B: Backend,
{
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    let token = loop {
        if let Some(token) = backend.try_acquire_lock(name, timeout_ms)? {
            break token;
        }
        if Instant::now() >= deadline {
            return Err(Error::TimeoutError {
                lock_name: name.to_string(),
                timeout_ms,
            });
        }
        thread::sleep(LOCK_RETRY_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
    };

    let result = body(backend);
    // Release on all exit paths, including an error from `body`.
    let release_result = backend.release_lock(name, &token);
    match result {
        Ok(value) => release_result.map(|_| value),
        Err(err) => {
            let _ = release_result;
            Err(err)
        }
    }
}
