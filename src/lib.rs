//! kvguard - coordination primitives over a shared key-value store
//!
//! This crate lets many stateless service instances agree on rate limits,
//! hold mutually exclusive locks, and bulk-delete keys by prefix. All shared
//! state lives in Redis; every read-decide-write step is a single atomic
//! store operation, so no instance keeps authoritative state in memory.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod deadline;
pub mod error;
pub mod lock;
pub mod ratelimit;
pub mod scan;
pub mod store;

pub use config::KvGuardConfig;
pub use coordinator::Coordinator;
pub use deadline::Deadline;
pub use error::{KvGuardError, Result};
pub use lock::{DistributedLock, LockToken};
pub use ratelimit::{Algorithm, RateLimitDecision, RateLimitKey, RateLimiter, Window};
pub use scan::Scanner;
pub use store::{KvStore, MemoryStore, RedisStore};
