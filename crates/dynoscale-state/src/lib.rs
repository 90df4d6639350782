//! dynoscale-state — shared scaling records for Dynoscale.
//!
//! Every autoscaled process type owns one record: a flat map of field name
//! to plain scalar text, addressed by the process's cache key. Independent
//! runtimes (an enqueuing side and one or more processing sides) converge
//! on the same view of a process by reading and writing this record.
//!
//! # Backends
//!
//! - [`RedisStateStore`]: Redis hashes (`HSET`/`HDEL`/`HGETALL`). The only
//!   backend that can be shared across OS processes.
//! - [`RedbStateStore`]: embedded [redb](https://docs.rs/redb), on-disk or
//!   in-memory. redb takes an exclusive lock on its file, so this backend
//!   serves single-runtime deployments and tests.
//!
//! # Consistency
//!
//! There are no transactions spanning a read and a later write. Each write
//! is applied to one record atomically and the last writer wins per field.

pub mod error;
pub mod redb_store;
pub mod redis_store;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use redb_store::RedbStateStore;
pub use redis_store::RedisStateStore;
pub use store::{Record, SharedStateStore};
