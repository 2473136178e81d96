//! # rollpilot-store
//!
//! Shared state for every caller of the goal engine: the goal queue, leases,
//! the append-only checkpoint log, idempotency records, the dead-letter queue,
//! candidate suppressions, approval tickets and the runtime autonomy policy.
//!
//! Two backends implement [`GoalStore`]: [`MemoryGoalStore`] for tests and
//! single-process use, and [`SqliteGoalStore`] for durable, multi-process use.

pub mod memory;
pub mod records;
pub mod sqlite;
pub mod store;

pub use memory::MemoryGoalStore;
pub use records::*;
pub use sqlite::SqliteGoalStore;
pub use store::{GoalStore, open_store};
