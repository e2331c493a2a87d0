//! Database layer for the Ringline platform.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode
//! initialization, and embedded SQL migrations. The conversation log, the
//! call dispatch log, and the patient directory all live in tables created
//! through versioned migrations managed here.
//!
//! SQLite is a deliberate choice: a single call server owns its own
//! transcript store with no external database process, and WAL mode gives
//! concurrent readers alongside the single writer that the append-only
//! conversation log needs.

mod migrations;
mod pool;

pub use migrations::run_migrations;
pub use pool::{create_pool, DbPool, DbSettings, PoolError};
