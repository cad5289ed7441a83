//! SQLite Persistence

pub mod database;
mod task_store;

pub use database::{create_pool, run_migrations, DbPool};
pub use task_store::SqliteTaskStore;
