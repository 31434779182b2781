//! # claimcheck-database
//!
//! PostgreSQL connection management, schema migrations, and the two
//! [`JobStore`] implementations: [`JobRepository`] over PostgreSQL and
//! [`MemoryJobStore`] for single-process use and tests.

pub mod connection;
pub mod memory;
pub mod migration;
pub mod repositories;
pub mod store;

pub use connection::DatabasePool;
pub use memory::MemoryJobStore;
pub use repositories::JobRepository;
pub use store::{InsertOutcome, JobStore};
