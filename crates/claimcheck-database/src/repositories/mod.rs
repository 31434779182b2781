//! Repository implementations backed by PostgreSQL.

pub mod job;

pub use job::JobRepository;
