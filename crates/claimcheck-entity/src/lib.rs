//! # claimcheck-entity
//!
//! Domain entity models for ClaimCheck. The queue persists a single table,
//! `jobs`; every struct in this crate is either a row of that table or a
//! value object describing how rows are created, filtered or summarized.
//! Row types additionally derive `sqlx::FromRow`.

pub mod job;
