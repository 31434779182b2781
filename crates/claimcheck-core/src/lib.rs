//! # claimcheck-core
//!
//! Core crate for ClaimCheck. Contains the configuration schema, typed
//! identifiers, the clock abstraction, limit/offset page windows, and the
//! unified error system.
//!
//! This crate has **no** internal dependencies on other ClaimCheck crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
