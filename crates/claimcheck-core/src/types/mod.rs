//! Core type definitions used across the ClaimCheck workspace.

pub mod id;
pub mod pagination;

pub use id::JobId;
pub use pagination::PageWindow;
