//! Limit/offset windows for list queries.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// A `LIMIT`/`OFFSET` window over an ordered listing.
///
/// `limit = None` returns every matching row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageWindow {
    /// Maximum number of rows to return.
    #[serde(default)]
    pub limit: Option<i64>,
    /// Number of matching rows to skip.
    #[serde(default)]
    pub offset: i64,
}

impl PageWindow {
    /// Create a new window.
    pub fn new(limit: Option<i64>, offset: i64) -> Self {
        Self { limit, offset }
    }

    /// Validate the window and cap `limit` at `max_limit`.
    pub fn validated(self, max_limit: i64) -> Result<Self, AppError> {
        if let Some(limit) = self.limit {
            if limit < 1 {
                return Err(AppError::validation("limit must be at least 1"));
            }
        }
        if self.offset < 0 {
            return Err(AppError::validation("offset must not be negative"));
        }
        Ok(Self {
            limit: self.limit.map(|limit| limit.min(max_limit.max(1))),
            offset: self.offset,
        })
    }

    /// Apply the window to an in-memory, already ordered sequence.
    pub fn apply<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let skipped = items.into_iter().skip(self.offset.max(0) as usize);
        match self.limit {
            Some(limit) => skipped.take(limit.max(0) as usize).collect(),
            None => skipped.collect(),
        }
    }
}
