//! Background job domain entities.

pub mod model;
pub mod progress;
pub mod query;
pub mod status;

pub use model::{Job, NewJob};
pub use progress::ProgressSnapshot;
pub use query::{JobFilter, JobOrder, QueueStats};
pub use status::JobStatus;
