//! Files, check jobs and the store that persists them.

pub mod model;
pub mod store;

pub use model::{
    CheckJob, CheckMode, ClaimedJob, FileStats, FileWithJobs, JobStats, JobStatus, MediaFile,
};
pub use store::JobStore;
