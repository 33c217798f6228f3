//! mediacheck - concurrent media file verification.
//!
//! Files are registered in a SQLite-backed [`JobStore`]. Starting a check
//! queues one job per file for a [`CheckMode`] and spawns a pool of workers
//! that claim jobs atomically, run a [`Checker`] (ffprobe/ffmpeg by default),
//! stream its output to per-worker logs and publish progress on an
//! [`EventBus`]. [`CheckEngine`] ties it all together.

pub mod broadcast;
pub mod checker;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod telemetry;
pub mod worker;

pub use broadcast::{
    CheckEvent, CheckEventKind, EventBus, LiveEvent, LiveSubscription, Snapshot, WorkerEvent,
};
pub use checker::{CheckOutcome, CheckOutput, Checker, FfmpegChecker, OutputStream};
pub use config::{load_config, load_config_from_str, Config};
pub use db::{Database, DatabaseError};
pub use engine::CheckEngine;
pub use error::{ConfigError, MediaCheckError, Result};
pub use jobs::{
    CheckJob, CheckMode, ClaimedJob, FileStats, FileWithJobs, JobStats, JobStatus, JobStore,
    MediaFile,
};
pub use worker::{CheckController, CheckTiming, WorkerLogSink, WorkerOutput};
