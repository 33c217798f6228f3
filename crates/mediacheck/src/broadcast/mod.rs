//! Event fan-out to live observers.
//!
//! Two typed families share an [`EventBus`]: file/job events
//! ([`CheckEvent`]) and worker/log events ([`WorkerEvent`]). Delivery is
//! best-effort to current subscribers with no replay.

pub mod bus;
pub mod check_events;
pub mod subscription;
pub mod worker_events;

pub use bus::{EventBus, EventReceivers};
pub use check_events::{CheckEvent, CheckEventBroadcaster, CheckEventKind};
pub use subscription::{LiveEvent, LiveSubscription, Snapshot};
pub use worker_events::{LogLine, OutputStream, WorkerEvent, WorkerEventBroadcaster, WorkerStatus};
