pub mod controller;
pub mod log_sink;
mod runner;

pub use controller::{CheckController, CheckTiming};
pub use log_sink::{LogSinkError, WorkerLogSink, WorkerOutput};
