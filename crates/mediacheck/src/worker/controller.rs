//! Per-mode worker pools over the shared job queue.
//!
//! Each mode moves through `idle → activating → running → draining → idle`.
//! All run state lives in one mutex-guarded [`RunState`]; it is never held
//! across an `.await`.
//!
//! Every activation of a mode gets a fresh generation number and every
//! epoch (first activation from fully idle) a fresh epoch number. Workers
//! carry both, so a worker left over from a stopped run can neither touch
//! the counters of a newer activation nor write into a newer epoch's logs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::broadcast::{CheckEvent, EventBus};
use crate::checker::Checker;
use crate::db::DatabaseError;
use crate::error::{MediaCheckError, Result};
use crate::jobs::{CheckMode, ClaimedJob, JobStore};
use crate::worker::log_sink::WorkerLogSink;
use crate::worker::runner::{self, WorkerTicket};

/// Start and end of the current (or last) run epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckTiming {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

struct Activation {
    generation: u64,
    live_workers: usize,
}

struct RunState {
    active: BTreeMap<CheckMode, Activation>,
    next_worker_id: u64,
    next_generation: u64,
    timing: CheckTiming,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            active: BTreeMap::new(),
            next_worker_id: 1,
            next_generation: 1,
            timing: CheckTiming::default(),
        }
    }
}

/// State shared between the controller handle and its workers.
pub(crate) struct ControllerShared {
    pub(crate) store: JobStore,
    pub(crate) checker: Arc<dyn Checker>,
    pub(crate) log_sink: Arc<WorkerLogSink>,
    pub(crate) events: EventBus,
    run: Mutex<RunState>,
    epoch: AtomicU64,
}

impl ControllerShared {
    fn run(&self) -> MutexGuard<'_, RunState> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_current_epoch(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) == epoch
    }

    fn is_current(run: &RunState, ticket: &WorkerTicket) -> bool {
        run.active
            .get(&ticket.mode)
            .is_some_and(|a| a.generation == ticket.generation)
    }

    /// Claims the next job only while the worker's activation is current.
    ///
    /// Gated under the run lock like [`Self::persist_if_active`], so a worker
    /// outliving a stop can never take a job queued by a later activation.
    pub(crate) fn claim_if_active(
        &self,
        ticket: &WorkerTicket,
    ) -> Option<std::result::Result<Option<ClaimedJob>, DatabaseError>> {
        let run = self.run();
        if !Self::is_current(&run, ticket) {
            return None;
        }
        Some(self.store.claim_next_pending_job(ticket.mode))
    }

    /// Runs `persist` only while the worker's activation is current.
    ///
    /// Holding the run lock across the write orders it against
    /// [`CheckController::stop_checking`]: either the result lands before the
    /// stop deletes in-flight rows, or it is discarded.
    pub(crate) fn persist_if_active<T>(
        &self,
        ticket: &WorkerTicket,
        persist: impl FnOnce(&JobStore) -> std::result::Result<T, DatabaseError>,
    ) -> Option<std::result::Result<T, DatabaseError>> {
        let run = self.run();
        if !Self::is_current(&run, ticket) {
            return None;
        }
        Some(persist(&self.store))
    }

    /// Bookkeeping for a worker leaving its loop, for whatever reason.
    pub(crate) fn worker_exited(&self, ticket: &WorkerTicket) {
        let mut run = self.run();

        if self.is_current_epoch(ticket.epoch) {
            self.log_sink.stop_worker(ticket.worker_id);
        }

        let Some(activation) = run.active.get_mut(&ticket.mode) else {
            return;
        };
        if activation.generation != ticket.generation {
            return;
        }

        activation.live_workers = activation.live_workers.saturating_sub(1);
        if activation.live_workers > 0 {
            return;
        }

        run.active.remove(&ticket.mode);
        info!(mode = %ticket.mode, "All workers drained");

        if run.active.is_empty() {
            run.timing.finished_at = Some(Utc::now());
            let stats = match self.store.get_job_stats() {
                Ok(stats) => Some(stats),
                Err(e) => {
                    warn!(error = %e, "Failed to read final job stats");
                    None
                }
            };
            self.events.checks().send(CheckEvent::check_complete(stats));
        }
    }
}

/// Starts, stops and reports on worker pools.
#[derive(Clone)]
pub struct CheckController {
    shared: Arc<ControllerShared>,
    default_concurrency: usize,
}

impl CheckController {
    pub fn new(
        store: JobStore,
        checker: Arc<dyn Checker>,
        log_sink: Arc<WorkerLogSink>,
        events: EventBus,
        default_concurrency: usize,
    ) -> Self {
        Self {
            shared: Arc::new(ControllerShared {
                store,
                checker,
                log_sink,
                events,
                run: Mutex::new(RunState::default()),
                epoch: AtomicU64::new(0),
            }),
            default_concurrency: default_concurrency.max(1),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.shared.store
    }

    pub fn log_sink(&self) -> &WorkerLogSink {
        &self.shared.log_sink
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// Queues one job per file and spawns `concurrency` workers for `mode`.
    ///
    /// Returns `Ok(false)` without doing anything if the mode is already
    /// active or `file_ids` is empty. Must be called from within a Tokio
    /// runtime.
    pub fn start_checking(
        &self,
        mode: CheckMode,
        file_ids: &[String],
        concurrency: Option<usize>,
    ) -> Result<bool> {
        if file_ids.is_empty() {
            debug!(%mode, "Ignoring start with no files");
            return Ok(false);
        }

        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| MediaCheckError::Runtime(e.to_string()))?;

        let shared = &self.shared;
        let mut run = shared.run();
        if run.active.contains_key(&mode) {
            debug!(%mode, "Mode already running");
            return Ok(false);
        }

        shared.store.create_jobs(file_ids, mode)?;

        if run.active.is_empty() {
            if let Err(e) = shared.log_sink.clear_workers() {
                warn!(error = %e, "Failed to clear worker logs for new run");
            }
            run.next_worker_id = 1;
            run.timing = CheckTiming {
                started_at: Some(Utc::now()),
                finished_at: None,
            };
            shared.epoch.fetch_add(1, Ordering::AcqRel);
        }
        let epoch = shared.epoch.load(Ordering::Acquire);

        let worker_count = concurrency.unwrap_or(self.default_concurrency).max(1);
        let generation = run.next_generation;
        run.next_generation += 1;
        run.active.insert(
            mode,
            Activation {
                generation,
                live_workers: worker_count,
            },
        );

        for _ in 0..worker_count {
            let worker_id = run.next_worker_id;
            run.next_worker_id += 1;

            if let Err(e) = shared.log_sink.init_worker(worker_id) {
                warn!(worker_id, error = %e, "Failed to create worker log");
            }

            let ticket = WorkerTicket {
                worker_id,
                mode,
                generation,
                epoch,
            };
            handle.spawn(runner::run_worker(Arc::clone(shared), ticket));
        }

        info!(
            %mode,
            files = file_ids.len(),
            workers = worker_count,
            "Started checking"
        );
        Ok(true)
    }

    /// Deactivates `mode` (or every mode) and deletes its pending and
    /// processing jobs. Always publishes `check_complete`.
    ///
    /// Workers mid-check are not interrupted; their results are discarded.
    pub fn stop_checking(&self, mode: Option<CheckMode>) -> Result<usize> {
        let shared = &self.shared;
        let mut run = shared.run();

        let was_running = match mode {
            Some(m) => run.active.remove(&m).is_some(),
            None => {
                let any = !run.active.is_empty();
                run.active.clear();
                any
            }
        };

        let deleted = shared.store.delete_pending_and_processing_jobs(mode)?;
        if was_running && run.active.is_empty() {
            run.timing.finished_at = Some(Utc::now());
        }

        let stats = shared.store.get_job_stats()?;
        shared
            .events
            .checks()
            .send(CheckEvent::check_complete(Some(stats)));

        match mode {
            Some(m) => info!(mode = %m, deleted, "Stopped checking"),
            None => info!(deleted, "Stopped all checking"),
        }
        Ok(deleted)
    }

    pub fn is_checker_running(&self, mode: Option<CheckMode>) -> bool {
        let run = self.shared.run();
        match mode {
            Some(m) => run.active.contains_key(&m),
            None => !run.active.is_empty(),
        }
    }

    /// Number of live workers for `mode`, or across all modes.
    pub fn get_active_workers(&self, mode: Option<CheckMode>) -> usize {
        let run = self.shared.run();
        run.active
            .iter()
            .filter(|(m, _)| mode.map_or(true, |wanted| **m == wanted))
            .map(|(_, a)| a.live_workers)
            .sum()
    }

    pub fn get_running_modes(&self) -> Vec<CheckMode> {
        self.shared.run().active.keys().copied().collect()
    }

    pub fn get_check_timing(&self) -> CheckTiming {
        self.shared.run().timing
    }
}
