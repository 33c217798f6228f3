use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::broadcast::CheckEvent;
use crate::checker::{CheckOutput, OutputStream};
use crate::jobs::{CheckMode, JobStatus};
use crate::worker::controller::ControllerShared;
use crate::worker::log_sink::append_or_warn;

/// Identity of one worker within one mode activation and run epoch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerTicket {
    pub worker_id: u64,
    pub mode: CheckMode,
    pub generation: u64,
    pub epoch: u64,
}

/// Streams checker output into the worker's log while its epoch is current.
struct LogForwarder<'a> {
    shared: &'a ControllerShared,
    ticket: WorkerTicket,
}

impl CheckOutput for LogForwarder<'_> {
    fn line(&self, stream: OutputStream, text: &str) {
        let shared = self.shared;
        let epoch = self.ticket.epoch;
        append_or_warn(&shared.log_sink, self.ticket.worker_id, stream, text, || {
            shared.is_current_epoch(epoch)
        });
    }
}

/// Runs the exit bookkeeping even if the checker panics.
struct ExitGuard {
    shared: Arc<ControllerShared>,
    ticket: WorkerTicket,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.shared.worker_exited(&self.ticket);
    }
}

pub(crate) async fn run_worker(shared: Arc<ControllerShared>, ticket: WorkerTicket) {
    let span = info_span!("worker", worker_id = ticket.worker_id, mode = %ticket.mode);
    async move {
        let guard = ExitGuard {
            shared: Arc::clone(&shared),
            ticket,
        };
        let processed = work_queue(&shared, ticket).await;
        info!(processed, "Worker finished");
        drop(guard);
    }
    .instrument(span)
    .await
}

/// Claims and checks jobs until the queue drains or the activation ends.
/// Returns the number of results persisted.
async fn work_queue(shared: &ControllerShared, ticket: WorkerTicket) -> usize {
    let mut processed = 0;

    loop {
        let claimed = match shared.claim_if_active(&ticket) {
            None => {
                debug!("Activation ended");
                break;
            }
            Some(Ok(Some(claimed))) => claimed,
            Some(Ok(None)) => {
                debug!("No pending jobs left");
                break;
            }
            Some(Err(e)) => {
                error!(error = %e, "Failed to claim job");
                break;
            }
        };
        let job = claimed.job;
        let file = claimed.file;

        shared
            .log_sink
            .set_worker_file_while(ticket.worker_id, Some(&file.path), || {
                shared.is_current_epoch(ticket.epoch)
            });
        shared.events.checks().send(CheckEvent::processing(&job));
        debug!(job_id = %job.id, path = %file.path, "Checking file");

        let forwarder = LogForwarder {
            shared,
            ticket,
        };
        let outcome = shared
            .checker
            .check(Path::new(&file.path), ticket.mode, &forwarder)
            .await;

        let status = if outcome.success {
            JobStatus::Completed
        } else {
            JobStatus::Error
        };
        let error_message = outcome.error_text.as_deref();

        let persisted = shared.persist_if_active(&ticket, |store| {
            store.update_job_status(&job.id, status, error_message, outcome.duration_seconds)?;
            if outcome.success {
                if let Some(duration) = outcome.duration_seconds {
                    store.update_file_duration(&file.id, duration)?;
                }
            }
            store.get_job_stats()
        });

        let stats = match persisted {
            None => {
                info!(job_id = %job.id, "Run stopped during check, discarding result");
                break;
            }
            Some(Err(e)) => {
                error!(job_id = %job.id, error = %e, "Failed to record check result");
                match shared.store.release_claim(&job.id) {
                    Ok(true) => warn!(job_id = %job.id, "Returned job to the queue"),
                    Ok(false) => {}
                    Err(e) => error!(job_id = %job.id, error = %e, "Failed to release job"),
                }
                break;
            }
            Some(Ok(stats)) => stats,
        };

        if !outcome.success {
            warn!(job_id = %job.id, path = %file.path, "Check failed");
        }
        shared.events.checks().send(CheckEvent::job_finished(
            &job,
            status,
            error_message,
            Some(stats),
        ));
        processed += 1;
    }

    processed
}
