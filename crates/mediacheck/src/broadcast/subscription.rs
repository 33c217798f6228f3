//! Live observer stream: a snapshot first, then events from both families.

use std::time::Duration;

use futures_util::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use super::bus::EventReceivers;
use super::check_events::CheckEvent;
use super::worker_events::WorkerEvent;
use crate::jobs::{CheckMode, FileStats, JobStats};
use crate::worker::controller::CheckTiming;
use crate::worker::log_sink::WorkerOutput;

/// Current state read right after the receivers were attached.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub job_stats: JobStats,
    pub file_stats: FileStats,
    pub running_modes: Vec<CheckMode>,
    pub timing: CheckTiming,
    pub workers: Vec<WorkerOutput>,
}

/// One item delivered to a live observer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum LiveEvent {
    Snapshot(Box<Snapshot>),
    Check(CheckEvent),
    Worker(WorkerEvent),
    /// Nothing happened for the keep-alive interval.
    KeepAlive,
}

/// An observer attached to the event bus.
///
/// Events published between attaching and reading the snapshot are delivered
/// after the snapshot, so nothing is missed (duplicates are possible and
/// harmless since every event carries absolute state). Dropping the
/// subscription detaches it.
pub struct LiveSubscription {
    snapshot: Option<Box<Snapshot>>,
    receivers: EventReceivers,
    check_closed: bool,
    worker_closed: bool,
    keep_alive: Duration,
}

impl LiveSubscription {
    pub fn new(receivers: EventReceivers, snapshot: Snapshot, keep_alive: Duration) -> Self {
        Self {
            snapshot: Some(Box::new(snapshot)),
            receivers,
            check_closed: false,
            worker_closed: false,
            keep_alive,
        }
    }

    /// Waits for the next item. Returns `None` once both channels are closed.
    pub async fn next(&mut self) -> Option<LiveEvent> {
        if let Some(snapshot) = self.snapshot.take() {
            return Some(LiveEvent::Snapshot(snapshot));
        }

        loop {
            if self.check_closed && self.worker_closed {
                return None;
            }

            tokio::select! {
                res = self.receivers.check.recv(), if !self.check_closed => match res {
                    Ok(event) => return Some(LiveEvent::Check(event)),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Live subscriber lagged on check events");
                    }
                    Err(RecvError::Closed) => self.check_closed = true,
                },
                res = self.receivers.worker.recv(), if !self.worker_closed => match res {
                    Ok(event) => return Some(LiveEvent::Worker(event)),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Live subscriber lagged on worker events");
                    }
                    Err(RecvError::Closed) => self.worker_closed = true,
                },
                _ = tokio::time::sleep(self.keep_alive) => return Some(LiveEvent::KeepAlive),
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = LiveEvent> {
        stream::unfold(self, |mut sub| async move {
            let event = sub.next().await?;
            Some((event, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;
    use crate::broadcast::EventBus;

    fn empty_snapshot() -> Snapshot {
        Snapshot {
            job_stats: JobStats::default(),
            file_stats: FileStats::default(),
            running_modes: Vec::new(),
            timing: CheckTiming::default(),
            workers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_snapshot_comes_first() {
        let bus = EventBus::new(8, 8);
        let receivers = bus.subscribe();
        bus.workers().clear();

        let mut sub = LiveSubscription::new(receivers, empty_snapshot(), Duration::from_secs(30));

        assert!(matches!(sub.next().await, Some(LiveEvent::Snapshot(_))));
        assert!(matches!(
            sub.next().await,
            Some(LiveEvent::Worker(WorkerEvent::Clear))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_when_idle() {
        let bus = EventBus::new(8, 8);
        let mut sub = LiveSubscription::new(bus.subscribe(), empty_snapshot(), Duration::from_secs(15));

        sub.next().await;
        assert!(matches!(sub.next().await, Some(LiveEvent::KeepAlive)));
    }

    #[tokio::test]
    async fn test_lagged_receiver_skips_ahead() {
        let bus = EventBus::new(8, 2);
        let mut sub = LiveSubscription::new(bus.subscribe(), empty_snapshot(), Duration::from_secs(30));
        sub.next().await;

        for id in 0..5 {
            bus.workers().file(id, None);
        }

        match sub.next().await {
            Some(LiveEvent::Worker(WorkerEvent::File { worker_id, .. })) => {
                assert_eq!(worker_id, 3)
            }
            other => panic!("unexpected item: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_ends_when_bus_dropped() {
        let bus = EventBus::new(8, 8);
        let sub = LiveSubscription::new(bus.subscribe(), empty_snapshot(), Duration::from_secs(30));
        bus.checks().send(CheckEvent::check_complete(None));
        drop(bus);

        let items: Vec<LiveEvent> = sub.into_stream().collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], LiveEvent::Check(_)));
    }
}
