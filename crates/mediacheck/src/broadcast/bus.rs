use tokio::sync::broadcast;

use super::check_events::{CheckEvent, CheckEventBroadcaster};
use super::worker_events::{WorkerEvent, WorkerEventBroadcaster};

/// Both event families, shared by the controller, the log sink and observers.
#[derive(Clone, Default)]
pub struct EventBus {
    check: CheckEventBroadcaster,
    worker: WorkerEventBroadcaster,
}

/// A pair of receivers attached at the same moment.
pub struct EventReceivers {
    pub check: broadcast::Receiver<CheckEvent>,
    pub worker: broadcast::Receiver<WorkerEvent>,
}

impl EventBus {
    pub fn new(check_capacity: usize, worker_capacity: usize) -> Self {
        Self {
            check: CheckEventBroadcaster::new(check_capacity.max(1)),
            worker: WorkerEventBroadcaster::new(worker_capacity.max(1)),
        }
    }

    pub fn checks(&self) -> &CheckEventBroadcaster {
        &self.check
    }

    pub fn workers(&self) -> &WorkerEventBroadcaster {
        &self.worker
    }

    pub fn subscribe(&self) -> EventReceivers {
        EventReceivers {
            check: self.check.subscribe(),
            worker: self.worker.subscribe(),
        }
    }
}
