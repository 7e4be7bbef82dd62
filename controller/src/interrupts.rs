use greenhouse_common::{ButtonDebouncer, ToggleEvent};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, trace, warn};

use crate::{
    events::{OverrideQueue, PushOutcome},
    hardware::ButtonEdge,
};

/// Debounces raw press edges and posts toggles for the control loop to merge.
/// Never touches hardware or the actuator table.
#[derive(Debug)]
pub struct ButtonInterruptHandler {
    debouncer: ButtonDebouncer,
    queue: OverrideQueue,
}

impl ButtonInterruptHandler {
    pub fn new(debounce_ms: u64, queue: OverrideQueue) -> Self {
        Self {
            debouncer: ButtonDebouncer::new(debounce_ms),
            queue,
        }
    }

    pub fn handle_edge(&mut self, edge: ButtonEdge) -> Option<ToggleEvent> {
        let Some(toggle) = self.debouncer.on_edge(edge.id, edge.at_ms) else {
            trace!(component = "buttons", actuator = %edge.id, at_ms = edge.at_ms, "edge debounced");
            return None;
        };

        match self.queue.push(toggle) {
            PushOutcome::Queued => {
                debug!(component = "buttons", actuator = %toggle.id, at_ms = toggle.at_ms, "toggle queued");
            }
            PushOutcome::Overflow(overflow) => {
                debug!(component = "buttons", actuator = %overflow.dropped.id, "{overflow}");
            }
            PushOutcome::Rejected => {
                warn!(component = "buttons", actuator = %toggle.id, "toggle queue full, press dropped");
                return None;
            }
        }
        Some(toggle)
    }

    pub async fn run(mut self, mut edges: mpsc::Receiver<ButtonEdge>) {
        while let Some(edge) = edges.recv().await {
            self.handle_edge(edge);
        }
        info!(component = "buttons", "button event stream closed");
    }

    pub fn spawn(self, edges: mpsc::Receiver<ButtonEdge>) -> JoinHandle<()> {
        tokio::spawn(self.run(edges))
    }
}
