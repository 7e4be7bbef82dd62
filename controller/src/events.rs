use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use greenhouse_common::{ActuatorId, ToggleEvent};

use crate::error::InterruptOverflow;

pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    Overflow(InterruptOverflow),
    Rejected,
}

/// Bounded hand-off from the interrupt path to the control loop. Producers
/// only push; the loop is the only consumer.
#[derive(Debug, Clone)]
pub struct OverrideQueue {
    inner: Arc<Mutex<VecDeque<ToggleEvent>>>,
    capacity: usize,
}

impl OverrideQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(ActuatorId::ALL.len());
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueues `event`. When full, the oldest queued toggle for the same
    /// button makes room. Other buttons' toggles are never touched, so a full
    /// queue with nothing queued for this button rejects the press.
    pub fn push(&self, event: ToggleEvent) -> PushOutcome {
        let mut queue = self.lock();
        if queue.len() < self.capacity {
            queue.push_back(event);
            return PushOutcome::Queued;
        }

        let victim = queue.iter().position(|queued| queued.id == event.id);
        match victim.and_then(|index| queue.remove(index)) {
            Some(dropped) => {
                queue.push_back(event);
                PushOutcome::Overflow(InterruptOverflow { dropped })
            }
            None => PushOutcome::Rejected,
        }
    }

    pub fn drain(&self) -> Vec<ToggleEvent> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ToggleEvent>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for OverrideQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}
