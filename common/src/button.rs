use crate::types::{ActuatorId, PerActuator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonPhase {
    Idle,
    Pressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleEvent {
    pub id: ActuatorId,
    pub at_ms: u64,
}

/// Per-button Idle/Pressed machine. A button stays Pressed for `window_ms`
/// after an accepted edge and ignores every edge in that window.
#[derive(Debug, Clone)]
pub struct ButtonDebouncer {
    window_ms: u64,
    last_accepted_ms: PerActuator<Option<u64>>,
}

impl ButtonDebouncer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            last_accepted_ms: PerActuator::from_fn(|_| None),
        }
    }

    pub fn phase(&self, id: ActuatorId, now_ms: u64) -> ButtonPhase {
        match self.last_accepted_ms[id] {
            Some(last) if now_ms.saturating_sub(last) < self.window_ms => ButtonPhase::Pressed,
            _ => ButtonPhase::Idle,
        }
    }

    pub fn on_edge(&mut self, id: ActuatorId, at_ms: u64) -> Option<ToggleEvent> {
        if self.phase(id, at_ms) == ButtonPhase::Pressed {
            return None;
        }

        self.last_accepted_ms[id] = Some(at_ms);
        Some(ToggleEvent { id, at_ms })
    }
}
