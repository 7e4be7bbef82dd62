use std::time::Duration;

use greenhouse_common::{ActuatorId, ConfigError, ToggleEvent};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor read failed: {0}")]
    Read(String),
    #[error("sensor read timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("{actuator}: rf transmit failed: {reason}")]
    Transmit {
        actuator: ActuatorId,
        reason: String,
    },
    #[error("{actuator}: indicator write failed: {reason}")]
    Indicator {
        actuator: ActuatorId,
        reason: String,
    },
    #[error("{actuator}: write timed out after {after:?}")]
    Timeout { actuator: ActuatorId, after: Duration },
}

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("hardware unavailable: {0}")]
    Unavailable(String),
    #[error("gpio pin {pin}: {reason}")]
    Gpio { pin: u8, reason: String },
    #[error("button events already subscribed")]
    AlreadySubscribed,
}

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("state log io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state record serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("interrupt overflow: dropped queued toggle for {} at {}ms", .dropped.id, .dropped.at_ms)]
pub struct InterruptOverflow {
    pub dropped: ToggleEvent,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Hardware(#[from] HardwareError),
    #[error(transparent)]
    Recorder(#[from] RecorderError),
}
