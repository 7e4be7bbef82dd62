use std::{
    future::Future,
    sync::OnceLock,
    time::Instant,
};

use chrono::{DateTime, FixedOffset};
use tokio::sync::mpsc;

use greenhouse_common::{ActuatorId, SensorReading};

use crate::error::{ActuatorError, HardwareError, SensorError};

pub const BUTTON_EDGE_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEdge {
    pub id: ActuatorId,
    pub at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Output {
    Actuator,
    Indicator,
}

/// Implementations must be cancel-safe: the loop drops a pending call on
/// timeout or shutdown.
pub trait HardwareBus: Send {
    fn read_sensor(
        &mut self,
        at: DateTime<FixedOffset>,
    ) -> impl Future<Output = Result<SensorReading, SensorError>> + Send;

    fn set_actuator(
        &mut self,
        id: ActuatorId,
        powered: bool,
    ) -> impl Future<Output = Result<(), ActuatorError>> + Send;

    fn set_indicator(
        &mut self,
        id: ActuatorId,
        lit: bool,
    ) -> impl Future<Output = Result<(), ActuatorError>> + Send;

    fn subscribe_button_events(&mut self) -> Result<mpsc::Receiver<ButtonEdge>, HardwareError>;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

pub fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_never_goes_backwards() {
        let first = monotonic_ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = monotonic_ms();
        assert!(second >= first + 5);
    }
}
