use chrono::{DateTime, FixedOffset};
use tokio::sync::mpsc;
use tracing::info;

use greenhouse_common::{ActuatorId, PerActuator, SensorReading};

use crate::{
    error::{ActuatorError, HardwareError, SensorError},
    hardware::{ButtonEdge, HardwareBus},
};

/// Bus for running without a Pi. Temperature drifts toward ambient and reacts
/// to the heater and vent fan; the button stream never fires.
#[derive(Debug)]
pub struct SimulatedBus {
    temperature_c: f32,
    ambient_c: f32,
    reads: u64,
    powered: PerActuator<bool>,
    buttons: Option<mpsc::Sender<ButtonEdge>>,
}

impl SimulatedBus {
    pub fn new(ambient_c: f32) -> Self {
        Self {
            temperature_c: ambient_c,
            ambient_c,
            reads: 0,
            powered: PerActuator::from_fn(|_| false),
            buttons: None,
        }
    }

    fn step(&mut self) {
        self.temperature_c += (self.ambient_c - self.temperature_c) * 0.05;
        if self.powered[ActuatorId::Heater] {
            self.temperature_c += 0.4;
        }
        if self.powered[ActuatorId::VentFan] {
            self.temperature_c -= 0.5;
        }
    }
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new(18.0)
    }
}

impl HardwareBus for SimulatedBus {
    async fn read_sensor(
        &mut self,
        at: DateTime<FixedOffset>,
    ) -> Result<SensorReading, SensorError> {
        self.reads = self.reads.saturating_add(1);
        self.step();

        let humidity = 55.0 + ((self.reads % 6) as f32 * 0.5);
        let pressure = 1013.0 + ((self.reads % 4) as f32 * 0.25);
        Ok(SensorReading::new(at, self.temperature_c, humidity, pressure))
    }

    async fn set_actuator(&mut self, id: ActuatorId, powered: bool) -> Result<(), ActuatorError> {
        info!(component = "simulated", actuator = %id, powered, "actuator set");
        self.powered[id] = powered;
        Ok(())
    }

    async fn set_indicator(&mut self, id: ActuatorId, lit: bool) -> Result<(), ActuatorError> {
        info!(component = "simulated", actuator = %id, lit, "indicator set");
        Ok(())
    }

    fn subscribe_button_events(&mut self) -> Result<mpsc::Receiver<ButtonEdge>, HardwareError> {
        if self.buttons.is_some() {
            return Err(HardwareError::AlreadySubscribed);
        }
        let (tx, rx) = mpsc::channel(1);
        // Holding the sender keeps the stream open without ever sending.
        self.buttons = Some(tx);
        Ok(rx)
    }

    async fn close(&mut self) {
        self.buttons = None;
        info!(component = "simulated", "simulated bus closed");
    }
}
