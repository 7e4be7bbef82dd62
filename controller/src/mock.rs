//! Deterministic test doubles. Each double hands out a cloneable handle so a
//! test can script inputs and inspect writes while the loop owns the double.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, FixedOffset};
use tokio::sync::mpsc;

use greenhouse_common::{ActuatorId, SensorReading, StateRecord};

use crate::{
    error::{ActuatorError, HardwareError, RecorderError, SensorError},
    hardware::{ButtonEdge, HardwareBus, Output, BUTTON_EDGE_BUFFER},
    recorder::StateRecorder,
};

const DEFAULT_TEMPERATURE_C: f32 = 20.0;
const DEFAULT_HUMIDITY: f32 = 50.0;
const DEFAULT_PRESSURE_HPA: f32 = 1013.0;

#[derive(Debug, Default)]
struct MockState {
    readings: VecDeque<Result<f32, String>>,
    last_temperature_c: Option<f32>,
    hang_sensor: bool,
    write_failures: HashMap<(Output, ActuatorId), u32>,
    hang_writes: bool,
    writes: Vec<(ActuatorId, bool)>,
    indicators: Vec<(ActuatorId, bool)>,
    attempts: Vec<(Output, ActuatorId, bool)>,
    buttons: Option<mpsc::Sender<ButtonEdge>>,
    closed: bool,
}

#[derive(Debug, Clone, Default)]
struct Shared(Arc<Mutex<MockState>>);

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scripted bus. Sensor reads pop queued temperatures; once the queue is empty
/// the last temperature repeats.
#[derive(Debug)]
pub struct MockBus {
    shared: Shared,
}

#[derive(Debug, Clone)]
pub struct MockHandle {
    shared: Shared,
}

impl MockBus {
    pub fn new() -> (Self, MockHandle) {
        let shared = Shared::default();
        (
            Self {
                shared: shared.clone(),
            },
            MockHandle { shared },
        )
    }

    async fn write(&self, output: Output, id: ActuatorId, value: bool) -> Result<(), ActuatorError> {
        let hang = {
            let mut state = self.shared.lock();
            state.attempts.push((output, id, value));
            state.hang_writes
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.shared.lock();
        if let Some(remaining) = state.write_failures.get_mut(&(output, id)) {
            if *remaining > 0 {
                *remaining -= 1;
                let reason = "scripted failure".to_string();
                return Err(match output {
                    Output::Actuator => ActuatorError::Transmit { actuator: id, reason },
                    Output::Indicator => ActuatorError::Indicator { actuator: id, reason },
                });
            }
        }

        match output {
            Output::Actuator => state.writes.push((id, value)),
            Output::Indicator => state.indicators.push((id, value)),
        }
        Ok(())
    }
}

impl HardwareBus for MockBus {
    async fn read_sensor(
        &mut self,
        at: DateTime<FixedOffset>,
    ) -> Result<SensorReading, SensorError> {
        let (hang, next) = {
            let mut state = self.shared.lock();
            let next = state.readings.pop_front();
            (state.hang_sensor, next)
        };
        if hang {
            std::future::pending::<()>().await;
        }

        match next {
            Some(Err(reason)) => Err(SensorError::Read(reason)),
            Some(Ok(temperature_c)) => {
                self.shared.lock().last_temperature_c = Some(temperature_c);
                Ok(SensorReading::new(at, temperature_c, DEFAULT_HUMIDITY, DEFAULT_PRESSURE_HPA))
            }
            None => {
                let temperature_c = self
                    .shared
                    .lock()
                    .last_temperature_c
                    .unwrap_or(DEFAULT_TEMPERATURE_C);
                Ok(SensorReading::new(at, temperature_c, DEFAULT_HUMIDITY, DEFAULT_PRESSURE_HPA))
            }
        }
    }

    async fn set_actuator(&mut self, id: ActuatorId, powered: bool) -> Result<(), ActuatorError> {
        self.write(Output::Actuator, id, powered).await
    }

    async fn set_indicator(&mut self, id: ActuatorId, lit: bool) -> Result<(), ActuatorError> {
        self.write(Output::Indicator, id, lit).await
    }

    fn subscribe_button_events(&mut self) -> Result<mpsc::Receiver<ButtonEdge>, HardwareError> {
        let mut state = self.shared.lock();
        if state.buttons.is_some() {
            return Err(HardwareError::AlreadySubscribed);
        }
        let (tx, rx) = mpsc::channel(BUTTON_EDGE_BUFFER);
        state.buttons = Some(tx);
        Ok(rx)
    }

    async fn close(&mut self) {
        let mut state = self.shared.lock();
        state.buttons = None;
        state.closed = true;
    }
}

impl MockHandle {
    pub fn push_temperature(&self, temperature_c: f32) {
        self.shared.lock().readings.push_back(Ok(temperature_c));
    }

    pub fn push_sensor_error(&self, reason: &str) {
        self.shared.lock().readings.push_back(Err(reason.to_string()));
    }

    pub fn hang_sensor(&self, hang: bool) {
        self.shared.lock().hang_sensor = hang;
    }

    /// Makes every following write block until cancelled. Blocked writes
    /// still show up in `attempts`.
    pub fn hang_writes(&self, hang: bool) {
        self.shared.lock().hang_writes = hang;
    }

    /// The next `count` writes to `id` on `output` fail.
    pub fn fail_writes(&self, output: Output, id: ActuatorId, count: u32) {
        self.shared.lock().write_failures.insert((output, id), count);
    }

    pub fn writes(&self) -> Vec<(ActuatorId, bool)> {
        self.shared.lock().writes.clone()
    }

    pub fn indicators(&self) -> Vec<(ActuatorId, bool)> {
        self.shared.lock().indicators.clone()
    }

    pub fn attempts(&self) -> Vec<(Output, ActuatorId, bool)> {
        self.shared.lock().attempts.clone()
    }

    pub fn clear_log(&self) {
        let mut state = self.shared.lock();
        state.writes.clear();
        state.indicators.clear();
        state.attempts.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Injects a raw press edge as if the GPIO interrupt had fired. Returns
    /// false when no one subscribed or the stream is closed.
    pub async fn press(&self, id: ActuatorId, at_ms: u64) -> bool {
        let sender = self.shared.lock().buttons.clone();
        match sender {
            Some(sender) => sender.send(ButtonEdge { id, at_ms }).await.is_ok(),
            None => false,
        }
    }
}

#[derive(Debug)]
pub struct MemoryRecorder {
    log: RecordLog,
}

#[derive(Debug, Clone, Default)]
pub struct RecordLog {
    inner: Arc<Mutex<(Vec<StateRecord>, usize)>>,
}

impl MemoryRecorder {
    pub fn new() -> (Self, RecordLog) {
        let log = RecordLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl StateRecorder for MemoryRecorder {
    fn append(&mut self, record: &StateRecord) -> Result<(), RecorderError> {
        self.log.lock().0.push(record.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RecorderError> {
        self.log.lock().1 += 1;
        Ok(())
    }
}

impl RecordLog {
    fn lock(&self) -> MutexGuard<'_, (Vec<StateRecord>, usize)> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn records(&self) -> Vec<StateRecord> {
        self.lock().0.clone()
    }

    pub fn last(&self) -> Option<StateRecord> {
        self.lock().0.last().cloned()
    }

    pub fn flushes(&self) -> usize {
        self.lock().1
    }
}
