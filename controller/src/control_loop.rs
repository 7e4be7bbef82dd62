use std::{fmt, future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, FixedOffset, Offset, Utc};
use chrono_tz::Tz;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use greenhouse_common::{
    climate, schedule, ActuatorId, ActuatorState, ManualOverride, PerActuator, SensorReading,
    Settings, Source, StateRecord, TimeOfDay,
};

use crate::{
    error::{ActuatorError, SensorError, StartupError},
    events::OverrideQueue,
    hardware::{HardwareBus, Output},
    interrupts::ButtonInterruptHandler,
    recorder::StateRecorder,
    settings_store::SettingsStore,
    shutdown::Shutdown,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Starting,
    Running,
    Degraded,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Degraded => "degraded",
            Self::Stopped => "stopped",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Completed,
    ShutdownRequested,
}

/// Owns the authoritative actuator and override tables. Every hardware write
/// and every settings swap happens on the task driving this loop.
pub struct ControlLoop<B, R> {
    bus: B,
    recorder: R,
    store: SettingsStore,
    settings: Arc<Settings>,
    toggles: OverrideQueue,
    buttons: Option<JoinHandle<()>>,
    shutdown: Shutdown,
    state: LoopState,
    tick: u64,
    actuators: PerActuator<ActuatorState>,
    overrides: PerActuator<ManualOverride>,
    /// Last state the outlet is known to have accepted.
    written: PerActuator<Option<bool>>,
    lit: PerActuator<Option<bool>>,
    /// Commanded states the outlet has not confirmed yet, replayed on stop.
    pending: PerActuator<Option<bool>>,
}

enum Guarded<T> {
    Done(T),
    TimedOut,
    Shutdown,
}

enum WriteFailure {
    Failed(ActuatorError),
    Interrupted,
}

impl<B, R> ControlLoop<B, R>
where
    B: HardwareBus,
    R: StateRecorder,
{
    pub fn start(
        store: SettingsStore,
        bus: B,
        recorder: R,
        shutdown: Shutdown,
    ) -> Result<Self, StartupError> {
        let settings = store.snapshot();
        let mut looper = Self {
            bus,
            recorder,
            store,
            settings,
            toggles: OverrideQueue::default(),
            buttons: None,
            shutdown,
            state: LoopState::Starting,
            tick: 0,
            actuators: PerActuator::from_fn(ActuatorState::default_off),
            overrides: PerActuator::from_fn(ManualOverride::inactive),
            written: PerActuator::from_fn(|_| None),
            lit: PerActuator::from_fn(|_| None),
            pending: PerActuator::from_fn(|_| None),
        };

        let edges = looper.bus.subscribe_button_events()?;
        let handler =
            ButtonInterruptHandler::new(looper.settings.buttons.debounce_ms, looper.toggles.clone());
        looper.buttons = Some(handler.spawn(edges));

        looper.state = LoopState::Running;
        info!(
            component = "control_loop",
            poll_interval_secs = looper.settings.poll_interval_secs,
            timezone = %looper.settings.timezone,
            "control loop running"
        );
        Ok(looper)
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn actuators(&self) -> &PerActuator<ActuatorState> {
        &self.actuators
    }

    pub fn overrides(&self) -> &PerActuator<ManualOverride> {
        &self.overrides
    }

    pub fn toggles(&self) -> &OverrideQueue {
        &self.toggles
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    pub async fn run(&mut self) {
        loop {
            let started = tokio::time::Instant::now();
            let now = now_in_timezone(self.settings.tz());
            if self.tick_at(now).await == TickOutcome::ShutdownRequested {
                break;
            }

            let next = started + self.settings.poll_interval();
            tokio::select! {
                biased;
                _ = self.shutdown.requested() => break,
                _ = tokio::time::sleep_until(next) => {}
            }
        }
        self.stop().await;
    }

    pub async fn tick_at(&mut self, now: DateTime<FixedOffset>) -> TickOutcome {
        if self.state == LoopState::Stopped || self.shutdown.is_requested() {
            return TickOutcome::ShutdownRequested;
        }
        self.tick += 1;
        let tick = self.tick;

        self.refresh_settings().await;
        let settings = Arc::clone(&self.settings);
        let limit = settings.io_timeout();

        let read = guarded(&mut self.shutdown, limit, self.bus.read_sensor(now)).await;
        let (reading, failure) = match read {
            Guarded::Done(Ok(reading)) => (reading, None),
            Guarded::Done(Err(err)) => (SensorReading::invalid(now), Some(err)),
            Guarded::TimedOut => (SensorReading::invalid(now), Some(SensorError::Timeout(limit))),
            Guarded::Shutdown => return TickOutcome::ShutdownRequested,
        };
        self.update_health(&reading, failure.as_ref());

        self.apply_toggles(now, &settings);

        let decision = climate::evaluate(&reading, &settings.climate, &self.actuators);
        let time_of_day = TimeOfDay::of(&now);
        for id in ActuatorId::ALL {
            let over = &self.overrides[id];
            let (powered, source) = if over.active {
                (over.powered, Source::ManualOverride)
            } else if let Some(powered) = decision.get(id) {
                (powered, Source::Climate)
            } else if let Some(powered) = schedule::evaluate(&settings.schedules, id, time_of_day) {
                (powered, Source::Schedule)
            } else {
                (false, Source::Default)
            };
            self.actuators[id] = ActuatorState { id, powered, source };
            self.pending[id] = (self.written[id] != Some(powered)).then_some(powered);
        }

        for id in ActuatorId::ALL {
            let Some(desired) = self.pending[id] else {
                continue;
            };
            match self.write_with_retry(Output::Actuator, id, desired, limit).await {
                Ok(()) => {
                    self.written[id] = Some(desired);
                    self.pending[id] = None;
                    info!(
                        tick,
                        component = "control_loop",
                        actuator = %id,
                        powered = desired,
                        source = self.actuators[id].source.as_str(),
                        "actuator switched"
                    );
                }
                Err(WriteFailure::Failed(err)) => {
                    error!(tick, component = "control_loop", actuator = %id, "{err}; assuming outlet unchanged");
                }
                Err(WriteFailure::Interrupted) => return TickOutcome::ShutdownRequested,
            }
        }

        for id in ActuatorId::ALL {
            let lit = self.overrides[id].active;
            if self.lit[id] == Some(lit) {
                continue;
            }
            match self.write_with_retry(Output::Indicator, id, lit, limit).await {
                Ok(()) => self.lit[id] = Some(lit),
                Err(WriteFailure::Failed(err)) => {
                    warn!(tick, component = "control_loop", actuator = %id, "{err}");
                }
                Err(WriteFailure::Interrupted) => return TickOutcome::ShutdownRequested,
            }
        }

        let record = StateRecord {
            tick,
            timestamp: now,
            reading,
            actuators: self.actuators,
            degraded: self.state == LoopState::Degraded,
        };
        if let Err(err) = self.recorder.append(&record) {
            warn!(tick, component = "recorder", "failed to record state: {err}");
        }

        TickOutcome::Completed
    }

    /// Replays unconfirmed actuator writes, turns indicators off, releases the bus and
    /// flushes the recorder. Idempotent.
    pub async fn stop(&mut self) {
        if self.state == LoopState::Stopped {
            return;
        }
        info!(component = "control_loop", state = %self.state, "control loop stopping");
        let limit = self.settings.io_timeout();

        for id in ActuatorId::ALL {
            let Some(powered) = self.pending[id] else {
                continue;
            };
            match tokio::time::timeout(limit, self.bus.set_actuator(id, powered)).await {
                Ok(Ok(())) => {
                    self.written[id] = Some(powered);
                    self.pending[id] = None;
                    info!(component = "control_loop", actuator = %id, powered, "pending write flushed");
                }
                Ok(Err(err)) => {
                    error!(component = "control_loop", actuator = %id, "pending write lost: {err}");
                }
                Err(_) => {
                    error!(component = "control_loop", actuator = %id, "pending write timed out after {limit:?}");
                }
            }
        }

        for id in ActuatorId::ALL {
            if self.lit[id] != Some(true) {
                continue;
            }
            match tokio::time::timeout(limit, self.bus.set_indicator(id, false)).await {
                Ok(Ok(())) => self.lit[id] = Some(false),
                Ok(Err(err)) => warn!(component = "control_loop", actuator = %id, "{err}"),
                Err(_) => {
                    warn!(component = "control_loop", actuator = %id, "indicator off timed out after {limit:?}");
                }
            }
        }

        if tokio::time::timeout(limit, self.bus.close()).await.is_err() {
            warn!(component = "control_loop", "hardware close timed out after {limit:?}");
        }
        if let Some(buttons) = self.buttons.take() {
            buttons.abort();
        }
        if let Err(err) = self.recorder.flush() {
            warn!(component = "recorder", "failed to flush state log: {err}");
        }

        self.state = LoopState::Stopped;
        info!(component = "control_loop", ticks = self.tick, "control loop stopped");
    }

    async fn refresh_settings(&mut self) {
        if !self.store.poll_for_change().await {
            return;
        }

        match self.store.reload().await {
            Ok(next) => {
                if self.settings.hardware_restart_required(&next) {
                    warn!(
                        tick = self.tick,
                        component = "settings",
                        "hardware, button or recorder settings changed; restart required to apply"
                    );
                }
                info!(tick = self.tick, component = "settings", "settings reloaded");
                self.settings = next;
            }
            Err(err) => {
                warn!(tick = self.tick, component = "settings", "settings reload failed, keeping previous: {err}");
            }
        }
    }

    fn update_health(&mut self, reading: &SensorReading, failure: Option<&SensorError>) {
        let tick = self.tick;
        if reading.valid {
            if self.state == LoopState::Degraded {
                info!(tick, component = "sensor", "sensor recovered; climate control resumed");
                self.state = LoopState::Running;
            }
            return;
        }

        let reason = match failure {
            Some(err) => err.to_string(),
            None => format!(
                "implausible reading: {:.1} C, {:.1} %, {:.1} hPa",
                reading.temperature_c, reading.humidity_percent, reading.pressure_hpa
            ),
        };
        if self.state == LoopState::Running {
            warn!(tick, component = "sensor", "sensor fault, heater and vent fan holding: {reason}");
            self.state = LoopState::Degraded;
        } else {
            debug!(tick, component = "sensor", "sensor fault persists: {reason}");
        }
    }

    fn apply_toggles(&mut self, now: DateTime<FixedOffset>, settings: &Settings) {
        let tick = self.tick;
        for id in ActuatorId::ALL {
            if self.overrides[id].is_expired(now) {
                self.overrides[id] = ManualOverride::inactive(id);
                info!(tick, component = "override", actuator = %id, "manual override expired");
            }
        }

        let timeout = settings.buttons.override_timeout();
        for toggle in self.toggles.drain() {
            let id = toggle.id;
            let current = self.actuators[id].powered;
            let over = &mut self.overrides[id];
            let active = over.toggle(current, now, timeout);
            info!(
                tick,
                component = "override",
                actuator = %id,
                active,
                powered = over.powered,
                "manual override toggled"
            );
        }
    }

    async fn write_with_retry(
        &mut self,
        output: Output,
        id: ActuatorId,
        value: bool,
        limit: Duration,
    ) -> Result<(), WriteFailure> {
        let mut attempt = 1;
        loop {
            let io = send(&mut self.bus, output, id, value);
            let err = match guarded(&mut self.shutdown, limit, io).await {
                Guarded::Done(Ok(())) => return Ok(()),
                Guarded::Done(Err(err)) => err,
                Guarded::TimedOut => ActuatorError::Timeout {
                    actuator: id,
                    after: limit,
                },
                Guarded::Shutdown => return Err(WriteFailure::Interrupted),
            };
            if attempt == 2 {
                return Err(WriteFailure::Failed(err));
            }
            debug!(tick = self.tick, component = "control_loop", actuator = %id, "{err}; retrying");
            attempt += 1;
        }
    }
}

async fn send<B: HardwareBus>(
    bus: &mut B,
    output: Output,
    id: ActuatorId,
    value: bool,
) -> Result<(), ActuatorError> {
    match output {
        Output::Actuator => bus.set_actuator(id, value).await,
        Output::Indicator => bus.set_indicator(id, value).await,
    }
}

/// Bounds `io` by `limit` and abandons it as soon as shutdown is requested.
async fn guarded<T>(
    shutdown: &mut Shutdown,
    limit: Duration,
    io: impl Future<Output = T>,
) -> Guarded<T> {
    tokio::select! {
        biased;
        _ = shutdown.requested() => Guarded::Shutdown,
        result = tokio::time::timeout(limit, io) => match result {
            Ok(value) => Guarded::Done(value),
            Err(_) => Guarded::TimedOut,
        },
    }
}

pub fn now_in_timezone(tz: Tz) -> DateTime<FixedOffset> {
    let local = Utc::now().with_timezone(&tz);
    local.with_timezone(&local.offset().fix())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use greenhouse_common::ToggleEvent;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        mock::{MemoryRecorder, MockBus, MockHandle, RecordLog},
        shutdown::{self, ShutdownHandle},
    };

    const BASE: &str = r#"{
        "climate": { "heater_on_below_c": 10.0, "vent_on_above_c": 30.0, "hysteresis_c": 2.0 },
        "schedules": [ { "actuator": "grow_lights", "start": "06:00", "end": "22:00" } ]
    }"#;

    struct Harness {
        dir: TempDir,
        looper: ControlLoop<MockBus, MemoryRecorder>,
        bus: MockHandle,
        log: RecordLog,
        shutdown: ShutdownHandle,
    }

    impl Harness {
        async fn new(body: &str) -> Self {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("settings.json");
            tokio::fs::write(&path, body).await.unwrap();
            let store = SettingsStore::open(&path).await.unwrap();

            let (bus_impl, bus) = MockBus::new();
            let (recorder, log) = MemoryRecorder::new();
            let (shutdown, listener) = shutdown::channel();
            let looper = ControlLoop::start(store, bus_impl, recorder, listener).unwrap();

            Self {
                dir,
                looper,
                bus,
                log,
                shutdown,
            }
        }

        fn press(&self, id: ActuatorId) {
            self.looper.toggles().push(ToggleEvent { id, at_ms: 0 });
        }

        fn state(&self, id: ActuatorId) -> ActuatorState {
            self.looper.actuators()[id]
        }
    }

    fn at(hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 6, 1, hour, minute, 0)
            .unwrap()
    }

    fn assert_overrides_win(looper: &ControlLoop<MockBus, MemoryRecorder>) {
        for id in ActuatorId::ALL {
            let state = looper.actuators()[id];
            assert_eq!(state.id, id);
            if looper.overrides()[id].active {
                assert_eq!(state.source, Source::ManualOverride);
            }
        }
    }

    #[tokio::test]
    async fn first_tick_writes_every_output_then_only_changes() {
        let mut h = Harness::new(BASE).await;
        h.bus.push_temperature(20.0);

        assert_eq!(h.looper.tick_at(at(9, 0)).await, TickOutcome::Completed);
        assert_eq!(
            h.bus.writes(),
            vec![
                (ActuatorId::Heater, false),
                (ActuatorId::VentFan, false),
                (ActuatorId::StandFan, false),
                (ActuatorId::GrowLights, true),
            ]
        );
        assert_eq!(h.bus.indicators().len(), 4);
        assert_eq!(h.state(ActuatorId::StandFan).source, Source::Default);
        assert_eq!(h.state(ActuatorId::GrowLights).source, Source::Schedule);
        assert_eq!(h.state(ActuatorId::Heater).source, Source::Climate);

        h.bus.clear_log();
        h.looper.tick_at(at(9, 5)).await;
        assert!(h.bus.attempts().is_empty());
        assert_eq!(h.log.records().len(), 2);
    }

    #[tokio::test]
    async fn toggle_is_applied_in_the_same_tick() {
        let mut h = Harness::new(BASE).await;
        h.looper.tick_at(at(9, 0)).await;
        h.bus.clear_log();

        h.press(ActuatorId::StandFan);
        h.looper.tick_at(at(9, 5)).await;

        assert_eq!(
            h.state(ActuatorId::StandFan),
            ActuatorState {
                id: ActuatorId::StandFan,
                powered: true,
                source: Source::ManualOverride,
            }
        );
        assert_eq!(h.bus.writes(), vec![(ActuatorId::StandFan, true)]);
        assert_eq!(h.bus.indicators(), vec![(ActuatorId::StandFan, true)]);
        assert_overrides_win(&h.looper);

        h.bus.clear_log();
        h.press(ActuatorId::StandFan);
        h.looper.tick_at(at(9, 10)).await;

        assert_eq!(h.state(ActuatorId::StandFan).source, Source::Default);
        assert_eq!(h.bus.writes(), vec![(ActuatorId::StandFan, false)]);
        assert_eq!(h.bus.indicators(), vec![(ActuatorId::StandFan, false)]);
    }

    #[tokio::test]
    async fn override_beats_climate_and_schedule() {
        let mut h = Harness::new(BASE).await;
        h.bus.push_temperature(5.0);
        h.looper.tick_at(at(9, 0)).await;
        assert!(h.state(ActuatorId::Heater).powered);

        h.press(ActuatorId::Heater);
        h.press(ActuatorId::GrowLights);
        h.looper.tick_at(at(9, 5)).await;

        assert!(!h.state(ActuatorId::Heater).powered);
        assert_eq!(h.state(ActuatorId::Heater).source, Source::ManualOverride);
        assert!(!h.state(ActuatorId::GrowLights).powered);
        assert_overrides_win(&h.looper);
    }

    #[tokio::test]
    async fn button_edges_flow_through_the_interrupt_handler() {
        let mut h = Harness::new(BASE).await;
        assert!(h.bus.press(ActuatorId::VentFan, 1_000).await);
        assert!(h.bus.press(ActuatorId::VentFan, 1_050).await);

        // Let the handler task drain the channel.
        for _ in 0..100 {
            if !h.looper.toggles().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        tokio::task::yield_now().await;

        h.looper.tick_at(at(9, 0)).await;
        assert_eq!(h.state(ActuatorId::VentFan).source, Source::ManualOverride);
        assert!(h.state(ActuatorId::VentFan).powered);
        assert!(h.looper.overrides()[ActuatorId::VentFan].active);
    }

    #[tokio::test]
    async fn sensor_fault_holds_climate_outputs_only() {
        let mut h = Harness::new(BASE).await;
        h.bus.push_temperature(8.0);
        h.looper.tick_at(at(9, 0)).await;
        let before = *h.looper.actuators();

        h.bus.push_sensor_error("i2c nack");
        h.looper.tick_at(at(23, 0)).await;

        assert_eq!(h.looper.state(), LoopState::Degraded);
        assert_eq!(h.state(ActuatorId::Heater), before[ActuatorId::Heater]);
        assert_eq!(h.state(ActuatorId::VentFan), before[ActuatorId::VentFan]);
        // Schedule still evaluated: 23:00 is outside 06:00-22:00.
        assert!(!h.state(ActuatorId::GrowLights).powered);
        let record = h.log.last().unwrap();
        assert!(!record.reading.valid);
        assert!(record.degraded);

        h.bus.push_temperature(13.0);
        h.looper.tick_at(at(23, 5)).await;
        assert_eq!(h.looper.state(), LoopState::Running);
        assert!(!h.state(ActuatorId::Heater).powered);
    }

    #[tokio::test]
    async fn implausible_reading_is_a_sensor_fault() {
        let mut h = Harness::new(BASE).await;
        h.bus.push_temperature(120.0);
        h.looper.tick_at(at(9, 0)).await;

        assert_eq!(h.looper.state(), LoopState::Degraded);
        assert!(!h.state(ActuatorId::VentFan).powered);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_sensor_times_out_as_invalid_reading() {
        let mut h = Harness::new(BASE).await;
        h.bus.hang_sensor(true);

        assert_eq!(h.looper.tick_at(at(9, 0)).await, TickOutcome::Completed);

        assert_eq!(h.looper.state(), LoopState::Degraded);
        assert!(!h.log.last().unwrap().reading.valid);
        assert!(h.state(ActuatorId::GrowLights).powered);
    }

    #[tokio::test]
    async fn write_failure_is_retried_once() {
        let mut h = Harness::new(BASE).await;
        h.bus.fail_writes(Output::Actuator, ActuatorId::Heater, 1);
        h.bus.push_temperature(8.0);

        h.looper.tick_at(at(9, 0)).await;

        let heater_attempts = h
            .bus
            .attempts()
            .into_iter()
            .filter(|(output, id, _)| *output == Output::Actuator && *id == ActuatorId::Heater)
            .count();
        assert_eq!(heater_attempts, 2);
        assert!(h.bus.writes().contains(&(ActuatorId::Heater, true)));
    }

    #[tokio::test]
    async fn persistent_write_failure_does_not_halt_the_loop() {
        let mut h = Harness::new(BASE).await;
        h.looper.tick_at(at(9, 0)).await;
        h.bus.clear_log();

        h.bus.fail_writes(Output::Actuator, ActuatorId::VentFan, 2);
        h.bus.push_temperature(31.0);
        assert_eq!(h.looper.tick_at(at(9, 5)).await, TickOutcome::Completed);
        assert!(h.bus.writes().is_empty());
        assert_eq!(h.log.records().len(), 2);

        // Outlet still assumed off, so the next tick tries again.
        h.looper.tick_at(at(9, 10)).await;
        assert_eq!(h.bus.writes(), vec![(ActuatorId::VentFan, true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_write_times_out_and_is_retried_next_tick() {
        let mut h = Harness::new(BASE).await;
        h.looper.tick_at(at(9, 0)).await;
        h.bus.clear_log();

        h.bus.hang_writes(true);
        h.bus.push_temperature(31.0);
        assert_eq!(h.looper.tick_at(at(9, 5)).await, TickOutcome::Completed);

        assert_eq!(
            h.bus.attempts(),
            vec![
                (Output::Actuator, ActuatorId::VentFan, true),
                (Output::Actuator, ActuatorId::VentFan, true),
            ]
        );
        assert!(h.bus.writes().is_empty());
        assert_eq!(h.log.records().len(), 2);
        assert!(h.log.last().unwrap().actuators[ActuatorId::VentFan].powered);

        h.bus.hang_writes(false);
        h.bus.clear_log();
        h.looper.tick_at(at(9, 10)).await;
        assert_eq!(h.bus.writes(), vec![(ActuatorId::VentFan, true)]);
    }

    #[tokio::test]
    async fn failed_indicator_is_retried_next_tick() {
        let mut h = Harness::new(BASE).await;
        h.looper.tick_at(at(9, 0)).await;
        h.bus.clear_log();

        h.bus.fail_writes(Output::Indicator, ActuatorId::StandFan, 2);
        h.press(ActuatorId::StandFan);
        assert_eq!(h.looper.tick_at(at(9, 5)).await, TickOutcome::Completed);
        assert_eq!(h.bus.writes(), vec![(ActuatorId::StandFan, true)]);
        assert!(h.bus.indicators().is_empty());

        h.bus.clear_log();
        h.looper.tick_at(at(9, 10)).await;
        assert!(h.bus.writes().is_empty());
        assert_eq!(h.bus.indicators(), vec![(ActuatorId::StandFan, true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_writes_commands_cut_short_by_shutdown() {
        let mut h = Harness::new(BASE).await;
        h.looper.tick_at(at(9, 0)).await;
        h.bus.clear_log();

        h.press(ActuatorId::StandFan);
        h.bus.hang_writes(true);
        let handle = &h.shutdown;
        let trigger = async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.trigger();
        };
        let (outcome, ()) = tokio::join!(h.looper.tick_at(at(9, 5)), trigger);

        assert_eq!(outcome, TickOutcome::ShutdownRequested);
        assert!(h.state(ActuatorId::StandFan).powered);
        assert!(h.bus.writes().is_empty());

        h.bus.hang_writes(false);
        h.looper.stop().await;
        assert_eq!(h.bus.writes(), vec![(ActuatorId::StandFan, true)]);
        assert_eq!(h.looper.state(), LoopState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_a_blocked_read() {
        let mut h = Harness::new(BASE).await;
        h.bus.hang_sensor(true);
        let handle = &h.shutdown;
        let trigger = async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.trigger();
        };

        let (outcome, ()) = tokio::join!(h.looper.tick_at(at(9, 0)), trigger);

        assert_eq!(outcome, TickOutcome::ShutdownRequested);
        assert!(h.log.records().is_empty());
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_settings() {
        let mut h = Harness::new(BASE).await;
        let before = Arc::clone(h.looper.settings());
        let path = h.dir.path().join("settings.json");

        let inverted = r#"{ "climate": { "heater_on_below_c": 40.0, "vent_on_above_c": 30.0 } }"#;
        tokio::fs::write(&path, inverted).await.unwrap();
        assert_eq!(h.looper.tick_at(at(9, 0)).await, TickOutcome::Completed);
        assert!(Arc::ptr_eq(&before, h.looper.settings()));
        assert_eq!(h.looper.state(), LoopState::Running);

        let warmer = BASE.replace("10.0", "15.0");
        tokio::fs::write(&path, warmer).await.unwrap();
        h.bus.push_temperature(14.0);
        h.looper.tick_at(at(9, 5)).await;
        assert_eq!(h.looper.settings().climate.heater_on_below_c, 15.0);
        assert!(h.state(ActuatorId::Heater).powered);
    }

    #[tokio::test]
    async fn timed_override_expires() {
        let body = BASE.replacen('{', r#"{ "buttons": { "override_timeout_minutes": 30 },"#, 1);
        let mut h = Harness::new(&body).await;
        h.looper.tick_at(at(9, 0)).await;

        h.press(ActuatorId::GrowLights);
        h.looper.tick_at(at(9, 5)).await;
        assert_eq!(h.state(ActuatorId::GrowLights).source, Source::ManualOverride);

        h.looper.tick_at(at(9, 34)).await;
        assert_eq!(h.state(ActuatorId::GrowLights).source, Source::ManualOverride);

        h.bus.clear_log();
        h.looper.tick_at(at(9, 35)).await;
        assert_eq!(h.state(ActuatorId::GrowLights).source, Source::Schedule);
        assert!(h.state(ActuatorId::GrowLights).powered);
        assert_eq!(h.bus.indicators(), vec![(ActuatorId::GrowLights, false)]);
    }

    #[tokio::test]
    async fn stop_flushes_pending_writes_and_releases_hardware() {
        let mut h = Harness::new(BASE).await;
        h.bus.fail_writes(Output::Actuator, ActuatorId::Heater, 2);
        h.bus.push_temperature(8.0);
        h.press(ActuatorId::StandFan);
        h.looper.tick_at(at(9, 0)).await;
        assert!(!h.bus.writes().contains(&(ActuatorId::Heater, true)));

        h.shutdown.trigger();
        assert_eq!(h.looper.tick_at(at(9, 5)).await, TickOutcome::ShutdownRequested);
        h.looper.stop().await;

        assert!(h.bus.writes().contains(&(ActuatorId::Heater, true)));
        assert_eq!(h.bus.indicators().last(), Some(&(ActuatorId::StandFan, false)));
        assert!(h.bus.is_closed());
        assert_eq!(h.log.flushes(), 1);
        assert_eq!(h.looper.state(), LoopState::Stopped);

        h.looper.stop().await;
        assert_eq!(h.log.flushes(), 1);
    }

    #[tokio::test]
    async fn run_ticks_until_shutdown() {
        let body = BASE.replacen('{', r#"{ "poll_interval_secs": 1,"#, 1);
        let mut h = Harness::new(&body).await;
        let handle = &h.shutdown;
        let trigger = async move {
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            handle.trigger();
        };

        tokio::join!(h.looper.run(), trigger);

        let ticks: Vec<_> = h.log.records().iter().map(|record| record.tick).collect();
        assert_eq!(ticks, vec![1, 2]);
        assert_eq!(h.looper.state(), LoopState::Stopped);
        assert!(h.bus.is_closed());
    }
}
