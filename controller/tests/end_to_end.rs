use chrono::{DateTime, FixedOffset, TimeZone};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use greenhouse_common::{ActuatorId, Source};
use greenhouse_controller::{
    mock::{MemoryRecorder, MockBus},
    shutdown, ControlLoop, LoopState, SettingsStore, TickOutcome,
};

const SETTINGS: &str = r#"{
    "timezone": "UTC",
    "poll_interval_secs": 5,
    "climate": { "heater_on_below_c": 5.0, "vent_on_above_c": 28.0, "hysteresis_c": 1.0 },
    "schedules": [ { "actuator": "stand_fan", "start": "08:00", "end": "20:00" } ]
}"#;

fn nine_am(second: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(2024, 4, 15, 9, 0, second)
        .unwrap()
}

#[tokio::test]
async fn climate_and_schedule_scenario() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("greenhouse_settings.json");
    tokio::fs::write(&path, SETTINGS).await.unwrap();

    let store = SettingsStore::open(&path).await.unwrap();
    let (bus, handle) = MockBus::new();
    let (recorder, log) = MemoryRecorder::new();
    let (trigger, listener) = shutdown::channel();
    let mut looper = ControlLoop::start(store, bus, recorder, listener).unwrap();
    assert_eq!(looper.state(), LoopState::Running);

    let temperatures = [4.0, 6.0, 29.0, 27.5];
    let mut writes_per_tick = Vec::new();
    for (tick, temperature) in temperatures.into_iter().enumerate() {
        handle.push_temperature(temperature);
        handle.clear_log();
        let outcome = looper.tick_at(nine_am(tick as u32 * 5)).await;
        assert_eq!(outcome, TickOutcome::Completed);
        writes_per_tick.push(handle.writes());
    }

    let records = log.records();
    let column = |id: ActuatorId| -> Vec<bool> {
        records
            .iter()
            .map(|record| record.actuators[id].powered)
            .collect()
    };
    assert_eq!(column(ActuatorId::Heater), vec![true, false, false, false]);
    assert_eq!(column(ActuatorId::VentFan), vec![false, false, true, true]);
    assert_eq!(column(ActuatorId::StandFan), vec![true, true, true, true]);
    assert_eq!(column(ActuatorId::GrowLights), vec![false, false, false, false]);

    for record in &records {
        assert_eq!(record.actuators[ActuatorId::Heater].source, Source::Climate);
        assert_eq!(record.actuators[ActuatorId::StandFan].source, Source::Schedule);
        assert_eq!(record.actuators[ActuatorId::GrowLights].source, Source::Default);
        assert!(record.reading.valid);
        assert!(!record.degraded);
    }
    let ticks: Vec<_> = records.iter().map(|record| record.tick).collect();
    assert_eq!(ticks, vec![1, 2, 3, 4]);

    assert_eq!(
        writes_per_tick,
        vec![
            vec![
                (ActuatorId::Heater, true),
                (ActuatorId::VentFan, false),
                (ActuatorId::StandFan, true),
                (ActuatorId::GrowLights, false),
            ],
            vec![(ActuatorId::Heater, false)],
            vec![(ActuatorId::VentFan, true)],
            vec![],
        ]
    );

    trigger.trigger();
    assert_eq!(
        looper.tick_at(nine_am(30)).await,
        TickOutcome::ShutdownRequested
    );
    looper.stop().await;
    assert_eq!(looper.state(), LoopState::Stopped);
    assert!(handle.is_closed());
    assert_eq!(log.records().len(), 4);
    assert_eq!(log.flushes(), 1);
}

#[tokio::test]
async fn startup_fails_closed_on_invalid_settings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("greenhouse_settings.json");
    let inverted = SETTINGS.replace("\"heater_on_below_c\": 5.0", "\"heater_on_below_c\": 27.5");
    tokio::fs::write(&path, inverted).await.unwrap();

    assert!(SettingsStore::open(&path).await.is_err());
}
