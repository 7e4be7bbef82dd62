use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed settings document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{field} = {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error(
        "heater-on threshold {heater_on_below_c} must be below vent-on threshold \
         {vent_on_above_c} minus hysteresis {hysteresis_c}"
    )]
    ThresholdOrder {
        heater_on_below_c: f32,
        vent_on_above_c: f32,
        hysteresis_c: f32,
    },
    #[error("schedule entry {index} for {actuator}: start and end are both {at}")]
    EmptySchedule {
        index: usize,
        actuator: &'static str,
        at: String,
    },
    #[error("invalid time of day `{0}` (expected HH:MM or HH:MM:SS)")]
    TimeOfDay(String),
    #[error("unknown timezone `{0}`")]
    Timezone(String),
    #[error("{device}: gpio pin {pin} is not a usable BCM pin (0..=27)")]
    GpioPin { device: String, pin: u8 },
}
