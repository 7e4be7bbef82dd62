pub mod button;
pub mod climate;
pub mod config;
pub mod error;
pub mod schedule;
pub mod types;

pub use button::{ButtonDebouncer, ButtonPhase, ToggleEvent};
pub use climate::{ClimateDecision, SensorFault};
pub use config::{
    ButtonSettings, CameraSchedule, ClimateSettings, DeviceConfig, DeviceTable, Fingerprint,
    HardwareConfig, RecorderSettings, ScheduleEntry, SensorConfig, Settings, TimeOfDay,
};
pub use error::ConfigError;
pub use types::{
    ActuatorId, ActuatorState, ManualOverride, PerActuator, SensorReading, Source, StateRecord,
};
