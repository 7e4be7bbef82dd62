use std::{fmt, path::PathBuf, time::Duration};

use chrono::{NaiveTime, Timelike};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, types::ActuatorId};

/// Seconds since local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u32);

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);

    pub fn from_hms(hour: u32, minute: u32, second: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, second).map(Self::from_naive)
    }

    pub fn from_naive(time: NaiveTime) -> Self {
        Self(time.num_seconds_from_midnight())
    }

    pub fn seconds(self) -> u32 {
        self.0
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::str::FromStr for TimeOfDay {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        NaiveTime::parse_from_str(value, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
            .map(Self::from_naive)
            .map_err(|_| ConfigError::TimeOfDay(value.to_string()))
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (hour, minute, second) = (self.0 / 3600, self.0 / 60 % 60, self.0 % 60);
        if second == 0 {
            write!(f, "{hour:02}:{minute:02}")
        } else {
            write!(f, "{hour:02}:{minute:02}:{second:02}")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub len: u64,
    pub digest: [u8; 32],
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClimateSettings {
    pub heater_on_below_c: f32,
    pub vent_on_above_c: f32,
    #[serde(default = "default_hysteresis_c")]
    pub hysteresis_c: f32,
    #[serde(default = "enabled")]
    pub heater_enabled: bool,
    #[serde(default = "enabled")]
    pub vent_fan_enabled: bool,
}

impl ClimateSettings {
    pub fn heater_off_at_c(&self) -> f32 {
        self.heater_on_below_c + self.hysteresis_c
    }

    pub fn vent_off_at_c(&self) -> f32 {
        self.vent_on_above_c - self.hysteresis_c
    }

    pub fn enabled_for(&self, id: ActuatorId) -> bool {
        match id {
            ActuatorId::Heater => self.heater_enabled,
            ActuatorId::VentFan => self.vent_fan_enabled,
            ActuatorId::StandFan | ActuatorId::GrowLights => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleEntry {
    pub actuator: ActuatorId,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ButtonSettings {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default)]
    pub override_timeout_minutes: Option<u64>,
}

impl Default for ButtonSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            override_timeout_minutes: None,
        }
    }
}

impl ButtonSettings {
    pub fn override_timeout(&self) -> Option<chrono::Duration> {
        self.override_timeout_minutes
            .and_then(|minutes| i64::try_from(minutes).ok())
            .map(chrono::Duration::minutes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    pub name: String,
    pub rf_on_code: u32,
    pub rf_off_code: u32,
    pub led_gpio_pin: u8,
    #[serde(default)]
    pub button_gpio_pin: Option<u8>,
}

impl DeviceConfig {
    fn fallback(name: &str, led_gpio_pin: u8, button_gpio_pin: u8) -> Self {
        Self {
            name: name.to_string(),
            rf_on_code: 0,
            rf_off_code: 0,
            led_gpio_pin,
            button_gpio_pin: Some(button_gpio_pin),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceTable {
    pub heater: DeviceConfig,
    pub vent_fan: DeviceConfig,
    pub stand_fan: DeviceConfig,
    pub grow_lights: DeviceConfig,
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self {
            heater: DeviceConfig::fallback("Heater", 17, 5),
            vent_fan: DeviceConfig::fallback("Vent Fan", 27, 6),
            stand_fan: DeviceConfig::fallback("Stand Fan", 23, 19),
            grow_lights: DeviceConfig::fallback("Grow Lights", 22, 13),
        }
    }
}

impl DeviceTable {
    pub fn get(&self, id: ActuatorId) -> &DeviceConfig {
        match id {
            ActuatorId::Heater => &self.heater,
            ActuatorId::VentFan => &self.vent_fan,
            ActuatorId::StandFan => &self.stand_fan,
            ActuatorId::GrowLights => &self.grow_lights,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SensorConfig {
    pub iio_device: PathBuf,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            iio_device: PathBuf::from("/sys/bus/iio/devices/iio:device0"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HardwareConfig {
    pub io_timeout_ms: u64,
    pub codesend_path: PathBuf,
    pub sensor: SensorConfig,
    pub devices: DeviceTable,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            io_timeout_ms: 2_000,
            codesend_path: PathBuf::from("codesend"),
            sensor: SensorConfig::default(),
            devices: DeviceTable::default(),
        }
    }
}

// Image-capture schedule. Carried for the camera collaborator; the control
// loop never reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraSchedule {
    pub enabled: bool,
    pub interval_minutes: u32,
    pub active_hours_start: TimeOfDay,
    pub active_hours_end: TimeOfDay,
}

impl Default for CameraSchedule {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 30,
            active_hours_start: TimeOfDay(6 * 3600),
            active_hours_end: TimeOfDay(20 * 3600),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RecorderSettings {
    pub enabled: bool,
    pub directory: PathBuf,
    pub max_log_days: u32,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from("data/logs"),
            max_log_days: 365,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub mock_mode: bool,
    pub climate: ClimateSettings,
    #[serde(default)]
    pub schedules: Vec<ScheduleEntry>,
    #[serde(default)]
    pub buttons: ButtonSettings,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub camera: CameraSchedule,
    #[serde(default)]
    pub recorder: RecorderSettings,

    #[serde(skip)]
    pub path: Option<PathBuf>,
    #[serde(skip)]
    pub fingerprint: Option<Fingerprint>,
}

impl Settings {
    pub fn from_json(raw: &[u8]) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_slice(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Timezone(self.timezone.clone()))?;
        check_range("poll_interval_secs", self.poll_interval_secs as f64, 1.0, 3_600.0)?;

        let climate = &self.climate;
        check_range("climate.heater_on_below_c", climate.heater_on_below_c.into(), -40.0, 60.0)?;
        check_range("climate.vent_on_above_c", climate.vent_on_above_c.into(), -40.0, 60.0)?;
        if !(climate.hysteresis_c > 0.0 && climate.hysteresis_c <= 10.0) {
            return Err(ConfigError::OutOfRange {
                field: "climate.hysteresis_c",
                value: climate.hysteresis_c.into(),
                min: 0.0,
                max: 10.0,
            });
        }
        if climate.heater_on_below_c >= climate.vent_off_at_c() {
            return Err(ConfigError::ThresholdOrder {
                heater_on_below_c: climate.heater_on_below_c,
                vent_on_above_c: climate.vent_on_above_c,
                hysteresis_c: climate.hysteresis_c,
            });
        }

        for (index, entry) in self.schedules.iter().enumerate() {
            if entry.start == entry.end {
                return Err(ConfigError::EmptySchedule {
                    index,
                    actuator: entry.actuator.as_str(),
                    at: entry.start.to_string(),
                });
            }
        }

        check_range("buttons.debounce_ms", self.buttons.debounce_ms as f64, 0.0, 5_000.0)?;
        if let Some(minutes) = self.buttons.override_timeout_minutes {
            check_range("buttons.override_timeout_minutes", minutes as f64, 1.0, 10_080.0)?;
        }

        check_range(
            "hardware.io_timeout_ms",
            self.hardware.io_timeout_ms as f64,
            100.0,
            30_000.0,
        )?;
        for id in ActuatorId::ALL {
            let device = self.hardware.devices.get(id);
            let pins = std::iter::once(device.led_gpio_pin).chain(device.button_gpio_pin);
            for pin in pins {
                if pin > 27 {
                    return Err(ConfigError::GpioPin {
                        device: device.name.clone(),
                        pin,
                    });
                }
            }
        }

        check_range(
            "camera.interval_minutes",
            self.camera.interval_minutes.into(),
            1.0,
            1_440.0,
        )?;
        check_range(
            "recorder.max_log_days",
            self.recorder.max_log_days.into(),
            1.0,
            f64::from(u32::MAX),
        )?;

        Ok(())
    }

    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(Tz::UTC)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.hardware.io_timeout_ms)
    }

    pub fn schedules_for(&self, id: ActuatorId) -> impl Iterator<Item = &ScheduleEntry> {
        self.schedules.iter().filter(move |entry| entry.actuator == id)
    }

    /// The bus and button handler are built once at startup, so changes to
    /// these sections only take effect after a restart.
    pub fn hardware_restart_required(&self, next: &Settings) -> bool {
        self.mock_mode != next.mock_mode
            || self.hardware != next.hardware
            || self.buttons.debounce_ms != next.buttons.debounce_ms
            || self.recorder != next.recorder
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

fn enabled() -> bool {
    true
}

fn default_hysteresis_c() -> f32 {
    2.0
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_poll_interval_secs() -> u64 {
    5
}
