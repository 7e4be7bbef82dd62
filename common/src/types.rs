use std::{
    fmt,
    ops::{Index, IndexMut},
};

use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorId {
    Heater,
    VentFan,
    StandFan,
    GrowLights,
}

impl ActuatorId {
    pub const ALL: [ActuatorId; 4] = [
        ActuatorId::Heater,
        ActuatorId::VentFan,
        ActuatorId::StandFan,
        ActuatorId::GrowLights,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::Heater => 0,
            Self::VentFan => 1,
            Self::StandFan => 2,
            Self::GrowLights => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heater => "heater",
            Self::VentFan => "vent_fan",
            Self::StandFan => "stand_fan",
            Self::GrowLights => "grow_lights",
        }
    }

    pub fn is_climate_reactive(self) -> bool {
        matches!(self, Self::Heater | Self::VentFan)
    }
}

impl fmt::Display for ActuatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Schedule,
    Climate,
    ManualOverride,
    Default,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Climate => "climate",
            Self::ManualOverride => "manual_override",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PerActuator<T>([T; 4]);

impl<T> PerActuator<T> {
    pub fn from_fn(f: impl FnMut(ActuatorId) -> T) -> Self {
        Self(ActuatorId::ALL.map(f))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActuatorId, &T)> {
        ActuatorId::ALL.into_iter().zip(self.0.iter())
    }

    pub fn values(&self) -> &[T; 4] {
        &self.0
    }
}

impl<T> Index<ActuatorId> for PerActuator<T> {
    type Output = T;

    fn index(&self, id: ActuatorId) -> &T {
        &self.0[id.index()]
    }
}

impl<T> IndexMut<ActuatorId> for PerActuator<T> {
    fn index_mut(&mut self, id: ActuatorId) -> &mut T {
        &mut self.0[id.index()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ActuatorState {
    pub id: ActuatorId,
    pub powered: bool,
    pub source: Source,
}

impl ActuatorState {
    pub fn default_off(id: ActuatorId) -> Self {
        Self {
            id,
            powered: false,
            source: Source::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ManualOverride {
    pub id: ActuatorId,
    pub active: bool,
    pub powered: bool,
    /// `None` while active means the override holds until the next press.
    pub until: Option<DateTime<FixedOffset>>,
}

impl ManualOverride {
    pub fn inactive(id: ActuatorId) -> Self {
        Self {
            id,
            active: false,
            powered: false,
            until: None,
        }
    }

    /// Flips the override. Activation forces the opposite of `current_powered`.
    pub fn toggle(
        &mut self,
        current_powered: bool,
        now: DateTime<FixedOffset>,
        timeout: Option<Duration>,
    ) -> bool {
        if self.active {
            *self = Self::inactive(self.id);
        } else {
            self.active = true;
            self.powered = !current_powered;
            self.until = timeout.map(|timeout| now + timeout);
        }
        self.active
    }

    pub fn is_expired(&self, now: DateTime<FixedOffset>) -> bool {
        self.active && self.until.map(|until| now >= until).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorReading {
    pub timestamp: DateTime<FixedOffset>,
    pub temperature_c: f32,
    pub humidity_percent: f32,
    pub pressure_hpa: f32,
    pub valid: bool,
}

impl SensorReading {
    pub const TEMPERATURE_RANGE_C: (f32, f32) = (-40.0, 85.0);
    pub const HUMIDITY_RANGE: (f32, f32) = (0.0, 100.0);
    pub const PRESSURE_RANGE_HPA: (f32, f32) = (300.0, 1100.0);

    // Builds a reading and marks it invalid when any value is outside the
    // BME280's physical range.
    pub fn new(
        timestamp: DateTime<FixedOffset>,
        temperature_c: f32,
        humidity_percent: f32,
        pressure_hpa: f32,
    ) -> Self {
        let valid = within(temperature_c, Self::TEMPERATURE_RANGE_C)
            && within(humidity_percent, Self::HUMIDITY_RANGE)
            && within(pressure_hpa, Self::PRESSURE_RANGE_HPA);

        Self {
            timestamp,
            temperature_c,
            humidity_percent,
            pressure_hpa,
            valid,
        }
    }

    pub fn invalid(timestamp: DateTime<FixedOffset>) -> Self {
        Self {
            timestamp,
            temperature_c: f32::NAN,
            humidity_percent: f32::NAN,
            pressure_hpa: f32::NAN,
            valid: false,
        }
    }
}

fn within(value: f32, (min, max): (f32, f32)) -> bool {
    value.is_finite() && (min..=max).contains(&value)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateRecord {
    pub tick: u64,
    pub timestamp: DateTime<FixedOffset>,
    pub reading: SensorReading,
    pub actuators: PerActuator<ActuatorState>,
    pub degraded: bool,
}
