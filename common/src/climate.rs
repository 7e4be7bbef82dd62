use crate::{
    config::ClimateSettings,
    types::{ActuatorId, ActuatorState, PerActuator, SensorReading},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorFault;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClimateDecision {
    // `None` when automatic heater control is disabled.
    pub heater: Option<bool>,
    pub vent_fan: Option<bool>,
    pub fault: Option<SensorFault>,
}

impl ClimateDecision {
    pub fn get(&self, id: ActuatorId) -> Option<bool> {
        match id {
            ActuatorId::Heater => self.heater,
            ActuatorId::VentFan => self.vent_fan,
            ActuatorId::StandFan | ActuatorId::GrowLights => None,
        }
    }
}

/// Hysteresis control for heater and vent fan. Inside the dead band each
/// actuator keeps the state it had on the previous tick.
pub fn evaluate(
    reading: &SensorReading,
    settings: &ClimateSettings,
    previous: &PerActuator<ActuatorState>,
) -> ClimateDecision {
    let heater_was_on = previous[ActuatorId::Heater].powered;
    let vent_was_on = previous[ActuatorId::VentFan].powered;

    if !reading.valid {
        return ClimateDecision {
            heater: settings.heater_enabled.then_some(heater_was_on),
            vent_fan: settings.vent_fan_enabled.then_some(vent_was_on),
            fault: Some(SensorFault),
        };
    }

    let temp = reading.temperature_c;

    let heater = if temp <= settings.heater_on_below_c {
        true
    } else if temp >= settings.heater_off_at_c() {
        false
    } else {
        heater_was_on
    };

    let vent_fan = if temp >= settings.vent_on_above_c {
        true
    } else if temp <= settings.vent_off_at_c() {
        false
    } else {
        vent_was_on
    };

    ClimateDecision {
        heater: settings.heater_enabled.then_some(heater),
        vent_fan: settings.vent_fan_enabled.then_some(vent_fan),
        fault: None,
    }
}
