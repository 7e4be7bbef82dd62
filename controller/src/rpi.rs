//! Raspberry Pi bus: BME280 through the kernel IIO driver, RF outlets through
//! `codesend`, indicator LEDs and buttons on GPIO.

use std::{path::Path, process::Stdio};

use chrono::{DateTime, FixedOffset};
use rppal::gpio::{Event, Gpio, InputPin, OutputPin, Trigger};
use tokio::{process::Command, sync::mpsc};
use tracing::{debug, info, warn};

use greenhouse_common::{ActuatorId, HardwareConfig, SensorReading};

use crate::{
    error::{ActuatorError, HardwareError, SensorError},
    hardware::{monotonic_ms, ButtonEdge, HardwareBus, BUTTON_EDGE_BUFFER},
};

pub struct RpiBus {
    config: HardwareConfig,
    /// Indexed by `ActuatorId::index`.
    leds: Vec<OutputPin>,
    buttons: Vec<(ActuatorId, InputPin)>,
    subscribed: bool,
}

impl RpiBus {
    pub fn open(config: &HardwareConfig) -> Result<Self, HardwareError> {
        let gpio = Gpio::new().map_err(|err| HardwareError::Unavailable(err.to_string()))?;

        let mut leds = Vec::with_capacity(ActuatorId::ALL.len());
        let mut buttons = Vec::new();
        for id in ActuatorId::ALL {
            let device = config.devices.get(id);
            leds.push(claim(&gpio, device.led_gpio_pin)?.into_output_low());
            if let Some(pin) = device.button_gpio_pin {
                buttons.push((id, claim(&gpio, pin)?.into_input_pullup()));
            }
        }

        let sensor = &config.sensor.iio_device;
        if !sensor.exists() {
            return Err(HardwareError::Unavailable(format!(
                "no IIO sensor at {}",
                sensor.display()
            )));
        }

        info!(
            component = "rpi",
            buttons = buttons.len(),
            sensor = %sensor.display(),
            "gpio ready"
        );
        Ok(Self {
            config: config.clone(),
            leds,
            buttons,
            subscribed: false,
        })
    }
}

fn claim(gpio: &Gpio, pin: u8) -> Result<rppal::gpio::Pin, HardwareError> {
    gpio.get(pin).map_err(|err| HardwareError::Gpio {
        pin,
        reason: err.to_string(),
    })
}

async fn read_channel(device: &Path, channel: &str) -> Result<f32, SensorError> {
    let path = device.join(channel);
    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(|err| SensorError::Read(format!("{}: {err}", path.display())))?;
    raw.trim()
        .parse::<f32>()
        .map_err(|err| SensorError::Read(format!("{}: {err}", path.display())))
}

impl HardwareBus for RpiBus {
    async fn read_sensor(
        &mut self,
        at: DateTime<FixedOffset>,
    ) -> Result<SensorReading, SensorError> {
        let device = &self.config.sensor.iio_device;
        // IIO units: milli-degrees C, milli-percent RH, kPa.
        let temperature = read_channel(device, "in_temp_input").await? / 1_000.0;
        let humidity = read_channel(device, "in_humidityrelative_input").await? / 1_000.0;
        let pressure = read_channel(device, "in_pressure_input").await? * 10.0;
        Ok(SensorReading::new(at, temperature, humidity, pressure))
    }

    async fn set_actuator(&mut self, id: ActuatorId, powered: bool) -> Result<(), ActuatorError> {
        let device = self.config.devices.get(id);
        let code = if powered {
            device.rf_on_code
        } else {
            device.rf_off_code
        };

        let status = Command::new(&self.config.codesend_path)
            .arg(code.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|err| ActuatorError::Transmit {
                actuator: id,
                reason: err.to_string(),
            })?;

        if !status.success() {
            return Err(ActuatorError::Transmit {
                actuator: id,
                reason: format!("codesend exited with {status}"),
            });
        }
        debug!(component = "rpi", actuator = %id, code, "rf code sent");
        Ok(())
    }

    async fn set_indicator(&mut self, id: ActuatorId, lit: bool) -> Result<(), ActuatorError> {
        let led = &mut self.leds[id.index()];
        if lit {
            led.set_high();
        } else {
            led.set_low();
        }
        Ok(())
    }

    fn subscribe_button_events(&mut self) -> Result<mpsc::Receiver<ButtonEdge>, HardwareError> {
        if self.subscribed {
            return Err(HardwareError::AlreadySubscribed);
        }

        let (tx, rx) = mpsc::channel(BUTTON_EDGE_BUFFER);
        for (id, button) in &mut self.buttons {
            let id = *id;
            let tx = tx.clone();
            // Buttons pull the line low when pressed.
            button
                .set_async_interrupt(Trigger::FallingEdge, None, move |_: Event| {
                    let edge = ButtonEdge {
                        id,
                        at_ms: monotonic_ms(),
                    };
                    if tx.try_send(edge).is_err() {
                        debug!(component = "rpi", actuator = %id, "button edge dropped");
                    }
                })
                .map_err(|err| HardwareError::Gpio {
                    pin: button.pin(),
                    reason: err.to_string(),
                })?;
        }

        self.subscribed = true;
        Ok(rx)
    }

    async fn close(&mut self) {
        for (id, button) in &mut self.buttons {
            if let Err(err) = button.clear_async_interrupt() {
                warn!(component = "rpi", actuator = %id, "failed to clear button interrupt: {err}");
            }
        }
        for led in &mut self.leds {
            led.set_low();
        }
        info!(component = "rpi", "gpio released");
    }
}
