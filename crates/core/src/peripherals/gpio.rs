// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{lock, required, required_id, PeripheralError, PeripheralId, PeripheralModel};
use crate::bridge::{peripheral_topic, Payload, Publish};
use crate::signals::DigitalLevel;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Pin levels keyed by pin id. Pins never written read as low.
#[derive(Debug)]
pub struct GpioModel {
    pins: Mutex<HashMap<PeripheralId, DigitalLevel>>,
    publisher: Arc<dyn Publish>,
}

impl GpioModel {
    pub const NAME: &'static str = "GPIO";

    pub fn new(publisher: Arc<dyn Publish>) -> Self {
        Self {
            pins: Mutex::new(HashMap::new()),
            publisher,
        }
    }

    pub fn write_pin(&self, id: &PeripheralId, level: DigitalLevel) {
        lock(&self.pins).insert(id.clone(), level);
        self.announce("write_pin", id, level);
    }

    pub fn toggle_pin(&self, id: &PeripheralId) -> DigitalLevel {
        let level = {
            let mut pins = lock(&self.pins);
            let pin = pins.entry(id.clone()).or_default();
            *pin = pin.toggled();
            *pin
        };
        self.announce("toggle_pin", id, level);
        level
    }

    pub fn read_pin(&self, id: &PeripheralId) -> DigitalLevel {
        lock(&self.pins).get(id).copied().unwrap_or_default()
    }

    fn announce(&self, method: &str, id: &PeripheralId, level: DigitalLevel) {
        debug!("GPIO {} {} -> {:?}", method, id, level);
        let payload = Payload::new()
            .with("id", id.to_value())
            .with("value", u64::from(bool::from(level)));
        if let Err(e) = self
            .publisher
            .publish(&peripheral_topic(Self::NAME, method), payload)
        {
            warn!("GPIO {} update dropped: {}", id, e);
        }
    }
}

impl PeripheralModel for GpioModel {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn rx_methods(&self) -> &'static [&'static str] {
        &["ext_pin_change"]
    }

    fn handle_rx(&self, method: &str, payload: &Payload) -> Result<(), PeripheralError> {
        match method {
            "ext_pin_change" => {
                let id = required_id(payload, method, "id")?;
                let value = required(payload, method, "value")?
                    .as_bool()
                    .ok_or_else(|| PeripheralError::BadMessage {
                        method: method.to_string(),
                        field: "value",
                    })?;
                debug!("GPIO {} changed externally to {}", id, value);
                lock(&self.pins).insert(id, DigitalLevel::from(value));
                Ok(())
            }
            other => Err(PeripheralError::UnknownMethod {
                model: Self::NAME,
                method: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingPublisher;

    #[test]
    fn test_write_toggle_read() {
        let publisher = Arc::new(RecordingPublisher::new());
        let gpio = GpioModel::new(publisher.clone());
        let pin = PeripheralId::from("GPIOA.5");

        assert_eq!(gpio.read_pin(&pin), DigitalLevel::Low);
        gpio.write_pin(&pin, DigitalLevel::High);
        assert_eq!(gpio.read_pin(&pin), DigitalLevel::High);
        assert_eq!(gpio.toggle_pin(&pin), DigitalLevel::Low);

        let writes = publisher.on_topic("Peripheral.GPIO.write_pin");
        assert_eq!(writes[0].get_u64("value"), Some(1));
        let toggles = publisher.on_topic("Peripheral.GPIO.toggle_pin");
        assert_eq!(toggles[0].get_str("id"), Some("GPIOA.5"));
        assert_eq!(toggles[0].get_u64("value"), Some(0));
    }

    #[test]
    fn test_toggle_unknown_pin_goes_high() {
        let publisher = Arc::new(RecordingPublisher::new());
        let gpio = GpioModel::new(publisher.clone());
        let pin = PeripheralId::from("GPIOB.3");

        assert_eq!(gpio.toggle_pin(&pin), DigitalLevel::High);
        assert_eq!(gpio.read_pin(&pin), DigitalLevel::High);
        let toggles = publisher.on_topic("Peripheral.GPIO.toggle_pin");
        assert_eq!(toggles[0].get_u64("value"), Some(1));
    }

    #[test]
    fn test_external_pin_change() {
        let gpio = GpioModel::new(Arc::new(RecordingPublisher::new()));
        gpio.handle_rx(
            "ext_pin_change",
            &Payload::new().with("id", 0x4002_0000u64).with("value", 1u64),
        )
        .unwrap();
        assert_eq!(gpio.read_pin(&PeripheralId::from(0x4002_0000u64)), DigitalLevel::High);

        assert!(gpio
            .handle_rx("ext_pin_change", &Payload::new().with("id", 1u64))
            .is_err());
    }
}
