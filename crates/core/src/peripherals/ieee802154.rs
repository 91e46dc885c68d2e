// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{lock, required_bytes, Interrupts, PeripheralError, PeripheralModel};
use super::ethernet::RxFrame;
use crate::bridge::{peripheral_topic, Payload, Publish};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Medium {
    frames: VecDeque<RxFrame>,
    rx_irq: Option<u32>,
}

/// IEEE 802.15.4 link. The air is a broadcast medium, so there is one queue shared by
/// every radio on the guest and no rx enable gate.
#[derive(Debug)]
pub struct Ieee802154Model {
    medium: Mutex<Medium>,
    interrupts: Arc<Interrupts>,
    publisher: Arc<dyn Publish>,
}

impl Ieee802154Model {
    pub const NAME: &'static str = "IEEE802_15_4";
    pub const IRQ_SOURCE: &'static str = "802_15_4_RX_Frame";

    pub fn new(interrupts: Arc<Interrupts>, publisher: Arc<dyn Publish>) -> Self {
        Self {
            medium: Mutex::new(Medium::default()),
            interrupts,
            publisher,
        }
    }

    pub fn set_rx_irq(&self, irq: u32) {
        lock(&self.medium).rx_irq = Some(irq);
    }

    pub fn tx_frame(&self, frame: &[u8]) {
        debug!("802.15.4 tx {} bytes", frame.len());
        if let Err(e) = self.publisher.publish(
            &peripheral_topic(Self::NAME, "tx_frame"),
            Payload::new().with("frame", frame),
        ) {
            warn!("802.15.4 frame dropped: {}", e);
        }
    }

    pub fn rx_frame(&self, frame: Vec<u8>) -> Result<(), PeripheralError> {
        let len = frame.len();
        let irq = {
            let mut medium = lock(&self.medium);
            medium.frames.push_back(RxFrame {
                data: frame,
                received: SystemTime::now(),
            });
            medium.rx_irq
        };
        debug!("802.15.4 rx {} bytes", len);
        match irq {
            Some(irq) => self.interrupts.trigger_interrupt(irq, Some(Self::IRQ_SOURCE)),
            None => Ok(()),
        }
    }

    pub fn get_first_frame(&self) -> Option<RxFrame> {
        lock(&self.medium).frames.pop_front()
    }

    pub fn get_frame_info(&self) -> (usize, usize) {
        let medium = lock(&self.medium);
        (
            medium.frames.len(),
            medium.frames.front().map_or(0, |f| f.data.len()),
        )
    }

    pub fn has_frame(&self) -> bool {
        !lock(&self.medium).frames.is_empty()
    }
}

impl PeripheralModel for Ieee802154Model {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn rx_methods(&self) -> &'static [&'static str] {
        &["rx_frame"]
    }

    fn handle_rx(&self, method: &str, payload: &Payload) -> Result<(), PeripheralError> {
        match method {
            "rx_frame" => self.rx_frame(required_bytes(payload, method, "frame")?),
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
    use crate::mock::{RecordingInjector, RecordingPublisher};

    #[test]
    fn test_every_arrival_raises_configured_irq() {
        let injector = Arc::new(RecordingInjector::new());
        let interrupts = Arc::new(Interrupts::new(injector.clone()));
        let radio = Ieee802154Model::new(interrupts.clone(), Arc::new(RecordingPublisher::new()));

        radio.rx_frame(vec![0x41, 0x88]).unwrap();
        assert!(injector.triggered().is_empty());

        radio.set_rx_irq(36);
        radio
            .handle_rx("rx_frame", &Payload::new().with("frame", vec![1u8, 2, 3]))
            .unwrap();
        radio.rx_frame(vec![4]).unwrap();
        assert_eq!(injector.count(36), 2);
        assert!(interrupts.is_active(Ieee802154Model::IRQ_SOURCE));

        assert_eq!(radio.get_frame_info(), (3, 2));
        assert_eq!(radio.get_first_frame().unwrap().data, vec![0x41, 0x88]);
        assert_eq!(radio.get_first_frame().unwrap().data, vec![1, 2, 3]);
        assert!(radio.has_frame());
    }

    #[test]
    fn test_tx_frame_payload() {
        let publisher = Arc::new(RecordingPublisher::new());
        let interrupts = Arc::new(Interrupts::new(Arc::new(RecordingInjector::new())));
        let radio = Ieee802154Model::new(interrupts, publisher.clone());
        radio.tx_frame(&[0x61, 0x88, 0x00]);

        let sent = publisher.on_topic("Peripheral.IEEE802_15_4.tx_frame");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].get_bytes("frame"), Some(&[0x61, 0x88, 0x00][..]));
        assert_eq!(sent[0].len(), 1);
    }
}
