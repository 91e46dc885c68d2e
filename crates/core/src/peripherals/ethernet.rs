// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{
    lock, required_bytes, required_id, Interrupts, PeripheralError, PeripheralId, PeripheralModel,
};
use crate::bridge::{peripheral_topic, Payload, Publish};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RxFrame {
    pub data: Vec<u8>,
    pub received: SystemTime,
}

#[derive(Debug, Default)]
struct Interface {
    frames: VecDeque<RxFrame>,
    rx_isr_enabled: bool,
    rx_irq: Option<u32>,
}

/// Per-interface receive queues with an rx interrupt gate.
///
/// Queue contents and the gate live under one lock, so an arrival racing with
/// `enable_rx_isr` is seen by at least one of them and the interrupt is never lost.
#[derive(Debug)]
pub struct EthernetModel {
    interfaces: Mutex<HashMap<PeripheralId, Interface>>,
    interrupts: Arc<Interrupts>,
    publisher: Arc<dyn Publish>,
}

impl EthernetModel {
    pub const NAME: &'static str = "EthernetModel";

    pub fn new(interrupts: Arc<Interrupts>, publisher: Arc<dyn Publish>) -> Self {
        Self {
            interfaces: Mutex::new(HashMap::new()),
            interrupts,
            publisher,
        }
    }

    /// Line raised for `id` on frame arrival. Without one only the source flag
    /// (named after the interface) is set.
    pub fn set_rx_irq(&self, id: &PeripheralId, irq: u32) {
        lock(&self.interfaces).entry(id.clone()).or_default().rx_irq = Some(irq);
    }

    pub fn enable_rx_isr(&self, id: &PeripheralId) -> Result<(), PeripheralError> {
        let pending = {
            let mut ifaces = lock(&self.interfaces);
            let iface = ifaces.entry(id.clone()).or_default();
            iface.rx_isr_enabled = true;
            (!iface.frames.is_empty()).then_some(iface.rx_irq)
        };
        debug!("Ethernet {} rx isr enabled", id);
        match pending {
            Some(irq) => self.interrupts.raise(&id.to_string(), irq),
            None => Ok(()),
        }
    }

    pub fn disable_rx_isr(&self, id: &PeripheralId) {
        lock(&self.interfaces).entry(id.clone()).or_default().rx_isr_enabled = false;
        debug!("Ethernet {} rx isr disabled", id);
    }

    pub fn rx_isr_enabled(&self, id: &PeripheralId) -> bool {
        lock(&self.interfaces)
            .get(id)
            .map(|i| i.rx_isr_enabled)
            .unwrap_or(false)
    }

    /// Publishes a guest frame on `Peripheral.EthernetModel.tx_frame`.
    pub fn tx_frame(&self, id: &PeripheralId, frame: &[u8]) {
        debug!("Ethernet {} tx {} bytes", id, frame.len());
        let payload = Payload::new()
            .with("interface_id", id.to_value())
            .with("frame", frame);
        if let Err(e) = self
            .publisher
            .publish(&peripheral_topic(Self::NAME, "tx_frame"), payload)
        {
            warn!("Ethernet {} frame dropped: {}", id, e);
        }
    }

    /// Queues an arriving frame and raises the rx interrupt when enabled.
    pub fn rx_frame(&self, id: &PeripheralId, frame: Vec<u8>) -> Result<(), PeripheralError> {
        let len = frame.len();
        let pending = {
            let mut ifaces = lock(&self.interfaces);
            let iface = ifaces.entry(id.clone()).or_default();
            iface.frames.push_back(RxFrame {
                data: frame,
                received: SystemTime::now(),
            });
            iface.rx_isr_enabled.then_some(iface.rx_irq)
        };
        debug!("Ethernet {} rx {} bytes", id, len);
        match pending {
            Some(irq) => self.interrupts.raise(&id.to_string(), irq),
            None => Ok(()),
        }
    }

    /// Pops the oldest frame. Unknown interfaces read as empty.
    pub fn get_rx_frame(&self, id: &PeripheralId) -> Option<RxFrame> {
        lock(&self.interfaces)
            .get_mut(id)
            .and_then(|i| i.frames.pop_front())
    }

    /// `(queued frames, length of the oldest)`.
    pub fn get_frame_info(&self, id: &PeripheralId) -> (usize, usize) {
        lock(&self.interfaces)
            .get(id)
            .map(|i| (i.frames.len(), i.frames.front().map_or(0, |f| f.data.len())))
            .unwrap_or((0, 0))
    }

    pub fn has_frame(&self, id: &PeripheralId) -> bool {
        self.get_frame_info(id).0 > 0
    }
}

impl PeripheralModel for EthernetModel {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn rx_methods(&self) -> &'static [&'static str] {
        &["rx_frame"]
    }

    fn handle_rx(&self, method: &str, payload: &Payload) -> Result<(), PeripheralError> {
        match method {
            "rx_frame" => {
                let id = required_id(payload, method, "interface_id")?;
                let frame = required_bytes(payload, method, "frame")?;
                self.rx_frame(&id, frame)
            }
            other => Err(PeripheralError::UnknownMethod {
                model: Self::NAME,
                method: other.to_string(),
            }),
        }
    }
}
