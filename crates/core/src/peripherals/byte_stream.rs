// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{lock, required_bytes, required_id, PeripheralError, PeripheralId, PeripheralModel};
use crate::bridge::{peripheral_topic, Payload, Publish};
use crate::signals::StopSignal;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound on one condvar wait so a blocked reader notices the stop signal.
const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct ByteQueue {
    data: Mutex<VecDeque<u8>>,
    ready: Condvar,
}

/// Serial byte stream (UART, SPI) with one inbound FIFO per peripheral id.
#[derive(Debug)]
pub struct ByteStreamModel {
    name: &'static str,
    queues: Mutex<HashMap<PeripheralId, Arc<ByteQueue>>>,
    publisher: Arc<dyn Publish>,
    stop: StopSignal,
}

impl ByteStreamModel {
    pub const UART: &'static str = "UARTPublisher";
    pub const SPI: &'static str = "SPIPublisher";

    pub fn new(name: &'static str, publisher: Arc<dyn Publish>, stop: StopSignal) -> Self {
        Self {
            name,
            queues: Mutex::new(HashMap::new()),
            publisher,
            stop,
        }
    }

    pub fn uart(publisher: Arc<dyn Publish>, stop: StopSignal) -> Self {
        Self::new(Self::UART, publisher, stop)
    }

    pub fn spi(publisher: Arc<dyn Publish>, stop: StopSignal) -> Self {
        Self::new(Self::SPI, publisher, stop)
    }

    fn queue(&self, id: &PeripheralId) -> Arc<ByteQueue> {
        lock(&self.queues).entry(id.clone()).or_default().clone()
    }

    /// Publishes guest output on `Peripheral.<name>.write`.
    pub fn write(&self, id: &PeripheralId, chars: &[u8]) {
        debug!("{} {} write {} bytes", self.name, id, chars.len());
        let payload = Payload::new()
            .with("id", id.to_value())
            .with("chars", chars);
        if let Err(e) = self
            .publisher
            .publish(&peripheral_topic(self.name, "write"), payload)
        {
            warn!("{} {} output dropped: {}", self.name, id, e);
        }
    }

    /// Appends inbound bytes and wakes blocked readers.
    pub fn rx_data(&self, id: &PeripheralId, chars: &[u8]) {
        let queue = self.queue(id);
        lock(&queue.data).extend(chars.iter().copied());
        queue.ready.notify_all();
        debug!("{} {} received {} bytes", self.name, id, chars.len());
    }

    /// Without `block`, returns whatever is queued up to `count` bytes (possibly none).
    /// With `block`, waits until `count` bytes are available; a triggered stop signal
    /// ends the wait with [`PeripheralError::Cancelled`].
    pub fn read(&self, id: &PeripheralId, count: usize, block: bool) -> Result<Vec<u8>, PeripheralError> {
        let queue = self.queue(id);
        let mut data = lock(&queue.data);
        if block {
            while data.len() < count {
                if self.stop.is_triggered() {
                    return Err(PeripheralError::Cancelled { id: id.clone() });
                }
                data = queue
                    .ready
                    .wait_timeout(data, WAIT_SLICE)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|e| PoisonError::into_inner(e).0);
            }
        }
        let n = count.min(data.len());
        Ok(data.drain(..n).collect())
    }

    pub fn pending(&self, id: &PeripheralId) -> usize {
        lock(&self.queues)
            .get(id)
            .map(|q| lock(&q.data).len())
            .unwrap_or(0)
    }

    pub fn has_data(&self, id: &PeripheralId) -> bool {
        self.pending(id) > 0
    }
}

impl PeripheralModel for ByteStreamModel {
    fn name(&self) -> &'static str {
        self.name
    }

    fn rx_methods(&self) -> &'static [&'static str] {
        &["rx_data"]
    }

    fn handle_rx(&self, method: &str, payload: &Payload) -> Result<(), PeripheralError> {
        match method {
            "rx_data" => {
                let id = required_id(payload, method, "id")?;
                let chars = required_bytes(payload, method, "chars")?;
                self.rx_data(&id, &chars);
                Ok(())
            }
            other => Err(PeripheralError::UnknownMethod {
                model: self.name,
                method: other.to_string(),
            }),
        }
    }
}
