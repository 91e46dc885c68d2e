// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::DeviceError;
use halwire_core::bridge::server::POLL_INTERVAL;
use halwire_core::bridge::{BridgeError, Message, Payload, Publish, Publisher, Subscriber};
use halwire_core::signals::StopSignal;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

pub type TopicHandler = Arc<dyn Fn(&IoServer, &Message) + Send + Sync>;

/// CSV record of every frame crossing the server.
struct PacketLog {
    out: BufWriter<File>,
}

impl PacketLog {
    fn create(path: &Path) -> Result<Self, DeviceError> {
        let log_err = |source| DeviceError::Log {
            path: path.to_path_buf(),
            source,
        };
        let mut out = BufWriter::new(File::create(path).map_err(log_err)?);
        writeln!(out, "Direction, Time, Topic, Data").map_err(log_err)?;
        out.flush().map_err(log_err)?;
        Ok(Self { out })
    }

    /// Messages without a `frame` field are not logged.
    fn record(&mut self, direction: &str, topic: &str, payload: &Payload) {
        let Some(frame) = payload.get_bytes("frame") else {
            return;
        };
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let hex: String = frame.iter().map(|b| format!("{:02x}", b)).collect();
        let result = writeln!(self.out, "{}, {}, {}, {}", direction, secs, topic, hex)
            .and_then(|_| self.out.flush());
        if let Err(e) = result {
            warn!("Packet log write failed: {}", e);
        }
    }
}

/// One emulator connection: subscribes to the emulator's publisher and publishes on
/// a port the emulator subscribes to. Handlers run on the receive thread, in order.
pub struct IoServer {
    rx_endpoint: String,
    publisher: Arc<Publisher>,
    handlers: RwLock<BTreeMap<String, TopicHandler>>,
    packet_log: Option<Mutex<PacketLog>>,
    stop: StopSignal,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl IoServer {
    /// `rx_endpoint` is the emulator's publish address (`host:port`); `tx_addr` is
    /// bound locally for the emulator to subscribe to.
    pub fn new(
        rx_endpoint: impl Into<String>,
        tx_addr: &str,
        log_file: Option<&Path>,
    ) -> Result<Arc<Self>, DeviceError> {
        let packet_log = log_file
            .map(PacketLog::create)
            .transpose()?
            .map(Mutex::new);
        let publisher = Publisher::bind(tx_addr)?;
        Ok(Arc::new(Self {
            rx_endpoint: rx_endpoint.into(),
            publisher,
            handlers: RwLock::new(BTreeMap::new()),
            packet_log,
            stop: StopSignal::new(),
            thread: Mutex::new(None),
        }))
    }

    pub fn rx_endpoint(&self) -> &str {
        &self.rx_endpoint
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.publisher.local_addr()
    }

    /// Replaces any previous handler for `topic`.
    pub fn register_topic<F>(&self, topic: &str, handler: F)
    where
        F: Fn(&IoServer, &Message) + Send + Sync + 'static,
    {
        debug!("IO server {}: handling {}", self.rx_endpoint, topic);
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.insert(topic.to_string(), Arc::new(handler));
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.handlers
            .read()
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn start(self: &Arc<Self>) -> Result<(), DeviceError> {
        let server = self.clone();
        let handle = std::thread::Builder::new()
            .name(format!("io-server-{}", self.rx_endpoint))
            .spawn(move || server.run())
            .map_err(DeviceError::Spawn)?;
        if let Ok(mut slot) = self.thread.lock() {
            *slot = Some(handle);
        }
        Ok(())
    }

    fn run(&self) {
        let mut subscriber = Subscriber::connect(self.rx_endpoint.clone());
        info!("IO server receiving from {}", self.rx_endpoint);
        while !self.stop.is_triggered() {
            match subscriber.recv_timeout(POLL_INTERVAL) {
                Ok(Some(msg)) => self.deliver(&msg),
                Ok(None) => {}
                Err(BridgeError::Io { endpoint, source }) => {
                    debug!("IO server receive from {} interrupted: {}", endpoint, source);
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => warn!("Dropping message from {}: {}", self.rx_endpoint, e),
            }
        }
        debug!("IO server {} stopped", self.rx_endpoint);
    }

    /// Runs the handler registered for the message topic.
    pub fn deliver(&self, msg: &Message) {
        if let Some(log) = &self.packet_log {
            if let Ok(mut log) = log.lock() {
                log.record("Sent", &msg.topic, &msg.payload);
            }
        }
        let handler = self
            .handlers
            .read()
            .ok()
            .and_then(|h| h.get(&msg.topic).cloned());
        match handler {
            Some(handler) => handler(self, msg),
            None => debug!("IO server {}: no handler for {}", self.rx_endpoint, msg.topic),
        }
    }

    pub fn send_msg(&self, topic: &str, payload: Payload) -> Result<(), BridgeError> {
        if let Some(log) = &self.packet_log {
            if let Ok(mut log) = log.lock() {
                log.record("Received", topic, &payload);
            }
        }
        self.publisher.publish(topic, payload)
    }

    /// Waits for `count` emulators to subscribe; earlier messages are not replayed.
    pub fn wait_for_peers(&self, count: usize, timeout: Duration) -> bool {
        self.publisher.wait_for_subscribers(count, timeout)
    }

    /// Stops the receive thread and the publisher, and drops every handler.
    pub fn shutdown(&self) {
        debug!("Stopping IO server {}", self.rx_endpoint);
        self.stop.trigger();
        let handle = self.thread.lock().ok().and_then(|mut t| t.take());
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                // called from a handler; the loop exits on its own
            } else if handle.join().is_err() {
                warn!("IO server thread for {} panicked", self.rx_endpoint);
            }
        }
        self.publisher.shutdown();
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.clear();
        }
    }
}

impl std::fmt::Debug for IoServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoServer")
            .field("rx", &self.rx_endpoint)
            .field("tx", &self.local_addr())
            .field("topics", &self.topics())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_deliver_routes_by_exact_topic() {
        let server = IoServer::new("127.0.0.1:1", "127.0.0.1:0", None).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        server.register_topic("Peripheral.UARTPublisher.write", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        server.deliver(&Message::new("Peripheral.UARTPublisher.write", Payload::new()));
        server.deliver(&Message::new("Peripheral.UARTPublisher.writes", Payload::new()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        server.shutdown();
        assert!(server.topics().is_empty());
    }

    #[test]
    fn test_packet_log_records_frames_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packets.csv");
        let server = IoServer::new("127.0.0.1:1", "127.0.0.1:0", Some(&path)).unwrap();

        server.deliver(&Message::new(
            "Peripheral.EthernetModel.tx_frame",
            Payload::new().with("frame", &[0xdeu8, 0xad, 0xbe, 0xef][..]),
        ));
        server
            .send_msg("Peripheral.UARTPublisher.rx_data", Payload::new().with("chars", "x"))
            .unwrap();
        server.shutdown();

        let log = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "Direction, Time, Topic, Data");
        assert!(lines[1].starts_with("Sent, "));
        assert!(lines[1].ends_with("Peripheral.EthernetModel.tx_frame, deadbeef"));
    }
}
