// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Frame hubs joining several emulated nodes into one network segment.

use crate::IoServer;
use halwire_core::bridge::{peripheral_topic, Payload};
use halwire_core::peripherals::{EthernetModel, Ieee802154Model};
use std::fmt;
use std::io;
use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, warn};

/// Host-side copy of every forwarded frame.
pub trait FrameSink: Send + Sync + fmt::Debug {
    fn send_frame(&self, frame: &[u8]) -> io::Result<()>;
}

/// Sends each frame as one datagram to a fixed host address.
#[derive(Debug)]
pub struct UdpFrameSink {
    socket: UdpSocket,
}

impl UdpFrameSink {
    pub fn connect(peer: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(peer)?;
        Ok(Self { socket })
    }
}

impl FrameSink for UdpFrameSink {
    fn send_frame(&self, frame: &[u8]) -> io::Result<()> {
        self.socket.send(frame).map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Medium {
    Ethernet,
    Ieee802154,
}

impl Medium {
    fn model(self) -> &'static str {
        match self {
            Medium::Ethernet => EthernetModel::NAME,
            Medium::Ieee802154 => Ieee802154Model::NAME,
        }
    }

    /// Topic guests transmit on.
    pub fn tx_topic(self) -> String {
        peripheral_topic(self.model(), "tx_frame")
    }

    /// Topic guests receive on.
    pub fn rx_topic(self) -> String {
        peripheral_topic(self.model(), "rx_frame")
    }
}

#[derive(Debug)]
struct HubInner {
    medium: Medium,
    servers: RwLock<Vec<Arc<IoServer>>>,
    sink: Option<Box<dyn FrameSink>>,
    forwarded: AtomicU64,
}

impl HubInner {
    fn forward(&self, origin: Option<usize>, payload: &Payload) {
        let rx_topic = self.medium.rx_topic();
        let servers = match self.servers.read() {
            Ok(s) => s.clone(),
            Err(_) => return,
        };
        for (idx, server) in servers.iter().enumerate() {
            if Some(idx) == origin {
                continue;
            }
            debug!("Forwarding {:?} frame to {}", self.medium, server.rx_endpoint());
            if let Err(e) = server.send_msg(&rx_topic, payload.clone()) {
                warn!("Forward to {} failed: {}", server.rx_endpoint(), e);
            }
        }
        if let (Some(sink), Some(frame)) = (&self.sink, payload.get_bytes("frame")) {
            if let Err(e) = sink.send_frame(frame) {
                warn!("Host frame sink failed: {}", e);
            }
        }
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }
}

/// Broadcast segment: a frame transmitted by one node is delivered to every other
/// node, never back to its sender.
#[derive(Debug)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    pub fn new(medium: Medium, sink: Option<Box<dyn FrameSink>>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                medium,
                servers: RwLock::new(Vec::new()),
                sink,
                forwarded: AtomicU64::new(0),
            }),
        }
    }

    pub fn ethernet(sink: Option<Box<dyn FrameSink>>) -> Self {
        Self::new(Medium::Ethernet, sink)
    }

    pub fn radio(sink: Option<Box<dyn FrameSink>>) -> Self {
        Self::new(Medium::Ieee802154, sink)
    }

    pub fn medium(&self) -> Medium {
        self.inner.medium
    }

    pub fn add_server(&self, server: Arc<IoServer>) {
        let origin = match self.inner.servers.write() {
            Ok(mut servers) => {
                servers.push(server.clone());
                servers.len() - 1
            }
            Err(_) => return,
        };
        let hub: Weak<HubInner> = Arc::downgrade(&self.inner);
        server.register_topic(&self.inner.medium.tx_topic(), move |_, msg| {
            if let Some(hub) = hub.upgrade() {
                hub.forward(Some(origin), &msg.payload);
            }
        });
    }

    pub fn server_count(&self) -> usize {
        self.inner.servers.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Sends a frame from outside the segment to every node.
    pub fn inject(&self, payload: &Payload) {
        self.inner.forward(None, payload);
    }

    /// Frames forwarded so far, injected ones included.
    pub fn forwarded(&self) -> u64 {
        self.inner.forwarded.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        let servers = self
            .inner
            .servers
            .write()
            .map(|mut s| std::mem::take(&mut *s))
            .unwrap_or_default();
        for server in servers {
            server.shutdown();
        }
    }
}
