// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! TCP publish/subscribe endpoints.
//!
//! A [`Publisher`] binds and fans every frame out to all connected subscribers from
//! a dedicated writer thread, so `publish` only enqueues. A [`Subscriber`] connects
//! (and reconnects) to a publisher and filters by topic prefix on its side.

use super::wire::{self, FrameBuffer};
use super::{BridgeError, Message, Payload, Publish};
use crate::signals::StopSignal;
use crossbeam_channel as cbc;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const ACCEPT_POLL: Duration = Duration::from_millis(20);
const WRITER_POLL: Duration = Duration::from_millis(50);
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const RECONNECT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct Publisher {
    local_addr: SocketAddr,
    frames: cbc::Sender<Vec<u8>>,
    subscribers: Arc<Mutex<Vec<TcpStream>>>,
    stop: StopSignal,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Publisher {
    /// Binds `addr` (e.g. `0.0.0.0:5556`, or port 0 for an ephemeral port) and starts
    /// the accept and writer threads.
    pub fn bind(addr: &str) -> Result<Arc<Self>, BridgeError> {
        let listener = TcpListener::bind(addr).map_err(|e| BridgeError::io(addr, e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| BridgeError::io(addr, e))?;
        let local_addr = listener.local_addr().map_err(|e| BridgeError::io(addr, e))?;

        let subscribers: Arc<Mutex<Vec<TcpStream>>> = Arc::new(Mutex::new(Vec::new()));
        let stop = StopSignal::new();
        let (tx, rx) = cbc::unbounded::<Vec<u8>>();

        let accept_subs = subscribers.clone();
        let accept_stop = stop.clone();
        let acceptor = std::thread::Builder::new()
            .name("bridge-accept".into())
            .spawn(move || accept_loop(listener, accept_subs, accept_stop))
            .map_err(|e| BridgeError::io(local_addr, e))?;

        let writer_subs = subscribers.clone();
        let writer_stop = stop.clone();
        let writer = std::thread::Builder::new()
            .name("bridge-tx".into())
            .spawn(move || writer_loop(rx, writer_subs, writer_stop))
            .map_err(|e| BridgeError::io(local_addr, e))?;

        info!("Bridge publisher listening on {}", local_addr);
        Ok(Arc::new(Self {
            local_addr,
            frames: tx,
            subscribers,
            stop,
            threads: Mutex::new(vec![acceptor, writer]),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Frames published before a subscriber connects are not replayed to it, so
    /// callers that need delivery wait here first.
    pub fn wait_for_subscribers(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.subscriber_count() >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(ACCEPT_POLL);
        }
    }

    /// Flushes queued frames, then stops both threads.
    pub fn shutdown(&self) {
        self.stop.trigger();
        let handles: Vec<JoinHandle<()>> = match self.threads.lock() {
            Ok(mut threads) => threads.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if handle.join().is_err() {
                warn!("Bridge publisher thread panicked");
            }
        }
    }
}

impl Publish for Publisher {
    fn publish(&self, topic: &str, payload: Payload) -> Result<(), BridgeError> {
        if self.stop.is_triggered() {
            return Err(BridgeError::Closed);
        }
        let frame = wire::encode(&Message::new(topic, payload))?;
        debug!("Bridge TX {} ({} bytes)", topic, frame.len());
        self.frames.send(frame).map_err(|_| BridgeError::Closed)
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.stop.trigger();
    }
}

fn accept_loop(listener: TcpListener, subscribers: Arc<Mutex<Vec<TcpStream>>>, stop: StopSignal) {
    while !stop.is_triggered() {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!("Rejecting subscriber {}: {}", peer, e);
                    continue;
                }
                let _ = stream.set_nodelay(true);
                let _ = stream.set_write_timeout(Some(WRITE_TIMEOUT));
                info!("Bridge subscriber connected from {}", peer);
                if let Ok(mut subs) = subscribers.lock() {
                    subs.push(stream);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!("Bridge accept failed: {}", e);
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn writer_loop(
    frames: cbc::Receiver<Vec<u8>>,
    subscribers: Arc<Mutex<Vec<TcpStream>>>,
    stop: StopSignal,
) {
    loop {
        match frames.recv_timeout(WRITER_POLL) {
            Ok(frame) => fan_out(&subscribers, &frame),
            Err(cbc::RecvTimeoutError::Timeout) => {
                if stop.is_triggered() {
                    break;
                }
            }
            Err(cbc::RecvTimeoutError::Disconnected) => break,
        }
    }
    while let Ok(frame) = frames.try_recv() {
        fan_out(&subscribers, &frame);
    }
}

fn fan_out(subscribers: &Mutex<Vec<TcpStream>>, frame: &[u8]) {
    let Ok(mut subs) = subscribers.lock() else {
        return;
    };
    subs.retain_mut(|stream| match stream.write_all(frame) {
        Ok(()) => true,
        Err(e) => {
            info!(
                "Dropping bridge subscriber {}: {}",
                stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| "?".into()),
                e
            );
            false
        }
    });
}

#[derive(Debug)]
pub struct Subscriber {
    endpoint: String,
    stream: Option<TcpStream>,
    frames: FrameBuffer,
    prefixes: Vec<String>,
    last_attempt: Option<Instant>,
}

impl Subscriber {
    /// Targets `endpoint` (`host:port`). Connection failures are retried lazily by
    /// [`recv_timeout`](Self::recv_timeout).
    pub fn connect(endpoint: impl Into<String>) -> Self {
        let mut sub = Self {
            endpoint: endpoint.into(),
            stream: None,
            frames: FrameBuffer::new(),
            prefixes: Vec::new(),
            last_attempt: None,
        };
        sub.ensure_connected();
        sub
    }

    /// Restricts delivery to topics starting with `prefix`. With no prefixes every
    /// topic is delivered.
    pub fn subscribe(&mut self, prefix: impl Into<String>) {
        self.prefixes.push(prefix.into());
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn accepts(&self, topic: &str) -> bool {
        self.prefixes.is_empty() || self.prefixes.iter().any(|p| topic.starts_with(p.as_str()))
    }

    fn ensure_connected(&mut self) -> bool {
        if self.stream.is_some() {
            return true;
        }
        if let Some(at) = self.last_attempt {
            if at.elapsed() < RECONNECT_INTERVAL {
                return false;
            }
        }
        self.last_attempt = Some(Instant::now());
        match TcpStream::connect(self.endpoint.as_str()) {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                info!("Bridge subscriber connected to {}", self.endpoint);
                self.frames.clear();
                self.stream = Some(stream);
                true
            }
            Err(e) => {
                debug!("Bridge connect to {} failed: {}", self.endpoint, e);
                false
            }
        }
    }

    /// Waits up to `timeout` for the next accepted message. `Ok(None)` on timeout.
    ///
    /// A decode error consumes the offending frame, so the next call continues with
    /// the following one.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Message>, BridgeError> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 4096];
        loop {
            while let Some(body) = self.frames.next_body()? {
                let msg = wire::decode_body(&body)?;
                if self.accepts(&msg.topic) {
                    debug!("Bridge RX {}", msg.topic);
                    return Ok(Some(msg));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let remaining = deadline - now;

            if !self.ensure_connected() {
                std::thread::sleep(remaining.min(RECONNECT_INTERVAL));
                continue;
            }
            let Some(stream) = self.stream.as_mut() else {
                continue;
            };
            stream
                .set_read_timeout(Some(remaining.max(Duration::from_millis(1))))
                .map_err(|e| BridgeError::io(&self.endpoint, e))?;
            match stream.read(&mut chunk) {
                Ok(0) => {
                    self.stream = None;
                    return Err(BridgeError::io(
                        &self.endpoint,
                        std::io::Error::new(ErrorKind::UnexpectedEof, "publisher closed"),
                    ));
                }
                Ok(n) => self.frames.extend(&chunk[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.stream = None;
                    return Err(BridgeError::io(&self.endpoint, e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_tcp() {
        let publisher = Publisher::bind("127.0.0.1:0").unwrap();
        let mut sub = Subscriber::connect(publisher.local_addr().to_string());
        assert!(publisher.wait_for_subscribers(1, Duration::from_secs(5)));

        let payload = Payload::new()
            .with("interface_id", "eth0")
            .with("frame", vec![0u8, 1, 2, 0xff, b' '])
            .with("urgent", true);
        publisher
            .publish("Peripheral.EthernetModel.rx_frame", payload.clone())
            .unwrap();

        let msg = sub.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(msg.topic, "Peripheral.EthernetModel.rx_frame");
        assert_eq!(msg.payload, payload);
        publisher.shutdown();
    }

    #[test]
    fn test_prefix_filter_skips_other_topics() {
        let publisher = Publisher::bind("127.0.0.1:0").unwrap();
        let mut sub = Subscriber::connect(publisher.local_addr().to_string());
        sub.subscribe("Interrupt.");
        assert!(publisher.wait_for_subscribers(1, Duration::from_secs(5)));

        publisher
            .publish("Peripheral.GPIO.ext_pin_change", Payload::new())
            .unwrap();
        publisher
            .publish("Interrupt.Trigger", Payload::new().with("num", 5u32))
            .unwrap();

        let msg = sub.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(msg.topic, "Interrupt.Trigger");
        publisher.shutdown();
    }

    #[test]
    fn test_timeout_without_publisher() {
        let mut sub = Subscriber::connect("127.0.0.1:1");
        let start = Instant::now();
        assert!(sub.recv_timeout(Duration::from_millis(150)).unwrap().is_none());
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert!(!sub.is_connected());
    }

    #[test]
    fn test_publish_after_shutdown_fails() {
        let publisher = Publisher::bind("127.0.0.1:0").unwrap();
        publisher.shutdown();
        assert!(matches!(
            publisher.publish("Interrupt.Base", Payload::new()),
            Err(BridgeError::Closed)
        ));
    }
}
