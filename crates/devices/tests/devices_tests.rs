// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use halwire_core::bridge::{Message, Publisher, Subscriber};
use halwire_core::{Payload, PeripheralId, Publish};
use halwire_devices::{Hub, InterruptTrigger, IoServer, UartConsole};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

/// Emulator side of one bridge connection.
struct FakeEmulator {
    tx: Arc<Publisher>,
    rx: Subscriber,
}

impl FakeEmulator {
    fn new() -> Self {
        Self {
            tx: Publisher::bind("127.0.0.1:0").unwrap(),
            rx: Subscriber::connect("127.0.0.1:1"),
        }
    }

    fn endpoint(&self) -> String {
        self.tx.local_addr().to_string()
    }

    /// Completes the link once `server` is running.
    fn attach(&mut self, server: &IoServer) {
        self.rx = Subscriber::connect(server.local_addr().to_string());
        assert!(server.wait_for_peers(1, WAIT));
        assert!(self.tx.wait_for_subscribers(1, WAIT));
    }

    fn recv(&mut self, timeout: Duration) -> Option<Message> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Ok(Some(msg)) = self.rx.recv_timeout(remaining) {
                return Some(msg);
            }
        }
        None
    }
}

fn server_for(emu: &FakeEmulator) -> Arc<IoServer> {
    IoServer::new(emu.endpoint(), "127.0.0.1:0", None).unwrap()
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_ethernet_hub_forwards_without_echo() {
    let mut node_a = FakeEmulator::new();
    let mut node_b = FakeEmulator::new();
    let server_a = server_for(&node_a);
    let server_b = server_for(&node_b);

    let hub = Hub::ethernet(None);
    hub.add_server(server_a.clone());
    hub.add_server(server_b.clone());
    server_a.start().unwrap();
    server_b.start().unwrap();
    node_a.attach(&server_a);
    node_b.attach(&server_b);

    let frame = vec![0xffu8, 0xff, 0xff, 0xff, 0xff, 0xff, 0x08, 0x06];
    node_a
        .tx
        .publish(
            "Peripheral.EthernetModel.tx_frame",
            Payload::new().with("interface_id", 0u64).with("frame", frame.clone()),
        )
        .unwrap();

    let msg = node_b.recv(WAIT).expect("frame forwarded to the other node");
    assert_eq!(msg.topic, "Peripheral.EthernetModel.rx_frame");
    assert_eq!(msg.payload.get_bytes("frame"), Some(frame.as_slice()));
    assert_eq!(msg.payload.get_u64("interface_id"), Some(0));
    assert!(node_a.recv(Duration::from_millis(300)).is_none());
    assert_eq!(hub.forwarded(), 1);

    hub.shutdown();
    node_a.tx.shutdown();
    node_b.tx.shutdown();
}

#[test]
fn test_uart_console_round_trip() {
    let mut emu = FakeEmulator::new();
    let server = server_for(&emu);
    let out = SharedBuf::default();
    let console = UartConsole::new(server.clone(), PeripheralId::from(0x4000_4400u64), out.clone());
    server.start().unwrap();
    emu.attach(&server);

    for (id, text) in [(0x4000_4400u64, "boot ok\r\n"), (0x4001_1000, "other uart")] {
        emu.tx
            .publish(
                "Peripheral.UARTPublisher.write",
                Payload::new().with("id", id).with("chars", text),
            )
            .unwrap();
    }
    let deadline = Instant::now() + WAIT;
    while out.0.lock().unwrap().len() < 9 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(out.0.lock().unwrap().as_slice(), b"boot ok\r\n");

    console.send_data(b"AT\r\n").unwrap();
    let msg = emu.recv(WAIT).unwrap();
    assert_eq!(msg.topic, "Peripheral.UARTPublisher.rx_data");
    assert_eq!(msg.payload.get_u64("id"), Some(0x4000_4400));
    assert_eq!(msg.payload.get_bytes("chars"), Some(&b"AT\r\n"[..]));

    server.shutdown();
    emu.tx.shutdown();
}

#[test]
fn test_interrupt_trigger_walks_and_sets_base() {
    let mut emu = FakeEmulator::new();
    let server = server_for(&emu);
    server.start().unwrap();
    emu.attach(&server);

    let trigger = InterruptTrigger::new(server.clone());
    trigger.trigger(20, 3).unwrap();
    trigger.set_vector_base(0x0800_4000).unwrap();

    let mut nums = Vec::new();
    for _ in 0..3 {
        let msg = emu.recv(WAIT).unwrap();
        assert_eq!(msg.topic, "Interrupt.Trigger");
        nums.push(msg.payload.get_u64("num").unwrap());
    }
    assert_eq!(nums, vec![20, 21, 22]);

    let msg = emu.recv(WAIT).unwrap();
    assert_eq!(msg.topic, "Interrupt.Base");
    assert_eq!(msg.payload.get_u64("base"), Some(0x0800_4000));

    server.shutdown();
    emu.tx.shutdown();
}
