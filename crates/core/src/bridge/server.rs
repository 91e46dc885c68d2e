// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::transport::Subscriber;
use super::{peripheral_topic, BridgeError, Message, INTERRUPT_BASE, INTERRUPT_TRIGGER};
use crate::interrupt::InterruptInjector;
use crate::peripherals::PeripheralModel;
use crate::signals::StopSignal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Bounded wait of the receive loop; also the worst-case shutdown latency.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where an inbound message ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Peripheral { model: &'static str, method: &'static str },
    Interrupt(u32),
    VectorBase(u64),
    Unhandled,
}

struct Route {
    model: Arc<dyn PeripheralModel>,
    method: &'static str,
}

/// Inbound side of the bridge: routes `Peripheral.*` topics to model receive
/// handlers and interrupt topics to the injector.
pub struct PeripheralServer {
    routes: BTreeMap<String, Route>,
    injector: Arc<dyn InterruptInjector>,
}

impl std::fmt::Debug for PeripheralServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeripheralServer")
            .field("topics", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PeripheralServer {
    pub fn new(injector: Arc<dyn InterruptInjector>) -> Self {
        Self {
            routes: BTreeMap::new(),
            injector,
        }
    }

    /// Adds a route for every inbound method the model declares. Two models claiming
    /// the same topic is a startup error.
    pub fn register_model(&mut self, model: Arc<dyn PeripheralModel>) -> Result<(), BridgeError> {
        for &method in model.rx_methods() {
            let topic = peripheral_topic(model.name(), method);
            if let Some(existing) = self.routes.get(&topic) {
                return Err(BridgeError::TopicCollision {
                    topic,
                    first: existing.model.name().to_string(),
                    second: model.name().to_string(),
                });
            }
            debug!("Bridge route {}", topic);
            self.routes.insert(
                topic,
                Route {
                    model: model.clone(),
                    method,
                },
            );
        }
        Ok(())
    }

    pub fn topics(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    /// Handles one message synchronously. Model and injection failures are logged,
    /// never propagated: one bad message must not stop the loop.
    pub fn dispatch(&self, msg: &Message) -> Delivery {
        match msg.topic.as_str() {
            INTERRUPT_TRIGGER => {
                let Some(num) = msg.payload.get_u64("num") else {
                    warn!("{} without 'num'", INTERRUPT_TRIGGER);
                    return Delivery::Unhandled;
                };
                let Ok(irq) = u32::try_from(num) else {
                    warn!("{} with out-of-range 'num' {:#x}", INTERRUPT_TRIGGER, num);
                    return Delivery::Unhandled;
                };
                if let Err(e) = self.injector.trigger_interrupt(irq) {
                    error!("Failed to inject interrupt {}: {}", irq, e);
                }
                Delivery::Interrupt(irq)
            }
            INTERRUPT_BASE => {
                let Some(base) = msg.payload.get_u64("base") else {
                    warn!("{} without 'base'", INTERRUPT_BASE);
                    return Delivery::Unhandled;
                };
                if let Err(e) = self.injector.set_vector_table_base(base) {
                    error!("Failed to set vector base {:#x}: {}", base, e);
                }
                Delivery::VectorBase(base)
            }
            topic => match self.routes.get(topic) {
                Some(route) => {
                    if let Err(e) = route.model.handle_rx(route.method, &msg.payload) {
                        error!("{} failed: {}", topic, e);
                    }
                    Delivery::Peripheral {
                        model: route.model.name(),
                        method: route.method,
                    }
                }
                None => {
                    info!("Unhandled bridge topic: {}", topic);
                    Delivery::Unhandled
                }
            },
        }
    }

    /// Receive loop: polls with [`POLL_INTERVAL`] until `stop` is triggered.
    pub fn run(&self, subscriber: &mut Subscriber, stop: &StopSignal) {
        info!(
            "Peripheral server receiving from {} ({} topics)",
            subscriber.endpoint(),
            self.routes.len()
        );
        while !stop.is_triggered() {
            match subscriber.recv_timeout(POLL_INTERVAL) {
                Ok(Some(msg)) => {
                    self.dispatch(&msg);
                }
                Ok(None) => {}
                Err(BridgeError::Io { endpoint, source }) => {
                    debug!("Bridge receive from {} interrupted: {}", endpoint, source);
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => warn!("Dropping bridge message: {}", e),
            }
        }
        info!("Peripheral server stopped");
    }

    pub fn spawn(
        self: Arc<Self>,
        mut subscriber: Subscriber,
        stop: StopSignal,
    ) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("bridge-rx".into())
            .spawn(move || self.run(&mut subscriber, &stop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{Payload, Publish, Publisher};
    use crate::mock::{RecordingInjector, RecordingPublisher};
    use crate::peripherals::ethernet::EthernetModel;
    use crate::peripherals::interrupts::Interrupts;
    use crate::peripherals::PeripheralId;
    use std::time::Instant;

    fn ethernet(injector: Arc<RecordingInjector>) -> Arc<EthernetModel> {
        let interrupts = Arc::new(Interrupts::new(injector));
        Arc::new(EthernetModel::new(
            interrupts,
            Arc::new(RecordingPublisher::new()),
        ))
    }

    #[test]
    fn test_routes_interrupt_topics() {
        let injector = Arc::new(RecordingInjector::new());
        let server = PeripheralServer::new(injector.clone());

        let d = server.dispatch(&Message::new(
            INTERRUPT_TRIGGER,
            Payload::new().with("num", 42u32),
        ));
        assert_eq!(d, Delivery::Interrupt(42));
        let d = server.dispatch(&Message::new(
            INTERRUPT_BASE,
            Payload::new().with("base", 0x0800_4000u64),
        ));
        assert_eq!(d, Delivery::VectorBase(0x0800_4000));
        assert_eq!(
            server.dispatch(&Message::new("Something.Else", Payload::new())),
            Delivery::Unhandled
        );

        assert_eq!(injector.triggered(), vec![42]);
        assert_eq!(injector.vector_base(), Some(0x0800_4000));
    }

    #[test]
    fn test_oversized_interrupt_number_not_injected() {
        let injector = Arc::new(RecordingInjector::new());
        let server = PeripheralServer::new(injector.clone());
        let d = server.dispatch(&Message::new(
            INTERRUPT_TRIGGER,
            Payload::new().with("num", (1u64 << 32) + 5),
        ));
        assert_eq!(d, Delivery::Unhandled);
        assert!(injector.triggered().is_empty());
    }

    #[test]
    fn test_same_model_twice_collides() {
        let injector = Arc::new(RecordingInjector::new());
        let eth = ethernet(injector.clone());
        let mut server = PeripheralServer::new(injector);
        server.register_model(eth.clone()).unwrap();
        assert!(matches!(
            server.register_model(eth),
            Err(BridgeError::TopicCollision { .. })
        ));
    }

    #[test]
    fn test_receive_loop_feeds_model() {
        let injector = Arc::new(RecordingInjector::new());
        let eth = ethernet(injector.clone());
        let mut server = PeripheralServer::new(injector);
        server.register_model(eth.clone()).unwrap();
        assert!(server
            .topics()
            .contains(&"Peripheral.EthernetModel.rx_frame".to_string()));

        let device = Publisher::bind("127.0.0.1:0").unwrap();
        let subscriber = Subscriber::connect(device.local_addr().to_string());
        let stop = StopSignal::new();
        let handle = Arc::new(server).spawn(subscriber, stop.clone()).unwrap();
        assert!(device.wait_for_subscribers(1, Duration::from_secs(5)));

        device
            .publish(
                "Peripheral.EthernetModel.rx_frame",
                Payload::new()
                    .with("interface_id", "eth0")
                    .with("frame", vec![0xaau8; 60]),
            )
            .unwrap();

        let id = PeripheralId::from("eth0");
        let deadline = Instant::now() + Duration::from_secs(5);
        while !eth.has_frame(&id) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(eth.get_frame_info(&id), (1, 60));

        stop.trigger();
        handle.join().unwrap();
        device.shutdown();
    }
}
