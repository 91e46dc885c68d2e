// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! High-level Ethernet driver ABI for firmware built against HalWire's own stub driver:
//!
//! ```text
//! uint32_t eth_rx_frame_info(uint32_t iface, uint32_t *len);
//! uint32_t eth_rx_frame(uint32_t iface, uint8_t *buf, uint32_t buf_len);
//! uint32_t eth_tx_frame(uint32_t iface, const uint8_t *buf, uint32_t len);
//! void eth_enable_rx_isr(uint32_t iface);
//! void eth_disable_rx_isr(uint32_t iface);
//! ```

use crate::intercept::{
    BpHandler, HandlerClass, HandlerContext, HandlerError, HandlerMethod, InterceptAction,
    NoArgs, RegistryError,
};
use crate::peripherals::{EthernetModel, PeripheralId};
use crate::target::EmulatorTarget;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Largest Ethernet frame accepted from the guest, without FCS.
pub const MAX_ETH_FRAME: usize = 1514;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EthernetArgs {
    /// Interface number -> rx interrupt line.
    pub rx_irqs: BTreeMap<u64, u32>,
}

impl Default for EthernetArgs {
    fn default() -> Self {
        Self {
            rx_irqs: BTreeMap::from([(0, 61)]),
        }
    }
}

pub struct EthernetHle {
    model: Arc<EthernetModel>,
}

impl HandlerClass for EthernetHle {
    const CLASS: &'static str = "hle.Ethernet";
    const METHODS: &'static [HandlerMethod] = &[
        HandlerMethod::of("frame_info", &["eth_rx_frame_info"]),
        HandlerMethod::of("rx_frame", &["eth_rx_frame"]),
        HandlerMethod::of("tx_frame", &["eth_tx_frame"]),
        HandlerMethod::of("enable_rx_isr", &["eth_enable_rx_isr"]),
        HandlerMethod::of("disable_rx_isr", &["eth_disable_rx_isr"]),
    ];
    type ClassArgs = EthernetArgs;
    type RegistrationArgs = NoArgs;

    fn new(ctx: &HandlerContext<'_>, args: EthernetArgs) -> Result<Self, RegistryError> {
        let model = ctx.models.ethernet.clone();
        for (iface, irq) in args.rx_irqs {
            model.set_rx_irq(&PeripheralId::from(iface), irq);
        }
        Ok(Self { model })
    }
}

impl BpHandler for EthernetHle {
    fn handle(
        &mut self,
        method: &'static str,
        target: &mut dyn EmulatorTarget,
        _addr: u64,
    ) -> Result<InterceptAction, HandlerError> {
        let id = PeripheralId::from(target.get_arg(0)?);
        match method {
            "frame_info" => {
                let (count, len) = self.model.get_frame_info(&id);
                let len_ptr = target.get_arg(1)?;
                if len_ptr != 0 {
                    target.write_uint(len_ptr, 4, len as u64)?;
                }
                Ok(InterceptAction::ReturnValue(count as u64))
            }
            "rx_frame" => {
                let buf = target.get_arg(1)?;
                let buf_len = target.get_arg(2)? as usize;
                let Some(frame) = self.model.get_rx_frame(&id) else {
                    return Ok(InterceptAction::ReturnValue(0));
                };
                let n = frame.data.len().min(buf_len);
                if n < frame.data.len() {
                    warn!(
                        "Ethernet {} frame truncated from {} to {} bytes",
                        id,
                        frame.data.len(),
                        n
                    );
                }
                target.write_memory(buf, &frame.data[..n])?;
                Ok(InterceptAction::ReturnValue(n as u64))
            }
            "tx_frame" => {
                let buf = target.get_arg(1)?;
                let mut len = usize::try_from(target.get_arg(2)?).unwrap_or(usize::MAX);
                if len > MAX_ETH_FRAME {
                    warn!("eth_tx_frame: length {:#x} exceeds {}, truncating", len, MAX_ETH_FRAME);
                    len = MAX_ETH_FRAME;
                }
                let frame = target.read_memory(buf, len)?;
                self.model.tx_frame(&id, &frame);
                Ok(InterceptAction::ReturnValue(0))
            }
            "enable_rx_isr" => {
                self.model.enable_rx_isr(&id)?;
                Ok(InterceptAction::ReturnVoid)
            }
            "disable_rx_isr" => {
                debug!("Ethernet {} rx isr off", id);
                self.model.disable_rx_isr(&id);
                Ok(InterceptAction::ReturnVoid)
            }
            other => Err(HandlerError::Other(format!("hle.Ethernet has no method {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockTarget, RecordingInjector, RecordingPublisher};
    use crate::peripherals::PeripheralSet;
    use crate::signals::StopSignal;
    use halwire_config::HalConfig;

    const RAM: u64 = 0x2000_0000;

    fn setup() -> (PeripheralSet, Arc<RecordingInjector>, Arc<RecordingPublisher>, EthernetHle) {
        let injector = Arc::new(RecordingInjector::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let set = PeripheralSet::new(injector.clone(), publisher.clone(), StopSignal::new(), None);
        let config = HalConfig::new();
        let eth = EthernetHle::new(&HandlerContext::new(&set, &config), EthernetArgs::default()).unwrap();
        (set, injector, publisher, eth)
    }

    fn call(eth: &mut EthernetHle, method: &'static str, target: &mut MockTarget, args: &[u64]) -> InterceptAction {
        for (i, a) in args.iter().enumerate() {
            target.set_arg(i, *a).unwrap();
        }
        eth.handle(method, target, 0).unwrap()
    }

    #[test]
    fn test_receive_frame_into_guest() {
        let (set, injector, _, mut eth) = setup();
        let mut target = MockTarget::arm().with_ram(RAM, 0x800);
        let iface = PeripheralId::from(0u64);

        set.ethernet.rx_frame(&iface, vec![0xaa; 60]).unwrap();
        set.ethernet.rx_frame(&iface, vec![0xbb; 42]).unwrap();
        assert!(injector.triggered().is_empty());

        assert_eq!(call(&mut eth, "enable_rx_isr", &mut target, &[0]), InterceptAction::ReturnVoid);
        assert_eq!(injector.triggered(), vec![61]);

        assert_eq!(call(&mut eth, "frame_info", &mut target, &[0, RAM]), InterceptAction::ReturnValue(2));
        assert_eq!(target.read_uint(RAM, 4).unwrap(), 60);

        assert_eq!(
            call(&mut eth, "rx_frame", &mut target, &[0, RAM + 0x100, 0x600]),
            InterceptAction::ReturnValue(60)
        );
        assert_eq!(target.read_memory(RAM + 0x100, 60).unwrap(), vec![0xaa; 60]);
        assert_eq!(
            call(&mut eth, "rx_frame", &mut target, &[0, RAM + 0x100, 0x600]),
            InterceptAction::ReturnValue(42)
        );
        assert_eq!(
            call(&mut eth, "rx_frame", &mut target, &[0, RAM + 0x100, 0x600]),
            InterceptAction::ReturnValue(0)
        );
    }

    #[test]
    fn test_transmit_publishes_frame() {
        let (_, _, publisher, mut eth) = setup();
        let mut target = MockTarget::arm().with_ram(RAM, 0x100);
        target.write_memory(RAM, &[1, 2, 3, 4]).unwrap();

        assert_eq!(call(&mut eth, "tx_frame", &mut target, &[0, RAM, 4]), InterceptAction::ReturnValue(0));
        let sent = publisher.on_topic("Peripheral.EthernetModel.tx_frame");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].get_bytes("frame"), Some(&[1u8, 2, 3, 4][..]));
        assert_eq!(sent[0].get_u64("interface_id"), Some(0));
    }

    #[test]
    fn test_transmit_length_is_capped() {
        let (_, _, publisher, mut eth) = setup();
        let mut target = MockTarget::arm().with_ram(RAM, 0x1000);

        assert_eq!(
            call(&mut eth, "tx_frame", &mut target, &[1, RAM, 0x1_0000]),
            InterceptAction::ReturnValue(0)
        );
        let sent = publisher.on_topic("Peripheral.EthernetModel.tx_frame");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].get_bytes("frame").map(<[u8]>::len), Some(MAX_ETH_FRAME));
    }
}
