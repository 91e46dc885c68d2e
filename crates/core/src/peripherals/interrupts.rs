// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{lock, required, PeripheralError, PeripheralModel};
use crate::bridge::Payload;
use crate::interrupt::InterruptInjector;
use crate::signals::InterruptLine;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Named interrupt sources plus the path into the emulator's controller.
///
/// Sources are marked active before injection so a handler running in the ISR can
/// always observe why it was entered.
#[derive(Debug)]
pub struct Interrupts {
    lines: Mutex<BTreeMap<String, InterruptLine>>,
    injector: Arc<dyn InterruptInjector>,
}

impl Interrupts {
    pub const NAME: &'static str = "Interrupts";

    pub fn new(injector: Arc<dyn InterruptInjector>) -> Self {
        Self {
            lines: Mutex::new(BTreeMap::new()),
            injector,
        }
    }

    pub fn set_active(&self, source: &str) {
        lock(&self.lines)
            .entry(source.to_string())
            .or_default()
            .set_active();
    }

    pub fn clear_active(&self, source: &str) {
        if let Some(line) = lock(&self.lines).get_mut(source) {
            line.clear();
        }
    }

    /// Unknown sources read as inactive.
    pub fn is_active(&self, source: &str) -> bool {
        lock(&self.lines)
            .get(source)
            .map(InterruptLine::is_active)
            .unwrap_or(false)
    }

    pub fn active_sources(&self) -> Vec<String> {
        lock(&self.lines)
            .iter()
            .filter(|(_, line)| line.is_active())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Marks `source` (if any) active, then asks the emulator to raise `irq`.
    pub fn trigger_interrupt(&self, irq: u32, source: Option<&str>) -> Result<(), PeripheralError> {
        if let Some(source) = source {
            self.set_active(source);
        }
        debug!("Injecting interrupt {} (source {:?})", irq, source);
        self.injector.trigger_interrupt(irq)?;
        Ok(())
    }

    /// Like [`trigger_interrupt`](Self::trigger_interrupt) with a mandatory source and
    /// an optional line: without an IRQ number only the active flag changes.
    pub fn raise(&self, source: &str, irq: Option<u32>) -> Result<(), PeripheralError> {
        match irq {
            Some(irq) => self.trigger_interrupt(irq, Some(source)),
            None => {
                self.set_active(source);
                Ok(())
            }
        }
    }
}

impl PeripheralModel for Interrupts {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn rx_methods(&self) -> &'static [&'static str] {
        &["interrupt_request"]
    }

    fn handle_rx(&self, method: &str, payload: &Payload) -> Result<(), PeripheralError> {
        match method {
            "interrupt_request" => {
                let num = required(payload, method, "num")?
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| PeripheralError::BadMessage {
                        method: method.to_string(),
                        field: "num",
                    })?;
                self.trigger_interrupt(num, payload.get_str("source"))
            }
            other => Err(PeripheralError::UnknownMethod {
                model: Self::NAME,
                method: other.to_string(),
            }),
        }
    }
}
