// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::IoServer;
use halwire_core::bridge::{BridgeError, Payload, INTERRUPT_BASE, INTERRUPT_TRIGGER};
use std::sync::Arc;
use tracing::info;

/// Raises interrupts in a running emulator from outside it.
#[derive(Debug, Clone)]
pub struct InterruptTrigger {
    server: Arc<IoServer>,
}

impl InterruptTrigger {
    pub fn new(server: Arc<IoServer>) -> Self {
        Self { server }
    }

    /// Triggers `num`, then the `walk - 1` numbers after it. A walk of zero counts as one.
    pub fn trigger(&self, num: u32, walk: u32) -> Result<(), BridgeError> {
        let end = num.saturating_add(walk.max(1));
        for irq in num..end {
            info!("Triggering interrupt {}", irq);
            self.server
                .send_msg(INTERRUPT_TRIGGER, Payload::new().with("num", irq))?;
        }
        Ok(())
    }

    pub fn set_vector_base(&self, base: u64) -> Result<(), BridgeError> {
        info!("Setting vector table base to {:#x}", base);
        self.server
            .send_msg(INTERRUPT_BASE, Payload::new().with("base", base))
    }
}
