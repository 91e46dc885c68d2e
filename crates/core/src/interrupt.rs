// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::target::TargetResult;
use std::fmt::Debug;

/// Side channel into the emulator's interrupt controller.
///
/// Split from [`EmulatorTarget`](crate::target::EmulatorTarget) so timer waiters and
/// the bridge thread can inject interrupts while the dispatch path owns the target.
/// Injection is fire-and-forget: the call returns once the request is queued.
pub trait InterruptInjector: Debug + Send + Sync {
    /// Request that exception/IRQ `irq` become pending in the guest.
    fn trigger_interrupt(&self, irq: u32) -> TargetResult<()>;

    /// Relocate the guest vector table.
    fn set_vector_table_base(&self, base: u64) -> TargetResult<()>;
}
