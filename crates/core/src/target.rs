// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::interrupt::InterruptInjector;
use halwire_config::{Arch, MemoryConfig};
use std::path::PathBuf;
use std::sync::Arc;

pub use halwire_config::AccessMode;

#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("Unknown register '{0}'")]
    UnknownRegister(String),
    #[error("Memory access violation at {addr:#x} ({len} bytes)")]
    MemoryViolation { addr: u64, len: usize },
    #[error("Region '{name}' at {base:#x} conflicts with an existing mapping")]
    RegionConflict { name: String, base: u64 },
    #[error("Failed to load initial contents for '{name}' from {path:?}: {source}")]
    RegionFile {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Target disconnected: {0}")]
    Disconnected(String),
    #[error("Emulator backend error: {0}")]
    Backend(String),
}

pub type TargetResult<T> = Result<T, TargetError>;

/// Why the emulator handed control back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopEvent {
    Breakpoint { pc: u64 },
    Watchpoint { addr: u64, access: AccessMode },
    Exited,
}

/// Calling-convention facts the dispatcher and handlers rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abi {
    pub arg_registers: &'static [&'static str],
    pub return_register: &'static str,
    pub pc: &'static str,
    pub sp: &'static str,
    /// `None` when the return address lives on the stack.
    pub link_register: Option<&'static str>,
    pub word_size: usize,
    /// Applied to trigger addresses to drop ISA mode bits.
    pub mode_mask: u64,
}

impl Abi {
    pub const ARM_AAPCS: Abi = Abi {
        arg_registers: &["r0", "r1", "r2", "r3"],
        return_register: "r0",
        pc: "pc",
        sp: "sp",
        link_register: Some("lr"),
        word_size: 4,
        mode_mask: !1,
    };

    pub const RISCV_ILP32: Abi = Abi {
        arg_registers: &["a0", "a1", "a2", "a3", "a4", "a5", "a6", "a7"],
        return_register: "a0",
        pc: "pc",
        sp: "sp",
        link_register: Some("ra"),
        word_size: 4,
        mode_mask: u64::MAX,
    };

    pub fn for_arch(arch: Arch) -> Abi {
        match arch {
            Arch::Arm => Abi::ARM_AAPCS,
            Arch::RiscV => Abi::RISCV_ILP32,
        }
    }

    pub fn canonical(&self, addr: u64) -> u64 {
        addr & self.mode_mask
    }

    fn word_mask(&self) -> u64 {
        if self.word_size >= 8 {
            u64::MAX
        } else {
            (1u64 << (self.word_size * 8)) - 1
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    pub name: String,
    pub base: u64,
    pub size: u64,
    pub permissions: String,
    pub file: Option<PathBuf>,
}

impl From<&MemoryConfig> for MemoryRegion {
    fn from(cfg: &MemoryConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            base: cfg.base_addr,
            size: cfg.size,
            permissions: cfg.permissions.clone(),
            file: cfg.file.clone(),
        }
    }
}

/// The emulator as the intercept engine sees it: a black box with register, memory,
/// breakpoint and run-control primitives.
///
/// Implementors provide the raw primitives; argument access and function return are
/// derived from [`Abi`].
pub trait EmulatorTarget: Send {
    fn abi(&self) -> Abi;

    fn read_register(&mut self, name: &str) -> TargetResult<u64>;
    fn write_register(&mut self, name: &str, value: u64) -> TargetResult<()>;

    fn read_memory(&mut self, addr: u64, len: usize) -> TargetResult<Vec<u8>>;
    fn write_memory(&mut self, addr: u64, data: &[u8]) -> TargetResult<()>;

    fn add_memory_region(&mut self, region: &MemoryRegion) -> TargetResult<()>;

    fn set_breakpoint(&mut self, addr: u64, temporary: bool) -> TargetResult<()>;
    fn remove_breakpoint(&mut self, addr: u64) -> TargetResult<()>;
    fn set_watchpoint(&mut self, addr: u64, mode: AccessMode) -> TargetResult<()>;
    fn remove_watchpoint(&mut self, addr: u64, mode: AccessMode) -> TargetResult<()>;

    /// Resume the guest and block until it stops again.
    fn cont(&mut self) -> TargetResult<StopEvent>;

    fn interrupt_injector(&self) -> Arc<dyn InterruptInjector>;

    fn trigger_interrupt(&self, irq: u32) -> TargetResult<()> {
        self.interrupt_injector().trigger_interrupt(irq)
    }

    fn set_vector_table_base(&self, base: u64) -> TargetResult<()> {
        self.interrupt_injector().set_vector_table_base(base)
    }

    /// Little-endian unsigned read of `size` bytes (1..=8).
    fn read_uint(&mut self, addr: u64, size: usize) -> TargetResult<u64> {
        let bytes = self.read_memory(addr, size)?;
        Ok(bytes
            .iter()
            .rev()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    fn write_uint(&mut self, addr: u64, size: usize, value: u64) -> TargetResult<()> {
        let bytes = value.to_le_bytes();
        self.write_memory(addr, &bytes[..size.min(8)])
    }

    fn read_word(&mut self, addr: u64) -> TargetResult<u64> {
        let size = self.abi().word_size;
        self.read_uint(addr, size)
    }

    fn write_word(&mut self, addr: u64, value: u64) -> TargetResult<()> {
        let size = self.abi().word_size;
        self.write_uint(addr, size, value)
    }

    fn pc(&mut self) -> TargetResult<u64> {
        let reg = self.abi().pc;
        self.read_register(reg)
    }

    fn set_pc(&mut self, value: u64) -> TargetResult<()> {
        let reg = self.abi().pc;
        self.write_register(reg, value)
    }

    /// Argument `idx` of the intercepted call: registers first, then stack slots
    /// above the stack pointer.
    fn get_arg(&mut self, idx: usize) -> TargetResult<u64> {
        let abi = self.abi();
        match abi.arg_registers.get(idx) {
            Some(reg) => self.read_register(reg),
            None => {
                let sp = self.read_register(abi.sp)?;
                let slot = (idx - abi.arg_registers.len()) * abi.word_size;
                self.read_word(sp + slot as u64)
            }
        }
    }

    fn set_arg(&mut self, idx: usize, value: u64) -> TargetResult<()> {
        let abi = self.abi();
        match abi.arg_registers.get(idx) {
            Some(reg) => self.write_register(reg, value),
            None => {
                let sp = self.read_register(abi.sp)?;
                let slot = (idx - abi.arg_registers.len()) * abi.word_size;
                self.write_word(sp + slot as u64, value)
            }
        }
    }

    fn return_address(&mut self) -> TargetResult<u64> {
        let abi = self.abi();
        match abi.link_register {
            Some(lr) => self.read_register(lr),
            None => {
                let sp = self.read_register(abi.sp)?;
                self.read_word(sp)
            }
        }
    }

    fn set_return_value(&mut self, value: u64) -> TargetResult<()> {
        let abi = self.abi();
        self.write_register(abi.return_register, value & abi.word_mask())
    }

    /// Complete the intercepted function as if its body had run: optionally store a
    /// return value, then jump to the return address (popping it on stack-return ABIs).
    fn execute_return(&mut self, value: Option<u64>) -> TargetResult<()> {
        let abi = self.abi();
        if let Some(v) = value {
            self.set_return_value(v)?;
        }
        let ret = self.return_address()?;
        if abi.link_register.is_none() {
            let sp = self.read_register(abi.sp)?;
            self.write_register(abi.sp, sp + abi.word_size as u64)?;
        }
        self.set_pc(ret)
    }
}
