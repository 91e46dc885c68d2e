// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! In-memory stand-ins for the emulator and the bridge publisher.

use crate::bridge::{BridgeError, Message, Payload, Publish};
use crate::interrupt::InterruptInjector;
use crate::target::{
    AccessMode, Abi, EmulatorTarget, MemoryRegion, StopEvent, TargetError, TargetResult,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const ARM_REGISTERS: &[&str] = &[
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp", "lr",
    "pc", "xpsr",
];

const RISCV_REGISTERS: &[&str] = &[
    "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4", "a5",
    "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4", "t5",
    "t6", "pc",
];

#[derive(Debug, Default)]
pub struct RecordingInjector {
    triggered: Mutex<Vec<u32>>,
    vector_base: Mutex<Option<u64>>,
}

impl RecordingInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn triggered(&self) -> Vec<u32> {
        self.triggered.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn count(&self, irq: u32) -> usize {
        self.triggered().iter().filter(|&&n| n == irq).count()
    }

    pub fn vector_base(&self) -> Option<u64> {
        self.vector_base.lock().ok().and_then(|v| *v)
    }

    /// Polls until `irq` has been injected at least `times` times or `timeout` passes.
    pub fn wait_for(&self, irq: u32, times: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.count(irq) >= times {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        self.count(irq) >= times
    }
}

impl InterruptInjector for RecordingInjector {
    fn trigger_interrupt(&self, irq: u32) -> TargetResult<()> {
        if let Ok(mut v) = self.triggered.lock() {
            v.push(irq);
        }
        Ok(())
    }

    fn set_vector_table_base(&self, base: u64) -> TargetResult<()> {
        if let Ok(mut v) = self.vector_base.lock() {
            *v = Some(base);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Region {
    name: String,
    data: Vec<u8>,
}

/// Scripted emulator: registers and memory live in maps, `cont()` replays queued
/// stop events and reports `Exited` once the script runs dry.
#[derive(Debug)]
pub struct MockTarget {
    abi: Abi,
    registers: HashMap<String, u64>,
    regions: BTreeMap<u64, Region>,
    pub breakpoints: BTreeMap<u64, bool>,
    pub watchpoints: BTreeSet<(u64, AccessMode)>,
    stops: VecDeque<(StopEvent, Option<(u64, Vec<u64>)>)>,
    injector: Arc<RecordingInjector>,
    pub resumes: usize,
}

impl MockTarget {
    pub fn new(abi: Abi, registers: &[&str]) -> Self {
        Self {
            abi,
            registers: registers.iter().map(|r| (r.to_string(), 0)).collect(),
            regions: BTreeMap::new(),
            breakpoints: BTreeMap::new(),
            watchpoints: BTreeSet::new(),
            stops: VecDeque::new(),
            injector: Arc::new(RecordingInjector::new()),
            resumes: 0,
        }
    }

    pub fn arm() -> Self {
        Self::new(Abi::ARM_AAPCS, ARM_REGISTERS)
    }

    pub fn riscv() -> Self {
        Self::new(Abi::RISCV_ILP32, RISCV_REGISTERS)
    }

    pub fn with_ram(mut self, base: u64, size: u64) -> Self {
        self.regions.insert(
            base,
            Region {
                name: format!("ram_{:x}", base),
                data: vec![0; size as usize],
            },
        );
        self
    }

    pub fn injector(&self) -> Arc<RecordingInjector> {
        self.injector.clone()
    }

    pub fn push_stop(&mut self, event: StopEvent) {
        self.stops.push_back((event, None));
    }

    /// Queue a breakpoint stop that looks like a call from `lr` with `args`.
    pub fn push_call(&mut self, pc: u64, lr: u64, args: &[u64]) {
        self.stops
            .push_back((StopEvent::Breakpoint { pc }, Some((lr, args.to_vec()))));
    }

    pub fn region_names(&self) -> Vec<String> {
        self.regions.values().map(|r| r.name.clone()).collect()
    }

    fn locate(&mut self, addr: u64, len: usize) -> TargetResult<(&mut Region, usize)> {
        let violation = TargetError::MemoryViolation { addr, len };
        let (base, region) = self
            .regions
            .range_mut(..=addr)
            .next_back()
            .ok_or(violation)?;
        let offset = (addr - base) as usize;
        if offset + len > region.data.len() {
            return Err(TargetError::MemoryViolation { addr, len });
        }
        Ok((region, offset))
    }
}

impl EmulatorTarget for MockTarget {
    fn abi(&self) -> Abi {
        self.abi
    }

    fn read_register(&mut self, name: &str) -> TargetResult<u64> {
        self.registers
            .get(name)
            .copied()
            .ok_or_else(|| TargetError::UnknownRegister(name.to_string()))
    }

    fn write_register(&mut self, name: &str, value: u64) -> TargetResult<()> {
        match self.registers.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(TargetError::UnknownRegister(name.to_string())),
        }
    }

    fn read_memory(&mut self, addr: u64, len: usize) -> TargetResult<Vec<u8>> {
        let (region, offset) = self.locate(addr, len)?;
        Ok(region.data[offset..offset + len].to_vec())
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> TargetResult<()> {
        let (region, offset) = self.locate(addr, data.len())?;
        region.data[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn add_memory_region(&mut self, region: &MemoryRegion) -> TargetResult<()> {
        let end = region.base + region.size;
        let clash = self
            .regions
            .iter()
            .any(|(base, r)| *base < end && region.base < base + r.data.len() as u64);
        if clash {
            return Err(TargetError::RegionConflict {
                name: region.name.clone(),
                base: region.base,
            });
        }
        let mut data = vec![0u8; region.size as usize];
        if let Some(path) = &region.file {
            let contents = std::fs::read(path).map_err(|source| TargetError::RegionFile {
                name: region.name.clone(),
                path: path.clone(),
                source,
            })?;
            let n = contents.len().min(data.len());
            data[..n].copy_from_slice(&contents[..n]);
        }
        self.regions.insert(
            region.base,
            Region {
                name: region.name.clone(),
                data,
            },
        );
        Ok(())
    }

    fn set_breakpoint(&mut self, addr: u64, temporary: bool) -> TargetResult<()> {
        self.breakpoints.insert(addr, temporary);
        Ok(())
    }

    fn remove_breakpoint(&mut self, addr: u64) -> TargetResult<()> {
        self.breakpoints.remove(&addr);
        Ok(())
    }

    fn set_watchpoint(&mut self, addr: u64, mode: AccessMode) -> TargetResult<()> {
        self.watchpoints.insert((addr, mode));
        Ok(())
    }

    fn remove_watchpoint(&mut self, addr: u64, mode: AccessMode) -> TargetResult<()> {
        self.watchpoints.remove(&(addr, mode));
        Ok(())
    }

    fn cont(&mut self) -> TargetResult<StopEvent> {
        self.resumes += 1;
        let (event, call) = self.stops.pop_front().unwrap_or((StopEvent::Exited, None));
        if let StopEvent::Breakpoint { pc } = event {
            let pc_reg = self.abi.pc;
            self.write_register(pc_reg, pc)?;
            if let Some((lr, args)) = call {
                if let Some(lr_reg) = self.abi.link_register {
                    self.write_register(lr_reg, lr)?;
                }
                for (idx, value) in args.into_iter().enumerate() {
                    self.set_arg(idx, value)?;
                }
            }
        }
        Ok(event)
    }

    fn interrupt_injector(&self) -> Arc<dyn InterruptInjector> {
        self.injector.clone()
    }
}

/// Publisher that keeps every message for inspection.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<Message>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn on_topic(&self, topic: &str) -> Vec<Payload> {
        self.messages()
            .into_iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload)
            .collect()
    }
}

impl Publish for RecordingPublisher {
    fn publish(&self, topic: &str, payload: Payload) -> Result<(), BridgeError> {
        if let Ok(mut v) = self.sent.lock() {
            v.push(Message::new(topic, payload));
        }
        Ok(())
    }
}
