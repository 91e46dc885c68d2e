// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Represents a digital pin level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigitalLevel {
    #[default]
    Low,
    High,
}

impl DigitalLevel {
    pub fn toggled(self) -> Self {
        match self {
            DigitalLevel::Low => DigitalLevel::High,
            DigitalLevel::High => DigitalLevel::Low,
        }
    }
}

impl From<bool> for DigitalLevel {
    fn from(b: bool) -> Self {
        if b {
            DigitalLevel::High
        } else {
            DigitalLevel::Low
        }
    }
}

impl From<DigitalLevel> for bool {
    fn from(level: DigitalLevel) -> Self {
        match level {
            DigitalLevel::High => true,
            DigitalLevel::Low => false,
        }
    }
}

impl From<u64> for DigitalLevel {
    fn from(v: u64) -> Self {
        DigitalLevel::from(v != 0)
    }
}

/// Active flag of one named interrupt source: cleared -> set -> cleared.
#[derive(Debug, Clone, Default)]
pub struct InterruptLine {
    active: bool,
}

impl InterruptLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active(&mut self) {
        self.active = true;
    }

    pub fn clear(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// Session-wide cooperative stop flag shared by the bridge loop, timer waiters and
/// blocking reads.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digital_level() {
        let level = DigitalLevel::default();
        assert_eq!(level, DigitalLevel::Low);
        assert_eq!(level.toggled(), DigitalLevel::High);
        assert_eq!(DigitalLevel::from(2u64), DigitalLevel::High);

        let b: bool = DigitalLevel::High.into();
        assert!(b);
    }

    #[test]
    fn test_interrupt_line() {
        let mut line = InterruptLine::new();
        assert!(!line.is_active());
        line.set_active();
        assert!(line.is_active());
        line.clear();
        assert!(!line.is_active());
    }

    #[test]
    fn test_stop_signal_is_shared() {
        let stop = StopSignal::new();
        let other = stop.clone();
        assert!(!other.is_triggered());
        stop.trigger();
        assert!(other.is_triggered());
    }
}
