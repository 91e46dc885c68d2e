// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{lock, Interrupts, PeripheralError, PeripheralModel};
use crossbeam_channel as cbc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct Waiter {
    irq: u32,
    period: Duration,
    stop: cbc::Sender<()>,
    thread: JoinHandle<()>,
}

/// Wall-clock periodic interrupt sources, one waiter thread per timer name.
#[derive(Debug)]
pub struct TimerModel {
    timers: Mutex<BTreeMap<String, Waiter>>,
    interrupts: Arc<Interrupts>,
}

impl TimerModel {
    pub const NAME: &'static str = "TimerModel";

    pub fn new(interrupts: Arc<Interrupts>) -> Self {
        Self {
            timers: Mutex::new(BTreeMap::new()),
            interrupts,
        }
    }

    /// Starts a waiter that marks `name` active and injects `irq` every `period`.
    /// Returns `false` when a waiter for `name` is already running.
    pub fn start_timer(&self, name: &str, irq: u32, period: Duration) -> Result<bool, PeripheralError> {
        let mut timers = lock(&self.timers);
        if let Some(existing) = timers.get(name) {
            if !existing.thread.is_finished() {
                debug!("Timer '{}' already running", name);
                return Ok(false);
            }
        }

        let period = period.max(MIN_PERIOD);
        let (stop, stopped) = cbc::bounded::<()>(1);
        let interrupts = self.interrupts.clone();
        let source = name.to_string();
        let thread = std::thread::Builder::new()
            .name(format!("timer-{}", name))
            .spawn(move || loop {
                match stopped.recv_timeout(period) {
                    Err(cbc::RecvTimeoutError::Timeout) => {
                        if let Err(e) = interrupts.trigger_interrupt(irq, Some(&source)) {
                            warn!("Timer '{}' failed to inject {}: {}", source, irq, e);
                        }
                    }
                    _ => break,
                }
            })
            .map_err(|source| PeripheralError::Spawn {
                name: name.to_string(),
                source,
            })?;

        info!("Timer '{}' started: irq {} every {:?}", name, irq, period);
        timers.insert(
            name.to_string(),
            Waiter {
                irq,
                period,
                stop,
                thread,
            },
        );
        Ok(true)
    }

    /// Cancels and joins the waiter for `name`. Returns whether one existed.
    pub fn stop_timer(&self, name: &str) -> bool {
        let waiter = lock(&self.timers).remove(name);
        match waiter {
            Some(waiter) => {
                Self::halt(name, waiter);
                true
            }
            None => false,
        }
    }

    /// Acknowledges the timer's interrupt source.
    pub fn clear_timer(&self, name: &str) {
        self.interrupts.clear_active(name);
    }

    pub fn is_running(&self, name: &str) -> bool {
        lock(&self.timers)
            .get(name)
            .map(|w| !w.thread.is_finished())
            .unwrap_or(false)
    }

    pub fn running(&self) -> Vec<(String, u32, Duration)> {
        lock(&self.timers)
            .iter()
            .filter(|(_, w)| !w.thread.is_finished())
            .map(|(name, w)| (name.clone(), w.irq, w.period))
            .collect()
    }

    pub fn shutdown(&self) {
        let waiters: Vec<(String, Waiter)> = std::mem::take(&mut *lock(&self.timers))
            .into_iter()
            .collect();
        for (name, waiter) in waiters {
            Self::halt(&name, waiter);
        }
    }

    fn halt(name: &str, waiter: Waiter) {
        let _ = waiter.stop.send(());
        drop(waiter.stop);
        if waiter.thread.join().is_err() {
            warn!("Timer '{}' waiter panicked", name);
        }
        info!("Timer '{}' stopped", name);
    }
}

impl Drop for TimerModel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl PeripheralModel for TimerModel {
    fn name(&self) -> &'static str {
        Self::NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingInjector;
    use std::time::Instant;

    fn model() -> (TimerModel, Arc<Interrupts>, Arc<RecordingInjector>) {
        let injector = Arc::new(RecordingInjector::new());
        let interrupts = Arc::new(Interrupts::new(injector.clone()));
        (TimerModel::new(interrupts.clone()), interrupts, injector)
    }

    #[test]
    fn test_second_start_is_noop() {
        let (timers, _, _) = model();
        assert!(timers
            .start_timer("SysTick", 15, Duration::from_secs(5))
            .unwrap());
        assert!(!timers
            .start_timer("SysTick", 15, Duration::from_secs(5))
            .unwrap());
        assert_eq!(timers.running().len(), 1);

        let start = Instant::now();
        assert!(timers.stop_timer("SysTick"));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!timers.is_running("SysTick"));
        assert!(!timers.stop_timer("SysTick"));
    }

    #[test]
    fn test_periodic_injection_marks_source() {
        let (timers, interrupts, injector) = model();
        timers
            .start_timer("0x40000400", 45, Duration::from_millis(10))
            .unwrap();
        assert!(injector.wait_for(45, 3, Duration::from_secs(5)));
        assert!(interrupts.is_active("0x40000400"));

        timers.clear_timer("0x40000400");
        assert!(timers.stop_timer("0x40000400"));
        let after_stop = injector.count(45);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(injector.count(45), after_stop);
    }

    #[test]
    fn test_restart_after_stop() {
        let (timers, _, _) = model();
        timers.start_timer("t", 1, Duration::from_secs(1)).unwrap();
        timers.stop_timer("t");
        assert!(timers.start_timer("t", 1, Duration::from_secs(1)).unwrap());
        timers.shutdown();
        assert!(timers.running().is_empty());
    }
}
