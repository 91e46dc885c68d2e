// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Receives intercept events from the dispatcher.
pub trait StatsSink: Send + Sync + std::fmt::Debug {
    fn record_registration(&self, addr: u64, function: &str, class: &str, method: &str);
    fn record_hit(&self, addr: u64, function: &str);
    fn record_bypass(&self, function: &str);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptRecord {
    pub function: String,
    pub class: String,
    pub method: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub intercepts: BTreeMap<u64, InterceptRecord>,
    pub used_intercepts: BTreeSet<String>,
    pub bypassed_funcs: BTreeSet<String>,
}

/// In-memory intercept statistics, written out as YAML on [`flush`](Self::flush).
#[derive(Debug, Default)]
pub struct InterceptStats {
    snapshot: Mutex<StatsSnapshot>,
    file: Option<PathBuf>,
    dirty: AtomicBool,
}

impl InterceptStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn hits(&self, addr: u64) -> u64 {
        self.snapshot
            .lock()
            .ok()
            .and_then(|s| s.intercepts.get(&addr).map(|r| r.count))
            .unwrap_or(0)
    }

    /// Writes the snapshot if anything changed since the last flush. A stats object
    /// without a file is a no-op.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let yaml = serde_yaml::to_string(&self.snapshot())
            .context("Failed to serialize intercept statistics")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create stats directory {:?}", parent))?;
        }
        std::fs::write(path, yaml)
            .with_context(|| format!("Failed to write stats file {:?}", path))?;
        debug!("Intercept stats written to {:?}", path);
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut StatsSnapshot)) {
        if let Ok(mut s) = self.snapshot.lock() {
            f(&mut s);
            self.dirty.store(true, Ordering::SeqCst);
        }
    }
}

impl StatsSink for InterceptStats {
    fn record_registration(&self, addr: u64, function: &str, class: &str, method: &str) {
        self.update(|s| {
            s.intercepts.insert(
                addr,
                InterceptRecord {
                    function: function.to_string(),
                    class: class.to_string(),
                    method: method.to_string(),
                    count: 0,
                },
            );
        });
    }

    fn record_hit(&self, addr: u64, function: &str) {
        self.update(|s| {
            s.intercepts.entry(addr).or_default().count += 1;
            s.used_intercepts.insert(function.to_string());
        });
    }

    fn record_bypass(&self, function: &str) {
        self.update(|s| {
            s.bypassed_funcs.insert(function.to_string());
        });
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStats;

impl StatsSink for NullStats {
    fn record_registration(&self, _addr: u64, _function: &str, _class: &str, _method: &str) {}
    fn record_hit(&self, _addr: u64, _function: &str) {}
    fn record_bypass(&self, _function: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_sets() {
        let stats = InterceptStats::new();
        stats.record_registration(0x0800_1234, "HAL_Delay", "stm32f4.Timer", "delay");
        stats.record_hit(0x0800_1234, "HAL_Delay");
        stats.record_hit(0x0800_1234, "HAL_Delay");
        stats.record_bypass("HAL_Delay");

        assert_eq!(stats.hits(0x0800_1234), 2);
        assert_eq!(stats.hits(0x0800_0000), 0);
        let snap = stats.snapshot();
        assert_eq!(snap.intercepts[&0x0800_1234].method, "delay");
        assert!(snap.used_intercepts.contains("HAL_Delay"));
        assert!(snap.bypassed_funcs.contains("HAL_Delay"));
    }

    #[test]
    fn test_flush_writes_yaml_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/stats.yaml");
        let stats = InterceptStats::with_file(&path);
        stats.record_registration(0x100, "main", "ReturnZero", "return_zero");
        stats.record_hit(0x100, "main");
        stats.flush().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let back: StatsSnapshot = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back, stats.snapshot());

        std::fs::remove_file(&path).unwrap();
        stats.flush().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_null_stats_accepts_events() {
        let sink: &dyn StatsSink = &NullStats;
        sink.record_hit(0, "f");
    }
}
