// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{AccessMode, HalConfig, REGION_GRANULE};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use tracing::warn;

/// A single problem found before emulation starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigIssue {
    #[error("{file:?}: intercept '{function}' ({class}) has no address for symbol '{symbol}'")]
    UnresolvedSymbol {
        file: PathBuf,
        function: String,
        class: String,
        symbol: String,
    },
    #[error("{file:?}: intercept '{function}' has invalid watchpoint mode '{mode}' (expected r, w, rw, true or false)")]
    InvalidWatchpoint {
        file: PathBuf,
        function: String,
        mode: String,
    },
    #[error("{file:?}: intercepts '{first}' and '{second}' both claim {addr:#x}{}", watch_suffix(.mode))]
    DuplicateIntercept {
        file: PathBuf,
        addr: u64,
        mode: Option<AccessMode>,
        first: String,
        second: String,
    },
    #[error("{file:?}: memory '{name}' size {size:#x} is not a non-zero multiple of 4 KiB")]
    InvalidMemorySize {
        file: PathBuf,
        name: String,
        size: u64,
    },
    #[error("{file:?}: peripheral '{name}' has no 'emulate' model")]
    MissingEmulate { file: PathBuf, name: String },
    #[error("{file:?}: memory '{name}' initial contents {path:?} do not exist")]
    MissingMemoryFile {
        file: PathBuf,
        name: String,
        path: PathBuf,
    },
    #[error("memories '{first}' and '{second}' overlap")]
    OverlappingMemory { first: String, second: String },
    #[error("{file:?}: intercept '{function}' names unknown handler class '{class}'")]
    UnknownHandlerClass {
        file: PathBuf,
        function: String,
        class: String,
    },
    #[error("{file:?}: intercept '{function}' ({class}): {message}")]
    InvalidHandlerArgs {
        file: PathBuf,
        function: String,
        class: String,
        message: String,
    },
}

fn watch_suffix(mode: &Option<AccessMode>) -> String {
    match mode {
        Some(m) => format!(" (watch {})", m),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    issues: Vec<ConfigIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, issue: ConfigIssue) {
        self.issues.push(issue);
    }

    pub fn extend<I: IntoIterator<Item = ConfigIssue>>(&mut self, issues: I) {
        self.issues.extend(issues);
    }

    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issues(&self) -> &[ConfigIssue] {
        &self.issues
    }

    pub fn into_result(self) -> Result<(), ConfigError> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(ConfigError(self))
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for issue in &self.issues {
            writeln!(f, "  - {}", issue)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("configuration is invalid:\n{0}")]
pub struct ConfigError(pub ValidationReport);

pub(crate) fn check(config: &HalConfig) -> ValidationReport {
    let mut report = ValidationReport::new();

    let memories: Vec<_> = config.memories.values().collect();
    for mem in &memories {
        if mem.size == 0 || mem.size % REGION_GRANULE != 0 {
            report.push(ConfigIssue::InvalidMemorySize {
                file: mem.config_file.clone(),
                name: mem.name.clone(),
                size: mem.size,
            });
        }
        if mem.is_peripheral && mem.emulate.is_none() {
            report.push(ConfigIssue::MissingEmulate {
                file: mem.config_file.clone(),
                name: mem.name.clone(),
            });
        }
        if let Some(path) = &mem.file {
            if !path.exists() {
                report.push(ConfigIssue::MissingMemoryFile {
                    file: mem.config_file.clone(),
                    name: mem.name.clone(),
                    path: path.clone(),
                });
            }
        }
    }
    for (i, a) in memories.iter().enumerate() {
        for b in &memories[i + 1..] {
            if a.overlaps(b) {
                report.push(ConfigIssue::OverlappingMemory {
                    first: a.name.clone(),
                    second: b.name.clone(),
                });
            }
        }
    }

    if config.intercepts.is_empty() {
        warn!("No intercepts configured");
    }

    let mut claimed: HashMap<u64, Vec<(Option<AccessMode>, &str)>> = HashMap::new();
    for intercept in &config.intercepts {
        let mode = match intercept.watchpoint.access_mode() {
            Ok(mode) => mode,
            Err(bad) => {
                report.push(ConfigIssue::InvalidWatchpoint {
                    file: intercept.config_file.clone(),
                    function: intercept.function.clone(),
                    mode: bad,
                });
                continue;
            }
        };
        let Some(addr) = intercept.addr else {
            report.push(ConfigIssue::UnresolvedSymbol {
                file: intercept.config_file.clone(),
                function: intercept.function.clone(),
                class: intercept.class.clone(),
                symbol: intercept.lookup_name().to_string(),
            });
            continue;
        };
        let at_addr = claimed.entry(addr).or_default();
        if let Some((_, first)) = at_addr.iter().find(|(other, _)| claims_overlap(*other, mode)) {
            report.push(ConfigIssue::DuplicateIntercept {
                file: intercept.config_file.clone(),
                addr,
                mode,
                first: first.to_string(),
                second: intercept.function.clone(),
            });
            continue;
        }
        at_addr.push((mode, &intercept.function));
    }

    report
}

/// Two claims on one address collide if both are breakpoints or if the
/// watchpoint access modes share a direction.
fn claims_overlap(a: Option<AccessMode>, b: Option<AccessMode>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.covers(b) || b.covers(a),
        _ => false,
    }
}
