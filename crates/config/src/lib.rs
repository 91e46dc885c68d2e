// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod symbols;
mod validate;

pub use symbols::{parse_int, Symbol, SymbolTable};
pub use validate::{ConfigError, ConfigIssue, ValidationReport};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DEFAULT_VECTOR_BASE: u64 = 0x0800_0000;
pub const DEFAULT_RX_PORT: u16 = 5555;
pub const DEFAULT_TX_PORT: u16 = 5556;
/// Memory regions must be a whole number of these.
pub const REGION_GRANULE: u64 = 0x1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    #[default]
    #[serde(alias = "cortex-m0", alias = "cortex-m3", alias = "cortex-m4")]
    Arm,
    #[serde(alias = "riscv32", alias = "rv32i", alias = "rv32imac")]
    RiscV,
}

/// Watchpoint access kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "r" => Some(AccessMode::Read),
            "w" => Some(AccessMode::Write),
            "rw" | "wr" => Some(AccessMode::ReadWrite),
            _ => None,
        }
    }

    /// Whether a watchpoint armed with `self` fires on an `access`.
    pub fn covers(self, access: AccessMode) -> bool {
        self == AccessMode::ReadWrite || self == access
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessMode::Read => "r",
            AccessMode::Write => "w",
            AccessMode::ReadWrite => "rw",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `watchpoint:` accepts `false`, `true` (read/write) or one of `r`, `w`, `rw`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WatchpointSetting {
    Enabled(bool),
    Mode(String),
}

impl Default for WatchpointSetting {
    fn default() -> Self {
        WatchpointSetting::Enabled(false)
    }
}

impl WatchpointSetting {
    /// `Ok(None)` for plain breakpoints, `Err` carries the rejected mode string.
    pub fn access_mode(&self) -> std::result::Result<Option<AccessMode>, String> {
        match self {
            WatchpointSetting::Enabled(false) => Ok(None),
            WatchpointSetting::Enabled(true) => Ok(Some(AccessMode::ReadWrite)),
            WatchpointSetting::Mode(s) => AccessMode::parse(s).map(Some).ok_or_else(|| s.clone()),
        }
    }
}

fn default_cpu_model() -> String {
    "cortex-m3".to_string()
}

fn default_vector_base() -> u64 {
    DEFAULT_VECTOR_BASE
}

fn default_permissions() -> String {
    "rwx".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineConfig {
    #[serde(default)]
    pub arch: Arch,
    #[serde(default = "default_cpu_model")]
    pub cpu_model: String,
    #[serde(default)]
    pub entry_addr: Option<u64>,
    #[serde(default)]
    pub init_sp: Option<u64>,
    #[serde(default = "default_vector_base")]
    pub vector_base: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            arch: Arch::default(),
            cpu_model: default_cpu_model(),
            entry_addr: None,
            init_sp: None,
            vector_base: DEFAULT_VECTOR_BASE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SizeSpec {
    Bytes(u64),
    Human(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMemory {
    base_addr: u64,
    size: SizeSpec,
    #[serde(default = "default_permissions")]
    permissions: String,
    #[serde(default)]
    file: Option<PathBuf>,
    #[serde(default)]
    emulate: Option<String>,
}

/// A guest memory or peripheral window to map before execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryConfig {
    pub name: String,
    pub base_addr: u64,
    pub size: u64,
    pub permissions: String,
    /// Initial contents, resolved relative to the declaring config file.
    pub file: Option<PathBuf>,
    pub emulate: Option<String>,
    /// Declared under `peripherals:`; such regions need an `emulate` model.
    pub is_peripheral: bool,
    pub config_file: PathBuf,
}

impl MemoryConfig {
    pub fn end(&self) -> u64 {
        self.base_addr.saturating_add(self.size)
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base_addr && addr < self.end()
    }

    pub fn overlaps(&self, other: &MemoryConfig) -> bool {
        self.base_addr < other.end() && other.base_addr < self.end()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawIntercept {
    class: String,
    function: String,
    #[serde(default)]
    addr: Option<u64>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    class_args: Option<Mapping>,
    #[serde(default)]
    registration_args: Option<Mapping>,
    #[serde(default)]
    run_once: bool,
    #[serde(default)]
    watchpoint: WatchpointSetting,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterceptConfig {
    /// Handler class identifier, e.g. `stm32f4.UART`.
    pub class: String,
    pub function: String,
    /// Resolved trigger address; `None` until symbols are resolved.
    pub addr: Option<u64>,
    pub symbol: Option<String>,
    pub class_args: Mapping,
    pub registration_args: Mapping,
    pub run_once: bool,
    pub watchpoint: WatchpointSetting,
    pub config_file: PathBuf,
}

impl InterceptConfig {
    pub fn new(class: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            function: function.into(),
            addr: None,
            symbol: None,
            class_args: Mapping::new(),
            registration_args: Mapping::new(),
            run_once: false,
            watchpoint: WatchpointSetting::default(),
            config_file: PathBuf::new(),
        }
    }

    pub fn at(mut self, addr: u64) -> Self {
        self.addr = Some(addr);
        self
    }

    /// Name used for symbol resolution: `symbol` when given, otherwise `function`.
    pub fn lookup_name(&self) -> &str {
        self.symbol.as_deref().unwrap_or(&self.function)
    }

    pub fn access_mode(&self) -> Option<AccessMode> {
        self.watchpoint.access_mode().ok().flatten()
    }

    pub fn is_watchpoint(&self) -> bool {
        self.access_mode().is_some()
    }
}

/// Bridge and output settings. Unrecognised keys are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub bridge_host: String,
    /// Port the emulator subscribes to (device processes publish here).
    pub rx_port: u16,
    /// Port the emulator publishes on.
    pub tx_port: u16,
    pub vector_base: Option<u64>,
    pub stats_file: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            bridge_host: "127.0.0.1".to_string(),
            rx_port: DEFAULT_RX_PORT,
            tx_port: DEFAULT_TX_PORT,
            vector_base: None,
            stats_file: None,
            output_dir: None,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfigFile {
    machine: Option<MachineConfig>,
    memories: BTreeMap<String, RawMemory>,
    peripherals: BTreeMap<String, RawMemory>,
    intercepts: Vec<RawIntercept>,
    symbols: BTreeMap<u64, String>,
    options: Mapping,
}

/// Accumulated configuration from one or more YAML files plus symbol sources.
#[derive(Debug, Clone, Default)]
pub struct HalConfig {
    pub machine: MachineConfig,
    pub memories: BTreeMap<String, MemoryConfig>,
    pub intercepts: Vec<InterceptConfig>,
    pub options: Options,
    symbols: SymbolTable,
    machine_source: Option<PathBuf>,
    option_values: Mapping,
}

impl HalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut config = Self::new();
        for path in paths {
            config.add_yaml(path.as_ref())?;
        }
        Ok(config)
    }

    pub fn add_yaml(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read HAL config: {:?}", path))?;
        self.add_yaml_str(&content, path)
    }

    /// Merges one YAML document. `source` names the file for diagnostics and anchors
    /// relative memory `file:` paths.
    pub fn add_yaml_str(&mut self, yaml: &str, source: &Path) -> Result<()> {
        if yaml.trim().is_empty() {
            warn!("Config {:?} is empty", source);
            return Ok(());
        }
        let raw: RawConfigFile = serde_yaml::from_str(yaml)
            .with_context(|| format!("Failed to parse HAL config {:?}", source))?;
        let base_dir = source.parent().unwrap_or_else(|| Path::new("."));

        if let Some(machine) = raw.machine {
            if let Some(prev) = &self.machine_source {
                warn!("Machine in {:?} overrides the one from {:?}", source, prev);
            }
            self.machine = machine;
            self.machine_source = Some(source.to_path_buf());
        }

        for (name, mem) in raw.memories {
            self.insert_memory(name, mem, false, source, base_dir)?;
        }
        for (name, mem) in raw.peripherals {
            self.insert_memory(name, mem, true, source, base_dir)?;
        }

        for raw in raw.intercepts {
            self.intercepts.push(InterceptConfig {
                class: raw.class,
                function: raw.function,
                addr: raw.addr,
                symbol: raw.symbol,
                class_args: raw.class_args.unwrap_or_default(),
                registration_args: raw.registration_args.unwrap_or_default(),
                run_once: raw.run_once,
                watchpoint: raw.watchpoint,
                config_file: source.to_path_buf(),
            });
        }

        for (addr, name) in raw.symbols {
            self.symbols.insert(Symbol {
                name,
                addr,
                size: 0,
            });
        }

        if !raw.options.is_empty() {
            for (k, v) in raw.options {
                self.option_values.insert(k, v);
            }
            self.options = serde_yaml::from_value(Value::Mapping(self.option_values.clone()))
                .with_context(|| format!("Invalid options in {:?}", source))?;
        }

        debug!(
            "Loaded {:?}: {} memories, {} intercepts so far",
            source,
            self.memories.len(),
            self.intercepts.len()
        );
        Ok(())
    }

    fn insert_memory(
        &mut self,
        name: String,
        raw: RawMemory,
        is_peripheral: bool,
        source: &Path,
        base_dir: &Path,
    ) -> Result<()> {
        let size = match raw.size {
            SizeSpec::Bytes(n) => n,
            SizeSpec::Human(s) => {
                parse_size(&s).with_context(|| format!("Memory '{}' in {:?}", name, source))?
            }
        };
        let file = raw.file.map(|f| if f.is_relative() { base_dir.join(f) } else { f });
        if self.memories.contains_key(&name) {
            warn!("Memory '{}' redefined by {:?}", name, source);
        }
        self.memories.insert(
            name.clone(),
            MemoryConfig {
                name,
                base_addr: raw.base_addr,
                size,
                permissions: raw.permissions,
                file,
                emulate: raw.emulate,
                is_peripheral,
                config_file: source.to_path_buf(),
            },
        );
        Ok(())
    }

    pub fn add_csv_symbols(&mut self, path: &Path) -> Result<usize> {
        self.symbols.load_csv(path)
    }

    pub fn add_symbols<I: IntoIterator<Item = Symbol>>(&mut self, symbols: I) -> usize {
        let mut count = 0;
        for sym in symbols {
            self.symbols.insert(sym);
            count += 1;
        }
        count
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn addr_for_symbol(&self, name: &str) -> Option<u64> {
        self.symbols.addr_of(name)
    }

    pub fn symbol_for(&self, addr: u64) -> Option<&str> {
        self.symbols.name_at(addr)
    }

    pub fn memory_containing(&self, addr: u64) -> Option<&MemoryConfig> {
        self.memories.values().find(|m| m.contains(addr))
    }

    pub fn vector_base(&self) -> u64 {
        self.options.vector_base.unwrap_or(self.machine.vector_base)
    }

    /// Fills in missing intercept addresses from the symbol table and clears the Thumb
    /// bit on ARM breakpoint addresses. Returns the number of intercepts left unresolved.
    pub fn resolve_intercept_addrs(&mut self) -> usize {
        let clear_thumb = self.machine.arch == Arch::Arm;
        let symbols = &self.symbols;
        let mut unresolved = 0;
        for intercept in self.intercepts.iter_mut() {
            if intercept.addr.is_none() {
                intercept.addr = symbols.addr_of(intercept.lookup_name());
            }
            match intercept.addr {
                Some(addr) if clear_thumb && !intercept.is_watchpoint() => {
                    intercept.addr = Some(addr & !1);
                }
                Some(_) => {}
                None => {
                    warn!(
                        "No address for intercept '{}' ({})",
                        intercept.lookup_name(),
                        intercept.class
                    );
                    unresolved += 1;
                }
            }
        }
        unresolved
    }

    pub fn validate(&self) -> ValidationReport {
        validate::check(self)
    }

    pub fn prepare_and_validate(&mut self) -> ValidationReport {
        self.resolve_intercept_addrs();
        let report = self.validate();
        if report.is_ok() {
            info!(
                "Configuration valid: {} memories, {} intercepts, {} symbols",
                self.memories.len(),
                self.intercepts.len(),
                self.symbols.len()
            );
        }
        report
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}
