// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Symbol {
    pub name: String,
    pub addr: u64,
    /// Zero when the extent is unknown (YAML `symbols:` maps).
    pub size: u64,
}

/// Bidirectional name/address lookup fed by YAML maps, CSV exports and ELF symbol tables.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    by_name: HashMap<String, u64>,
    by_addr: BTreeMap<u64, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: Symbol) {
        if let Some(prev) = self.by_name.get(&symbol.name) {
            if *prev != symbol.addr {
                warn!(
                    "Symbol '{}' redefined: {:#x} -> {:#x}",
                    symbol.name, prev, symbol.addr
                );
            }
        }
        self.by_name.insert(symbol.name.clone(), symbol.addr);
        self.by_addr.insert(symbol.addr, symbol);
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn addr_of(&self, name: &str) -> Option<u64> {
        self.by_name.get(name).copied()
    }

    /// Name of the symbol starting at `addr`, or of the sized symbol whose extent covers it.
    pub fn name_at(&self, addr: u64) -> Option<&str> {
        let (start, sym) = self.by_addr.range(..=addr).next_back()?;
        if *start == addr || addr - start < sym.size {
            Some(sym.name.as_str())
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.by_addr.values()
    }

    /// Parses `name, first_addr, last_addr` rows. Addresses accept `0x` hex or decimal;
    /// blank lines and `#` comments are skipped.
    pub fn parse_csv(content: &str) -> Result<Vec<Symbol>> {
        let mut out = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let cols: Vec<&str> = line.split(',').map(str::trim).collect();
            if cols.len() < 2 {
                anyhow::bail!("line {}: expected 'name, first_addr, last_addr'", idx + 1);
            }
            let first = parse_int(cols[1]).with_context(|| format!("line {}", idx + 1))?;
            let last = match cols.get(2) {
                Some(s) if !s.is_empty() => {
                    parse_int(s).with_context(|| format!("line {}", idx + 1))?
                }
                _ => first,
            };
            if last < first {
                anyhow::bail!("line {}: last address precedes first address", idx + 1);
            }
            out.push(Symbol {
                name: cols[0].to_string(),
                addr: first,
                size: last - first + 1,
            });
        }
        Ok(out)
    }

    pub fn load_csv(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read symbol CSV: {:?}", path))?;
        let symbols = Self::parse_csv(&content)
            .with_context(|| format!("Failed to parse symbol CSV: {:?}", path))?;
        let count = symbols.len();
        for sym in symbols {
            self.insert(sym);
        }
        debug!("Loaded {} symbols from {:?}", count, path);
        Ok(count)
    }
}

pub fn parse_int(s: &str) -> Result<u64> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(&hex.replace('_', ""), 16)
    } else {
        s.replace('_', "").parse::<u64>()
    };
    parsed.with_context(|| format!("Invalid integer '{}'", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_at_respects_extent() {
        let mut table = SymbolTable::new();
        table.insert(Symbol {
            name: "HAL_UART_Init".into(),
            addr: 0x0800_1000,
            size: 0x40,
        });
        table.insert(Symbol {
            name: "uwTick".into(),
            addr: 0x2000_0000,
            size: 0,
        });

        assert_eq!(table.name_at(0x0800_1000), Some("HAL_UART_Init"));
        assert_eq!(table.name_at(0x0800_103f), Some("HAL_UART_Init"));
        assert_eq!(table.name_at(0x0800_1040), None);
        assert_eq!(table.name_at(0x2000_0000), Some("uwTick"));
        assert_eq!(table.name_at(0x2000_0004), None);
        assert_eq!(table.addr_of("uwTick"), Some(0x2000_0000));
    }

    #[test]
    fn test_parse_csv_rows() {
        let csv = "# name, first, last\nmain, 0x100, 0x13f\n\nSystemInit,512,515\n";
        let syms = SymbolTable::parse_csv(csv).unwrap();
        assert_eq!(syms.len(), 2);
        assert_eq!(syms[0].addr, 0x100);
        assert_eq!(syms[0].size, 0x40);
        assert_eq!(syms[1].name, "SystemInit");
        assert_eq!(syms[1].size, 4);
    }

    #[test]
    fn test_parse_csv_rejects_garbage() {
        assert!(SymbolTable::parse_csv("main, zzz, 0x10").is_err());
        assert!(SymbolTable::parse_csv("main, 0x20, 0x10").is_err());
    }
}
