// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use goblin::elf::section_header::SHN_UNDEF;
use goblin::elf::sym::{self, Sym};
use goblin::elf::Elf;
use halwire_config::{Arch, Symbol};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// What intercept resolution needs from a firmware image.
#[derive(Debug, Clone)]
pub struct ElfSymbols {
    pub entry: u64,
    pub arch: Option<Arch>,
    pub symbols: Vec<Symbol>,
}

pub fn load_symbols(path: &Path) -> Result<ElfSymbols> {
    let buffer = fs::read(path).with_context(|| format!("Failed to read ELF file: {:?}", path))?;
    load_symbols_bytes(&buffer).with_context(|| format!("Failed to load symbols from {:?}", path))
}

pub fn load_symbols_bytes(buffer: &[u8]) -> Result<ElfSymbols> {
    let elf = Elf::parse(buffer).context("Failed to parse ELF binary")?;

    info!("ELF Entry Point: {:#x}", elf.entry);

    let arch = match elf.header.e_machine {
        goblin::elf::header::EM_ARM => Some(Arch::Arm),
        goblin::elf::header::EM_RISCV => Some(Arch::RiscV),
        other => {
            warn!("Unknown ELF machine type: {}", other);
            None
        }
    };

    let mut symbols = Vec::new();
    for s in elf.syms.iter() {
        let Some(name) = elf.strtab.get_at(s.st_name) else {
            continue;
        };
        if let Some(symbol) = symbol_from(&s, name) {
            symbols.push(symbol);
        }
    }

    if symbols.is_empty() {
        warn!("No usable symbols in ELF file (stripped binary?)");
    } else {
        debug!("Collected {} symbols", symbols.len());
    }

    Ok(ElfSymbols {
        entry: elf.entry,
        arch,
        symbols,
    })
}

/// Keeps defined function and data symbols; section, file and mapping symbols
/// (`$t`, `$d`, ...) are dropped.
fn symbol_from(s: &Sym, name: &str) -> Option<Symbol> {
    if name.is_empty() || name.starts_with('$') || s.st_shndx == SHN_UNDEF as usize {
        return None;
    }
    match s.st_type() {
        sym::STT_FUNC | sym::STT_OBJECT | sym::STT_NOTYPE => Some(Symbol {
            name: name.to_string(),
            addr: s.st_value,
            size: s.st_size,
        }),
        _ => None,
    }
}
