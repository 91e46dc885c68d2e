// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Atmel ASF v3 driver replacements: SD/MMC stack and the RF233 transceiver.

use crate::intercept::{
    BpHandler, HandlerClass, HandlerContext, HandlerError, HandlerMethod, InterceptAction,
    NoArgs, RegistryError,
};
use crate::peripherals::{Ieee802154Model, PeripheralId, SdCardModel};
use crate::target::EmulatorTarget;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

// sd_mmc_err_t
const SD_MMC_OK: u64 = 0;
const SD_MMC_ERR_SLOT: u64 = 4;
const SD_MMC_ERR_COMM: u64 = 5;
const SD_MMC_ERR_PARAM: u64 = 6;
const SD_MMC_ERR_WP: u64 = 7;

const CARD_TYPE_SD: u64 = 1;
const CARD_VERSION_2_0: u64 = 0x20;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SlotConfig {
    /// Reported capacity in KiB.
    pub capacity: u64,
    pub block_size: usize,
    pub write_protected: bool,
    pub filename: PathBuf,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            capacity: 512 * 1024,
            block_size: 512,
            write_protected: false,
            filename: PathBuf::from("sd_image.img"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SdMmcArgs {
    pub slots: BTreeMap<u8, SlotConfig>,
}

impl Default for SdMmcArgs {
    fn default() -> Self {
        Self {
            slots: BTreeMap::from([(0, SlotConfig::default())]),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Transfer {
    slot: u8,
    next_block: u64,
}

pub struct SdMmc {
    model: Arc<SdCardModel>,
    slots: BTreeMap<u8, SlotConfig>,
    read: Option<Transfer>,
    write: Option<Transfer>,
}

impl SdMmc {
    fn slot_arg(target: &mut dyn EmulatorTarget) -> Result<u8, HandlerError> {
        Ok((target.get_arg(0)? & 0xff) as u8)
    }

    fn start_transfer(
        &self,
        target: &mut dyn EmulatorTarget,
        writing: bool,
    ) -> Result<(Option<Transfer>, u64), HandlerError> {
        let slot = Self::slot_arg(target)?;
        let start = target.get_arg(1)?;
        let count = target.get_arg(2)? & 0xffff;
        let Some(config) = self.slots.get(&slot) else {
            warn!("SD/MMC slot {} is not configured", slot);
            return Ok((None, SD_MMC_ERR_SLOT));
        };
        if writing && config.write_protected {
            return Ok((None, SD_MMC_ERR_WP));
        }
        info!(
            "SD/MMC init {}: slot {}, block {}, {} blocks",
            if writing { "write" } else { "read" },
            slot,
            start,
            count
        );
        Ok((
            Some(Transfer {
                slot,
                next_block: start,
            }),
            SD_MMC_OK,
        ))
    }

    fn read_blocks(&mut self, target: &mut dyn EmulatorTarget) -> Result<u64, HandlerError> {
        let dest = target.get_arg(0)?;
        let count = target.get_arg(1)? & 0xffff;
        let Some(transfer) = self.read.as_mut() else {
            warn!("sd_mmc_start_read_blocks without sd_mmc_init_read_blocks");
            return Ok(SD_MMC_ERR_PARAM);
        };
        let id = PeripheralId::from(u64::from(transfer.slot));
        let mut data = Vec::new();
        for _ in 0..count {
            match self.model.read_block(&id, transfer.next_block) {
                Ok(block) => data.extend_from_slice(&block),
                Err(e) => {
                    warn!("SD/MMC read failed: {}", e);
                    return Ok(SD_MMC_ERR_COMM);
                }
            }
            transfer.next_block += 1;
        }
        target.write_memory(dest, &data)?;
        Ok(SD_MMC_OK)
    }

    fn write_blocks(&mut self, target: &mut dyn EmulatorTarget) -> Result<u64, HandlerError> {
        let src = target.get_arg(0)?;
        let count = target.get_arg(1)? & 0xffff;
        let Some(transfer) = self.write.as_mut() else {
            warn!("sd_mmc_start_write_blocks without sd_mmc_init_write_blocks");
            return Ok(SD_MMC_ERR_PARAM);
        };
        let id = PeripheralId::from(u64::from(transfer.slot));
        let block_size = self.model.block_size(&id);
        for i in 0..count {
            let data = target.read_memory(src + i * block_size as u64, block_size)?;
            if let Err(e) = self.model.write_block(&id, transfer.next_block, &data) {
                warn!("SD/MMC write failed: {}", e);
                return Ok(SD_MMC_ERR_COMM);
            }
            transfer.next_block += 1;
        }
        Ok(SD_MMC_OK)
    }
}

impl HandlerClass for SdMmc {
    const CLASS: &'static str = "asf.SdMmc";
    const METHODS: &'static [HandlerMethod] = &[
        HandlerMethod::of("init", &["sd_mmc_init"]),
        HandlerMethod::of("check", &["sd_mmc_check"]),
        HandlerMethod::of("get_type", &["sd_mmc_get_type"]),
        HandlerMethod::of("get_version", &["sd_mmc_get_version"]),
        HandlerMethod::of("get_capacity", &["sd_mmc_get_capacity"]),
        HandlerMethod::of("is_write_protected", &["sd_mmc_is_write_protected"]),
        HandlerMethod::of("init_read", &["sd_mmc_init_read_blocks"]),
        HandlerMethod::of("start_read", &["sd_mmc_start_read_blocks"]),
        HandlerMethod::of("end_read", &["sd_mmc_wait_end_of_read_blocks"]),
        HandlerMethod::of("init_write", &["sd_mmc_init_write_blocks"]),
        HandlerMethod::of("start_write", &["sd_mmc_start_write_blocks"]),
        HandlerMethod::of("end_write", &["sd_mmc_wait_end_of_write_blocks"]),
    ];
    type ClassArgs = SdMmcArgs;
    type RegistrationArgs = NoArgs;

    fn new(ctx: &HandlerContext<'_>, args: SdMmcArgs) -> Result<Self, RegistryError> {
        let model = ctx.models.sd_card.clone();
        for (slot, config) in &args.slots {
            if config.block_size == 0 {
                return Err(RegistryError::Setup {
                    class: Self::CLASS.to_string(),
                    message: format!("slot {} has a zero block size", slot),
                });
            }
            model.configure(
                &PeripheralId::from(u64::from(*slot)),
                Some(&config.filename),
                config.block_size,
            );
        }
        Ok(Self {
            model,
            slots: args.slots,
            read: None,
            write: None,
        })
    }
}

impl BpHandler for SdMmc {
    fn handle(
        &mut self,
        method: &'static str,
        target: &mut dyn EmulatorTarget,
        _addr: u64,
    ) -> Result<InterceptAction, HandlerError> {
        let status = match method {
            "init" => {
                info!("sd_mmc_init, lr {:#x}", target.return_address()?);
                return Ok(InterceptAction::Continue);
            }
            "check" => SD_MMC_OK,
            "get_type" => CARD_TYPE_SD,
            "get_version" => CARD_VERSION_2_0,
            "get_capacity" => {
                let slot = Self::slot_arg(target)?;
                self.slots.get(&slot).map_or(0, |c| c.capacity)
            }
            "is_write_protected" => {
                let slot = Self::slot_arg(target)?;
                u64::from(self.slots.get(&slot).is_some_and(|c| c.write_protected))
            }
            "init_read" => {
                let (transfer, status) = self.start_transfer(target, false)?;
                self.read = transfer;
                status
            }
            "start_read" => self.read_blocks(target)?,
            "end_read" => {
                self.read = None;
                SD_MMC_OK
            }
            "init_write" => {
                let (transfer, status) = self.start_transfer(target, true)?;
                self.write = transfer;
                status
            }
            "start_write" => self.write_blocks(target)?,
            "end_write" => {
                self.write = None;
                SD_MMC_OK
            }
            other => return Err(HandlerError::Other(format!("asf.SdMmc has no method {}", other))),
        };
        Ok(InterceptAction::ReturnValue(status))
    }
}

const RF233_REG_TRX_STATUS: u64 = 0x01;
const RF233_REG_TRX_STATE: u64 = 0x02;
const RF233_REG_IRQ_STATUS: u64 = 0x0f;
const IRQ_TRX_END: u64 = 1 << 3;
/// Frame length byte counts the two FCS octets.
const FCS_LEN: usize = 2;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Rf233Args {
    pub rx_irq: u32,
}

impl Default for Rf233Args {
    fn default() -> Self {
        Self { rx_irq: 20 }
    }
}

pub struct Rf233 {
    model: Arc<Ieee802154Model>,
    regs: HashMap<u64, u64>,
    ieee_addr: Option<Vec<u8>>,
    isr: Option<u64>,
    register_callback: Option<u64>,
}

impl Rf233 {
    pub fn ieee_addr(&self) -> Option<&[u8]> {
        self.ieee_addr.as_deref()
    }

    fn reg_read(&self, reg: u64) -> u64 {
        match reg {
            RF233_REG_IRQ_STATUS if self.model.has_frame() => IRQ_TRX_END,
            RF233_REG_IRQ_STATUS => 0,
            RF233_REG_TRX_STATUS => self.regs.get(&RF233_REG_TRX_STATE).copied().unwrap_or(0),
            _ => match self.regs.get(&reg) {
                Some(v) => *v,
                None => {
                    debug!("trx_reg_read: unimplemented register {:#x}, returning 0", reg);
                    0
                }
            },
        }
    }
}

impl HandlerClass for Rf233 {
    const CLASS: &'static str = "asf.RF233";
    const METHODS: &'static [HandlerMethod] = &[
        HandlerMethod::of("send", &["rf233_send", "trx_frame_write"]),
        HandlerMethod::of("read_len", &["trx_frame_read"]),
        HandlerMethod::of("sram_read", &["trx_sram_read"]),
        HandlerMethod::of("on", &["rf233_on"]),
        HandlerMethod::of("channel", &["rf_get_channel", "rf_set_channel"]),
        HandlerMethod::of("set_ieee_addr", &["SetIEEEAddr"]),
        HandlerMethod::of("reg_read", &["trx_reg_read"]),
        HandlerMethod::of("reg_write", &["trx_reg_write"]),
        HandlerMethod::of("spi_init", &["trx_spi_init"]),
    ];
    type ClassArgs = Rf233Args;
    type RegistrationArgs = NoArgs;

    fn new(ctx: &HandlerContext<'_>, args: Rf233Args) -> Result<Self, RegistryError> {
        let model = ctx.models.radio.clone();
        model.set_rx_irq(args.rx_irq);
        Ok(Self {
            model,
            regs: HashMap::new(),
            ieee_addr: None,
            isr: ctx.config.addr_for_symbol("AT86RFX_ISR"),
            register_callback: ctx.config.addr_for_symbol("extint_register_callback"),
        })
    }
}

impl BpHandler for Rf233 {
    fn handle(
        &mut self,
        method: &'static str,
        target: &mut dyn EmulatorTarget,
        _addr: u64,
    ) -> Result<InterceptAction, HandlerError> {
        match method {
            "send" => {
                let buf = target.get_arg(0)?;
                let len = (target.get_arg(1)? & 0xff) as usize;
                let frame = target.read_memory(buf, len)?;
                self.model.tx_frame(&frame);
                Ok(InterceptAction::ReturnValue(0))
            }
            "read_len" => {
                let (count, len) = self.model.get_frame_info();
                let value = if count > 0 { len + FCS_LEN } else { 0 };
                let dest = target.get_arg(0)?;
                target.write_uint(dest, 1, value as u64)?;
                Ok(InterceptAction::ReturnVoid)
            }
            "sram_read" => {
                let buf = target.get_arg(1)?;
                let size = target.get_arg(2)? as usize;
                if let Some(frame) = self.model.get_first_frame() {
                    if frame.data.len() <= size {
                        target.write_memory(buf, &frame.data)?;
                    } else {
                        warn!(
                            "802.15.4 frame of {} bytes dropped, buffer holds {}",
                            frame.data.len(),
                            size
                        );
                    }
                }
                Ok(InterceptAction::ReturnVoid)
            }
            "on" => {
                info!("rf233_on");
                Ok(InterceptAction::ReturnValue(0))
            }
            "channel" => Ok(InterceptAction::ReturnValue(0)),
            "set_ieee_addr" => {
                let addr = target.get_arg(0)?;
                self.ieee_addr = Some(target.read_memory(addr, 8)?);
                Ok(InterceptAction::ReturnVoid)
            }
            "reg_read" => {
                let reg = target.get_arg(0)?;
                Ok(InterceptAction::ReturnValue(self.reg_read(reg)))
            }
            "reg_write" => {
                let reg = target.get_arg(0)?;
                let value = target.get_arg(1)?;
                self.regs.insert(reg, value);
                Ok(InterceptAction::ReturnVoid)
            }
            "spi_init" => {
                // extint_register_callback(AT86RFX_ISR, 0, 0)
                let isr = self
                    .isr
                    .ok_or_else(|| HandlerError::MissingSymbol("AT86RFX_ISR".into()))?;
                let callee = self
                    .register_callback
                    .ok_or_else(|| HandlerError::MissingSymbol("extint_register_callback".into()))?;
                let abi = target.abi();
                // function pointers carry the Thumb bit on ARM
                target.set_arg(0, isr | !abi.mode_mask)?;
                target.set_arg(1, 0)?;
                target.set_arg(2, 0)?;
                target.set_pc(abi.canonical(callee))?;
                Ok(InterceptAction::NoOp)
            }
            other => Err(HandlerError::Other(format!("asf.RF233 has no method {}", other))),
        }
    }
}
