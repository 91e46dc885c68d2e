// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! STM32CubeF4 HAL replacements.
//!
//! HAL calls take a handle pointer as their first argument whose first word is the
//! peripheral base address; that base is the model id.

use crate::intercept::{
    BpHandler, HandlerClass, HandlerContext, HandlerError, HandlerMethod, InterceptAction,
    NoArgs, RegistryError,
};
use crate::peripherals::{ByteStreamModel, GpioModel, PeripheralId, TimerModel};
use crate::signals::DigitalLevel;
use crate::target::EmulatorTarget;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const HAL_OK: u64 = 0;
const HAL_STATE_READY: u64 = 0x20;

fn handle_base(target: &mut dyn EmulatorTarget) -> Result<u64, HandlerError> {
    let handle = target.get_arg(0)?;
    Ok(target.read_word(handle)?)
}

fn tail_call(target: &mut dyn EmulatorTarget, callback: Option<u64>, name: &str) -> Result<(), HandlerError> {
    let addr = callback.ok_or_else(|| HandlerError::MissingSymbol(name.to_string()))?;
    let pc = target.abi().canonical(addr);
    target.set_pc(pc)?;
    Ok(())
}

/// Shared body of UART and SPI transmit: `(handle, buf, len)`.
fn stream_tx(model: &ByteStreamModel, target: &mut dyn EmulatorTarget) -> Result<InterceptAction, HandlerError> {
    let id = PeripheralId::from(handle_base(target)?);
    let buf = target.get_arg(1)?;
    let len = target.get_arg(2)? as usize & 0xffff;
    let data = target.read_memory(buf, len)?;
    model.write(&id, &data);
    Ok(InterceptAction::ReturnValue(HAL_OK))
}

/// Blocking receive of `size` bytes into `buf`.
fn stream_rx(
    model: &ByteStreamModel,
    target: &mut dyn EmulatorTarget,
    buf: u64,
    size: usize,
) -> Result<InterceptAction, HandlerError> {
    let id = PeripheralId::from(handle_base(target)?);
    debug!("{} waiting for {} bytes", id, size);
    let data = model.read(&id, size, true)?;
    target.write_memory(buf, &data)?;
    Ok(InterceptAction::ReturnValue(HAL_OK))
}

pub struct Uart {
    model: Arc<ByteStreamModel>,
}

impl HandlerClass for Uart {
    const CLASS: &'static str = "stm32f4.UART";
    const METHODS: &'static [HandlerMethod] = &[
        HandlerMethod::of("hal_ok", &["HAL_UART_Init"]),
        HandlerMethod::of("get_state", &["HAL_UART_GetState"]),
        HandlerMethod::of(
            "handle_tx",
            &["HAL_UART_Transmit", "HAL_UART_Transmit_IT", "HAL_UART_Transmit_DMA"],
        ),
        HandlerMethod::of(
            "handle_rx",
            &["HAL_UART_Receive", "HAL_UART_Receive_IT", "HAL_UART_Receive_DMA"],
        ),
    ];
    type ClassArgs = NoArgs;
    type RegistrationArgs = NoArgs;

    fn new(ctx: &HandlerContext<'_>, _args: NoArgs) -> Result<Self, RegistryError> {
        Ok(Self {
            model: ctx.models.uart.clone(),
        })
    }
}

impl BpHandler for Uart {
    fn handle(
        &mut self,
        method: &'static str,
        target: &mut dyn EmulatorTarget,
        _addr: u64,
    ) -> Result<InterceptAction, HandlerError> {
        match method {
            "hal_ok" => {
                info!("UART init");
                Ok(InterceptAction::ReturnValue(HAL_OK))
            }
            "get_state" => Ok(InterceptAction::ReturnValue(HAL_STATE_READY)),
            "handle_tx" => stream_tx(&self.model, target),
            "handle_rx" => {
                let buf = target.get_arg(1)?;
                let size = target.get_arg(2)? as usize & 0xffff;
                stream_rx(&self.model, target, buf, size)
            }
            other => Err(HandlerError::Other(format!("stm32f4.UART has no method {}", other))),
        }
    }
}

pub struct Spi {
    model: Arc<ByteStreamModel>,
}

impl HandlerClass for Spi {
    const CLASS: &'static str = "stm32f4.SPI";
    const METHODS: &'static [HandlerMethod] = &[
        HandlerMethod::of("hal_ok", &["HAL_SPI_Init", "HAL_SPI_DeInit"]),
        HandlerMethod::of("get_state", &["HAL_SPI_GetState"]),
        HandlerMethod::of(
            "handle_tx",
            &["HAL_SPI_Transmit", "HAL_SPI_Transmit_IT", "HAL_SPI_Transmit_DMA"],
        ),
        HandlerMethod::of(
            "handle_rx",
            &["HAL_SPI_Receive", "HAL_SPI_Receive_IT", "HAL_SPI_Receive_DMA"],
        ),
        HandlerMethod::of(
            "handle_txrx",
            &[
                "HAL_SPI_TransmitReceive",
                "HAL_SPI_TransmitReceive_IT",
                "HAL_SPI_TransmitReceive_DMA",
            ],
        ),
    ];
    type ClassArgs = NoArgs;
    type RegistrationArgs = NoArgs;

    fn new(ctx: &HandlerContext<'_>, _args: NoArgs) -> Result<Self, RegistryError> {
        Ok(Self {
            model: ctx.models.spi.clone(),
        })
    }
}

impl BpHandler for Spi {
    fn handle(
        &mut self,
        method: &'static str,
        target: &mut dyn EmulatorTarget,
        _addr: u64,
    ) -> Result<InterceptAction, HandlerError> {
        match method {
            "hal_ok" => Ok(InterceptAction::ReturnValue(HAL_OK)),
            "get_state" => Ok(InterceptAction::ReturnValue(HAL_STATE_READY)),
            "handle_tx" => stream_tx(&self.model, target),
            "handle_rx" => {
                let buf = target.get_arg(1)?;
                let size = target.get_arg(2)? as usize & 0xffff;
                stream_rx(&self.model, target, buf, size)
            }
            "handle_txrx" => {
                // (hspi, pTxData, pRxData, Size)
                let id = PeripheralId::from(handle_base(target)?);
                let size = target.get_arg(3)? as usize & 0xffff;
                let tx_buf = target.get_arg(1)?;
                let tx = target.read_memory(tx_buf, size)?;
                self.model.write(&id, &tx);
                let rx_buf = target.get_arg(2)?;
                stream_rx(&self.model, target, rx_buf, size)
            }
            other => Err(HandlerError::Other(format!("stm32f4.SPI has no method {}", other))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimerArgs {
    /// Timer base address -> NVIC line.
    pub irqs: BTreeMap<u64, u32>,
    pub period_ms: u64,
    pub systick_irq: u32,
    pub systick_period_ms: u64,
}

impl Default for TimerArgs {
    fn default() -> Self {
        Self {
            irqs: BTreeMap::from([(0x4000_0400, 45)]),
            period_ms: 2000,
            systick_irq: 15,
            systick_period_ms: 5000,
        }
    }
}

pub struct Timer {
    model: Arc<TimerModel>,
    args: TimerArgs,
    elapsed_callback: Option<u64>,
}

impl Timer {
    const SYSTICK: &'static str = "SysTick";

    fn timer_name(base: u64) -> String {
        format!("{:#x}", base)
    }
}

impl HandlerClass for Timer {
    const CLASS: &'static str = "stm32f4.Timer";
    const METHODS: &'static [HandlerMethod] = &[
        HandlerMethod::of("tim_init", &["HAL_TIM_Base_Init"]),
        HandlerMethod::of(
            "hal_ok",
            &[
                "HAL_TIM_Base_DeInit",
                "HAL_TIM_ConfigClockSource",
                "HAL_TIMEx_MasterConfigSynchronization",
            ],
        ),
        HandlerMethod::of("start", &["HAL_TIM_Base_Start_IT"]),
        HandlerMethod::of("stop", &["HAL_TIM_Base_Stop_IT"]),
        HandlerMethod::of("isr_handler", &["HAL_TIM_IRQHandler"]),
        HandlerMethod::of("sleep", &["HAL_Delay"]),
        HandlerMethod::of("systick_config", &["HAL_SYSTICK_Config"]),
    ];
    type ClassArgs = TimerArgs;
    type RegistrationArgs = NoArgs;

    fn new(ctx: &HandlerContext<'_>, args: TimerArgs) -> Result<Self, RegistryError> {
        Ok(Self {
            model: ctx.models.timers.clone(),
            elapsed_callback: ctx.config.addr_for_symbol("HAL_TIM_PeriodElapsedCallback"),
            args,
        })
    }
}

impl BpHandler for Timer {
    fn handle(
        &mut self,
        method: &'static str,
        target: &mut dyn EmulatorTarget,
        _addr: u64,
    ) -> Result<InterceptAction, HandlerError> {
        match method {
            "tim_init" => {
                info!("TIM init, base {:#x}", handle_base(target)?);
                Ok(InterceptAction::Continue)
            }
            "hal_ok" => Ok(InterceptAction::ReturnValue(HAL_OK)),
            "start" => {
                let base = handle_base(target)?;
                let irq = *self.args.irqs.get(&base).ok_or_else(|| {
                    HandlerError::Other(format!("No IRQ configured for timer {:#x}", base))
                })?;
                self.model.start_timer(
                    &Self::timer_name(base),
                    irq,
                    Duration::from_millis(self.args.period_ms),
                )?;
                Ok(InterceptAction::ReturnValue(HAL_OK))
            }
            "stop" => {
                let base = handle_base(target)?;
                self.model.stop_timer(&Self::timer_name(base));
                Ok(InterceptAction::ReturnValue(HAL_OK))
            }
            "isr_handler" => {
                let base = handle_base(target)?;
                debug!("TICK: timer {:#x}", base);
                self.model.clear_timer(&Self::timer_name(base));
                // htim stays in r0 for the callback
                tail_call(target, self.elapsed_callback, "HAL_TIM_PeriodElapsedCallback")?;
                Ok(InterceptAction::NoOp)
            }
            "sleep" => {
                debug!("HAL_Delay({} ms) skipped", target.get_arg(0)?);
                Ok(InterceptAction::ReturnVoid)
            }
            "systick_config" => {
                self.model.start_timer(
                    Self::SYSTICK,
                    self.args.systick_irq,
                    Duration::from_millis(self.args.systick_period_ms),
                )?;
                Ok(InterceptAction::ReturnValue(HAL_OK))
            }
            other => Err(HandlerError::Other(format!("stm32f4.Timer has no method {}", other))),
        }
    }
}

pub struct Gpio {
    model: Arc<GpioModel>,
    exti_callback: Option<u64>,
}

impl Gpio {
    fn pin_id(target: &mut dyn EmulatorTarget) -> Result<PeripheralId, HandlerError> {
        let port = target.get_arg(0)?;
        let pin = target.get_arg(1)?;
        Ok(PeripheralId::Name(format!("{:#x}_{}", port, pin)))
    }
}

impl HandlerClass for Gpio {
    const CLASS: &'static str = "stm32f4.GPIO";
    const METHODS: &'static [HandlerMethod] = &[
        HandlerMethod::of("handle_exti", &["HAL_GPIO_EXTI_IRQHandler"]),
        HandlerMethod::of("nop", &["HAL_GPIO_Init", "HAL_GPIO_DeInit"]),
        HandlerMethod::of("write_pin", &["HAL_GPIO_WritePin"]),
        HandlerMethod::of("toggle_pin", &["HAL_GPIO_TogglePin"]),
        HandlerMethod::of("read_pin", &["HAL_GPIO_ReadPin"]),
    ];
    type ClassArgs = NoArgs;
    type RegistrationArgs = NoArgs;

    fn new(ctx: &HandlerContext<'_>, _args: NoArgs) -> Result<Self, RegistryError> {
        Ok(Self {
            model: ctx.models.gpio.clone(),
            exti_callback: ctx.config.addr_for_symbol("HAL_GPIO_EXTI_Callback"),
        })
    }
}

impl BpHandler for Gpio {
    fn handle(
        &mut self,
        method: &'static str,
        target: &mut dyn EmulatorTarget,
        _addr: u64,
    ) -> Result<InterceptAction, HandlerError> {
        match method {
            "handle_exti" => {
                // GPIO_Pin stays in r0; the callback returns straight to the ISR's caller
                tail_call(target, self.exti_callback, "HAL_GPIO_EXTI_Callback")?;
                Ok(InterceptAction::NoOp)
            }
            "nop" => Ok(InterceptAction::ReturnVoid),
            "write_pin" => {
                let id = Self::pin_id(target)?;
                let level = DigitalLevel::from(target.get_arg(2)?);
                self.model.write_pin(&id, level);
                Ok(InterceptAction::ReturnVoid)
            }
            "toggle_pin" => {
                let id = Self::pin_id(target)?;
                self.model.toggle_pin(&id);
                Ok(InterceptAction::ReturnVoid)
            }
            "read_pin" => {
                let id = Self::pin_id(target)?;
                let level = self.model.read_pin(&id);
                Ok(InterceptAction::ReturnValue(u64::from(bool::from(level))))
            }
            other => Err(HandlerError::Other(format!("stm32f4.GPIO has no method {}", other))),
        }
    }
}
