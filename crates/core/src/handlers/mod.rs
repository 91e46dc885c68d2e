// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Built-in handler classes.

pub mod asf;
pub mod generic;
pub mod hle;
pub mod stm32f4;

use crate::intercept::HandlerCatalog;

/// Log target for firmware-visible events (call logs, counters).
pub const HAL_LOG: &str = "hal";

/// Catalog with every handler class shipped in this crate.
pub fn builtin_catalog() -> HandlerCatalog {
    let mut catalog = HandlerCatalog::new();
    catalog
        .register::<generic::ReturnZero>()
        .register::<generic::ReturnConstant>()
        .register::<generic::SkipFunc>()
        .register::<generic::Counter>()
        .register::<generic::ElapsedTimer>()
        .register::<generic::ArgumentLogger>()
        .register::<stm32f4::Uart>()
        .register::<stm32f4::Spi>()
        .register::<stm32f4::Timer>()
        .register::<stm32f4::Gpio>()
        .register::<asf::SdMmc>()
        .register::<asf::Rf233>()
        .register::<hle::EthernetHle>();
    catalog
}
