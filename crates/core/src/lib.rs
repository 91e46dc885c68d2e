// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! HalWire core: breakpoint interception, peripheral models and the pub/sub bridge
//! that lets firmware run in an emulator without the hardware it was written for.

pub mod bridge;
pub mod handlers;
pub mod intercept;
pub mod interrupt;
pub mod metrics;
pub mod mock;
pub mod peripherals;
pub mod session;
pub mod signals;
pub mod target;

pub use bridge::{Message, Payload, Publish, Value};
pub use handlers::builtin_catalog;
pub use intercept::{
    BpHandler, DispatchError, Dispatcher, HandlerCatalog, HandlerClass, HandlerError,
    InterceptAction, RegistryError, TriggerKey,
};
pub use interrupt::InterruptInjector;
pub use peripherals::{PeripheralError, PeripheralId, PeripheralModel, PeripheralSet};
pub use session::{Session, SessionError};
pub use target::{Abi, AccessMode, EmulatorTarget, MemoryRegion, StopEvent, TargetError};
