// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Host-side peers of the emulator bridge. Each device talks to one or more emulators
//! through an [`IoServer`], the mirror image of the emulator's own publisher and
//! subscriber pair.

pub mod hub;
pub mod interrupt;
pub mod io_server;
pub mod uart;

pub use hub::{FrameSink, Hub, Medium, UdpFrameSink};
pub use interrupt::InterruptTrigger;
pub use io_server::IoServer;
pub use uart::UartConsole;

use halwire_core::bridge::BridgeError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("Packet log {path:?}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to start IO server thread: {0}")]
    Spawn(#[source] std::io::Error),
}
