// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Software models standing in for hardware the emulator cannot simulate.
//!
//! Models are session-scoped singletons shared between the dispatch path (handlers
//! call the guest-facing accessors), the bridge receive thread (`handle_rx`) and
//! timer waiters. Each model guards its own state; there is no global lock.

pub mod byte_stream;
pub mod ethernet;
pub mod gpio;
pub mod ieee802154;
pub mod interrupts;
pub mod sd_card;
pub mod timer;

use crate::bridge::{Payload, Publish, Value};
use crate::interrupt::InterruptInjector;
use crate::signals::StopSignal;
use crate::target::TargetError;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use byte_stream::ByteStreamModel;
pub use ethernet::EthernetModel;
pub use gpio::GpioModel;
pub use ieee802154::Ieee802154Model;
pub use interrupts::Interrupts;
pub use sd_card::SdCardModel;
pub use timer::TimerModel;

/// Key distinguishing peripheral instances inside a model: a base address for
/// memory-mapped devices or a free-form name such as `eth0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PeripheralId {
    Num(u64),
    Name(String),
}

impl PeripheralId {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(n) => Some(PeripheralId::Num(*n)),
            Value::Str(s) => Some(PeripheralId::Name(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            PeripheralId::Num(n) => Value::Int(*n),
            PeripheralId::Name(s) => Value::Str(s.clone()),
        }
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeripheralId::Num(n) => write!(f, "{:#x}", n),
            PeripheralId::Name(s) => f.write_str(s),
        }
    }
}

impl From<u64> for PeripheralId {
    fn from(n: u64) -> Self {
        PeripheralId::Num(n)
    }
}

impl From<u32> for PeripheralId {
    fn from(n: u32) -> Self {
        PeripheralId::Num(u64::from(n))
    }
}

impl From<&str> for PeripheralId {
    fn from(s: &str) -> Self {
        PeripheralId::Name(s.to_string())
    }
}

impl From<String> for PeripheralId {
    fn from(s: String) -> Self {
        PeripheralId::Name(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PeripheralError {
    #[error("SD card {id}: backing store {path:?} does not exist")]
    MissingStore { id: PeripheralId, path: PathBuf },
    #[error("SD card {id}: block {block} lies outside {path:?} ({len} bytes)")]
    BlockOutOfRange {
        id: PeripheralId,
        block: u64,
        path: PathBuf,
        len: u64,
    },
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to start timer '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Blocking read on {id} cancelled by shutdown")]
    Cancelled { id: PeripheralId },
    #[error("'{method}' message has a missing or invalid '{field}'")]
    BadMessage {
        method: String,
        field: &'static str,
    },
    #[error("{model} has no inbound method '{method}'")]
    UnknownMethod { model: &'static str, method: String },
    #[error(transparent)]
    Injection(#[from] TargetError),
}

/// A peripheral model reachable from the bridge.
///
/// Inbound topics are derived as `Peripheral.<name>.<method>` for every entry of
/// [`rx_methods`](Self::rx_methods).
pub trait PeripheralModel: Send + Sync {
    fn name(&self) -> &'static str;

    fn rx_methods(&self) -> &'static [&'static str] {
        &[]
    }

    fn handle_rx(&self, method: &str, _payload: &Payload) -> Result<(), PeripheralError> {
        Err(PeripheralError::UnknownMethod {
            model: self.name(),
            method: method.to_string(),
        })
    }
}

/// Poison-tolerant lock: a panicked holder must not wedge the bridge thread.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn required<'a>(
    payload: &'a Payload,
    method: &str,
    field: &'static str,
) -> Result<&'a Value, PeripheralError> {
    payload.get(field).ok_or_else(|| PeripheralError::BadMessage {
        method: method.to_string(),
        field,
    })
}

pub(crate) fn required_id(
    payload: &Payload,
    method: &str,
    field: &'static str,
) -> Result<PeripheralId, PeripheralError> {
    PeripheralId::from_value(required(payload, method, field)?).ok_or_else(|| {
        PeripheralError::BadMessage {
            method: method.to_string(),
            field,
        }
    })
}

pub(crate) fn required_bytes(
    payload: &Payload,
    method: &str,
    field: &'static str,
) -> Result<Vec<u8>, PeripheralError> {
    required(payload, method, field)?
        .as_bytes()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| PeripheralError::BadMessage {
            method: method.to_string(),
            field,
        })
}

/// Every model of one emulation session, created once and handed to handlers.
#[derive(Clone)]
pub struct PeripheralSet {
    pub interrupts: Arc<Interrupts>,
    pub ethernet: Arc<EthernetModel>,
    pub timers: Arc<TimerModel>,
    pub sd_card: Arc<SdCardModel>,
    pub uart: Arc<ByteStreamModel>,
    pub spi: Arc<ByteStreamModel>,
    pub radio: Arc<Ieee802154Model>,
    pub gpio: Arc<GpioModel>,
}

impl PeripheralSet {
    /// `base_dir` anchors relative SD card images.
    pub fn new(
        injector: Arc<dyn InterruptInjector>,
        publisher: Arc<dyn Publish>,
        stop: StopSignal,
        base_dir: Option<PathBuf>,
    ) -> Self {
        let interrupts = Arc::new(Interrupts::new(injector));
        Self {
            ethernet: Arc::new(EthernetModel::new(interrupts.clone(), publisher.clone())),
            timers: Arc::new(TimerModel::new(interrupts.clone())),
            sd_card: Arc::new(SdCardModel::new(base_dir)),
            uart: Arc::new(ByteStreamModel::uart(publisher.clone(), stop.clone())),
            spi: Arc::new(ByteStreamModel::spi(publisher.clone(), stop)),
            radio: Arc::new(Ieee802154Model::new(interrupts.clone(), publisher.clone())),
            gpio: Arc::new(GpioModel::new(publisher)),
            interrupts,
        }
    }

    pub fn models(&self) -> Vec<Arc<dyn PeripheralModel>> {
        vec![
            self.interrupts.clone(),
            self.ethernet.clone(),
            self.timers.clone(),
            self.sd_card.clone(),
            self.uart.clone(),
            self.spi.clone(),
            self.radio.clone(),
            self.gpio.clone(),
        ]
    }

    /// Cancels every timer waiter; blocked readers observe the session stop signal.
    pub fn shutdown(&self) {
        self.timers.shutdown();
    }
}

impl fmt::Debug for PeripheralSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeripheralSet")
            .field("models", &self.models().iter().map(|m| m.name()).collect::<Vec<_>>())
            .finish()
    }
}
