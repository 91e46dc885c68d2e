// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Breakpoint/watchpoint interception.
//!
//! A handler class declares which firmware functions each of its methods services
//! ([`HandlerMethod`]); the [`HandlerCatalog`] maps class identifiers to constructors and
//! the [`Dispatcher`] binds trigger addresses to `(instance, method)` pairs.

pub mod dispatcher;
pub mod registry;

pub use dispatcher::{DispatchError, Dispatcher, TriggerKey};
pub use registry::{HandlerCatalog, HandlerContext, RegistryError};

use crate::peripherals::PeripheralError;
use crate::target::{EmulatorTarget, TargetError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::Mapping;

/// What the dispatcher does to the guest after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptAction {
    /// The handler already steered control flow (e.g. a tail call); touch nothing.
    NoOp,
    /// Return to the caller without writing the return register.
    ReturnVoid,
    /// Return to the caller with this value in the return register.
    ReturnValue(u64),
    /// Execute the real function.
    Continue,
}

impl InterceptAction {
    pub fn bypasses(self) -> bool {
        matches!(self, InterceptAction::ReturnVoid | InterceptAction::ReturnValue(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Services {
    /// Wildcard: usable for any function name.
    Any,
    Functions(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerMethod {
    pub name: &'static str,
    pub services: Services,
}

impl HandlerMethod {
    pub const fn any(name: &'static str) -> Self {
        Self {
            name,
            services: Services::Any,
        }
    }

    pub const fn of(name: &'static str, functions: &'static [&'static str]) -> Self {
        Self {
            name,
            services: Services::Functions(functions),
        }
    }

    pub fn serves(&self, function: &str) -> bool {
        match self.services {
            Services::Any => true,
            Services::Functions(list) => list.contains(&function),
        }
    }
}

/// Picks the method servicing `function`: an explicit listing wins over a wildcard.
pub fn resolve_method(
    class: &str,
    methods: &[HandlerMethod],
    function: &str,
) -> Result<&'static str, RegistryError> {
    methods
        .iter()
        .find(|m| matches!(m.services, Services::Functions(_)) && m.serves(function))
        .or_else(|| methods.iter().find(|m| m.services == Services::Any))
        .map(|m| m.name)
        .ok_or_else(|| RegistryError::NoMethod {
            class: class.to_string(),
            function: function.to_string(),
        })
}

/// Argument type for classes that accept none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoArgs {}

pub fn parse_args<T: DeserializeOwned>(args: &Mapping) -> Result<T, String> {
    serde_yaml::from_value(serde_yaml::Value::Mapping(args.clone())).map_err(|e| e.to_string())
}

/// Parses the per-intercept arguments declared by `H`.
pub fn registration_args<H: HandlerClass>(args: &Mapping) -> Result<H::RegistrationArgs, RegistryError> {
    parse_args(args).map_err(|message| RegistryError::BadArgs {
        class: H::CLASS.to_string(),
        kind: "registration_args",
        message,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error(transparent)]
    Peripheral(#[from] PeripheralError),
    #[error("Symbol '{0}' is not in the symbol table")]
    MissingSymbol(String),
    #[error("Intercept at {0:#x} was never registered with this handler")]
    Unbound(u64),
    #[error("{0}")]
    Other(String),
}

/// Object-safe half of a handler class, driven by the dispatcher.
pub trait BpHandler: Send {
    /// Called for every address bound to this instance, after the method is resolved.
    fn on_register(
        &mut self,
        _addr: u64,
        _function: &str,
        _method: &'static str,
        _args: &Mapping,
    ) -> Result<(), RegistryError> {
        Ok(())
    }

    fn handle(
        &mut self,
        method: &'static str,
        target: &mut dyn EmulatorTarget,
        addr: u64,
    ) -> Result<InterceptAction, HandlerError>;
}

/// Static description of a handler class: identifier, method table, argument shapes and
/// constructor. One instance per class exists per session.
pub trait HandlerClass: BpHandler + Sized + 'static {
    const CLASS: &'static str;
    const METHODS: &'static [HandlerMethod];
    type ClassArgs: DeserializeOwned;
    type RegistrationArgs: DeserializeOwned;

    fn new(ctx: &HandlerContext<'_>, args: Self::ClassArgs) -> Result<Self, RegistryError>;
}
