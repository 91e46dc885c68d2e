// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{parse_args, resolve_method, BpHandler, HandlerClass, HandlerMethod};
use crate::peripherals::PeripheralSet;
use halwire_config::{ConfigIssue, HalConfig, InterceptConfig};
use serde_yaml::Mapping;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown handler class '{0}'")]
    UnknownClass(String),
    #[error("{class}: invalid {kind}: {message}")]
    BadArgs {
        class: String,
        kind: &'static str,
        message: String,
    },
    #[error("{class} has no handler for '{function}'")]
    NoMethod { class: String, function: String },
    #[error("{class}: {message}")]
    Setup { class: String, message: String },
}

/// What a handler constructor may reach: the session's models and its configuration.
#[derive(Clone, Copy)]
pub struct HandlerContext<'a> {
    pub models: &'a PeripheralSet,
    pub config: &'a HalConfig,
}

impl<'a> HandlerContext<'a> {
    pub fn new(models: &'a PeripheralSet, config: &'a HalConfig) -> Self {
        Self { models, config }
    }
}

type BuildFn = fn(&HandlerContext<'_>, &Mapping) -> Result<Box<dyn BpHandler>, RegistryError>;
type CheckFn = fn(&InterceptConfig) -> Result<&'static str, RegistryError>;

#[derive(Clone, Copy)]
struct ClassEntry {
    methods: &'static [HandlerMethod],
    build: BuildFn,
    check: CheckFn,
}

fn build<H: HandlerClass>(ctx: &HandlerContext<'_>, args: &Mapping) -> Result<Box<dyn BpHandler>, RegistryError> {
    let args = parse_args::<H::ClassArgs>(args).map_err(|message| RegistryError::BadArgs {
        class: H::CLASS.to_string(),
        kind: "class_args",
        message,
    })?;
    Ok(Box::new(H::new(ctx, args)?))
}

fn check<H: HandlerClass>(intercept: &InterceptConfig) -> Result<&'static str, RegistryError> {
    let bad = |kind: &'static str, message: String| RegistryError::BadArgs {
        class: H::CLASS.to_string(),
        kind,
        message,
    };
    parse_args::<H::ClassArgs>(&intercept.class_args).map_err(|m| bad("class_args", m))?;
    parse_args::<H::RegistrationArgs>(&intercept.registration_args)
        .map_err(|m| bad("registration_args", m))?;
    resolve_method(H::CLASS, H::METHODS, &intercept.function)
}

/// Handler classes known to a session, keyed by class identifier.
#[derive(Default, Clone)]
pub struct HandlerCatalog {
    classes: BTreeMap<&'static str, ClassEntry>,
}

impl HandlerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: HandlerClass>(&mut self) -> &mut Self {
        self.classes.insert(
            H::CLASS,
            ClassEntry {
                methods: H::METHODS,
                build: build::<H>,
                check: check::<H>,
            },
        );
        self
    }

    pub fn with<H: HandlerClass>(mut self) -> Self {
        self.register::<H>();
        self
    }

    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    pub fn classes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.classes.keys().copied()
    }

    pub fn methods(&self, class: &str) -> Option<&'static [HandlerMethod]> {
        self.classes.get(class).map(|e| e.methods)
    }

    fn entry(&self, class: &str) -> Result<&ClassEntry, RegistryError> {
        self.classes
            .get(class)
            .ok_or_else(|| RegistryError::UnknownClass(class.to_string()))
    }

    /// Validates an intercept against its class without instantiating anything and
    /// returns the method that would service it.
    pub fn check(&self, intercept: &InterceptConfig) -> Result<&'static str, RegistryError> {
        (self.entry(&intercept.class)?.check)(intercept)
    }

    /// Every catalog problem across `intercepts`, as configuration issues.
    pub fn issues(&self, intercepts: &[InterceptConfig]) -> Vec<ConfigIssue> {
        intercepts
            .iter()
            .filter_map(|ic| {
                self.check(ic).err().map(|err| match err {
                    RegistryError::UnknownClass(class) => ConfigIssue::UnknownHandlerClass {
                        file: ic.config_file.clone(),
                        function: ic.function.clone(),
                        class,
                    },
                    other => ConfigIssue::InvalidHandlerArgs {
                        file: ic.config_file.clone(),
                        function: ic.function.clone(),
                        class: ic.class.clone(),
                        message: other.to_string(),
                    },
                })
            })
            .collect()
    }

    pub fn instantiate(
        &self,
        class: &str,
        ctx: &HandlerContext<'_>,
        args: &Mapping,
    ) -> Result<Box<dyn BpHandler>, RegistryError> {
        (self.entry(class)?.build)(ctx, args)
    }
}

impl fmt::Debug for HandlerCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.classes.keys()).finish()
    }
}
