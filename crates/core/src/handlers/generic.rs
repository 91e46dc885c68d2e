// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Model-free handlers usable on any function.

use super::HAL_LOG;
use crate::intercept::{
    registration_args, BpHandler, HandlerClass, HandlerContext, HandlerError, HandlerMethod,
    InterceptAction, NoArgs, RegistryError,
};
use crate::target::EmulatorTarget;
use serde::Deserialize;
use serde_yaml::Mapping;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SilentArgs {
    pub silent: bool,
}

#[derive(Debug, Clone)]
struct Named {
    function: String,
    silent: bool,
}

fn named(entries: &BTreeMap<u64, Named>, addr: u64) -> Result<&Named, HandlerError> {
    entries.get(&addr).ok_or(HandlerError::Unbound(addr))
}

/// Returns 0 without running the function.
#[derive(Debug, Default)]
pub struct ReturnZero {
    entries: BTreeMap<u64, Named>,
}

impl HandlerClass for ReturnZero {
    const CLASS: &'static str = "generic.ReturnZero";
    const METHODS: &'static [HandlerMethod] = &[HandlerMethod::any("return_zero")];
    type ClassArgs = NoArgs;
    type RegistrationArgs = SilentArgs;

    fn new(_ctx: &HandlerContext<'_>, _args: NoArgs) -> Result<Self, RegistryError> {
        Ok(Self::default())
    }
}

impl BpHandler for ReturnZero {
    fn on_register(
        &mut self,
        addr: u64,
        function: &str,
        _method: &'static str,
        args: &Mapping,
    ) -> Result<(), RegistryError> {
        let args = registration_args::<Self>(args)?;
        self.entries.insert(
            addr,
            Named {
                function: function.to_string(),
                silent: args.silent,
            },
        );
        Ok(())
    }

    fn handle(
        &mut self,
        _method: &'static str,
        _target: &mut dyn EmulatorTarget,
        addr: u64,
    ) -> Result<InterceptAction, HandlerError> {
        let entry = named(&self.entries, addr)?;
        if !entry.silent {
            info!(target: HAL_LOG, "ReturnZero: {}", entry.function);
        }
        Ok(InterceptAction::ReturnValue(0))
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConstantArgs {
    pub ret_value: u64,
    pub silent: bool,
}

/// Returns a configured constant.
#[derive(Debug, Default)]
pub struct ReturnConstant {
    entries: BTreeMap<u64, (Named, u64)>,
}

impl HandlerClass for ReturnConstant {
    const CLASS: &'static str = "generic.ReturnConstant";
    const METHODS: &'static [HandlerMethod] = &[HandlerMethod::any("return_constant")];
    type ClassArgs = NoArgs;
    type RegistrationArgs = ConstantArgs;

    fn new(_ctx: &HandlerContext<'_>, _args: NoArgs) -> Result<Self, RegistryError> {
        Ok(Self::default())
    }
}

impl BpHandler for ReturnConstant {
    fn on_register(
        &mut self,
        addr: u64,
        function: &str,
        _method: &'static str,
        args: &Mapping,
    ) -> Result<(), RegistryError> {
        let args = registration_args::<Self>(args)?;
        self.entries.insert(
            addr,
            (
                Named {
                    function: function.to_string(),
                    silent: args.silent,
                },
                args.ret_value,
            ),
        );
        Ok(())
    }

    fn handle(
        &mut self,
        _method: &'static str,
        _target: &mut dyn EmulatorTarget,
        addr: u64,
    ) -> Result<InterceptAction, HandlerError> {
        let (entry, value) = self.entries.get(&addr).ok_or(HandlerError::Unbound(addr))?;
        if !entry.silent {
            info!(target: HAL_LOG, "ReturnConstant: {} : {:#x}", entry.function, value);
        }
        Ok(InterceptAction::ReturnValue(*value))
    }
}

/// Returns immediately, leaving the return register alone.
#[derive(Debug, Default)]
pub struct SkipFunc {
    entries: BTreeMap<u64, Named>,
}

impl HandlerClass for SkipFunc {
    const CLASS: &'static str = "generic.SkipFunc";
    const METHODS: &'static [HandlerMethod] = &[HandlerMethod::any("skip")];
    type ClassArgs = NoArgs;
    type RegistrationArgs = SilentArgs;

    fn new(_ctx: &HandlerContext<'_>, _args: NoArgs) -> Result<Self, RegistryError> {
        Ok(Self::default())
    }
}

impl BpHandler for SkipFunc {
    fn on_register(
        &mut self,
        addr: u64,
        function: &str,
        _method: &'static str,
        args: &Mapping,
    ) -> Result<(), RegistryError> {
        let args = registration_args::<Self>(args)?;
        self.entries.insert(
            addr,
            Named {
                function: function.to_string(),
                silent: args.silent,
            },
        );
        Ok(())
    }

    fn handle(
        &mut self,
        _method: &'static str,
        _target: &mut dyn EmulatorTarget,
        addr: u64,
    ) -> Result<InterceptAction, HandlerError> {
        let entry = named(&self.entries, addr)?;
        if !entry.silent {
            info!(target: HAL_LOG, "SkipFunc: {}", entry.function);
        }
        Ok(InterceptAction::ReturnVoid)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CounterArgs {
    pub increment: u64,
    pub silent: bool,
}

impl Default for CounterArgs {
    fn default() -> Self {
        Self {
            increment: 1,
            silent: false,
        }
    }
}

/// Returns a per-address value growing by `increment` on every call; the first call
/// returns `increment`.
#[derive(Debug, Default)]
pub struct Counter {
    counters: BTreeMap<u64, (u64, u64)>,
}

impl HandlerClass for Counter {
    const CLASS: &'static str = "generic.Counter";
    const METHODS: &'static [HandlerMethod] = &[HandlerMethod::any("get_value")];
    type ClassArgs = NoArgs;
    type RegistrationArgs = CounterArgs;

    fn new(_ctx: &HandlerContext<'_>, _args: NoArgs) -> Result<Self, RegistryError> {
        Ok(Self::default())
    }
}

impl BpHandler for Counter {
    fn on_register(
        &mut self,
        addr: u64,
        _function: &str,
        _method: &'static str,
        args: &Mapping,
    ) -> Result<(), RegistryError> {
        let args = registration_args::<Self>(args)?;
        self.counters.insert(addr, (args.increment, 0));
        Ok(())
    }

    fn handle(
        &mut self,
        _method: &'static str,
        _target: &mut dyn EmulatorTarget,
        addr: u64,
    ) -> Result<InterceptAction, HandlerError> {
        let (increment, count) = self
            .counters
            .get_mut(&addr)
            .ok_or(HandlerError::Unbound(addr))?;
        *count = count.wrapping_add(*increment);
        Ok(InterceptAction::ReturnValue(*count))
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ElapsedArgs {
    pub scale: u64,
    pub silent: bool,
}

impl Default for ElapsedArgs {
    fn default() -> Self {
        Self {
            scale: 1,
            silent: false,
        }
    }
}

/// Returns wall-clock milliseconds since registration divided by `scale`.
#[derive(Debug, Default)]
pub struct ElapsedTimer {
    clocks: BTreeMap<u64, (Instant, ElapsedArgs)>,
}

impl HandlerClass for ElapsedTimer {
    const CLASS: &'static str = "generic.ElapsedTimer";
    const METHODS: &'static [HandlerMethod] = &[HandlerMethod::any("get_value")];
    type ClassArgs = NoArgs;
    type RegistrationArgs = ElapsedArgs;

    fn new(_ctx: &HandlerContext<'_>, _args: NoArgs) -> Result<Self, RegistryError> {
        Ok(Self::default())
    }
}

impl BpHandler for ElapsedTimer {
    fn on_register(
        &mut self,
        addr: u64,
        _function: &str,
        _method: &'static str,
        args: &Mapping,
    ) -> Result<(), RegistryError> {
        let args = registration_args::<Self>(args)?;
        if args.scale == 0 {
            return Err(RegistryError::BadArgs {
                class: Self::CLASS.to_string(),
                kind: "registration_args",
                message: "scale must be non-zero".to_string(),
            });
        }
        self.clocks.insert(addr, (Instant::now(), args));
        Ok(())
    }

    fn handle(
        &mut self,
        _method: &'static str,
        _target: &mut dyn EmulatorTarget,
        addr: u64,
    ) -> Result<InterceptAction, HandlerError> {
        let (start, args) = self.clocks.get(&addr).ok_or(HandlerError::Unbound(addr))?;
        let ms = start.elapsed().as_millis() as u64 / args.scale;
        if !args.silent {
            info!(target: HAL_LOG, "Time: {}", ms);
        }
        Ok(InterceptAction::ReturnValue(ms))
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggerArgs {
    pub num_args: usize,
    pub log_ret_addr: bool,
    pub intercept: bool,
    pub ret_value: Option<u64>,
    pub silent: bool,
}

impl Default for LoggerArgs {
    fn default() -> Self {
        Self {
            num_args: 0,
            log_ret_addr: true,
            intercept: false,
            ret_value: None,
            silent: false,
        }
    }
}

/// Logs arguments and the return address, then either runs the function or returns
/// `ret_value` when `intercept` is set.
#[derive(Debug, Default)]
pub struct ArgumentLogger {
    loggers: BTreeMap<u64, (String, LoggerArgs)>,
}

impl HandlerClass for ArgumentLogger {
    const CLASS: &'static str = "generic.ArgumentLogger";
    const METHODS: &'static [HandlerMethod] = &[HandlerMethod::any("log_handler")];
    type ClassArgs = NoArgs;
    type RegistrationArgs = LoggerArgs;

    fn new(_ctx: &HandlerContext<'_>, _args: NoArgs) -> Result<Self, RegistryError> {
        Ok(Self::default())
    }
}

impl BpHandler for ArgumentLogger {
    fn on_register(
        &mut self,
        addr: u64,
        function: &str,
        _method: &'static str,
        args: &Mapping,
    ) -> Result<(), RegistryError> {
        let args = registration_args::<Self>(args)?;
        tracing::debug!(
            "ArgumentLogger {}: num_args {}, log_ret_addr {}, intercept {}, ret_value {:?}",
            function,
            args.num_args,
            args.log_ret_addr,
            args.intercept,
            args.ret_value
        );
        self.loggers.insert(addr, (function.to_string(), args));
        Ok(())
    }

    fn handle(
        &mut self,
        _method: &'static str,
        target: &mut dyn EmulatorTarget,
        addr: u64,
    ) -> Result<InterceptAction, HandlerError> {
        let (function, args) = self.loggers.get(&addr).ok_or(HandlerError::Unbound(addr))?;
        if !args.silent {
            info!(target: HAL_LOG, "Func: {}", function);
            if args.num_args > 0 {
                let values = (0..args.num_args)
                    .map(|i| target.get_arg(i).map(|v| format!("{:#x}", v)))
                    .collect::<Result<Vec<_>, _>>()?;
                info!(target: HAL_LOG, "Args: {}", values.join(", "));
            }
            if args.log_ret_addr {
                info!(target: HAL_LOG, "Return addr: {:#x}", target.return_address()?);
            }
        }
        Ok(match (args.intercept, args.ret_value) {
            (false, _) => InterceptAction::Continue,
            (true, Some(value)) => InterceptAction::ReturnValue(value),
            (true, None) => InterceptAction::ReturnVoid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTarget;

    fn reg(args: &[(&str, serde_yaml::Value)]) -> Mapping {
        args.iter()
            .map(|(k, v)| (serde_yaml::Value::from(*k), v.clone()))
            .collect()
    }

    #[test]
    fn test_counter_per_address() {
        let mut counter = Counter::default();
        let mut target = MockTarget::arm();
        counter
            .on_register(0x10, "rand", "get_value", &reg(&[("increment", 5.into())]))
            .unwrap();
        counter
            .on_register(0x20, "tick", "get_value", &Mapping::new())
            .unwrap();

        let mut next = |addr| counter.handle("get_value", &mut target, addr).unwrap();
        assert_eq!(next(0x10), InterceptAction::ReturnValue(5));
        assert_eq!(next(0x10), InterceptAction::ReturnValue(10));
        assert_eq!(next(0x20), InterceptAction::ReturnValue(1));
    }

    #[test]
    fn test_return_constant_and_skip() {
        let mut target = MockTarget::arm();
        let mut constant = ReturnConstant::default();
        constant
            .on_register(
                0x40,
                "HAL_GetTick",
                "return_constant",
                &reg(&[("ret_value", 0x1234.into()), ("silent", true.into())]),
            )
            .unwrap();
        assert_eq!(
            constant.handle("return_constant", &mut target, 0x40).unwrap(),
            InterceptAction::ReturnValue(0x1234)
        );

        let mut skip = SkipFunc::default();
        skip.on_register(0x50, "HAL_Init", "skip", &Mapping::new()).unwrap();
        assert_eq!(
            skip.handle("skip", &mut target, 0x50).unwrap(),
            InterceptAction::ReturnVoid
        );
        assert!(matches!(
            skip.handle("skip", &mut target, 0x51),
            Err(HandlerError::Unbound(0x51))
        ));
    }

    #[test]
    fn test_unknown_registration_arg_rejected() {
        let mut zero = ReturnZero::default();
        let err = zero
            .on_register(0x60, "f", "return_zero", &reg(&[("loud", true.into())]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::BadArgs { kind: "registration_args", .. }));
    }

    #[test]
    fn test_argument_logger_modes() {
        let mut target = MockTarget::arm();
        target.write_register("r0", 0xaa).unwrap();
        target.write_register("lr", 0x0800_0401).unwrap();

        let mut logger = ArgumentLogger::default();
        logger
            .on_register(0x70, "send", "log_handler", &reg(&[("num_args", 2.into())]))
            .unwrap();
        logger
            .on_register(
                0x80,
                "recv",
                "log_handler",
                &reg(&[("intercept", true.into()), ("ret_value", 3.into())]),
            )
            .unwrap();
        assert_eq!(
            logger.handle("log_handler", &mut target, 0x70).unwrap(),
            InterceptAction::Continue
        );
        assert_eq!(
            logger.handle("log_handler", &mut target, 0x80).unwrap(),
            InterceptAction::ReturnValue(3)
        );
    }

    #[test]
    fn test_elapsed_timer_rejects_zero_scale() {
        let mut timer = ElapsedTimer::default();
        assert!(timer
            .on_register(0x90, "now", "get_value", &reg(&[("scale", 0.into())]))
            .is_err());
        timer.on_register(0x90, "now", "get_value", &Mapping::new()).unwrap();
        let mut target = MockTarget::arm();
        assert!(matches!(
            timer.handle("get_value", &mut target, 0x90).unwrap(),
            InterceptAction::ReturnValue(_)
        ));
    }
}
