// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{BpHandler, HandlerCatalog, HandlerContext, HandlerError, InterceptAction, RegistryError};
use crate::metrics::StatsSink;
use crate::target::{AccessMode, Abi, EmulatorTarget, StopEvent, TargetError};
use halwire_config::InterceptConfig;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Identity of a trap as the emulator reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TriggerKey {
    Breakpoint(u64),
    Watchpoint(u64, AccessMode),
}

impl TriggerKey {
    pub fn addr(&self) -> u64 {
        match self {
            TriggerKey::Breakpoint(addr) | TriggerKey::Watchpoint(addr, _) => *addr,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No intercept bound at {0:#x}")]
    Unmapped(u64),
    #[error("Intercept '{0}' has no resolved address")]
    Unresolved(String),
    #[error("Handler {class} failed in '{function}' at {addr:#x}: {source}")]
    Handler {
        addr: u64,
        function: String,
        class: String,
        #[source]
        source: HandlerError,
    },
    #[error("Cannot register '{function}': {source}")]
    Registry {
        function: String,
        #[source]
        source: RegistryError,
    },
    #[error(transparent)]
    Target(#[from] TargetError),
}

#[derive(Debug, Clone)]
struct Binding {
    class: String,
    function: String,
    method: &'static str,
    run_once: bool,
}

/// Address → handler table and the per-trap dispatch algorithm.
///
/// Handler instances are singletons per class. Dispatch is strictly serialized: the
/// emulator is halted for the whole call and resumed by the caller afterwards.
pub struct Dispatcher {
    catalog: HandlerCatalog,
    handlers: BTreeMap<String, Box<dyn BpHandler>>,
    bindings: BTreeMap<TriggerKey, Binding>,
    stats: Arc<dyn StatsSink>,
    abi: Abi,
}

impl Dispatcher {
    pub fn new(catalog: HandlerCatalog, abi: Abi, stats: Arc<dyn StatsSink>) -> Self {
        Self {
            catalog,
            handlers: BTreeMap::new(),
            bindings: BTreeMap::new(),
            stats,
            abi,
        }
    }

    pub fn catalog(&self) -> &HandlerCatalog {
        &self.catalog
    }

    pub fn is_bound(&self, key: &TriggerKey) -> bool {
        self.bindings.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Instantiates the class on first use, resolves the method for the intercept's
    /// function and arms the trap on `target`.
    pub fn register(
        &mut self,
        target: &mut dyn EmulatorTarget,
        ctx: &HandlerContext<'_>,
        intercept: &InterceptConfig,
    ) -> Result<TriggerKey, DispatchError> {
        let registry_err = |source| DispatchError::Registry {
            function: intercept.function.clone(),
            source,
        };
        let addr = intercept
            .addr
            .ok_or_else(|| DispatchError::Unresolved(intercept.function.clone()))?;
        let method = self.catalog.check(intercept).map_err(registry_err)?;

        let key = match intercept.access_mode() {
            Some(mode) => TriggerKey::Watchpoint(addr, mode),
            None => TriggerKey::Breakpoint(self.abi.canonical(addr)),
        };

        if !self.handlers.contains_key(&intercept.class) {
            let handler = self
                .catalog
                .instantiate(&intercept.class, ctx, &intercept.class_args)
                .map_err(registry_err)?;
            debug!("Instantiated handler class {}", intercept.class);
            self.handlers.insert(intercept.class.clone(), handler);
        } else if !intercept.class_args.is_empty() {
            warn!(
                "class_args for {} on '{}' ignored: class already instantiated",
                intercept.class, intercept.function
            );
        }
        if let Some(handler) = self.handlers.get_mut(&intercept.class) {
            handler
                .on_register(key.addr(), &intercept.function, method, &intercept.registration_args)
                .map_err(registry_err)?;
        }

        let binding = Binding {
            class: intercept.class.clone(),
            function: intercept.function.clone(),
            method,
            run_once: intercept.run_once,
        };
        if let Some(previous) = self.bindings.insert(key, binding) {
            if previous.class != intercept.class || previous.method != method {
                warn!(
                    "Intercept at {:#x} rebound from {}.{} to {}.{}",
                    key.addr(),
                    previous.class,
                    previous.method,
                    intercept.class,
                    method
                );
            }
        }

        match key {
            TriggerKey::Breakpoint(addr) => target.set_breakpoint(addr, intercept.run_once)?,
            TriggerKey::Watchpoint(addr, mode) => target.set_watchpoint(addr, mode)?,
        }
        self.stats
            .record_registration(key.addr(), &intercept.function, &intercept.class, method);
        info!(
            "Registered {}.{} for '{}' at {:#x}",
            intercept.class,
            method,
            intercept.function,
            key.addr()
        );
        Ok(key)
    }

    /// Maps an emulator stop to a bound trigger. `Exited` and unmatched watchpoint
    /// accesses map to nothing.
    pub fn key_for(&self, event: &StopEvent) -> Option<TriggerKey> {
        match *event {
            StopEvent::Breakpoint { pc } => Some(TriggerKey::Breakpoint(self.abi.canonical(pc))),
            StopEvent::Watchpoint { addr, access } => self
                .bindings
                .range(TriggerKey::Watchpoint(addr, AccessMode::Read)..=TriggerKey::Watchpoint(addr, AccessMode::ReadWrite))
                .map(|(key, _)| *key)
                .find(|key| matches!(key, TriggerKey::Watchpoint(_, mode) if mode.covers(access))),
            StopEvent::Exited => None,
        }
    }

    /// Runs the bound handler and applies its action to the guest.
    pub fn dispatch(
        &mut self,
        target: &mut dyn EmulatorTarget,
        key: TriggerKey,
    ) -> Result<InterceptAction, DispatchError> {
        let addr = key.addr();
        let binding = self
            .bindings
            .get(&key)
            .cloned()
            .ok_or(DispatchError::Unmapped(addr))?;
        let handler = self
            .handlers
            .get_mut(&binding.class)
            .ok_or(DispatchError::Unmapped(addr))?;

        let action = handler
            .handle(binding.method, target, addr)
            .map_err(|source| {
                error!(
                    "Handler {}.{} failed for '{}' at {:#x}: {}",
                    binding.class, binding.method, binding.function, addr, source
                );
                DispatchError::Handler {
                    addr,
                    function: binding.function.clone(),
                    class: binding.class.clone(),
                    source,
                }
            })?;

        self.stats.record_hit(addr, &binding.function);
        if action.bypasses() {
            self.stats.record_bypass(&binding.function);
        }

        match action {
            InterceptAction::ReturnValue(value) => target.execute_return(Some(value))?,
            InterceptAction::ReturnVoid => target.execute_return(None)?,
            InterceptAction::NoOp | InterceptAction::Continue => {}
        }
        debug!("{} at {:#x} -> {:?}", binding.function, addr, action);

        if binding.run_once {
            self.bindings.remove(&key);
            if let TriggerKey::Watchpoint(addr, mode) = key {
                target.remove_watchpoint(addr, mode)?;
            }
            debug!("run_once intercept '{}' at {:#x} retired", binding.function, addr);
        }
        Ok(action)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("classes", &self.handlers.keys().collect::<Vec<_>>())
            .field("bindings", &self.bindings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intercept::{HandlerClass, HandlerMethod, NoArgs};
    use crate::metrics::InterceptStats;
    use crate::mock::{MockTarget, RecordingInjector, RecordingPublisher};
    use crate::peripherals::PeripheralSet;
    use crate::signals::StopSignal;
    use halwire_config::{HalConfig, WatchpointSetting};

    /// Returns a per-address scripted action and counts invocations per method.
    #[derive(Default)]
    struct Scripted {
        calls: Vec<(&'static str, u64)>,
        actions: BTreeMap<u64, InterceptAction>,
    }

    impl BpHandler for Scripted {
        fn on_register(
            &mut self,
            addr: u64,
            function: &str,
            _method: &'static str,
            _args: &serde_yaml::Mapping,
        ) -> Result<(), RegistryError> {
            let action = match function {
                "ret42" => InterceptAction::ReturnValue(0x42),
                "skip" => InterceptAction::ReturnVoid,
                "fail" => return Ok(()),
                _ => InterceptAction::Continue,
            };
            self.actions.insert(addr, action);
            Ok(())
        }

        fn handle(
            &mut self,
            method: &'static str,
            target: &mut dyn EmulatorTarget,
            addr: u64,
        ) -> Result<InterceptAction, HandlerError> {
            self.calls.push((method, addr));
            let _ = target.get_arg(0)?;
            self.actions
                .get(&addr)
                .copied()
                .ok_or(HandlerError::Unbound(addr))
        }
    }

    impl HandlerClass for Scripted {
        const CLASS: &'static str = "test.Scripted";
        const METHODS: &'static [HandlerMethod] = &[
            HandlerMethod::of("special", &["ret42"]),
            HandlerMethod::any("generic"),
        ];
        type ClassArgs = NoArgs;
        type RegistrationArgs = NoArgs;

        fn new(_ctx: &HandlerContext<'_>, _args: NoArgs) -> Result<Self, RegistryError> {
            Ok(Self::default())
        }
    }

    struct Fixture {
        models: PeripheralSet,
        config: HalConfig,
        stats: Arc<InterceptStats>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                models: PeripheralSet::new(
                    Arc::new(RecordingInjector::new()),
                    Arc::new(RecordingPublisher::new()),
                    StopSignal::new(),
                    None,
                ),
                config: HalConfig::new(),
                stats: Arc::new(InterceptStats::new()),
            }
        }

        fn dispatcher(&self) -> Dispatcher {
            Dispatcher::new(
                HandlerCatalog::new().with::<Scripted>(),
                Abi::ARM_AAPCS,
                self.stats.clone(),
            )
        }

        fn ctx(&self) -> HandlerContext<'_> {
            HandlerContext::new(&self.models, &self.config)
        }
    }

    #[test]
    fn test_return_value_sets_register_and_pc() {
        let fx = Fixture::new();
        let mut d = fx.dispatcher();
        let mut target = MockTarget::arm();
        let key = d
            .register(&mut target, &fx.ctx(), &InterceptConfig::new("test.Scripted", "ret42").at(0x0800_0101))
            .unwrap();
        assert_eq!(key, TriggerKey::Breakpoint(0x0800_0100));
        assert_eq!(target.breakpoints.get(&0x0800_0100), Some(&false));

        target.push_call(0x0800_0101, 0x0800_2001, &[7]);
        let event = target.cont().unwrap();
        let key = d.key_for(&event).unwrap();
        assert_eq!(d.dispatch(&mut target, key).unwrap(), InterceptAction::ReturnValue(0x42));
        assert_eq!(target.read_register("r0").unwrap(), 0x42);
        assert_eq!(target.read_register("pc").unwrap(), 0x0800_2001);
        assert_eq!(fx.stats.hits(0x0800_0100), 1);
        assert!(fx.stats.snapshot().bypassed_funcs.contains("ret42"));
    }

    #[test]
    fn test_continue_leaves_pc() {
        let fx = Fixture::new();
        let mut d = fx.dispatcher();
        let mut target = MockTarget::arm();
        d.register(&mut target, &fx.ctx(), &InterceptConfig::new("test.Scripted", "watch").at(0x200))
            .unwrap();

        target.push_call(0x200, 0x400, &[]);
        target.cont().unwrap();
        let action = d.dispatch(&mut target, TriggerKey::Breakpoint(0x200)).unwrap();
        assert_eq!(action, InterceptAction::Continue);
        assert_eq!(target.read_register("pc").unwrap(), 0x200);
        assert!(fx.stats.snapshot().bypassed_funcs.is_empty());
    }

    #[test]
    fn test_dispatch_invokes_exactly_the_bound_method() {
        let fx = Fixture::new();
        let mut d = fx.dispatcher();
        let mut target = MockTarget::arm();
        let ctx = fx.ctx();
        d.register(&mut target, &ctx, &InterceptConfig::new("test.Scripted", "ret42").at(0x100))
            .unwrap();
        d.register(&mut target, &ctx, &InterceptConfig::new("test.Scripted", "skip").at(0x300))
            .unwrap();

        target.push_call(0x300, 0x500, &[]);
        target.cont().unwrap();
        assert_eq!(
            d.dispatch(&mut target, TriggerKey::Breakpoint(0x300)).unwrap(),
            InterceptAction::ReturnVoid
        );
        assert_eq!(target.read_register("pc").unwrap(), 0x500);
        assert_eq!(target.read_register("r0").unwrap(), 0);
        assert_eq!(fx.stats.hits(0x100), 0);
        assert_eq!(fx.stats.hits(0x300), 1);
    }

    #[test]
    fn test_unmapped_address_is_fatal() {
        let fx = Fixture::new();
        let mut d = fx.dispatcher();
        let mut target = MockTarget::arm();
        assert!(matches!(
            d.dispatch(&mut target, TriggerKey::Breakpoint(0xdead)),
            Err(DispatchError::Unmapped(0xdead))
        ));
    }

    #[test]
    fn test_handler_error_propagates() {
        let fx = Fixture::new();
        let mut d = fx.dispatcher();
        let mut target = MockTarget::arm();
        d.register(&mut target, &fx.ctx(), &InterceptConfig::new("test.Scripted", "fail").at(0x80))
            .unwrap();
        let err = d.dispatch(&mut target, TriggerKey::Breakpoint(0x80)).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Handler {
                addr: 0x80,
                source: HandlerError::Unbound(0x80),
                ..
            }
        ));
        assert_eq!(fx.stats.hits(0x80), 0);
    }

    #[test]
    fn test_run_once_retires_binding() {
        let fx = Fixture::new();
        let mut d = fx.dispatcher();
        let mut target = MockTarget::arm();
        let mut ic = InterceptConfig::new("test.Scripted", "skip").at(0x600);
        ic.run_once = true;
        let key = d.register(&mut target, &fx.ctx(), &ic).unwrap();
        assert_eq!(target.breakpoints.get(&0x600), Some(&true));

        target.push_call(0x600, 0x700, &[]);
        target.cont().unwrap();
        d.dispatch(&mut target, key).unwrap();
        assert!(!d.is_bound(&key));
        assert!(d.dispatch(&mut target, key).is_err());
    }

    #[test]
    fn test_watchpoint_keyed_by_access_mode() {
        let fx = Fixture::new();
        let mut d = fx.dispatcher();
        let mut target = MockTarget::arm();
        let mut ic = InterceptConfig::new("test.Scripted", "watch").at(0x2000_0001);
        ic.watchpoint = WatchpointSetting::Mode("w".into());
        let key = d.register(&mut target, &fx.ctx(), &ic).unwrap();
        assert_eq!(key, TriggerKey::Watchpoint(0x2000_0001, AccessMode::Write));
        assert!(target.watchpoints.contains(&(0x2000_0001, AccessMode::Write)));

        let write = StopEvent::Watchpoint {
            addr: 0x2000_0001,
            access: AccessMode::Write,
        };
        let read = StopEvent::Watchpoint {
            addr: 0x2000_0001,
            access: AccessMode::Read,
        };
        assert_eq!(d.key_for(&write), Some(key));
        assert_eq!(d.key_for(&read), None);
        assert_eq!(d.key_for(&StopEvent::Exited), None);
    }

    #[test]
    fn test_unknown_class_rejected_at_registration() {
        let fx = Fixture::new();
        let mut d = fx.dispatcher();
        let mut target = MockTarget::arm();
        let err = d
            .register(&mut target, &fx.ctx(), &InterceptConfig::new("nope.Missing", "f").at(0x10))
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Registry {
                source: RegistryError::UnknownClass(_),
                ..
            }
        ));
        assert!(d
            .register(&mut target, &fx.ctx(), &InterceptConfig::new("test.Scripted", "f"))
            .is_err());
    }
}
