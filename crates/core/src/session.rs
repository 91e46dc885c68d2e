// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Emulation session: validated configuration, mapped memory, armed intercepts,
//! running bridge, and the stop/dispatch/resume loop.

use crate::bridge::{BridgeError, PeripheralServer, Publisher, Subscriber, PERIPHERAL_PREFIX};
use crate::intercept::{DispatchError, Dispatcher, HandlerCatalog, HandlerContext, InterceptAction};
use crate::metrics::InterceptStats;
use crate::peripherals::PeripheralSet;
use crate::signals::StopSignal;
use crate::target::{EmulatorTarget, MemoryRegion, StopEvent, TargetError};
use halwire_config::{ConfigError, HalConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{info, warn};

pub const STATS_FILE: &str = "stats.yaml";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("Failed to start the bridge receive thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    Stats(#[from] anyhow::Error),
}

/// One firmware run. Owns the target; everything else hangs off the session stop
/// signal and is torn down by [`shutdown`](Self::shutdown) or on drop.
pub struct Session<T: EmulatorTarget> {
    config: HalConfig,
    target: T,
    dispatcher: Dispatcher,
    models: PeripheralSet,
    publisher: Arc<Publisher>,
    stats: Arc<InterceptStats>,
    stop: StopSignal,
    rx_thread: Option<JoinHandle<()>>,
}

impl<T: EmulatorTarget> Session<T> {
    /// Validates `config` and brings the session up. Nothing touches the target unless
    /// validation passes.
    pub fn start(mut config: HalConfig, mut target: T, catalog: HandlerCatalog) -> Result<Self, SessionError> {
        let mut report = config.prepare_and_validate();
        report.extend(catalog.issues(&config.intercepts));
        report.into_result()?;

        for memory in config.memories.values() {
            target.add_memory_region(&MemoryRegion::from(memory))?;
        }

        let host = config.options.bridge_host.clone();
        let publisher = Publisher::bind(&format!("{}:{}", host, config.options.tx_port))?;
        let mut subscriber = Subscriber::connect(format!("{}:{}", host, config.options.rx_port));
        subscriber.subscribe(PERIPHERAL_PREFIX);
        subscriber.subscribe("Interrupt.");

        let stop = StopSignal::new();
        let injector = target.interrupt_injector();
        let models = PeripheralSet::new(
            injector.clone(),
            publisher.clone(),
            stop.clone(),
            config.options.output_dir.clone(),
        );
        let stats = Arc::new(InterceptStats::with_file(stats_path(&config)));

        let mut dispatcher = Dispatcher::new(catalog, target.abi(), stats.clone());
        {
            let ctx = HandlerContext::new(&models, &config);
            for intercept in &config.intercepts {
                dispatcher.register(&mut target, &ctx, intercept)?;
            }
        }

        let mut server = PeripheralServer::new(injector);
        for model in models.models() {
            server.register_model(model)?;
        }
        let rx_thread = Arc::new(server)
            .spawn(subscriber, stop.clone())
            .map_err(SessionError::Spawn)?;

        let vector_base = config.vector_base();
        target.set_vector_table_base(vector_base)?;
        info!(
            "Session ready: {} intercepts, vector base {:#x}, bridge tx {} rx {}:{}",
            dispatcher.len(),
            vector_base,
            publisher.local_addr(),
            host,
            config.options.rx_port
        );

        Ok(Self {
            config,
            target,
            dispatcher,
            models,
            publisher,
            stats,
            stop,
            rx_thread: Some(rx_thread),
        })
    }

    pub fn config(&self) -> &HalConfig {
        &self.config
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    pub fn models(&self) -> &PeripheralSet {
        &self.models
    }

    pub fn stats(&self) -> &InterceptStats {
        &self.stats
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    /// Handle for stopping the session from another thread (e.g. a signal handler).
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Resumes the guest once and services the stop. `Ok(None)` when the guest exited.
    pub fn step(&mut self) -> Result<Option<InterceptAction>, SessionError> {
        let event = self.target.cont()?;
        let addr = match event {
            StopEvent::Exited => {
                info!("Guest exited");
                return Ok(None);
            }
            StopEvent::Breakpoint { pc } => pc,
            StopEvent::Watchpoint { addr, .. } => addr,
        };
        let key = self
            .dispatcher
            .key_for(&event)
            .ok_or(DispatchError::Unmapped(addr))?;
        Ok(Some(self.dispatcher.dispatch(&mut self.target, key)?))
    }

    /// Runs until the guest exits or the stop signal fires. A stop requested while
    /// the guest runs takes effect at the next trap.
    pub fn run(&mut self) -> Result<(), SessionError> {
        while !self.stop.is_triggered() {
            if self.step()?.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// Stops timers and the bridge, then flushes statistics. Idempotent.
    pub fn shutdown(&mut self) -> Result<(), SessionError> {
        self.stop.trigger();
        self.models.shutdown();
        if let Some(handle) = self.rx_thread.take() {
            if handle.join().is_err() {
                warn!("Bridge receive thread panicked");
            }
        }
        self.publisher.shutdown();
        self.stats.flush()?;
        Ok(())
    }
}

impl<T: EmulatorTarget> Drop for Session<T> {
    fn drop(&mut self) {
        if self.rx_thread.is_some() {
            if let Err(e) = self.shutdown() {
                warn!("Session teardown: {}", e);
            }
        }
    }
}

impl<T: EmulatorTarget> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("dispatcher", &self.dispatcher)
            .field("models", &self.models)
            .finish()
    }
}

fn stats_path(config: &HalConfig) -> PathBuf {
    match (&config.options.stats_file, &config.options.output_dir) {
        (Some(file), _) => file.clone(),
        (None, Some(dir)) => dir.join(STATS_FILE),
        (None, None) => PathBuf::from(STATS_FILE),
    }
}
