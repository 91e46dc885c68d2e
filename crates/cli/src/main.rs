// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

mod transcript;

use clap::{ArgGroup, Args, Parser, Subcommand};
use halwire_config::{parse_int, parse_size, HalConfig};
use halwire_core::{builtin_catalog, PeripheralId};
use halwire_devices::uart::translate_input;
use halwire_devices::{
    DeviceError, FrameSink, Hub, InterruptTrigger, IoServer, UartConsole, UdpFrameSink,
};
use std::fs::File;
use std::io::{self, BufRead, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use transcript::Transcript;

const EXIT_OK: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

fn parse_u64(s: &str) -> Result<u64, String> {
    parse_int(s).map_err(|e| e.to_string())
}

fn parse_byte_size(s: &str) -> Result<u64, String> {
    parse_size(s).map_err(|e| e.to_string())
}

#[derive(Parser, Debug)]
#[command(author, version, about = "HalWire peripheral bridge tools", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load configuration files and report every problem that would stop a session.
    Validate(ValidateArgs),
    /// Interactive console for one emulated UART.
    Uart(UartArgs),
    /// Join several emulators into one Ethernet segment.
    EthHub(EthHubArgs),
    /// Join several emulators into one 802.15.4 radio channel.
    RadioHub(RadioHubArgs),
    /// Raise interrupts or move the vector table of a running emulator.
    Interrupt(InterruptArgs),
}

#[derive(Parser, Debug)]
struct ValidateArgs {
    /// HAL configuration file (repeatable, merged in order)
    #[arg(short = 'c', long = "config", required = true)]
    configs: Vec<PathBuf>,

    /// Firmware ELF providing symbols
    #[arg(long)]
    elf: Option<PathBuf>,

    /// CSV symbol file: `name, first_addr, last_addr` (repeatable)
    #[arg(long)]
    symbols: Vec<PathBuf>,
}

/// Where one emulator publishes and where we publish for it.
#[derive(Args, Debug)]
struct Endpoint {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port the emulator publishes on
    #[arg(short = 'r', long, default_value_t = 5556)]
    rx_port: u16,

    /// Port to publish on for the emulator
    #[arg(short = 't', long, default_value_t = 5555)]
    tx_port: u16,
}

impl Endpoint {
    fn server(&self, log: Option<&Path>) -> Result<Arc<IoServer>, DeviceError> {
        IoServer::new(
            format!("{}:{}", self.host, self.rx_port),
            &format!("{}:{}", self.host, self.tx_port),
            log,
        )
    }
}

#[derive(Parser, Debug)]
struct UartArgs {
    #[command(flatten)]
    endpoint: Endpoint,

    /// UART id: base address or name
    #[arg(short, long, default_value = "0x40004400")]
    id: String,

    /// Also write guest output to this file
    #[arg(long)]
    log: Option<PathBuf>,

    /// Largest log file to write, e.g. 512KiB
    #[arg(long, default_value = "1MiB", value_parser = parse_byte_size)]
    max_log_size: u64,
}

#[derive(Args, Debug)]
struct HubPorts {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Ports the emulators publish on
    #[arg(short = 'r', long, num_args = 1.., default_values_t = [5556u16, 5558])]
    rx_ports: Vec<u16>,

    /// Ports to publish on, one per emulator
    #[arg(short = 't', long, num_args = 1.., default_values_t = [5555u16, 5557])]
    tx_ports: Vec<u16>,
}

#[derive(Parser, Debug)]
struct EthHubArgs {
    #[command(flatten)]
    ports: HubPorts,

    /// Copy every frame to this UDP address (`host:port`)
    #[arg(long)]
    tap: Option<String>,
}

#[derive(Parser, Debug)]
struct RadioHubArgs {
    #[command(flatten)]
    ports: HubPorts,

    /// Per-emulator packet CSV logs, one per rx port
    #[arg(short, long, num_args = 1..)]
    logs: Vec<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(group(ArgGroup::new("action").required(true).multiple(true).args(["interrupt", "base_addr"])))]
struct InterruptArgs {
    #[command(flatten)]
    endpoint: Endpoint,

    /// Interrupt number to trigger
    #[arg(short, long)]
    interrupt: Option<u32>,

    /// Number of consecutive interrupts to trigger, starting at --interrupt
    #[arg(short, long, default_value_t = 1)]
    walk: u32,

    /// New vector table base address
    #[arg(short, long, value_parser = parse_u64)]
    base_addr: Option<u64>,

    /// Seconds to wait for the emulator to connect
    #[arg(long, default_value_t = 10)]
    wait: u64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    match cli.command {
        Commands::Validate(args) => run_validate(args),
        Commands::Uart(args) => run_uart(args),
        Commands::EthHub(args) => {
            let sink = match &args.tap {
                Some(addr) => match UdpFrameSink::connect(addr.as_str()) {
                    Ok(sink) => {
                        info!("Copying frames to {}", addr);
                        Some(Box::new(sink) as Box<dyn FrameSink>)
                    }
                    Err(e) => {
                        error!("Failed to open frame tap {}: {}", addr, e);
                        return ExitCode::from(EXIT_CONFIG_ERROR);
                    }
                },
                None => None,
            };
            run_hub(Hub::ethernet(sink), &args.ports, &[])
        }
        Commands::RadioHub(args) => run_hub(Hub::radio(None), &args.ports, &args.logs),
        Commands::Interrupt(args) => run_interrupt(args),
    }
}

fn run_validate(args: ValidateArgs) -> ExitCode {
    let mut config = match HalConfig::from_files(&args.configs) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    if let Some(elf) = &args.elf {
        match halwire_loader::load_symbols(elf) {
            Ok(loaded) => {
                if let Some(arch) = loaded.arch {
                    if arch != config.machine.arch {
                        warn!(
                            "ELF is {:?} but the configuration says {:?}",
                            arch, config.machine.arch
                        );
                    }
                }
                let added = config.add_symbols(loaded.symbols);
                info!("Loaded {} symbols from {:?}", added, elf);
            }
            Err(e) => {
                error!("{:#}", e);
                return ExitCode::from(EXIT_CONFIG_ERROR);
            }
        }
    }
    for csv in &args.symbols {
        match config.add_csv_symbols(csv) {
            Ok(added) => info!("Loaded {} symbols from {:?}", added, csv),
            Err(e) => {
                error!("{:#}", e);
                return ExitCode::from(EXIT_CONFIG_ERROR);
            }
        }
    }

    let mut report = config.prepare_and_validate();
    report.extend(builtin_catalog().issues(&config.intercepts));
    if !report.is_ok() {
        error!("Configuration is invalid:\n{}", report);
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    println!(
        "OK: {} memories, {} intercepts, {} symbols",
        config.memories.len(),
        config.intercepts.len(),
        config.symbols().len()
    );
    for intercept in &config.intercepts {
        let kind = match intercept.access_mode() {
            Some(mode) => format!("watch {}", mode.as_str()),
            None => "break".to_string(),
        };
        println!(
            "  {:#010x}  {:<8} {:<32} {}",
            intercept.addr.unwrap_or_default(),
            kind,
            intercept.function,
            intercept.class
        );
    }
    ExitCode::from(EXIT_OK)
}

fn run_uart(args: UartArgs) -> ExitCode {
    let log = match &args.log {
        Some(path) => match File::create(path) {
            Ok(file) => Some(BufWriter::new(file)),
            Err(e) => {
                error!("Failed to create UART log {:?}: {}", path, e);
                return ExitCode::from(EXIT_CONFIG_ERROR);
            }
        },
        None => None,
    };
    let server = match args.endpoint.server(None) {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    };

    let id = parse_int(&args.id)
        .map(PeripheralId::from)
        .unwrap_or_else(|_| PeripheralId::from(args.id.as_str()));
    let transcript = Transcript::new(io::stdout(), log, args.max_log_size);
    let console = UartConsole::new(server.clone(), id, transcript);
    if let Err(e) = server.start() {
        error!("{}", e);
        return ExitCode::from(EXIT_RUNTIME_ERROR);
    }
    info!(
        "UART {} attached to {}; enter '\\n' for a newline, end input to quit",
        console.id(),
        server.rx_endpoint()
    );

    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        };
        if let Some(bytes) = translate_input(&line) {
            if let Err(e) = console.send_data(&bytes) {
                warn!("Failed to send to UART {}: {}", console.id(), e);
            }
        }
    }
    server.shutdown();
    ExitCode::from(EXIT_OK)
}

fn run_hub(hub: Hub, ports: &HubPorts, logs: &[PathBuf]) -> ExitCode {
    if ports.rx_ports.len() != ports.tx_ports.len() {
        error!(
            "{} rx ports but {} tx ports",
            ports.rx_ports.len(),
            ports.tx_ports.len()
        );
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }
    if !logs.is_empty() && logs.len() != ports.rx_ports.len() {
        error!("{} logs for {} emulators", logs.len(), ports.rx_ports.len());
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    let mut servers = Vec::new();
    for (idx, (rx, tx)) in ports.rx_ports.iter().zip(&ports.tx_ports).enumerate() {
        let endpoint = Endpoint {
            host: ports.host.clone(),
            rx_port: *rx,
            tx_port: *tx,
        };
        match endpoint.server(logs.get(idx).map(PathBuf::as_path)) {
            Ok(server) => {
                hub.add_server(server.clone());
                servers.push(server);
            }
            Err(e) => {
                error!("{}", e);
                hub.shutdown();
                return ExitCode::from(EXIT_RUNTIME_ERROR);
            }
        }
    }
    for server in &servers {
        if let Err(e) = server.start() {
            error!("{}", e);
            hub.shutdown();
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    }
    info!(
        "{:?} hub running with {} emulators; end input to stop",
        hub.medium(),
        hub.server_count()
    );

    // Blocks until stdin closes.
    let _ = io::copy(&mut io::stdin().lock(), &mut io::sink());
    info!("Forwarded {} frames", hub.forwarded());
    hub.shutdown();
    ExitCode::from(EXIT_OK)
}

fn run_interrupt(args: InterruptArgs) -> ExitCode {
    let server = match args.endpoint.server(None) {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    };
    if !server.wait_for_peers(1, Duration::from_secs(args.wait)) {
        error!(
            "No emulator subscribed to {} within {}s",
            server.local_addr(),
            args.wait
        );
        server.shutdown();
        return ExitCode::from(EXIT_RUNTIME_ERROR);
    }

    let trigger = InterruptTrigger::new(server.clone());
    let result = args
        .base_addr
        .map_or(Ok(()), |base| trigger.set_vector_base(base))
        .and_then(|_| {
            args.interrupt
                .map_or(Ok(()), |num| trigger.trigger(num, args.walk))
        });
    server.shutdown();
    match result {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}
