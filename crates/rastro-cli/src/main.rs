//! rastro - software-defined GT06 tracker gateway and server.
//!
//! `rastro client` impersonates a GT06 tracker against a fleet server
//! (optionally bridging server commands onto a serial port);
//! `rastro serve` accepts tracker connections and prints decoded
//! traffic.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rastro_bridge::{AnyLink, MockLink, SerialLink};
use rastro_core::{ClientConfig, EngineEvent, Error};
use rastro_gateway::Gateway;
use rastro_network::{Gt06Server, Gt06ServerConfig};

/// Exit codes: 0 success, 2 invalid configuration, 4 unrecoverable I/O.
const EXIT_CONFIG: u8 = 2;
const EXIT_IO: u8 = 4;

#[derive(Parser)]
#[command(name = "rastro")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tracker client (and optional serial bridge)
    Client {
        /// GT06 server host
        #[arg(long)]
        host: String,

        /// GT06 server port
        #[arg(short, long, default_value_t = 5023)]
        port: u16,

        /// Tracker IMEI (15 digits)
        #[arg(long)]
        imei: String,

        /// Heartbeat cadence in seconds
        #[arg(long, default_value_t = 30)]
        heartbeat: u64,

        /// Location cadence in seconds
        #[arg(long, default_value_t = 60)]
        location: u64,

        /// Base reconnect delay in seconds
        #[arg(long, default_value_t = 10)]
        reconnect: u64,

        /// Give up after this many failed reconnects (-1 = never)
        #[arg(long, default_value_t = -1)]
        max_attempts: i32,

        /// Serial port for the command bridge (e.g. /dev/ttyUSB0)
        #[arg(long)]
        serial_port: Option<String>,

        /// Serial baud rate
        #[arg(long, default_value_t = SerialLink::DEFAULT_BAUD)]
        baud: u32,
    },

    /// Run the GT06 server endpoint
    Serve {
        /// Listen address
        #[arg(short, long, default_value = "0.0.0.0:5023")]
        bind: String,

        /// Maximum simultaneous tracker connections
        #[arg(long, default_value_t = 64)]
        max_connections: usize,
    },

    /// List serial ports visible on this host
    Ports,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Client {
            host,
            port,
            imei,
            heartbeat,
            location,
            reconnect,
            max_attempts,
            serial_port,
            baud,
        } => {
            run_client(
                host,
                port,
                &imei,
                heartbeat,
                location,
                reconnect,
                max_attempts,
                serial_port,
                baud,
            )
            .await
        }
        Commands::Serve {
            bind,
            max_connections,
        } => run_server(&bind, max_connections).await,
        Commands::Ports => list_ports(),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_client(
    host: String,
    port: u16,
    imei: &str,
    heartbeat: u64,
    location: u64,
    reconnect: u64,
    max_attempts: i32,
    serial_port: Option<String>,
    baud: u32,
) -> ExitCode {
    let config = match ClientConfig::new(host, imei) {
        Ok(mut config) => {
            config.port = port;
            config.heartbeat_seconds = heartbeat;
            config.location_seconds = location;
            config.reconnect_seconds = reconnect;
            config.max_reconnect_attempts = max_attempts;
            config
        }
        Err(e) => {
            error!("invalid configuration: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    // With no serial port the bridge writes into a mock link; the
    // handle must stay alive or every command would be dropped.
    let mut _mock_keepalive = None;
    let link = match serial_port {
        Some(path) => {
            info!(%path, baud, "bridging commands to serial");
            AnyLink::from(SerialLink::new(path, baud))
        }
        None => {
            let (link, handle) = MockLink::pair();
            _mock_keepalive = Some(handle);
            AnyLink::from(link)
        }
    };

    let gateway = match Gateway::new(config, link) {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("invalid configuration: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let mut events = gateway.subscribe();
    gateway.client().connect();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                gateway.client().disconnect();
                return ExitCode::SUCCESS;
            }
            event = events.recv() => match event {
                Ok(EngineEvent::Error { message })
                    if message == rastro_network::client::RECONNECT_EXHAUSTED =>
                {
                    error!("giving up: {message}");
                    return ExitCode::from(EXIT_IO);
                }
                Ok(event) => info!(kind = event.label(), "{event:?}"),
                Err(_) => {
                    error!("engine stopped unexpectedly");
                    return ExitCode::from(EXIT_IO);
                }
            },
        }
    }
}

async fn run_server(bind: &str, max_connections: usize) -> ExitCode {
    let bind_addr: SocketAddr = match bind.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid bind address '{bind}': {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let config = Gt06ServerConfig {
        bind_addr,
        max_connections,
    };
    let mut server = match Gt06Server::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("bind failed: {e}");
            return ExitCode::from(EXIT_IO);
        }
    };

    let mut events = server.take_events().expect("events taken once");
    tokio::spawn(server.run());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return ExitCode::SUCCESS;
            }
            event = events.recv() => match event {
                Some(event) => info!("{event:?}"),
                None => {
                    error!("listener stopped");
                    return ExitCode::from(EXIT_IO);
                }
            },
        }
    }
}

fn list_ports() -> ExitCode {
    match SerialLink::available_ports() {
        Ok(ports) if ports.is_empty() => {
            println!("no serial ports found");
            ExitCode::SUCCESS
        }
        Ok(ports) => {
            for port in ports {
                println!("{port}");
            }
            ExitCode::SUCCESS
        }
        Err(Error::Bridge(message)) => {
            error!("{message}");
            ExitCode::from(EXIT_IO)
        }
        Err(e) => {
            error!("{e}");
            ExitCode::from(EXIT_IO)
        }
    }
}
