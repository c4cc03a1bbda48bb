//! Bench-testing node: the firmware core wired to a UDP transport and a
//! simulated hardware layer, so the configuration protocol and peer fan-out
//! can be exercised on a desk without a radio or an MCU.
//!
//! Each simulated node binds one UDP socket; a routing table in the config
//! file maps peer MAC addresses onto UDP endpoints. Analog input pins are
//! fed a slow deterministic triangle wave so a configured rule produces
//! traffic immediately.

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use midilink_node::{EngineSettings, Hal, Node, NodeError, Transport};
use midilink_protocol::mac::MacAddr;
use midilink_protocol::pinconfig::{PinConfig, PinMode};

#[derive(Parser, Debug)]
#[command(name = "midilink-sim", about = "MIDIlink simulator node")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/node.toml")]
    config: PathBuf,
}

#[derive(Debug, Deserialize)]
struct SimConfig {
    pub node: NodeSection,
    pub network: NetworkSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub pins: Vec<PinConfig>,
}

#[derive(Debug, Deserialize)]
struct NodeSection {
    pub name: String,
    /// Simulated hardware address of this node.
    pub mac: MacAddr,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct NetworkSection {
    pub bind: SocketAddr,
    /// MAC-to-endpoint routing table standing in for the radio's reach.
    #[serde(default)]
    pub peers: Vec<PeerRoute>,
    /// Register every routed peer in the directory at startup.
    #[serde(default = "default_true")]
    pub auto_add_peers: bool,
}

#[derive(Debug, Deserialize)]
struct PeerRoute {
    pub mac: MacAddr,
    pub addr: SocketAddr,
}

#[derive(Debug, Deserialize)]
struct EngineSection {
    #[serde(default = "default_send_interval")]
    pub min_send_interval_ms: u32,
    #[serde(default)]
    pub debounce_ms: u32,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            min_send_interval_ms: default_send_interval(),
            debounce_ms: 0,
        }
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_true() -> bool {
    true
}

fn default_send_interval() -> u32 {
    10
}

/// Create the node's UDP socket, reusable across quick restarts.
fn create_socket(bind: SocketAddr) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&bind.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// UDP stand-in for the wireless link: unicast datagrams routed by the
/// MAC-to-endpoint table.
struct UdpTransport {
    socket: UdpSocket,
    mac: MacAddr,
    routes: HashMap<MacAddr, SocketAddr>,
}

impl UdpTransport {
    fn new(socket: UdpSocket, mac: MacAddr, routes: HashMap<MacAddr, SocketAddr>) -> Self {
        Self { socket, mac, routes }
    }
}

impl Transport for UdpTransport {
    fn initialize(&mut self) -> anyhow::Result<()> {
        info!(mac = %self.mac, local = %self.socket.local_addr()?, "UDP transport up");
        Ok(())
    }

    fn local_mac(&self) -> MacAddr {
        self.mac
    }

    fn add_peer(&mut self, mac: &MacAddr) -> anyhow::Result<()> {
        anyhow::ensure!(self.routes.contains_key(mac), "no route for peer {mac}");
        Ok(())
    }

    fn remove_peer(&mut self, _mac: &MacAddr) -> anyhow::Result<()> {
        Ok(())
    }

    fn send(&mut self, mac: &MacAddr, data: &[u8]) -> anyhow::Result<()> {
        let addr = self
            .routes
            .get(mac)
            .with_context(|| format!("no route for peer {mac}"))?;
        self.socket.send_to(data, addr)?;
        Ok(())
    }
}

/// Simulated hardware. Analog pins carry a slow triangle wave (phase-shifted
/// per pin), digital and touch pins rest idle; writes are logged.
struct SimHal {
    start: Instant,
}

impl SimHal {
    fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Hal for SimHal {
    fn set_pin_mode(&mut self, pin: u8, mode: PinMode) {
        info!(pin, ?mode, "pin mode set");
    }

    fn digital_read(&mut self, _pin: u8) -> bool {
        false
    }

    fn digital_write(&mut self, pin: u8, high: bool) {
        info!(pin, high, "digital write");
    }

    fn analog_read(&mut self, pin: u8) -> u16 {
        let t = self.millis().wrapping_add(pin as u32 * 512);
        // 8192 ms period triangle over the full ADC range
        let phase = t % 8192;
        let ramp = if phase < 4096 { phase } else { 8191 - phase };
        ramp as u16
    }

    fn analog_write(&mut self, pin: u8, duty: u8) {
        info!(pin, duty, "pwm write");
    }

    fn touch_read(&mut self, pin: u8) -> u16 {
        self.touch_max() - (pin as u16 % 4)
    }

    fn millis(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config_str = std::fs::read_to_string(&args.config)
        .with_context(|| format!("reading config file {:?}", args.config))?;
    let config: SimConfig = toml::from_str(&config_str).context("parsing config")?;

    info!(
        name = %config.node.name,
        mac = %config.node.mac,
        bind = %config.network.bind,
        "simulator node starting"
    );

    let socket = create_socket(config.network.bind)?;
    let recv_socket = socket.try_clone()?;

    let routes: HashMap<MacAddr, SocketAddr> = config
        .network
        .peers
        .iter()
        .map(|p| (p.mac, p.addr))
        .collect();
    let endpoints: HashMap<SocketAddr, MacAddr> =
        routes.iter().map(|(mac, addr)| (*addr, *mac)).collect();

    let transport = UdpTransport::new(socket, config.node.mac, routes);
    let store = midilink_node::FileStore::new(&config.node.storage_dir);
    let settings = EngineSettings {
        min_send_interval_ms: config.engine.min_send_interval_ms,
        debounce_ms: config.engine.debounce_ms,
        ..EngineSettings::default()
    };

    let mut node = Node::with_settings(transport, store, SimHal::new(), settings);
    node.begin()?;

    for cfg in &config.pins {
        node.set_pin_config(*cfg)?;
        info!(pin = cfg.pin, mode = ?cfg.mode, "pin configured from file");
    }

    if config.network.auto_add_peers {
        for route in &config.network.peers {
            match node.add_peer(route.mac) {
                Ok(()) => info!(peer = %route.mac, "peer registered"),
                Err(NodeError::PeerExists) => {}
                Err(e) => warn!(peer = %route.mac, error = %e, "peer registration failed"),
            }
        }
    }

    let mut buf = [0u8; 512];
    loop {
        loop {
            match recv_socket.recv_from(&mut buf) {
                Ok((len, src)) => {
                    let Some(mac) = endpoints.get(&src).copied() else {
                        debug!(src = %src, "datagram from unrouted endpoint dropped");
                        continue;
                    };
                    if let Err(e) = node.handle_packet(&mac, &buf[..len]) {
                        warn!(src = %mac, error = %e, "inbound dispatch failed");
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "socket receive failed");
                    break;
                }
            }
        }

        match node.tick() {
            Ok(()) | Err(NodeError::NoPeers) => {}
            Err(e) => warn!(error = %e, "tick failed"),
        }

        std::thread::sleep(Duration::from_millis(1));
    }
}
