//! Node façade: owns the collaborators, the peer directory and the pin
//! engine, and exposes the public operations the embedding application
//! drives from its polling loop.

use midilink_protocol::mac::MacAddr;
use midilink_protocol::message::{MidiMessage, Received};
use midilink_protocol::pinconfig::{self, PinConfig};
use midilink_protocol::sysex::{self, ControlRequest, Frame};
use midilink_protocol::{
    PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR, PROTOCOL_VERSION_PATCH,
};
use tracing::{debug, info, warn};

use crate::engine::{EngineSettings, PinEngine};
use crate::error::NodeError;
use crate::hal::Hal;
use crate::peers::PeerDirectory;
use crate::store::Storage;
use crate::transport::{LocalMidi, Transport};

const STORE_NAMESPACE: &str = "midilink";
const PEERS_KEY: &str = "peers";
const PINS_KEY: &str = "pins";

/// Where a control reply goes: back to the wireless source, or out the
/// local MIDI port.
enum ReplyPath {
    Wireless(MacAddr),
    Local,
}

/// A wireless MIDI control-surface node.
///
/// Construct with the platform collaborators, call [`begin`](Self::begin)
/// once, then drive [`tick`](Self::tick) and the `handle_*` entry points
/// from a single loop. Mutating operations before `begin` succeeds return
/// [`NodeError::Uninitialized`].
pub struct Node<T: Transport, S: Storage, H: Hal> {
    transport: T,
    store: S,
    hal: H,
    local_midi: Option<Box<dyn LocalMidi>>,
    peers: PeerDirectory,
    engine: PinEngine,
    initialized: bool,
}

impl<T: Transport, S: Storage, H: Hal> Node<T, S, H> {
    pub fn new(transport: T, store: S, hal: H) -> Self {
        Self::with_settings(transport, store, hal, EngineSettings::default())
    }

    pub fn with_settings(transport: T, store: S, hal: H, settings: EngineSettings) -> Self {
        Self {
            transport,
            store,
            hal,
            local_midi: None,
            peers: PeerDirectory::new(),
            engine: PinEngine::new(settings),
            initialized: false,
        }
    }

    /// Attach a wired MIDI port mirroring the wireless path.
    pub fn set_local_midi(&mut self, port: Box<dyn LocalMidi>) {
        self.local_midi = Some(port);
    }

    // -- Lifecycle --

    /// Bring up the collaborators and load persisted state. A store or
    /// transport failure leaves the node uninitialized; every mutating
    /// operation thereafter rejects with [`NodeError::Uninitialized`].
    pub fn begin(&mut self) -> Result<(), NodeError> {
        self.store
            .open(STORE_NAMESPACE, false)
            .map_err(NodeError::Persistence)?;
        self.transport.initialize().map_err(NodeError::Transport)?;

        let loaded = PeerDirectory::decode(
            &self.store.get_bytes(PEERS_KEY).unwrap_or_default(),
        );
        self.peers.clear();
        for mac in loaded.iter() {
            match self.transport.add_peer(mac) {
                Ok(()) => {
                    // decode already enforced capacity and uniqueness
                    let _ = self.peers.add(*mac);
                }
                Err(e) => {
                    warn!(peer = %mac, error = %e, "dropping persisted peer, transport rejected it");
                }
            }
        }
        if self.peers.count() != loaded.count() {
            self.persist_peers()?;
        }

        let configs = pinconfig::decode_config_set(
            &self.store.get_bytes(PINS_KEY).unwrap_or_default(),
        );
        self.engine.load(&mut self.hal, configs);

        self.initialized = true;
        info!(
            mac = %self.transport.local_mac(),
            peers = self.peers.count(),
            pins = self.engine.len(),
            "node initialized"
        );
        Ok(())
    }

    fn ensure_init(&self) -> Result<(), NodeError> {
        if self.initialized {
            Ok(())
        } else {
            Err(NodeError::Uninitialized)
        }
    }

    /// One pass of the polling loop: sample inputs and broadcast whatever
    /// the engine emits.
    pub fn tick(&mut self) -> Result<(), NodeError> {
        self.ensure_init()?;
        let emitted = self.engine.poll(&mut self.hal);
        let mut result = Ok(());
        for msg in emitted {
            debug!(?msg, "engine emitted");
            if let Err(e) = self.broadcast(&msg.encode()) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    // -- Inbound dispatch --

    /// Feed a buffer received from the wireless transport. 3-byte buffers
    /// are channel/system messages driving the outputs; longer buffers go
    /// to the configuration codec, with replies sent back to `src`.
    pub fn handle_packet(&mut self, src: &MacAddr, data: &[u8]) -> Result<(), NodeError> {
        self.ensure_init()?;
        match Received::parse(data) {
            Some(Received::Message(msg)) => {
                debug!(src = %src, ?msg, "wireless message");
                self.engine.drive_outputs(&mut self.hal, &msg);
                Ok(())
            }
            Some(Received::SysEx(frame)) => {
                self.handle_sysex(frame, ReplyPath::Wireless(*src))
            }
            None => {
                warn!(src = %src, len = data.len(), "dropping undecodable packet");
                Ok(())
            }
        }
    }

    /// Feed bytes received on the wired MIDI port. SysEx frames are routed
    /// into the configuration codec identically to wireless ones, with
    /// replies going out the local port.
    pub fn handle_local_midi(&mut self, data: &[u8]) -> Result<(), NodeError> {
        self.ensure_init()?;
        match Received::parse(data) {
            Some(Received::Message(msg)) => {
                debug!(?msg, "local message");
                self.engine.drive_outputs(&mut self.hal, &msg);
                Ok(())
            }
            Some(Received::SysEx(frame)) => self.handle_sysex(frame, ReplyPath::Local),
            None => {
                warn!(len = data.len(), "dropping undecodable local buffer");
                Ok(())
            }
        }
    }

    /// Delivery report from the transport.
    pub fn handle_send_complete(&mut self, mac: &MacAddr, ok: bool) {
        if ok {
            debug!(peer = %mac, "delivery confirmed");
        } else {
            warn!(peer = %mac, "delivery failed");
        }
    }

    fn handle_sysex(&mut self, data: &[u8], reply: ReplyPath) -> Result<(), NodeError> {
        let Some(frame) = Frame::parse(data) else {
            warn!(len = data.len(), "dropping malformed control frame");
            return Ok(());
        };
        if !frame.is_version_compatible() {
            warn!(
                major = frame.major,
                minor = frame.minor,
                "dropping control frame from incompatible protocol version"
            );
            return Ok(());
        }
        let Some(request) = frame.request() else {
            warn!(command = frame.command, "dropping unknown control command");
            return Ok(());
        };

        match request {
            ControlRequest::SetPinConfig(cfg) => {
                info!(pin = cfg.pin, "pin config set remotely");
                self.set_pin_config(cfg)?;
            }
            ControlRequest::GetPinConfig(pin) => {
                if let Some(cfg) = self.engine.config(pin).copied() {
                    let buf = sysex::encode_pin_config_response(&cfg);
                    self.send_reply(&reply, &buf)?;
                }
            }
            ControlRequest::ClearPinConfigs => {
                info!("pin configs cleared remotely");
                self.clear_pin_configs()?;
            }
            ControlRequest::GetAllPinConfigs => {
                let frames = sysex::encode_all_pin_configs_response(&self.engine.configs());
                for buf in frames {
                    self.send_reply(&reply, &buf)?;
                }
            }
            ControlRequest::DeletePinConfig(pin) => {
                info!(pin, "pin config deleted remotely");
                let _ = self.delete_pin_config(pin);
                let buf = sysex::encode_delete_response(pin);
                self.send_reply(&reply, &buf)?;
            }
            ControlRequest::GetMac => {
                let buf = sysex::encode_mac_response(&self.transport.local_mac());
                self.send_reply(&reply, &buf)?;
            }
            ControlRequest::AddPeer(mac) => {
                info!(peer = %mac, "peer added remotely");
                match self.add_peer(mac) {
                    Ok(()) | Err(NodeError::PeerExists) => {}
                    Err(e) => return Err(e),
                }
            }
            ControlRequest::GetPeers => {
                let peers: Vec<MacAddr> = self.peers.iter().copied().collect();
                let buf = sysex::encode_peers_response(&peers);
                self.send_reply(&reply, &buf)?;
            }
            ControlRequest::Reset => {
                info!("factory reset requested remotely");
                self.factory_reset()?;
            }
            ControlRequest::GetVersion => {
                let buf = sysex::encode_version_response();
                self.send_reply(&reply, &buf)?;
            }
        }
        Ok(())
    }

    fn send_reply(&mut self, reply: &ReplyPath, buf: &[u8]) -> Result<(), NodeError> {
        match reply {
            ReplyPath::Wireless(src) => self
                .transport
                .send(src, buf)
                .map_err(NodeError::Transport),
            ReplyPath::Local => match &mut self.local_midi {
                Some(port) => port.send(buf).map_err(NodeError::Transport),
                None => Ok(()),
            },
        }
    }

    // -- Outbound sending --

    /// One transport send per directory entry plus a local mirror. The
    /// wireless and local paths fail independently; the aggregate result
    /// reports the wireless failure by preference.
    fn broadcast(&mut self, data: &[u8]) -> Result<(), NodeError> {
        let mut wireless: Result<(), NodeError> = if self.peers.is_empty() {
            Err(NodeError::NoPeers)
        } else {
            Ok(())
        };
        let peers: Vec<MacAddr> = self.peers.iter().copied().collect();
        for peer in &peers {
            if let Err(e) = self.transport.send(peer, data) {
                warn!(peer = %peer, error = %e, "wireless send failed");
                if wireless.is_ok() {
                    wireless = Err(NodeError::Transport(e));
                }
            }
        }

        let mut local: Result<(), NodeError> = Ok(());
        if let Some(port) = &mut self.local_midi {
            if let Err(e) = port.send(data) {
                warn!(error = %e, "local send failed");
                local = Err(NodeError::Transport(e));
            }
        }

        match wireless {
            Err(e) => Err(e),
            Ok(()) => local,
        }
    }

    pub fn send_message(&mut self, msg: &MidiMessage) -> Result<(), NodeError> {
        self.ensure_init()?;
        self.broadcast(&msg.encode())
    }

    pub fn send_note_on(&mut self, channel: u8, note: u8, velocity: u8) -> Result<(), NodeError> {
        self.send_message(&MidiMessage::note_on(channel, note, velocity))
    }

    pub fn send_note_off(&mut self, channel: u8, note: u8, velocity: u8) -> Result<(), NodeError> {
        self.send_message(&MidiMessage::note_off(channel, note, velocity))
    }

    pub fn send_control_change(
        &mut self,
        channel: u8,
        control: u8,
        value: u8,
    ) -> Result<(), NodeError> {
        self.send_message(&MidiMessage::control_change(channel, control, value))
    }

    pub fn send_program_change(&mut self, channel: u8, program: u8) -> Result<(), NodeError> {
        self.send_message(&MidiMessage::program_change(channel, program))
    }

    pub fn send_aftertouch(&mut self, channel: u8, pressure: u8) -> Result<(), NodeError> {
        self.send_message(&MidiMessage::aftertouch(channel, pressure))
    }

    pub fn send_poly_aftertouch(
        &mut self,
        channel: u8,
        note: u8,
        pressure: u8,
    ) -> Result<(), NodeError> {
        self.send_message(&MidiMessage::poly_aftertouch(channel, note, pressure))
    }

    pub fn send_pitch_bend(&mut self, channel: u8, value: i16) -> Result<(), NodeError> {
        self.send_message(&MidiMessage::pitch_bend(channel, value))
    }

    pub fn send_sysex(&mut self, data: &[u8]) -> Result<(), NodeError> {
        self.ensure_init()?;
        self.broadcast(data)
    }

    // -- Peer management --

    /// Full add path: directory append, persist, then mirror into the
    /// transport. A mirror failure rolls the directory back so it never
    /// diverges from the transport's peer table.
    pub fn add_peer(&mut self, mac: MacAddr) -> Result<(), NodeError> {
        self.ensure_init()?;
        self.peers.add(mac)?;
        let persisted = self.persist_peers();
        if let Err(e) = self.transport.add_peer(&mac) {
            self.peers.remove(&mac);
            let _ = self.persist_peers();
            return Err(NodeError::Transport(e));
        }
        info!(peer = %mac, count = self.peers.count(), "peer added");
        persisted
    }

    /// Parse-then-add, for web-interface style MAC strings.
    pub fn add_peer_str(&mut self, mac: &str) -> Result<(), NodeError> {
        let mac: MacAddr = mac.parse().map_err(|_| NodeError::InvalidMac)?;
        self.add_peer(mac)
    }

    pub fn remove_peer(&mut self, mac: &MacAddr) -> Result<(), NodeError> {
        self.ensure_init()?;
        if !self.peers.remove(mac) {
            return Err(NodeError::NotFound);
        }
        if let Err(e) = self.transport.remove_peer(mac) {
            warn!(peer = %mac, error = %e, "transport peer removal failed");
        }
        info!(peer = %mac, count = self.peers.count(), "peer removed");
        self.persist_peers()
    }

    pub fn remove_peer_at(&mut self, index: usize) -> Result<(), NodeError> {
        self.ensure_init()?;
        let mac = self.peers.remove_at(index).ok_or(NodeError::NotFound)?;
        if let Err(e) = self.transport.remove_peer(&mac) {
            warn!(peer = %mac, error = %e, "transport peer removal failed");
        }
        self.persist_peers()
    }

    pub fn clear_peers(&mut self) -> Result<(), NodeError> {
        self.ensure_init()?;
        let peers: Vec<MacAddr> = self.peers.iter().copied().collect();
        for mac in &peers {
            if let Err(e) = self.transport.remove_peer(mac) {
                warn!(peer = %mac, error = %e, "transport peer removal failed");
            }
        }
        self.peers.clear();
        self.persist_peers()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.count()
    }

    pub fn peers(&self) -> impl Iterator<Item = &MacAddr> {
        self.peers.iter()
    }

    /// Best-effort: the in-memory mutation stands even when the store
    /// write fails, the caller just learns about it.
    fn persist_peers(&mut self) -> Result<(), NodeError> {
        let blob = self.peers.encode();
        let result = self
            .store
            .put_bytes(PEERS_KEY, &blob)
            .and_then(|()| self.store.commit());
        if let Err(e) = result {
            warn!(error = %e, "peer persistence failed, in-memory state kept");
            return Err(NodeError::Persistence(e));
        }
        Ok(())
    }

    // -- Pin management --

    pub fn set_pin_config(&mut self, config: PinConfig) -> Result<(), NodeError> {
        self.ensure_init()?;
        self.engine.upsert(&mut self.hal, config);
        self.persist_pins()
    }

    pub fn pin_config(&self, pin: u8) -> Option<&PinConfig> {
        self.engine.config(pin)
    }

    pub fn delete_pin_config(&mut self, pin: u8) -> Result<(), NodeError> {
        self.ensure_init()?;
        if !self.engine.remove(pin) {
            return Err(NodeError::NotFound);
        }
        self.persist_pins()
    }

    pub fn clear_pin_configs(&mut self) -> Result<(), NodeError> {
        self.ensure_init()?;
        self.engine.clear();
        self.persist_pins()
    }

    pub fn pin_configs(&self) -> Vec<PinConfig> {
        self.engine.configs()
    }

    fn persist_pins(&mut self) -> Result<(), NodeError> {
        let blob = pinconfig::encode_config_set(&self.engine.configs());
        let result = self
            .store
            .put_bytes(PINS_KEY, &blob)
            .and_then(|()| self.store.commit());
        if let Err(e) = result {
            warn!(error = %e, "pin config persistence failed, in-memory state kept");
            return Err(NodeError::Persistence(e));
        }
        Ok(())
    }

    // -- Identity and reset --

    /// Wipe pin configs and peers, in memory and in the store.
    pub fn factory_reset(&mut self) -> Result<(), NodeError> {
        self.ensure_init()?;
        let peers: Vec<MacAddr> = self.peers.iter().copied().collect();
        for mac in &peers {
            if let Err(e) = self.transport.remove_peer(mac) {
                warn!(peer = %mac, error = %e, "transport peer removal failed");
            }
        }
        self.peers.clear();
        self.engine.clear();
        let result = self.store.clear().and_then(|()| self.store.commit());
        if let Err(e) = result {
            warn!(error = %e, "factory reset persistence failed");
            return Err(NodeError::Persistence(e));
        }
        info!("factory reset complete");
        Ok(())
    }

    pub fn mac(&self) -> MacAddr {
        self.transport.local_mac()
    }

    pub fn version(&self) -> (u8, u8, u8) {
        (
            PROTOCOL_VERSION_MAJOR,
            PROTOCOL_VERSION_MINOR,
            PROTOCOL_VERSION_PATCH,
        )
    }
}
