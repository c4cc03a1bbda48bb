//! Framing for the SysEx configuration protocol.
//!
//! Frame layout: `0xF0, 0x7D, major, minor, command, payload..., 0xF7`.
//! Every frame is independently validated and dispatched — no session state.
//! All body bytes stay below 0x80 so frames survive a MIDI SysEx carrier.

use crate::mac::MacAddr;
use crate::pinconfig::PinConfig;
use crate::{PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR};

pub const START_BYTE: u8 = 0xF0;
pub const END_BYTE: u8 = 0xF7;
/// MIDI "educational use" manufacturer id.
pub const MANUFACTURER_ID: u8 = 0x7D;
/// START + MANUFACTURER + MAJOR + MINOR + COMMAND.
pub const HEADER_SIZE: usize = 5;
/// Header plus the end marker.
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + 1;
/// Response command codes set bit 6 of the request code.
pub const RESPONSE_FLAG: u8 = 0x40;

// -- Commands --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    SetPinConfig = 0x01,
    GetPinConfig = 0x02,
    ClearPinConfigs = 0x03,
    GetAllPinConfigs = 0x04,
    DeletePinConfig = 0x05,
    GetMac = 0x06,
    AddPeer = 0x07,
    GetPeers = 0x08,
    Reset = 0x09,
    GetVersion = 0x0A,
}

impl Command {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::SetPinConfig),
            0x02 => Some(Self::GetPinConfig),
            0x03 => Some(Self::ClearPinConfigs),
            0x04 => Some(Self::GetAllPinConfigs),
            0x05 => Some(Self::DeletePinConfig),
            0x06 => Some(Self::GetMac),
            0x07 => Some(Self::AddPeer),
            0x08 => Some(Self::GetPeers),
            0x09 => Some(Self::Reset),
            0x0A => Some(Self::GetVersion),
            _ => None,
        }
    }

    pub fn response_code(&self) -> u8 {
        (*self as u8) | RESPONSE_FLAG
    }
}

/// A request decoded from a valid, version-compatible frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    SetPinConfig(PinConfig),
    GetPinConfig(u8),
    ClearPinConfigs,
    GetAllPinConfigs,
    DeletePinConfig(u8),
    GetMac,
    AddPeer(MacAddr),
    GetPeers,
    Reset,
    GetVersion,
}

// -- Frame parsing --

/// A validated frame borrowed from an incoming buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub major: u8,
    pub minor: u8,
    pub command: u8,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Validate markers and minimum length. Returns None for anything that
    /// is not a well-formed frame; the side channel is lossy and invalid
    /// frames are dropped without an error response.
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < MIN_FRAME_SIZE {
            return None;
        }
        if data[0] != START_BYTE
            || data[1] != MANUFACTURER_ID
            || data[data.len() - 1] != END_BYTE
        {
            return None;
        }
        Some(Self {
            major: data[2],
            minor: data[3],
            command: data[4],
            payload: &data[HEADER_SIZE..data.len() - 1],
        })
    }

    /// The protocol is additive within a major version: only a major
    /// mismatch makes a frame incompatible.
    pub fn is_version_compatible(&self) -> bool {
        self.major == PROTOCOL_VERSION_MAJOR
    }

    /// Decode the command and its payload into a typed request. Returns
    /// None for unknown commands and undecodable payloads.
    pub fn request(&self) -> Option<ControlRequest> {
        match Command::from_u8(self.command)? {
            Command::SetPinConfig => {
                PinConfig::decode_wire(self.payload).map(ControlRequest::SetPinConfig)
            }
            Command::GetPinConfig => {
                self.payload.first().copied().map(ControlRequest::GetPinConfig)
            }
            Command::ClearPinConfigs => Some(ControlRequest::ClearPinConfigs),
            Command::GetAllPinConfigs => Some(ControlRequest::GetAllPinConfigs),
            Command::DeletePinConfig => {
                self.payload.first().copied().map(ControlRequest::DeletePinConfig)
            }
            Command::GetMac => Some(ControlRequest::GetMac),
            Command::AddPeer => MacAddr::from_nibbles(self.payload).map(ControlRequest::AddPeer),
            Command::GetPeers => Some(ControlRequest::GetPeers),
            Command::Reset => Some(ControlRequest::Reset),
            Command::GetVersion => Some(ControlRequest::GetVersion),
        }
    }
}

// -- Frame encoding --

fn frame(command: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MIN_FRAME_SIZE + payload.len());
    buf.push(START_BYTE);
    buf.push(MANUFACTURER_ID);
    buf.push(PROTOCOL_VERSION_MAJOR);
    buf.push(PROTOCOL_VERSION_MINOR);
    buf.push(command);
    buf.extend_from_slice(payload);
    buf.push(END_BYTE);
    buf
}

/// Encode a request frame with an arbitrary payload (host side of the
/// protocol; the tests drive the node with these).
pub fn encode_request(command: Command, payload: &[u8]) -> Vec<u8> {
    frame(command as u8, payload)
}

pub fn encode_simple_response(command: Command) -> Vec<u8> {
    frame(command.response_code(), &[])
}

/// Delete acknowledgment echoes the pin under the request code, matching
/// deployed counterparts (only query replies carry the response flag).
pub fn encode_delete_response(pin: u8) -> Vec<u8> {
    frame(Command::DeletePinConfig as u8, &[pin])
}

pub fn encode_version_response() -> Vec<u8> {
    frame(
        Command::GetVersion.response_code(),
        &[PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR],
    )
}

pub fn encode_pin_config_response(cfg: &PinConfig) -> Vec<u8> {
    frame(Command::GetPinConfig.response_code(), &cfg.encode_wire())
}

/// Each config goes out as its own GetPinConfig response frame, the shape
/// existing hosts expect when iterating a full dump.
pub fn encode_all_pin_configs_response(configs: &[PinConfig]) -> Vec<Vec<u8>> {
    configs.iter().map(encode_pin_config_response).collect()
}

/// MAC reply rides under the request code (no response flag), bit-exact
/// with deployed counterparts. The address is nibble-expanded to stay
/// 7-bit-safe.
pub fn encode_mac_response(mac: &MacAddr) -> Vec<u8> {
    frame(Command::GetMac as u8, &mac.to_nibbles())
}

/// Count byte followed by 12 nibble bytes per peer.
pub fn encode_peers_response(peers: &[MacAddr]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + peers.len() * 12);
    payload.push(peers.len() as u8);
    for peer in peers {
        payload.extend_from_slice(&peer.to_nibbles());
    }
    frame(Command::GetPeers.response_code(), &payload)
}

/// Decode a peers response payload (host side).
pub fn decode_peers_payload(payload: &[u8]) -> Option<Vec<MacAddr>> {
    let (&count, rest) = payload.split_first()?;
    let mut peers = Vec::with_capacity(count as usize);
    for chunk in rest.chunks_exact(12).take(count as usize) {
        peers.push(MacAddr::from_nibbles(chunk)?);
    }
    if peers.len() != count as usize {
        return None;
    }
    Some(peers)
}
