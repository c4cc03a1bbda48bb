use serde::{Deserialize, Serialize};

use crate::message::MidiStatus;

/// Hardware role of a managed pin. The wire values are stable protocol
/// bytes: 0x03/0x04 match the analog magic numbers of existing deployments,
/// the rest replace platform-dependent pin-mode constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PinMode {
    DigitalIn = 0x00,
    DigitalOut = 0x01,
    DigitalInPullup = 0x02,
    AnalogIn = 0x03,
    AnalogOut = 0x04,
    TouchIn = 0x05,
}

impl PinMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Self::DigitalIn),
            0x01 => Some(Self::DigitalOut),
            0x02 => Some(Self::DigitalInPullup),
            0x03 => Some(Self::AnalogIn),
            0x04 => Some(Self::AnalogOut),
            0x05 => Some(Self::TouchIn),
            _ => None,
        }
    }

    /// Input modes are sampled by the polling loop.
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            Self::DigitalIn | Self::DigitalInPullup | Self::AnalogIn | Self::TouchIn
        )
    }

    /// Output modes are driven by inbound MIDI, never polled.
    pub fn is_output(&self) -> bool {
        matches!(self, Self::DigitalOut | Self::AnalogOut)
    }
}

/// One pin translation rule: maps a hardware pin to a MIDI event type,
/// selector and value range. Pin identity is the dedup key — the engine
/// never holds two configs for one pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinConfig {
    pub pin: u8,
    pub mode: PinMode,
    /// AnalogIn: minimum mapped delta between emissions (0 = any change).
    /// TouchIn: 0 selects continuous mode, >0 is the binary touch threshold.
    #[serde(default)]
    pub threshold: u8,
    #[serde(default = "default_channel")]
    pub midi_channel: u8,
    #[serde(default = "default_midi_type")]
    pub midi_type: MidiStatus,
    #[serde(default)]
    pub cc_number: u8,
    #[serde(default)]
    pub note_number: u8,
    #[serde(default)]
    pub min_midi_value: u8,
    #[serde(default = "default_max_value")]
    pub max_midi_value: u8,
}

fn default_channel() -> u8 {
    1
}

fn default_midi_type() -> MidiStatus {
    MidiStatus::ControlChange
}

fn default_max_value() -> u8 {
    127
}

impl PinConfig {
    /// Fixed-width positional wire record:
    /// pin, mode, threshold, channel, midi_type/2, cc-or-note, min, max.
    pub const WIRE_LEN: usize = 8;

    pub fn new(pin: u8, mode: PinMode) -> Self {
        Self {
            pin,
            mode,
            threshold: 0,
            midi_channel: 1,
            midi_type: MidiStatus::ControlChange,
            cc_number: 0,
            note_number: 0,
            min_midi_value: 0,
            max_midi_value: 127,
        }
    }

    /// The data selector matched against inbound events: the CC number for
    /// ControlChange rules, the note number otherwise.
    pub fn selector(&self) -> u8 {
        if self.midi_type == MidiStatus::ControlChange {
            self.cc_number
        } else {
            self.note_number
        }
    }

    pub fn encode_wire(&self) -> [u8; Self::WIRE_LEN] {
        [
            self.pin,
            self.mode as u8,
            self.threshold,
            self.midi_channel,
            self.midi_type.to_wire_half(),
            self.selector(),
            self.min_midi_value,
            self.max_midi_value,
        ]
    }

    /// Decode a wire record. The selector byte lands in both `cc_number`
    /// and `note_number` — the wire form only carries one slot.
    pub fn decode_wire(data: &[u8]) -> Option<Self> {
        if data.len() < Self::WIRE_LEN {
            return None;
        }
        Some(Self {
            pin: data[0],
            mode: PinMode::from_u8(data[1])?,
            threshold: data[2],
            midi_channel: data[3],
            midi_type: MidiStatus::from_wire_half(data[4])?,
            cc_number: data[5],
            note_number: data[5],
            min_midi_value: data[6],
            max_midi_value: data[7],
        })
    }
}

// -- Persisted config set --
// Count-prefixed flat array of wire records, the layout the byte store sees.

pub fn encode_config_set(configs: &[PinConfig]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + configs.len() * PinConfig::WIRE_LEN);
    buf.push(configs.len() as u8);
    for cfg in configs {
        buf.extend_from_slice(&cfg.encode_wire());
    }
    buf
}

/// Decode a persisted config set. Tolerates a virgin store (empty buffer)
/// and truncated or unrecognizable trailing records — whatever parses is
/// kept, the rest is dropped.
pub fn decode_config_set(data: &[u8]) -> Vec<PinConfig> {
    let Some((&count, records)) = data.split_first() else {
        return Vec::new();
    };
    records
        .chunks_exact(PinConfig::WIRE_LEN)
        .take(count as usize)
        .filter_map(PinConfig::decode_wire)
        .collect()
}
