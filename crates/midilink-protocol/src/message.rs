use serde::{Deserialize, Serialize};

/// Fixed size of a channel/system message on the wireless link. Anything
/// longer received from a peer is a SysEx payload.
pub const WIRE_SIZE: usize = 3;

/// Signed pitch-bend range accepted by the send path.
pub const PITCH_BEND_MIN: i16 = -8192;
pub const PITCH_BEND_MAX: i16 = 8191;
/// Bias between the signed user range and the unsigned 14-bit wire range.
pub const PITCH_BEND_CENTER: i32 = 8192;

// -- MIDI status bytes --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MidiStatus {
    NoteOff = 0x80,
    NoteOn = 0x90,
    PolyAftertouch = 0xA0,
    ControlChange = 0xB0,
    ProgramChange = 0xC0,
    Aftertouch = 0xD0,
    PitchBend = 0xE0,
    SongPosition = 0xF2,
    SongSelect = 0xF3,
    Clock = 0xF8,
    Start = 0xFA,
    Continue = 0xFB,
    Stop = 0xFC,
}

impl MidiStatus {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x80 => Some(Self::NoteOff),
            0x90 => Some(Self::NoteOn),
            0xA0 => Some(Self::PolyAftertouch),
            0xB0 => Some(Self::ControlChange),
            0xC0 => Some(Self::ProgramChange),
            0xD0 => Some(Self::Aftertouch),
            0xE0 => Some(Self::PitchBend),
            0xF2 => Some(Self::SongPosition),
            0xF3 => Some(Self::SongSelect),
            0xF8 => Some(Self::Clock),
            0xFA => Some(Self::Start),
            0xFB => Some(Self::Continue),
            0xFC => Some(Self::Stop),
            _ => None,
        }
    }

    /// System statuses carry no channel bits in the status byte.
    pub fn is_system(&self) -> bool {
        (*self as u8) >= 0xF0
    }

    /// Number of data bytes that carry meaning for this status.
    pub fn data_len(&self) -> usize {
        match self {
            Self::ProgramChange | Self::Aftertouch | Self::SongSelect => 1,
            Self::Clock | Self::Start | Self::Continue | Self::Stop => 0,
            _ => 2,
        }
    }

    /// Halved status byte used by the pin-config wire record. All relevant
    /// status bytes are even, so the halved form stays below 0x80 and is
    /// safe inside a SysEx body. Kept bit-exact for compatibility with
    /// deployed counterparts.
    pub fn to_wire_half(&self) -> u8 {
        (*self as u8) / 2
    }

    pub fn from_wire_half(v: u8) -> Option<Self> {
        Self::from_u8(v.wrapping_mul(2))
    }
}

// -- Channel/system message --

/// In-memory MIDI event. Constructed per event and immediately consumed;
/// never retained. `channel` is user-facing 1..=16 (ignored for system
/// statuses), `data2` is meaningless for single- and zero-data statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiMessage {
    pub channel: u8,
    pub status: MidiStatus,
    pub data1: u8,
    pub data2: u8,
}

impl MidiMessage {
    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self { channel, status: MidiStatus::NoteOn, data1: note, data2: velocity }
    }

    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        Self { channel, status: MidiStatus::NoteOff, data1: note, data2: velocity }
    }

    pub fn control_change(channel: u8, control: u8, value: u8) -> Self {
        Self { channel, status: MidiStatus::ControlChange, data1: control, data2: value }
    }

    pub fn program_change(channel: u8, program: u8) -> Self {
        Self { channel, status: MidiStatus::ProgramChange, data1: program, data2: 0 }
    }

    pub fn aftertouch(channel: u8, pressure: u8) -> Self {
        Self { channel, status: MidiStatus::Aftertouch, data1: pressure, data2: 0 }
    }

    pub fn poly_aftertouch(channel: u8, note: u8, pressure: u8) -> Self {
        Self { channel, status: MidiStatus::PolyAftertouch, data1: note, data2: pressure }
    }

    /// Signed pitch bend. Input is clamped to [-8192, 8191] before biasing
    /// onto the unsigned wire range, so the clamp is idempotent.
    pub fn pitch_bend(channel: u8, value: i16) -> Self {
        let clamped = value.clamp(PITCH_BEND_MIN, PITCH_BEND_MAX);
        let raw = (clamped as i32 + PITCH_BEND_CENTER) as u16;
        Self::pitch_bend_raw(channel, raw)
    }

    /// Unsigned 14-bit pitch bend, split little-endian across the data bytes.
    pub fn pitch_bend_raw(channel: u8, raw: u16) -> Self {
        let raw = raw & 0x3FFF;
        Self {
            channel,
            status: MidiStatus::PitchBend,
            data1: (raw & 0x7F) as u8,
            data2: ((raw >> 7) & 0x7F) as u8,
        }
    }

    pub fn start() -> Self {
        Self { channel: 0, status: MidiStatus::Start, data1: 0, data2: 0 }
    }

    pub fn stop() -> Self {
        Self { channel: 0, status: MidiStatus::Stop, data1: 0, data2: 0 }
    }

    pub fn continue_() -> Self {
        Self { channel: 0, status: MidiStatus::Continue, data1: 0, data2: 0 }
    }

    pub fn clock() -> Self {
        Self { channel: 0, status: MidiStatus::Clock, data1: 0, data2: 0 }
    }

    pub fn song_position(value: u16) -> Self {
        let value = value & 0x3FFF;
        Self {
            channel: 0,
            status: MidiStatus::SongPosition,
            data1: (value & 0x7F) as u8,
            data2: ((value >> 7) & 0x7F) as u8,
        }
    }

    pub fn song_select(value: u8) -> Self {
        Self { channel: 0, status: MidiStatus::SongSelect, data1: value & 0x7F, data2: 0 }
    }

    /// Recombine the 14-bit data bytes and remove the center bias.
    pub fn pitch_bend_value(&self) -> i16 {
        let raw = ((self.data2 as i32) << 7) | self.data1 as i32;
        (raw - PITCH_BEND_CENTER) as i16
    }

    /// Recombine the 14-bit data bytes (song position, raw pitch bend).
    pub fn fourteen_bit_value(&self) -> u16 {
        (((self.data2 as u16) << 7) | self.data1 as u16) & 0x3FFF
    }

    /// Encode to the 3-byte wire form. Out-of-range fields are masked to
    /// their bit width rather than rejected; range discipline is on the
    /// caller and the mask keeps the hot path branch-light.
    pub fn encode(&self) -> [u8; WIRE_SIZE] {
        let status_byte = if self.status.is_system() {
            self.status as u8
        } else {
            (self.status as u8) | (self.channel.wrapping_sub(1) & 0x0F)
        };
        [status_byte, self.data1 & 0x7F, self.data2 & 0x7F]
    }

    /// Decode a 3-byte wire buffer. Returns None for short buffers and
    /// unrecognized status bytes.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < WIRE_SIZE {
            return None;
        }
        let status_byte = data[0];
        let (status, channel) = if status_byte >= 0xF0 {
            (MidiStatus::from_u8(status_byte)?, 0)
        } else {
            (
                MidiStatus::from_u8(status_byte & 0xF0)?,
                (status_byte & 0x0F) + 1,
            )
        };
        Some(Self { channel, status, data1: data[1], data2: data[2] })
    }
}

// -- Receive-path disambiguation --

/// A buffer received from a peer: exactly [`WIRE_SIZE`] bytes is a
/// channel/system message, anything longer is a SysEx payload.
#[derive(Debug, PartialEq, Eq)]
pub enum Received<'a> {
    Message(MidiMessage),
    SysEx(&'a [u8]),
}

impl<'a> Received<'a> {
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() > WIRE_SIZE {
            return Some(Received::SysEx(data));
        }
        MidiMessage::decode(data).map(Received::Message)
    }
}
