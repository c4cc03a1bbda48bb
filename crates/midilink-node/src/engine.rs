//! Pin translation engine: turns sampled hardware inputs into MIDI events
//! and drives hardware outputs from inbound MIDI. One state machine per
//! configured pin, advanced once per polling tick.

use midilink_protocol::message::{MidiMessage, MidiStatus};
use midilink_protocol::pinconfig::{PinConfig, PinMode};
use tracing::debug;

use crate::hal::Hal;

/// Tuning knobs shared by every rule. Defaults match the deployed firmware.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Minimum gap between two emissions from the same analog/touch pin.
    pub min_send_interval_ms: u32,
    /// Minimum gap between two accepted digital/touch transitions.
    /// 0 disables debouncing.
    pub debounce_ms: u32,
    /// EMA smoothing factor for analog and touch sampling.
    pub ema_alpha: f32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            min_send_interval_ms: 10,
            debounce_ms: 0,
            ema_alpha: 0.3,
        }
    }
}

/// Transient runtime state of one rule. Reset whenever the rule's config is
/// replaced.
#[derive(Debug, Clone, Copy, Default)]
struct PinState {
    /// Last emitted mapped value (or last digital level). None until the
    /// first emission.
    last_value: Option<i32>,
    last_change_ms: u32,
    last_send_ms: u32,
    smoothed: Option<f32>,
    touched: bool,
}

/// Config and state live in one record so they can never drift apart.
#[derive(Debug, Clone, Copy)]
struct PinRule {
    config: PinConfig,
    state: PinState,
}

/// All pin translation rules of a node. Linear scans throughout; the set is
/// bounded by the handful of pins a controller exposes.
#[derive(Debug, Default)]
pub struct PinEngine {
    rules: Vec<PinRule>,
    settings: EngineSettings,
}

impl PinEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            rules: Vec::new(),
            settings,
        }
    }

    // -- Rule management --

    /// Installs a rule, replacing any existing rule for the same pin and
    /// resetting its runtime state. Re-initializes the hardware mode either
    /// way.
    pub fn upsert<H: Hal>(&mut self, hal: &mut H, config: PinConfig) {
        hal.set_pin_mode(config.pin, config.mode);
        if let Some(rule) = self.rules.iter_mut().find(|r| r.config.pin == config.pin) {
            rule.config = config;
            rule.state = PinState::default();
        } else {
            self.rules.push(PinRule {
                config,
                state: PinState::default(),
            });
        }
    }

    /// Removes the rule for a pin. Returns whether one was present.
    pub fn remove(&mut self, pin: u8) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.config.pin != pin);
        self.rules.len() != before
    }

    pub fn clear(&mut self) {
        self.rules.clear();
    }

    pub fn config(&self, pin: u8) -> Option<&PinConfig> {
        self.rules
            .iter()
            .find(|r| r.config.pin == pin)
            .map(|r| &r.config)
    }

    pub fn configs(&self) -> Vec<PinConfig> {
        self.rules.iter().map(|r| r.config).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Installs a persisted rule set wholesale (startup path).
    pub fn load<H: Hal>(&mut self, hal: &mut H, configs: Vec<PinConfig>) {
        self.rules.clear();
        for config in configs {
            self.upsert(hal, config);
        }
    }

    // -- Input polling --

    /// Advances every input rule one tick and returns the emitted events.
    pub fn poll<H: Hal>(&mut self, hal: &mut H) -> Vec<MidiMessage> {
        let now = hal.millis();
        let mut out = Vec::new();
        let settings = self.settings;
        for rule in &mut self.rules {
            match rule.config.mode {
                PinMode::DigitalIn | PinMode::DigitalInPullup => {
                    poll_digital(rule, hal, now, &settings, &mut out);
                }
                PinMode::AnalogIn => {
                    let raw = hal.analog_read(rule.config.pin);
                    poll_analog(rule, raw, hal.analog_max(), now, &settings, &mut out);
                }
                PinMode::TouchIn => {
                    if rule.config.threshold == 0 {
                        poll_touch_continuous(rule, hal, now, &settings, &mut out);
                    } else {
                        poll_touch_binary(rule, hal, now, &settings, &mut out);
                    }
                }
                PinMode::DigitalOut | PinMode::AnalogOut => {}
            }
        }
        out
    }

    // -- Output driving --

    /// Routes an inbound event to every matching output rule.
    pub fn drive_outputs<H: Hal>(&mut self, hal: &mut H, msg: &MidiMessage) {
        match msg.status {
            MidiStatus::NoteOn => self.on_note_on(hal, msg.channel, msg.data1, msg.data2),
            MidiStatus::NoteOff => self.on_note_off(hal, msg.channel, msg.data1),
            MidiStatus::ControlChange => {
                self.on_control_change(hal, msg.channel, msg.data1, msg.data2)
            }
            MidiStatus::PitchBend => {
                self.on_pitch_bend(hal, msg.channel, msg.fourteen_bit_value())
            }
            _ => {}
        }
    }

    /// Every NoteOn rule on this channel and note is driven; velocity 0
    /// releases like a NoteOff.
    pub fn on_note_on<H: Hal>(&mut self, hal: &mut H, channel: u8, note: u8, velocity: u8) {
        for rule in self.rules.iter().filter(|r| {
            r.config.midi_type == MidiStatus::NoteOn
                && r.config.midi_channel == channel
                && r.config.note_number == note
        }) {
            match rule.config.mode {
                PinMode::DigitalOut => hal.digital_write(rule.config.pin, velocity > 0),
                PinMode::AnalogOut => {
                    let mapped = map_range(
                        velocity as i32,
                        0,
                        127,
                        rule.config.min_midi_value as i32,
                        rule.config.max_midi_value as i32,
                    );
                    hal.analog_write(rule.config.pin, map_range(mapped, 0, 127, 0, 255) as u8);
                }
                _ => {}
            }
        }
    }

    /// Releases both NoteOn and NoteOff rules for this note.
    pub fn on_note_off<H: Hal>(&mut self, hal: &mut H, channel: u8, note: u8) {
        for rule in self.rules.iter().filter(|r| {
            matches!(r.config.midi_type, MidiStatus::NoteOn | MidiStatus::NoteOff)
                && r.config.midi_channel == channel
                && r.config.note_number == note
        }) {
            match rule.config.mode {
                PinMode::DigitalOut => hal.digital_write(rule.config.pin, false),
                PinMode::AnalogOut => hal.analog_write(rule.config.pin, 0),
                _ => {}
            }
        }
    }

    pub fn on_control_change<H: Hal>(&mut self, hal: &mut H, channel: u8, control: u8, value: u8) {
        for rule in self.rules.iter().filter(|r| {
            r.config.midi_type == MidiStatus::ControlChange
                && r.config.midi_channel == channel
                && r.config.cc_number == control
        }) {
            match rule.config.mode {
                PinMode::DigitalOut => hal.digital_write(rule.config.pin, value >= 64),
                PinMode::AnalogOut => {
                    let mapped = map_range(
                        value as i32,
                        0,
                        127,
                        rule.config.min_midi_value as i32,
                        rule.config.max_midi_value as i32,
                    );
                    hal.analog_write(rule.config.pin, map_range(mapped, 0, 127, 0, 255) as u8);
                }
                _ => {}
            }
        }
    }

    /// `raw` is the unsigned 14-bit wire value.
    pub fn on_pitch_bend<H: Hal>(&mut self, hal: &mut H, channel: u8, raw: u16) {
        for rule in self.rules.iter().filter(|r| {
            r.config.midi_type == MidiStatus::PitchBend && r.config.midi_channel == channel
        }) {
            match rule.config.mode {
                PinMode::DigitalOut => hal.digital_write(rule.config.pin, raw >= 8192),
                PinMode::AnalogOut => {
                    hal.analog_write(rule.config.pin, map_range(raw as i32, 0, 16383, 0, 255) as u8)
                }
                _ => {}
            }
        }
    }
}

// -- Per-mode tick functions --

fn poll_digital<H: Hal>(
    rule: &mut PinRule,
    hal: &mut H,
    now: u32,
    settings: &EngineSettings,
    out: &mut Vec<MidiMessage>,
) {
    let level = hal.digital_read(rule.config.pin) as i32;
    if rule.state.last_value == Some(level) {
        return;
    }
    if rule.state.last_value.is_some()
        && settings.debounce_ms > 0
        && now.wrapping_sub(rule.state.last_change_ms) < settings.debounce_ms
    {
        return;
    }
    let value = if level != 0 {
        rule.config.max_midi_value
    } else {
        rule.config.min_midi_value
    };
    out.push(build_message(&rule.config, value));
    rule.state.last_value = Some(level);
    rule.state.last_change_ms = now;
    rule.state.last_send_ms = now;
}

fn poll_analog(
    rule: &mut PinRule,
    raw: u16,
    raw_max: u16,
    now: u32,
    settings: &EngineSettings,
    out: &mut Vec<MidiMessage>,
) {
    let smoothed = smooth(&mut rule.state, raw, settings.ema_alpha);

    if rule.config.midi_type == MidiStatus::PitchBend {
        // Finer resolution, wider gate
        let mapped = map_range(smoothed as i32, 0, raw_max as i32, 0, 16383);
        let gate = 4 * effective_threshold(rule.config.threshold);
        if should_emit(&rule.state, mapped, gate, now, settings) {
            out.push(MidiMessage::pitch_bend_raw(
                rule.config.midi_channel,
                mapped as u16,
            ));
            rule.state.last_value = Some(mapped);
            rule.state.last_send_ms = now;
        }
        return;
    }

    let mapped = map_range(
        smoothed as i32,
        0,
        raw_max as i32,
        rule.config.min_midi_value as i32,
        rule.config.max_midi_value as i32,
    );
    let gate = effective_threshold(rule.config.threshold);
    if should_emit(&rule.state, mapped, gate, now, settings) {
        out.push(build_message(&rule.config, mapped as u8));
        rule.state.last_value = Some(mapped);
        rule.state.last_send_ms = now;
    }
}

/// Continuous touch: lower raw reading means stronger contact, so the raw
/// scale is inverted onto [0,127] before the configured range is applied.
fn poll_touch_continuous<H: Hal>(
    rule: &mut PinRule,
    hal: &mut H,
    now: u32,
    settings: &EngineSettings,
    out: &mut Vec<MidiMessage>,
) {
    let raw = hal.touch_read(rule.config.pin);
    let touch_max = hal.touch_max();
    let smoothed = smooth(&mut rule.state, raw, settings.ema_alpha);

    let inverted = map_range(smoothed as i32, 0, touch_max as i32, 127, 0);
    let mapped = map_range(
        inverted,
        0,
        127,
        rule.config.min_midi_value as i32,
        rule.config.max_midi_value as i32,
    );
    if should_emit(&rule.state, mapped, 1, now, settings) {
        out.push(build_message(&rule.config, mapped as u8));
        rule.state.last_value = Some(mapped);
        rule.state.last_send_ms = now;
    }
}

/// Binary touch: a reading below the threshold is "touched"; transitions
/// emit the configured max/min value.
fn poll_touch_binary<H: Hal>(
    rule: &mut PinRule,
    hal: &mut H,
    now: u32,
    settings: &EngineSettings,
    out: &mut Vec<MidiMessage>,
) {
    let raw = hal.touch_read(rule.config.pin);
    let touched = raw < rule.config.threshold as u16;
    if touched == rule.state.touched {
        return;
    }
    if settings.debounce_ms > 0
        && now.wrapping_sub(rule.state.last_change_ms) < settings.debounce_ms
    {
        return;
    }
    let value = if touched {
        rule.config.max_midi_value
    } else {
        rule.config.min_midi_value
    };
    debug!(pin = rule.config.pin, touched, "touch transition");
    out.push(build_message(&rule.config, value));
    rule.state.touched = touched;
    rule.state.last_change_ms = now;
    rule.state.last_send_ms = now;
}

// -- Shared helpers --

fn smooth(state: &mut PinState, raw: u16, alpha: f32) -> f32 {
    let smoothed = match state.smoothed {
        Some(prev) => prev + alpha * (raw as f32 - prev),
        None => raw as f32,
    };
    state.smoothed = Some(smoothed);
    smoothed
}

/// A configured threshold of 0 means "any change".
fn effective_threshold(threshold: u8) -> i32 {
    (threshold as i32).max(1)
}

/// Delta gate plus rate limit. The first sample of a rule always passes;
/// elapsed-time math wraps with the millisecond counter.
fn should_emit(
    state: &PinState,
    mapped: i32,
    gate: i32,
    now: u32,
    settings: &EngineSettings,
) -> bool {
    match state.last_value {
        None => true,
        Some(last) => {
            (mapped - last).abs() >= gate
                && now.wrapping_sub(state.last_send_ms) >= settings.min_send_interval_ms
        }
    }
}

/// Arduino-style integer range mapping, guarded against a zero-width input
/// span.
fn map_range(value: i32, in_min: i32, in_max: i32, out_min: i32, out_max: i32) -> i32 {
    let span = in_max - in_min;
    if span == 0 {
        return out_min;
    }
    (value - in_min) * (out_max - out_min) / span + out_min
}

/// Assemble the outbound event for a rule: single-data statuses carry the
/// value directly, two-data statuses carry selector + value.
fn build_message(config: &PinConfig, value: u8) -> MidiMessage {
    match config.midi_type {
        MidiStatus::PitchBend => MidiMessage::pitch_bend_raw(config.midi_channel, value as u16),
        MidiStatus::ProgramChange | MidiStatus::Aftertouch | MidiStatus::SongSelect => {
            MidiMessage {
                channel: config.midi_channel,
                status: config.midi_type,
                data1: value,
                data2: 0,
            }
        }
        status => MidiMessage {
            channel: config.midi_channel,
            status,
            data1: config.selector(),
            data2: value,
        },
    }
}
