use midilink_protocol::pinconfig::PinMode;

/// Hardware peripheral collaborator: pin modes, reads/writes and the
/// monotonic millisecond clock. All calls are synchronous and expected to
/// return quickly; the engine calls them from the polling loop.
///
/// The millisecond counter may wrap — the engine only ever computes elapsed
/// time with wrapping arithmetic.
pub trait Hal {
    fn set_pin_mode(&mut self, pin: u8, mode: PinMode);

    fn digital_read(&mut self, pin: u8) -> bool;

    fn digital_write(&mut self, pin: u8, high: bool);

    /// Raw ADC sample, 0..=`analog_max()`.
    fn analog_read(&mut self, pin: u8) -> u16;

    /// PWM duty cycle, 0..=255.
    fn analog_write(&mut self, pin: u8, duty: u8);

    /// Raw capacitive-touch sample, 0..=`touch_max()`. Lower readings mean
    /// stronger contact.
    fn touch_read(&mut self, pin: u8) -> u16;

    fn analog_max(&self) -> u16 {
        4095
    }

    fn touch_max(&self) -> u16 {
        4095
    }

    fn millis(&self) -> u32;
}
