//! Handle to the pin-control daemon.
//!
//! Every driver in this crate receives a [`DaemonHandle`] at construction. The
//! handle is shared, so several drivers can talk to the same daemon, but no
//! driver reaches for a process-wide connection on its own.

mod pigpio;

pub use pigpio::{DEFAULT_HOST, DEFAULT_PORT, PigpioClient};

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{GpioError, Result};

/// Broadcom (BCM) GPIO number.
pub type Pin = u8;

/// Highest BCM GPIO number the daemon accepts.
pub const MAX_PIN: Pin = 53;

/// Highest GPIO number that fits in a waveform bank mask.
pub const MAX_WAVE_PIN: Pin = 31;

/// Shared daemon connection.
pub type DaemonHandle = Arc<dyn PinDaemon>;

/// Pin direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
}

/// Internal pull resistor setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    Off,
    Down,
    Up,
}

/// How a created waveform is transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveMode {
    OneShot,
    Repeat,
    /// One shot, starting when the current wave finishes its cycle.
    OneShotSync,
    /// Repeat, starting when the current wave finishes its cycle.
    RepeatSync,
}

/// Identifier of a waveform stored in the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaveId(pub u32);

/// One waveform entry: pins to switch on, pins to switch off, then a delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub on_mask: u32,
    pub off_mask: u32,
    pub delay_us: u32,
}

impl Pulse {
    /// Drive `pin` high and hold for `delay_us`.
    pub fn high(pin: Pin, delay_us: u32) -> Self {
        Pulse { on_mask: 1 << pin, off_mask: 0, delay_us }
    }

    /// Drive `pin` low and hold for `delay_us`.
    pub fn low(pin: Pin, delay_us: u32) -> Self {
        Pulse { on_mask: 0, off_mask: 1 << pin, delay_us }
    }
}

/// Operations the drivers need from the pin-control daemon.
///
/// Implementations must be usable from several motor threads at once.
pub trait PinDaemon: Send + Sync {
    /// Set a pin to input or output.
    fn set_mode(&self, pin: Pin, mode: PinMode) -> Result<()>;

    /// Configure the internal pull resistor of a pin.
    fn set_pull(&self, pin: Pin, pull: Pull) -> Result<()>;

    /// Read the level of a pin.
    fn read(&self, pin: Pin) -> Result<bool>;

    /// Drive a pin high or low.
    fn write(&self, pin: Pin, level: bool) -> Result<()>;

    /// Start servo pulses of `pulse_width` microseconds at 50 Hz; zero switches them off.
    fn set_servo_pulse_width(&self, pin: Pin, pulse_width: u32) -> Result<()>;

    /// Append pulses to the waveform under construction. Returns its pulse count.
    fn wave_add_generic(&self, pulses: &[Pulse]) -> Result<u32>;

    /// Turn the waveform under construction into a stored wave.
    fn wave_create(&self) -> Result<WaveId>;

    /// Delete a stored wave.
    fn wave_delete(&self, wave: WaveId) -> Result<()>;

    /// Transmit a stored wave.
    fn wave_send(&self, wave: WaveId, mode: WaveMode) -> Result<()>;

    /// The wave currently being transmitted, if any.
    fn wave_tx_at(&self) -> Result<Option<WaveId>>;

    /// Whether a wave or chain is being transmitted.
    fn wave_tx_busy(&self) -> Result<bool>;

    /// Stop wave transmission.
    fn wave_tx_stop(&self) -> Result<()>;

    /// Transmit a chain program made of stored waves and loop commands.
    fn wave_chain(&self, chain: &[u8]) -> Result<()>;
}

/// Check that `pin` is a valid BCM number.
pub fn check_pin(pin: Pin) -> Result<Pin> {
    if pin > MAX_PIN {
        return Err(GpioError::InvalidParameter(format!(
            "pin {pin} is outside of 0..={MAX_PIN}"
        )));
    }
    Ok(pin)
}

/// Check that `pin` can be switched by a waveform.
pub fn check_wave_pin(pin: Pin) -> Result<Pin> {
    if pin > MAX_WAVE_PIN {
        return Err(GpioError::InvalidParameter(format!(
            "pin {pin} cannot carry a waveform, only 0..={MAX_WAVE_PIN} can"
        )));
    }
    Ok(pin)
}

/// Check that every pin is valid and none appears twice.
pub fn check_disjoint_pins(pins: impl IntoIterator<Item = Pin>) -> Result<()> {
    let mut seen = HashSet::new();
    for pin in pins {
        check_pin(pin)?;
        if !seen.insert(pin) {
            return Err(GpioError::InvalidParameter(format!("pin {pin} is used more than once")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulse_masks() {
        assert_eq!(Pulse::high(4, 10), Pulse { on_mask: 0b1_0000, off_mask: 0, delay_us: 10 });
        assert_eq!(Pulse::low(0, 7), Pulse { on_mask: 0, off_mask: 1, delay_us: 7 });
    }

    #[test]
    fn test_check_pin_range() {
        assert_eq!(check_pin(53).unwrap(), 53);
        assert!(matches!(check_pin(54), Err(GpioError::InvalidParameter(_))));
        assert!(matches!(check_wave_pin(32), Err(GpioError::InvalidParameter(_))));
    }

    #[test]
    fn test_check_disjoint_pins() {
        assert!(check_disjoint_pins([18, 3, 4]).is_ok());
        assert!(matches!(check_disjoint_pins([18, 3, 18]), Err(GpioError::InvalidParameter(_))));
    }
}
