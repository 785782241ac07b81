//! Software PWM on any GPIO, built from daemon waveforms.
//!
//! Each pin keeps a [`PulseWindow`] as fractions of the period. Setters only
//! change that state; [`Pwm::update`] turns every window into one period of a
//! daemon waveform and transmits it in a loop.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use pilectric_units::{PulseShape, PulseWindow, frequency_to_period, period_to_frequency};
use tracing::{debug, info, warn};

use crate::daemon::{DaemonHandle, Pin, PinMode, Pulse, WaveId, WaveMode, check_disjoint_pins, check_wave_pin};
use crate::error::{GpioError, Result};

/// Frequency used by [`Pwm::with_default_frequency`].
pub const DEFAULT_FREQUENCY: f64 = 1_000.0;

/// How long [`Pwm::update`] waits for the daemon to switch to a new wave.
const SWITCH_TIMEOUT: Duration = Duration::from_secs(1);
const SWITCH_POLL: Duration = Duration::from_millis(1);

/// Snapshot of one pin's PWM configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinSettings {
    /// Hz
    pub frequency: f64,
    /// µs
    pub period: f64,
    /// µs from the start of the period to the rising edge.
    pub pulse_start: f64,
    /// µs the pin stays high.
    pub pulse_length: f64,
    /// `pulse_length / period`
    pub duty_cycle: f64,
}

/// Waveform-backed PWM generator for a set of pins.
pub struct Pwm {
    daemon: DaemonHandle,
    frequency: f64,
    period: f64,
    windows: BTreeMap<Pin, PulseWindow>,
    current_wave: Option<WaveId>,
}

impl Pwm {
    /// Create a generator for `pins` at `frequency` Hz. Every pin starts low.
    ///
    /// # Errors
    ///
    /// * `GpioError::InvalidParameter` if a pin is repeated, cannot carry a
    ///   waveform, or `frequency` is not positive.
    /// * `GpioError::Connection`/`GpioError::Daemon` if a pin cannot be made an output.
    pub fn new(daemon: DaemonHandle, pins: &[Pin], frequency: f64) -> Result<Self> {
        check_disjoint_pins(pins.iter().copied())?;
        for &pin in pins {
            check_wave_pin(pin)?;
        }
        let period = frequency_to_period(frequency)?;
        for &pin in pins {
            daemon.set_mode(pin, PinMode::Output)?;
        }
        debug!(?pins, frequency, "PWM generator created");
        Ok(Pwm {
            daemon,
            frequency,
            period,
            windows: pins.iter().map(|&pin| (pin, PulseWindow::OFF)).collect(),
            current_wave: None,
        })
    }

    /// Create a generator running at [`DEFAULT_FREQUENCY`].
    pub fn with_default_frequency(daemon: DaemonHandle, pins: &[Pin]) -> Result<Self> {
        Pwm::new(daemon, pins, DEFAULT_FREQUENCY)
    }

    /// Add a pin, starting low. Takes effect on the next [`Pwm::update`].
    pub fn add_pin(&mut self, pin: Pin) -> Result<()> {
        check_wave_pin(pin)?;
        if self.windows.contains_key(&pin) {
            return Err(GpioError::InvalidParameter(format!("pin {pin} is used more than once")));
        }
        self.daemon.set_mode(pin, PinMode::Output)?;
        self.windows.insert(pin, PulseWindow::OFF);
        Ok(())
    }

    /// Pins driven by this generator, in ascending order.
    pub fn pins(&self) -> impl Iterator<Item = Pin> + '_ {
        self.windows.keys().copied()
    }

    /// Returns the frequency in Hz.
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Returns the period in microseconds.
    pub fn period(&self) -> f64 {
        self.period
    }

    /// Change the frequency. Duty cycles and pulse starts keep their fractions.
    pub fn set_frequency(&mut self, frequency: f64) -> Result<()> {
        self.period = frequency_to_period(frequency)?;
        self.frequency = frequency;
        Ok(())
    }

    /// Change the period in microseconds. Duty cycles and pulse starts keep their fractions.
    pub fn set_period(&mut self, period: f64) -> Result<()> {
        self.frequency = period_to_frequency(period)?;
        self.period = period;
        Ok(())
    }

    fn window_mut(&mut self, pin: Pin) -> Result<&mut PulseWindow> {
        self.windows
            .get_mut(&pin)
            .ok_or_else(|| GpioError::InvalidParameter(format!("pin {pin} is not driven by this generator")))
    }

    /// Set the fraction of the period `pin` stays high.
    pub fn set_duty_cycle(&mut self, pin: Pin, fraction: f64) -> Result<()> {
        let window = self.window_mut(pin)?;
        *window = window.with_duty_cycle(fraction)?;
        Ok(())
    }

    /// Set how long `pin` stays high, in microseconds.
    pub fn set_pulse_length_in_micros(&mut self, pin: Pin, length: f64) -> Result<()> {
        let period = self.period;
        let window = self.window_mut(pin)?;
        *window = window.with_length_micros(length, period)?;
        Ok(())
    }

    /// Set when `pin` goes high, in microseconds from the start of the period.
    pub fn set_pulse_start_in_micros(&mut self, pin: Pin, start: f64) -> Result<()> {
        let period = self.period;
        let window = self.window_mut(pin)?;
        *window = window.with_start_micros(start, period)?;
        Ok(())
    }

    /// Set when `pin` goes high, as a fraction of the period.
    pub fn set_pulse_start_in_percentage(&mut self, pin: Pin, fraction: f64) -> Result<()> {
        let window = self.window_mut(pin)?;
        *window = window.with_start_fraction(fraction)?;
        Ok(())
    }

    /// Current settings of `pin`, or `None` if the generator does not drive it.
    pub fn get_pin_settings(&self, pin: Pin) -> Option<PinSettings> {
        self.windows.get(&pin).map(|window| PinSettings {
            frequency: self.frequency,
            period: self.period,
            pulse_start: window.start_micros(self.period),
            pulse_length: window.length_micros(self.period),
            duty_cycle: window.length(),
        })
    }

    /// One period of the combined waveform for every pin.
    pub fn build_wave(&self) -> Vec<Pulse> {
        let shapes: Vec<(Pin, PulseShape)> = self
            .windows
            .iter()
            .map(|(&pin, window)| (pin, window.shape(self.period)))
            .collect();
        combine_shapes(&shapes)
    }

    /// Send the configured windows to the daemon.
    ///
    /// A running wave is replaced at the end of its current cycle, then deleted.
    pub fn update(&mut self) -> Result<()> {
        if self.windows.is_empty() {
            return Err(GpioError::Misuse("PWM generator has no pins to drive".into()));
        }
        let pulses = self.build_wave();
        self.daemon.wave_add_generic(&pulses)?;
        let wave = self.daemon.wave_create()?;

        match self.current_wave {
            None => self.daemon.wave_send(wave, WaveMode::Repeat)?,
            Some(old) => {
                self.daemon.wave_send(wave, WaveMode::RepeatSync)?;
                self.wait_for_wave(wave)?;
                self.daemon.wave_delete(old)?;
            }
        }
        self.current_wave = Some(wave);
        info!(wave = wave.0, frequency = self.frequency, pulses = pulses.len(), "PWM updated");
        Ok(())
    }

    fn wait_for_wave(&self, wave: WaveId) -> Result<()> {
        let deadline = Instant::now() + SWITCH_TIMEOUT + Duration::from_micros(2 * self.period as u64);
        while self.daemon.wave_tx_at()? != Some(wave) {
            if Instant::now() > deadline {
                return Err(GpioError::Timeout("the daemon to switch to the new PWM wave"));
            }
            spin_sleep::sleep(SWITCH_POLL);
        }
        Ok(())
    }

    /// Stop transmission, delete the wave and drive every pin low.
    ///
    /// Windows are reset, so a later [`Pwm::update`] keeps the pins low until
    /// they are configured again. Calling it twice is harmless.
    pub fn stop(&mut self) -> Result<()> {
        if let Some(wave) = self.current_wave.take() {
            self.daemon.wave_tx_stop()?;
            self.daemon.wave_delete(wave)?;
            debug!(wave = wave.0, "PWM wave stopped");
        }
        for (&pin, window) in self.windows.iter_mut() {
            *window = PulseWindow::OFF;
            self.daemon.write(pin, false)?;
        }
        Ok(())
    }
}

impl Drop for Pwm {
    fn drop(&mut self) {
        if self.current_wave.is_some() {
            if let Err(err) = self.stop() {
                warn!(%err, "Failed to stop PWM on drop");
            }
        }
    }
}

fn level_at(shape: &PulseShape, at: u32) -> bool {
    let mut start = 0;
    for (level, length) in shape.segments() {
        if at < start + length {
            return level;
        }
        start += length;
    }
    false
}

/// Merge single-pin period shapes into one multi-pin pulse list.
///
/// Every pin is set explicitly at time zero; afterwards a pin appears in a
/// mask only when its level changes.
fn combine_shapes(shapes: &[(Pin, PulseShape)]) -> Vec<Pulse> {
    let Some(period) = shapes.iter().map(|(_, shape)| shape.period()).max() else {
        return Vec::new();
    };
    let mut edges: Vec<u32> = vec![0];
    for (_, shape) in shapes {
        let mut at = 0;
        for (_, length) in shape.segments() {
            at += length;
            if at < period {
                edges.push(at);
            }
        }
    }
    edges.sort_unstable();
    edges.dedup();

    let mut pulses = Vec::with_capacity(edges.len());
    for (i, &at) in edges.iter().enumerate() {
        let next = edges.get(i + 1).copied().unwrap_or(period);
        let mut pulse = Pulse { on_mask: 0, off_mask: 0, delay_us: next - at };
        for (pin, shape) in shapes {
            let level = level_at(shape, at);
            if at > 0 && level == level_at(shape, at - 1) {
                continue;
            }
            if level {
                pulse.on_mask |= 1 << pin;
            } else {
                pulse.off_mask |= 1 << pin;
            }
        }
        pulses.push(pulse);
    }
    pulses
}
