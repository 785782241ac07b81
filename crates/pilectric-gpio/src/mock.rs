//! In-process stand-in for the pin-control daemon.
//!
//! [`MockDaemon`] records every call so tests can assert on pin activity
//! without a Raspberry Pi.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::daemon::{Pin, PinDaemon, PinMode, Pull, Pulse, WaveId, WaveMode};
use crate::error::{GpioError, Result};

/// One recorded daemon call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SetMode(Pin, PinMode),
    SetPull(Pin, Pull),
    Read(Pin),
    Write(Pin, bool),
    ServoPulseWidth(Pin, u32),
    WaveAddGeneric(Vec<Pulse>),
    WaveCreate(WaveId),
    WaveDelete(WaveId),
    WaveSend(WaveId, WaveMode),
    WaveTxAt,
    WaveTxBusy,
    WaveTxStop,
    WaveChain(Vec<u8>),
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    levels: HashMap<Pin, bool>,
    failing_pins: HashSet<Pin>,
    next_wave: u32,
    current_wave: Option<WaveId>,
    busy_polls: usize,
}

/// Recording daemon that answers like an idle Raspberry Pi.
///
/// Pins read low unless set with [`MockDaemon::set_level`]; a written level
/// is read back. Sent waves become current immediately.
#[derive(Default)]
pub struct MockDaemon {
    state: Mutex<MockState>,
}

impl MockDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Forget recorded calls.
    pub fn clear(&self) {
        self.state.lock().calls.clear();
    }

    /// Levels written to `pin`, in order.
    pub fn writes_to(&self, pin: Pin) -> Vec<bool> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Write(p, level) if *p == pin => Some(*level),
                _ => None,
            })
            .collect()
    }

    /// Number of rising edges written to `pin`.
    pub fn rising_edges(&self, pin: Pin) -> usize {
        let mut last = false;
        let mut edges = 0;
        for level in self.writes_to(pin) {
            if level && !last {
                edges += 1;
            }
            last = level;
        }
        edges
    }

    /// Force the level `read` reports for `pin`.
    pub fn set_level(&self, pin: Pin, level: bool) {
        self.state.lock().levels.insert(pin, level);
    }

    /// Make every write to `pin` fail with a daemon error.
    pub fn fail_writes_to(&self, pin: Pin) {
        self.state.lock().failing_pins.insert(pin);
    }

    /// Report a busy transmitter for the next `polls` busy checks.
    pub fn stay_busy_for(&self, polls: usize) {
        self.state.lock().busy_polls = polls;
    }

    /// The wave the mock transmitter is currently sending.
    pub fn current_wave(&self) -> Option<WaveId> {
        self.state.lock().current_wave
    }
}

impl PinDaemon for MockDaemon {
    fn set_mode(&self, pin: Pin, mode: PinMode) -> Result<()> {
        self.state.lock().calls.push(Call::SetMode(pin, mode));
        Ok(())
    }

    fn set_pull(&self, pin: Pin, pull: Pull) -> Result<()> {
        self.state.lock().calls.push(Call::SetPull(pin, pull));
        Ok(())
    }

    fn read(&self, pin: Pin) -> Result<bool> {
        let mut state = self.state.lock();
        state.calls.push(Call::Read(pin));
        Ok(state.levels.get(&pin).copied().unwrap_or(false))
    }

    fn write(&self, pin: Pin, level: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing_pins.contains(&pin) {
            return Err(GpioError::Daemon { command: "WRITE", code: -41 });
        }
        state.calls.push(Call::Write(pin, level));
        state.levels.insert(pin, level);
        Ok(())
    }

    fn set_servo_pulse_width(&self, pin: Pin, pulse_width: u32) -> Result<()> {
        self.state.lock().calls.push(Call::ServoPulseWidth(pin, pulse_width));
        Ok(())
    }

    fn wave_add_generic(&self, pulses: &[Pulse]) -> Result<u32> {
        self.state.lock().calls.push(Call::WaveAddGeneric(pulses.to_vec()));
        Ok(pulses.len() as u32)
    }

    fn wave_create(&self) -> Result<WaveId> {
        let mut state = self.state.lock();
        let wave = WaveId(state.next_wave);
        state.next_wave += 1;
        state.calls.push(Call::WaveCreate(wave));
        Ok(wave)
    }

    fn wave_delete(&self, wave: WaveId) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::WaveDelete(wave));
        if state.current_wave == Some(wave) {
            state.current_wave = None;
        }
        Ok(())
    }

    fn wave_send(&self, wave: WaveId, mode: WaveMode) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::WaveSend(wave, mode));
        state.current_wave = Some(wave);
        Ok(())
    }

    fn wave_tx_at(&self) -> Result<Option<WaveId>> {
        let mut state = self.state.lock();
        state.calls.push(Call::WaveTxAt);
        Ok(state.current_wave)
    }

    fn wave_tx_busy(&self) -> Result<bool> {
        let mut state = self.state.lock();
        state.calls.push(Call::WaveTxBusy);
        if state.busy_polls > 0 {
            state.busy_polls -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn wave_tx_stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::WaveTxStop);
        state.current_wave = None;
        state.busy_polls = 0;
        Ok(())
    }

    fn wave_chain(&self, chain: &[u8]) -> Result<()> {
        self.state.lock().calls.push(Call::WaveChain(chain.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_writes_and_reads_back() {
        let mock = MockDaemon::new();
        mock.write(4, true).unwrap();
        mock.write(4, false).unwrap();
        mock.write(4, true).unwrap();
        assert_eq!(mock.writes_to(4), vec![true, false, true]);
        assert_eq!(mock.rising_edges(4), 2);
        assert!(mock.read(4).unwrap());
    }

    #[test]
    fn test_mock_busy_countdown() {
        let mock = MockDaemon::new();
        mock.stay_busy_for(2);
        assert!(mock.wave_tx_busy().unwrap());
        assert!(mock.wave_tx_busy().unwrap());
        assert!(!mock.wave_tx_busy().unwrap());
    }

    #[test]
    fn test_mock_failing_pin() {
        let mock = MockDaemon::new();
        mock.fail_writes_to(9);
        assert!(matches!(mock.write(9, true), Err(GpioError::Daemon { .. })));
        assert!(mock.calls().is_empty());
    }
}
