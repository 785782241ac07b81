//! Client for the pigpio daemon socket interface.
//!
//! Requests are four little-endian `u32` words `(cmd, p1, p2, p3)` followed by
//! `p3` extension bytes. Each response is four words; the last is the signed
//! result, negative on error.

use std::env;
use std::io::{Read, Write};
use std::net::TcpStream;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use super::{Pin, PinDaemon, PinMode, Pull, Pulse, WaveId, WaveMode};
use crate::error::{GpioError, Result};

/// Host the daemon listens on when `PIGPIO_ADDR` is unset.
pub const DEFAULT_HOST: &str = "localhost";
/// Port the daemon listens on when `PIGPIO_PORT` is unset.
pub const DEFAULT_PORT: u16 = 8888;

/// Wave ids at or above this value mean "nothing transmitting".
const NO_TX_WAVE: i32 = 9998;

#[derive(Debug, Clone, Copy)]
#[repr(u32)]
enum Command {
    Modes = 0,
    Pud = 2,
    Read = 3,
    Write = 4,
    Servo = 8,
    Wvag = 28,
    Wvbsy = 32,
    Wvhlt = 33,
    Wvcre = 49,
    Wvdel = 50,
    Wvtx = 51,
    Wvtxr = 52,
    Wvcha = 93,
    Wvtxm = 100,
    Wvtat = 101,
}

impl Command {
    fn name(self) -> &'static str {
        match self {
            Command::Modes => "MODES",
            Command::Pud => "PUD",
            Command::Read => "READ",
            Command::Write => "WRITE",
            Command::Servo => "SERVO",
            Command::Wvag => "WVAG",
            Command::Wvbsy => "WVBSY",
            Command::Wvhlt => "WVHLT",
            Command::Wvcre => "WVCRE",
            Command::Wvdel => "WVDEL",
            Command::Wvtx => "WVTX",
            Command::Wvtxr => "WVTXR",
            Command::Wvcha => "WVCHA",
            Command::Wvtxm => "WVTXM",
            Command::Wvtat => "WVTAT",
        }
    }
}

/// Encode one request frame.
fn encode_request(cmd: Command, p1: u32, p2: u32, ext: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(16 + ext.len());
    frame.extend_from_slice(&(cmd as u32).to_le_bytes());
    frame.extend_from_slice(&p1.to_le_bytes());
    frame.extend_from_slice(&p2.to_le_bytes());
    frame.extend_from_slice(&(ext.len() as u32).to_le_bytes());
    frame.extend_from_slice(ext);
    frame
}

/// Encode pulses as the extension of a `WVAG` request.
fn encode_pulses(pulses: &[Pulse]) -> Vec<u8> {
    let mut ext = Vec::with_capacity(pulses.len() * 12);
    for pulse in pulses {
        ext.extend_from_slice(&pulse.on_mask.to_le_bytes());
        ext.extend_from_slice(&pulse.off_mask.to_le_bytes());
        ext.extend_from_slice(&pulse.delay_us.to_le_bytes());
    }
    ext
}

fn wave_mode_code(mode: WaveMode) -> u32 {
    match mode {
        WaveMode::OneShot => 0,
        WaveMode::Repeat => 1,
        WaveMode::OneShotSync => 2,
        WaveMode::RepeatSync => 3,
    }
}

/// Connection to a running `pigpiod`.
///
/// One TCP stream carries every command; the mutex keeps each request paired
/// with its response when motor threads share the client.
pub struct PigpioClient {
    stream: Mutex<TcpStream>,
    address: String,
}

impl PigpioClient {
    /// Connect to the daemon at `host:port`.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let address = format!("{host}:{port}");
        let stream = TcpStream::connect(&address)?;
        stream.set_nodelay(true)?;
        info!(%address, "Connected to pigpio daemon");
        Ok(PigpioClient { stream: Mutex::new(stream), address })
    }

    /// Connect using `PIGPIO_ADDR` and `PIGPIO_PORT`, falling back to `localhost:8888`.
    pub fn from_env() -> Result<Self> {
        let host = env::var("PIGPIO_ADDR").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port = match env::var("PIGPIO_PORT") {
            Ok(port) => port.parse().map_err(|_| {
                GpioError::InvalidParameter(format!("PIGPIO_PORT is not a port number: {port}"))
            })?,
            Err(_) => DEFAULT_PORT,
        };
        PigpioClient::connect(&host, port)
    }

    /// Address the client is connected to.
    pub fn address(&self) -> &str {
        &self.address
    }

    fn command(&self, cmd: Command, p1: u32, p2: u32, ext: &[u8]) -> Result<i32> {
        let frame = encode_request(cmd, p1, p2, ext);
        let mut response = [0u8; 16];
        {
            let mut stream = self.stream.lock();
            stream.write_all(&frame)?;
            stream.read_exact(&mut response)?;
        }
        let result = i32::from_le_bytes([response[12], response[13], response[14], response[15]]);
        trace!(command = cmd.name(), p1, p2, ext_len = ext.len(), result, "pigpio command");
        if result < 0 {
            return Err(GpioError::Daemon { command: cmd.name(), code: result });
        }
        Ok(result)
    }
}

impl PinDaemon for PigpioClient {
    fn set_mode(&self, pin: Pin, mode: PinMode) -> Result<()> {
        let mode = match mode {
            PinMode::Input => 0,
            PinMode::Output => 1,
        };
        self.command(Command::Modes, pin as u32, mode, &[]).map(|_| ())
    }

    fn set_pull(&self, pin: Pin, pull: Pull) -> Result<()> {
        let pull = match pull {
            Pull::Off => 0,
            Pull::Down => 1,
            Pull::Up => 2,
        };
        self.command(Command::Pud, pin as u32, pull, &[]).map(|_| ())
    }

    fn read(&self, pin: Pin) -> Result<bool> {
        self.command(Command::Read, pin as u32, 0, &[]).map(|level| level != 0)
    }

    fn write(&self, pin: Pin, level: bool) -> Result<()> {
        self.command(Command::Write, pin as u32, level as u32, &[]).map(|_| ())
    }

    fn set_servo_pulse_width(&self, pin: Pin, pulse_width: u32) -> Result<()> {
        self.command(Command::Servo, pin as u32, pulse_width, &[]).map(|_| ())
    }

    fn wave_add_generic(&self, pulses: &[Pulse]) -> Result<u32> {
        let count = self.command(Command::Wvag, 0, 0, &encode_pulses(pulses))?;
        Ok(count as u32)
    }

    fn wave_create(&self) -> Result<WaveId> {
        let id = self.command(Command::Wvcre, 0, 0, &[])?;
        debug!(wave = id, "Created wave");
        Ok(WaveId(id as u32))
    }

    fn wave_delete(&self, wave: WaveId) -> Result<()> {
        self.command(Command::Wvdel, wave.0, 0, &[]).map(|_| ())
    }

    fn wave_send(&self, wave: WaveId, mode: WaveMode) -> Result<()> {
        let sent = match mode {
            WaveMode::OneShot => self.command(Command::Wvtx, wave.0, 0, &[]),
            WaveMode::Repeat => self.command(Command::Wvtxr, wave.0, 0, &[]),
            sync => self.command(Command::Wvtxm, wave.0, wave_mode_code(sync), &[]),
        };
        sent.map(|_| ())
    }

    fn wave_tx_at(&self) -> Result<Option<WaveId>> {
        let id = self.command(Command::Wvtat, 0, 0, &[])?;
        Ok((id < NO_TX_WAVE).then_some(WaveId(id as u32)))
    }

    fn wave_tx_busy(&self) -> Result<bool> {
        self.command(Command::Wvbsy, 0, 0, &[]).map(|busy| busy != 0)
    }

    fn wave_tx_stop(&self) -> Result<()> {
        self.command(Command::Wvhlt, 0, 0, &[]).map(|_| ())
    }

    fn wave_chain(&self, chain: &[u8]) -> Result<()> {
        self.command(Command::Wvcha, 0, 0, chain).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_encode_request_layout() {
        let frame = encode_request(Command::Write, 18, 1, &[]);
        assert_eq!(frame, vec![4, 0, 0, 0, 18, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_encode_request_with_extension() {
        let pulses = [Pulse::high(2, 500), Pulse::low(2, 500)];
        let ext = encode_pulses(&pulses);
        assert_eq!(ext.len(), 24);
        let frame = encode_request(Command::Wvag, 0, 0, &ext);
        assert_eq!(&frame[0..4], &28u32.to_le_bytes());
        assert_eq!(&frame[12..16], &24u32.to_le_bytes());
        assert_eq!(&frame[16..20], &4u32.to_le_bytes());
        assert_eq!(&frame[24..28], &500u32.to_le_bytes());
        assert_eq!(&frame[32..36], &4u32.to_le_bytes());
    }

    /// Serve canned results to one client, recording the command words.
    fn fake_daemon(results: Vec<i32>) -> (u16, thread::JoinHandle<Vec<u32>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut commands = Vec::new();
            for result in results {
                let mut header = [0u8; 16];
                socket.read_exact(&mut header).unwrap();
                let cmd = u32::from_le_bytes(header[0..4].try_into().unwrap());
                let ext_len = u32::from_le_bytes(header[12..16].try_into().unwrap());
                let mut ext = vec![0u8; ext_len as usize];
                socket.read_exact(&mut ext).unwrap();
                commands.push(cmd);
                let mut response = [0u8; 16];
                response[0..12].copy_from_slice(&header[0..12]);
                response[12..16].copy_from_slice(&result.to_le_bytes());
                socket.write_all(&response).unwrap();
            }
            commands
        });
        (port, handle)
    }

    #[test]
    fn test_client_round_trip_against_fake_daemon() {
        let (port, server) = fake_daemon(vec![0, 1, 7, 9999]);
        let client = PigpioClient::connect("127.0.0.1", port).unwrap();
        client.write(17, true).unwrap();
        assert!(client.read(5).unwrap());
        assert_eq!(client.wave_create().unwrap(), WaveId(7));
        assert_eq!(client.wave_tx_at().unwrap(), None);
        assert_eq!(server.join().unwrap(), vec![4, 3, 49, 101]);
    }

    #[test]
    fn test_negative_result_is_daemon_error() {
        let (port, server) = fake_daemon(vec![-41]);
        let client = PigpioClient::connect("127.0.0.1", port).unwrap();
        let err = client.set_mode(60, PinMode::Output).unwrap_err();
        assert!(matches!(err, GpioError::Daemon { command: "MODES", code: -41 }));
        server.join().unwrap();
    }

    #[test]
    fn test_sync_send_uses_mode_command() {
        let (port, server) = fake_daemon(vec![0, 0]);
        let client = PigpioClient::connect("127.0.0.1", port).unwrap();
        client.wave_send(WaveId(3), WaveMode::Repeat).unwrap();
        client.wave_send(WaveId(4), WaveMode::RepeatSync).unwrap();
        assert_eq!(server.join().unwrap(), vec![52, 100]);
    }
}
