//! Device session (C4): handshake, identity, out-of-band commands, and the
//! `disconnected -> connected -> capturing -> connected` state machine.
//!
//! Grounded on the teacher's phased-sequence style in `seq.rs` (ordered
//! send/recv steps with per-step timeouts) but rebuilt over the line-based
//! [`crate::transport::Transport`] instead of framed `Message` envelopes.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::addr::DeviceTarget;
use crate::error::{DeviceError, DeviceResult};
use crate::frame;
use crate::identity::{parse_version_tuple, DeviceIdentity};
use crate::transport::Transport;
use crate::wire::Serialize;

pub const CMD_QUERY_IDENTITY: u8 = 0x00;
pub const CMD_START_CAPTURE: u8 = 0x01;
pub const CMD_SET_NETWORK_CONFIG: u8 = 0x02;
pub const CMD_QUERY_VOLTAGE: u8 = 0x03;
pub const CMD_ENTER_BOOTLOADER: u8 = 0x04;
pub const CMD_STOP_CAPTURE: u8 = 0xFF;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const NETWORK_CONFIG_TIMEOUT: Duration = Duration::from_secs(5);
const VOLTAGE_TIMEOUT: Duration = Duration::from_secs(5);
const BOOTLOADER_TIMEOUT: Duration = Duration::from_secs(1);
const POST_STOP_WAIT: Duration = Duration::from_secs(2);

/// Minimum accepted `{major, minor}` device firmware version.
pub const MIN_SUPPORTED_VERSION: (u32, u32) = (1, 0);

/// Fixed synthetic voltage serial devices report in place of a real reading
/// (spec §4.4: "serial devices report a fixed synthetic voltage").
pub const SERIAL_SYNTHETIC_VOLTAGE: &str = "3.3V";

fn kv_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z]+):(\d+)$").unwrap())
}

fn parse_kv_line(line: &str, expected_key: &'static str, line_no: usize) -> DeviceResult<u32> {
    let caps = kv_line_regex()
        .captures(line)
        .filter(|c| &c[1] == expected_key)
        .ok_or_else(|| DeviceError::HandshakeLineUnparsable {
            line_no,
            field: expected_key,
            text: line.to_string(),
        })?;
    caps[2].parse().map_err(|_| DeviceError::HandshakeLineUnparsable {
        line_no,
        field: expected_key,
        text: line.to_string(),
    })
}

/// A read-only snapshot of session state, safe to hand to callers who must
/// not observe or mutate the live state machine directly (spec §9).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionStatus {
    pub is_connected: bool,
    pub is_capturing: bool,
    pub identity: Option<DeviceIdentity>,
}

/// Owns one device's transport and drives its connection/capture state
/// machine. Exclusive owner of its [`Transport`] (spec §5).
pub struct DeviceSession {
    transport: Transport,
    connected: bool,
    capturing: bool,
    identity: Option<DeviceIdentity>,
    min_version: (u32, u32),
}

impl DeviceSession {
    /// Open the transport without handshaking. The session starts
    /// `disconnected` until [`handshake`](Self::handshake) succeeds.
    pub fn open(target: DeviceTarget) -> DeviceResult<Self> {
        let transport = Transport::open(target)?;
        Ok(Self { transport, connected: false, capturing: false, identity: None, min_version: MIN_SUPPORTED_VERSION })
    }

    pub fn with_min_version(mut self, min_version: (u32, u32)) -> Self {
        self.min_version = min_version;
        self
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus { is_connected: self.connected, is_capturing: self.capturing, identity: self.identity.clone() }
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    pub fn target(&self) -> &DeviceTarget {
        self.transport.target()
    }

    pub(crate) fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    /// Run the identity handshake (spec §4.4). On success the session
    /// transitions to `connected` and `identity()` becomes populated; on
    /// failure the session stays `disconnected`.
    pub fn handshake(&mut self) -> DeviceResult<DeviceIdentity> {
        self.connected = false;
        let frame = frame::encode(&[CMD_QUERY_IDENTITY]);
        self.transport.write_all(&frame)?;

        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        let mut lines = Vec::with_capacity(5);
        for _ in 0..5 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DeviceError::HandshakeTimeout(HANDSHAKE_TIMEOUT));
            }
            match self.transport.read_line(remaining) {
                Ok(line) => lines.push(line),
                Err(DeviceError::CommandTimeout(_)) => {
                    return Err(DeviceError::HandshakeIncomplete { expected: 5, got: lines.len() })
                }
                Err(e) => return Err(e),
            }
        }

        // Frequency is validated first, ahead of the version check, so a bad
        // frequency reading always wins over an unsupported-version failure
        // (spec §4.4).
        let max_frequency = parse_kv_line(&lines[1], "FREQ", 2)?;
        if max_frequency == 0 {
            return Err(DeviceError::HandshakeValueOutOfRange { field: "FREQ", value: 0 });
        }

        let version_tuple = parse_version_tuple(&lines[0]).ok_or_else(|| {
            DeviceError::HandshakeLineUnparsable { line_no: 1, field: "version", text: lines[0].clone() }
        })?;
        if version_tuple < self.min_version {
            return Err(DeviceError::UnsupportedVersion { found: version_tuple, minimum: self.min_version });
        }

        let blast_frequency = parse_kv_line(&lines[2], "BLASTFREQ", 3)?;
        if blast_frequency == 0 {
            return Err(DeviceError::HandshakeValueOutOfRange { field: "BLASTFREQ", value: 0 });
        }

        let buffer_size_bytes = parse_kv_line(&lines[3], "BUFFER", 4)?;
        if buffer_size_bytes == 0 {
            return Err(DeviceError::HandshakeValueOutOfRange { field: "BUFFER", value: 0 });
        }

        let channel_count = parse_kv_line(&lines[4], "CHANNELS", 5)?;
        if !(1..=24).contains(&channel_count) {
            return Err(DeviceError::HandshakeValueOutOfRange {
                field: "CHANNELS",
                value: channel_count as i64,
            });
        }

        let identity = DeviceIdentity {
            version_string: lines[0].clone(),
            max_frequency,
            blast_frequency,
            buffer_size_bytes,
            channel_count: channel_count as u8,
        };
        self.identity = Some(identity.clone());
        self.connected = true;
        Ok(identity)
    }

    /// Query device voltage (spec §4.4 command `0x03`). Always returns a
    /// sentinel string rather than an error — `DISCONNECTED`/`UNSUPPORTED`/
    /// `TIMEOUT`/`ERROR` are themselves the error channel here (spec §6).
    pub fn query_voltage(&mut self) -> String {
        if !self.connected {
            return "DISCONNECTED".to_string();
        }
        if self.transport.target().is_serial() {
            return SERIAL_SYNTHETIC_VOLTAGE.to_string();
        }
        let frame = frame::encode(&[CMD_QUERY_VOLTAGE]);
        if self.transport.write_all(&frame).is_err() {
            return "ERROR".to_string();
        }
        match self.transport.read_line(VOLTAGE_TIMEOUT) {
            Ok(line) => line,
            Err(DeviceError::CommandTimeout(_)) => "TIMEOUT".to_string(),
            Err(_) => "ERROR".to_string(),
        }
    }

    /// Push a network configuration to a serial-connected device (spec
    /// §4.4 command `0x02`). Network-connected devices reject this.
    pub fn set_network_config(&mut self, config: &crate::wire::NetworkConfig) -> DeviceResult<()> {
        if !self.transport.target().is_serial() {
            return Err(DeviceError::NotSupported);
        }
        let mut payload = vec![CMD_SET_NETWORK_CONFIG];
        payload.extend(config.serialize());
        self.transport.write_all(&frame::encode(&payload))?;
        let line = self.transport.read_line(NETWORK_CONFIG_TIMEOUT)?;
        if line != "SETTINGS_SAVED" {
            return Err(DeviceError::UnexpectedResponse(line));
        }
        Ok(())
    }

    /// Command the device into its bootloader (spec §4.4 command `0x04`).
    pub fn enter_bootloader(&mut self) -> DeviceResult<()> {
        self.transport.write_all(&frame::encode(&[CMD_ENTER_BOOTLOADER]))?;
        let line = self.transport.read_line(BOOTLOADER_TIMEOUT)?;
        if line != "RESTARTING_BOOTLOADER" {
            return Err(DeviceError::UnexpectedResponse(line));
        }
        Ok(())
    }

    /// Transition into `capturing`, refusing if not connected or already
    /// capturing (spec §4.6 preconditions). Returns `Ok(())` only when the
    /// transition succeeds; callers map the `Err` to `Busy`/`HardwareError`.
    pub(crate) fn begin_capture(&mut self) -> Result<(), CaptureStartError> {
        if self.capturing {
            return Err(CaptureStartError::Busy);
        }
        if !self.connected {
            return Err(CaptureStartError::NotConnected);
        }
        self.capturing = true;
        Ok(())
    }

    pub(crate) fn end_capture(&mut self) {
        self.capturing = false;
    }

    /// Cancel an in-progress (or not-yet-started) capture: write the raw
    /// stop byte, wait, then reconnect without re-handshaking (spec §4.6,
    /// §9). Idempotent and infallible from the caller's view — always
    /// leaves the session `connected` with `capturing = false`.
    pub fn stop(&mut self) {
        let _ = self.transport.write_all(&[CMD_STOP_CAPTURE]);
        std::thread::sleep(POST_STOP_WAIT);
        let _ = self.transport.reconnect();
        self.capturing = false;
    }
}

/// Internal precondition failure from [`DeviceSession::begin_capture`].
pub(crate) enum CaptureStartError {
    Busy,
    NotConnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_kv_line_accepts_matching_key() {
        assert_eq!(parse_kv_line("FREQ:100000000", "FREQ", 2).unwrap(), 100_000_000);
    }

    #[test]
    fn parse_kv_line_rejects_wrong_key() {
        assert!(matches!(
            parse_kv_line("BUFFER:1024", "FREQ", 2),
            Err(DeviceError::HandshakeLineUnparsable { .. })
        ));
    }

    #[test]
    fn parse_kv_line_rejects_non_numeric() {
        assert!(matches!(
            parse_kv_line("FREQ:abc", "FREQ", 2),
            Err(DeviceError::HandshakeLineUnparsable { .. })
        ));
    }

    #[test]
    fn min_supported_version_is_one_zero() {
        assert_eq!(MIN_SUPPORTED_VERSION, (1, 0));
    }
}
