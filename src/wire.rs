//! Fixed-layout request structs (C2): `CaptureRequest` (45 B) and
//! `NetworkConfig` (115 B), little-endian, tightly packed.
//!
//! Mirrors the teacher's field-codec style (`codec.rs`'s `read_*`/`write_*`
//! helpers) but little-endian, per spec §4.2, and modeled as a small
//! `Serialize` trait so a transport can frame either payload without
//! matching on a concrete type (spec §9 design note on the "has serialize"
//! dynamic check in the original source).

use crate::session::{CaptureSession, PackingMode};

pub const CAPTURE_REQUEST_LEN: usize = 45;
pub const NETWORK_CONFIG_LEN: usize = 115;

/// A wire request payload that can serialize itself to bytes ready for
/// frame encoding.
pub trait Serialize {
    fn serialize(&self) -> Vec<u8>;
}

/// The 45-byte capture-start request (spec §4.2 table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub trigger_type: u8,
    pub trigger: u8,
    pub inverted_or_count: u8,
    pub trigger_value: u16,
    /// Up to 24 channel numbers, in request order.
    pub channels: Vec<u8>,
    pub frequency: u32,
    pub pre_samples: u32,
    pub post_samples: u32,
    pub loop_count: u8,
    pub measure: bool,
    pub capture_mode: PackingMode,
}

impl Serialize for CaptureRequest {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = [0u8; CAPTURE_REQUEST_LEN];
        buf[0] = self.trigger_type;
        buf[1] = self.trigger;
        buf[2] = self.inverted_or_count;
        buf[3..5].copy_from_slice(&self.trigger_value.to_le_bytes());
        for (i, &ch) in self.channels.iter().take(24).enumerate() {
            buf[5 + i] = ch;
        }
        buf[29] = self.channels.len().min(24) as u8;
        buf[30..34].copy_from_slice(&self.frequency.to_le_bytes());
        buf[34..38].copy_from_slice(&self.pre_samples.to_le_bytes());
        buf[38..42].copy_from_slice(&self.post_samples.to_le_bytes());
        buf[42] = self.loop_count;
        buf[43] = self.measure as u8;
        buf[44] = self.capture_mode.wire_index();
        buf.to_vec()
    }
}

impl CaptureRequest {
    /// Build the wire edge-trigger-shaped request directly from a validated
    /// `CaptureSession` plus the channel ordering and packing mode chosen by
    /// the planner. Latency-compensated fields (pre/post/loop/measure) are
    /// expected to already reflect the §4.5 offset adjustment for
    /// Complex/Fast triggers.
    pub fn from_session(
        session: &CaptureSession,
        channels: Vec<u8>,
        mode: PackingMode,
        pre_samples: u32,
        post_samples: u32,
        loop_count: u8,
        measure: bool,
    ) -> Self {
        use crate::session::TriggerType;
        let (trigger, inverted_or_count, trigger_value) = match session.trigger_type {
            TriggerType::Edge | TriggerType::Blast => {
                (session.trigger_channel, session.trigger_inverted as u8, 0u16)
            }
            TriggerType::Complex | TriggerType::Fast => (
                session.trigger_channel,
                session.trigger_bit_count,
                session.trigger_pattern,
            ),
        };
        Self {
            trigger_type: session.trigger_type.wire_value(),
            trigger,
            inverted_or_count,
            trigger_value,
            channels,
            frequency: session.frequency,
            pre_samples,
            post_samples,
            loop_count,
            measure,
            capture_mode: mode,
        }
    }
}

/// The 115-byte network-configuration request (spec §4.2).
///
/// `ssid`/`password`/`ip` are raw bytes, null-padded, not null-terminated if
/// they fill the field exactly (spec §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub ssid: String,
    pub password: String,
    pub ip: String,
    pub port: u16,
}

fn pad_field(s: &str, len: usize) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = vec![0u8; len];
    let n = bytes.len().min(len);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

impl Serialize for NetworkConfig {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(NETWORK_CONFIG_LEN);
        buf.extend_from_slice(&pad_field(&self.ssid, 33));
        buf.extend_from_slice(&pad_field(&self.password, 64));
        buf.extend_from_slice(&pad_field(&self.ip, 16));
        buf.extend_from_slice(&self.port.to_le_bytes());
        debug_assert_eq!(buf.len(), NETWORK_CONFIG_LEN);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Channel, TriggerType};

    fn base_session() -> CaptureSession {
        CaptureSession {
            frequency: 24_000_000,
            pre_trigger_samples: 1000,
            post_trigger_samples: 9000,
            trigger_type: TriggerType::Edge,
            trigger_channel: 0,
            trigger_inverted: false,
            trigger_bit_count: 1,
            trigger_pattern: 0,
            loop_count: 0,
            measure_bursts: false,
            capture_channels: vec![Channel::new(0, "CH0"), Channel::new(1, "CH1")],
            bursts: None,
        }
    }

    #[test]
    fn capture_request_length_is_always_45() {
        let req = CaptureRequest::from_session(
            &base_session(),
            vec![0, 1],
            PackingMode::M8,
            1000,
            9000,
            0,
            false,
        );
        assert_eq!(req.serialize().len(), CAPTURE_REQUEST_LEN);
    }

    #[test]
    fn network_config_length_is_always_115() {
        let cfg = NetworkConfig {
            ssid: "lab-rig".into(),
            password: "hunter2".into(),
            ip: "192.168.2.1".into(),
            port: 5555,
        };
        assert_eq!(cfg.serialize().len(), NETWORK_CONFIG_LEN);
    }

    #[test]
    fn scenario_a_single_device_edge_two_channels() {
        let session = base_session();
        let req = CaptureRequest::from_session(
            &session,
            session.channel_numbers(),
            PackingMode::M8,
            1000,
            9000,
            0,
            false,
        );
        let bytes = req.serialize();
        assert_eq!(&bytes[0..3], &[0, 0, 0]);
        assert_eq!(&bytes[5..7], &[0, 1]);
        assert_eq!(bytes[29], 2);
        assert_eq!(u32::from_le_bytes(bytes[30..34].try_into().unwrap()), 24_000_000);
        assert_eq!(bytes[44], 0);
    }

    #[test]
    fn scenario_b_complex_trigger_offset_fields() {
        let mut session = base_session();
        session.trigger_type = TriggerType::Complex;
        session.frequency = 10_000_000;
        session.pre_trigger_samples = 500;
        session.post_trigger_samples = 9500;
        session.trigger_bit_count = 1;
        session.trigger_channel = 0;
        // offset = 1, per spec §4.5 worked example
        let req = CaptureRequest::from_session(
            &session,
            session.channel_numbers(),
            PackingMode::M8,
            501,
            9499,
            0,
            false,
        );
        let bytes = req.serialize();
        assert_eq!(u32::from_le_bytes(bytes[34..38].try_into().unwrap()), 501);
        assert_eq!(u32::from_le_bytes(bytes[38..42].try_into().unwrap()), 9499);
        assert_eq!(bytes[42], 0);
        assert_eq!(bytes[43], 0);
    }

    #[test]
    fn network_config_truncates_and_null_pads() {
        let long_ssid = "x".repeat(40);
        let cfg = NetworkConfig {
            ssid: long_ssid.clone(),
            password: "p".into(),
            ip: "10.0.0.1".into(),
            port: 1,
        };
        let bytes = cfg.serialize();
        assert_eq!(&bytes[0..33], long_ssid.as_bytes()[..33].to_vec().as_slice());
        // password field is mostly zero-padded after the 1-byte password
        assert_eq!(bytes[33], b'p');
        assert!(bytes[34..33 + 64].iter().all(|&b| b == 0));
    }
}
