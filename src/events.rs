//! Caller-facing event surface (spec §6, §9).
//!
//! The original source drives these through an in-process event emitter;
//! the teacher's way of surfacing "things happened" without a logging crate
//! is a `FnMut` callback set on the connection (`Connection::set_on_send`/
//! `set_on_recv`), so events here follow the same shape — a single-subscriber
//! callback invoked inline, not a broadcast channel.

use crate::session::CaptureSession;

/// An event delivered to a session's subscriber. `CaptureCompleted` fires
/// exactly once per accepted `start` (spec §5 ordering guarantee).
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    CaptureCompleted { success: bool, session: CaptureSession },
    Error { message: String },
    StatusChanged { is_connected: bool, is_capturing: bool, battery_voltage: String },
}

/// Voltage sentinel reported when a device reports none (spec §6).
pub const VOLTAGE_DISCONNECTED: &str = "DISCONNECTED";
pub const VOLTAGE_UNSUPPORTED: &str = "UNSUPPORTED";
pub const VOLTAGE_TIMEOUT: &str = "TIMEOUT";
pub const VOLTAGE_ERROR: &str = "ERROR";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Channel, TriggerType};

    #[test]
    fn capture_completed_carries_the_session_snapshot() {
        let session = CaptureSession {
            frequency: 1,
            pre_trigger_samples: 1,
            post_trigger_samples: 1,
            trigger_type: TriggerType::Edge,
            trigger_channel: 0,
            trigger_inverted: false,
            trigger_bit_count: 1,
            trigger_pattern: 0,
            loop_count: 0,
            measure_bursts: false,
            capture_channels: vec![Channel::new(0, "A")],
            bursts: None,
        };
        let event = CaptureEvent::CaptureCompleted { success: true, session: session.clone() };
        match event {
            CaptureEvent::CaptureCompleted { success, session: s } => {
                assert!(success);
                assert_eq!(s.capture_channels.len(), session.capture_channels.len());
            }
            _ => panic!("wrong variant"),
        }
    }
}
