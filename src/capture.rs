//! Single-device capture engine (C6): the plan -> start -> await ->
//! read -> parse -> complete protocol sequence (spec §4.6).

use std::time::Duration;

use crate::device::{CaptureStartError, DeviceSession, CMD_START_CAPTURE};
use crate::error::{CaptureError, CaptureResult};
use crate::events::CaptureEvent;
use crate::frame;
use crate::parser;
use crate::planner::{self, Plan, PlanOptions};
use crate::session::{BurstInfo, CaptureSession};
use crate::wire::{CaptureRequest, Serialize};

const CAPTURE_STARTED_TIMEOUT: Duration = Duration::from_secs(10);
const PAYLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const HEADER_LEN: usize = 4;

/// Run a complete capture against `device`, mutating `session` in place with
/// the resulting samples/bursts on success. Emits exactly one
/// `captureCompleted` through `on_event` regardless of outcome (spec §5).
pub fn start(
    device: &mut DeviceSession,
    session: &mut CaptureSession,
    on_event: &mut dyn FnMut(CaptureEvent),
) -> CaptureResult<()> {
    start_with_options(device, session, on_event, PlanOptions::default())
}

/// As [`start`], but with explicit planner options. The multi-device
/// coordinator (`src/multi.rs`) uses this to opt slave sessions into the
/// external-trigger slot (`allow_external_trigger: true`) when it builds
/// their synthetic Edge-triggered sessions (spec §4.8, §9 open question).
pub(crate) fn start_with_options(
    device: &mut DeviceSession,
    session: &mut CaptureSession,
    on_event: &mut dyn FnMut(CaptureEvent),
    opts: PlanOptions,
) -> CaptureResult<()> {
    if !device.is_connected() {
        return Err(CaptureError::HardwareError);
    }
    let identity = device.identity().cloned().ok_or(CaptureError::HardwareError)?;
    let plan = planner::plan(session, &identity, opts)?;

    if let Err(e) = device.begin_capture() {
        return Err(match e {
            CaptureStartError::Busy => CaptureError::Busy,
            CaptureStartError::NotConnected => CaptureError::HardwareError,
        });
    }

    let request = CaptureRequest::from_session(
        session,
        plan.channels.clone(),
        plan.mode,
        plan.pre_samples,
        plan.post_samples,
        plan.loop_count,
        plan.measure,
    );

    let result = run_capture_sequence(device, session, &plan, &request);
    device.end_capture();

    on_event(CaptureEvent::CaptureCompleted { success: result.is_ok(), session: session.clone() });
    result
}

/// Cancel the current (or a not-yet-started) capture. Always succeeds from
/// the caller's perspective (spec §4.6, scenario F) — the session returns to
/// `connected` even if the stop byte failed to write.
pub fn stop(device: &mut DeviceSession) -> bool {
    device.stop();
    true
}

fn run_capture_sequence(
    device: &mut DeviceSession,
    session: &mut CaptureSession,
    plan: &Plan,
    request: &CaptureRequest,
) -> CaptureResult<()> {
    let transport = device.transport_mut();

    let mut payload = vec![CMD_START_CAPTURE];
    payload.extend(request.serialize());
    transport.write_all(&frame::encode(&payload)).map_err(CaptureError::Device)?;

    let line = transport.read_line(CAPTURE_STARTED_TIMEOUT).map_err(CaptureError::Device)?;
    if line != "CAPTURE_STARTED" {
        return Err(CaptureError::UnexpectedError(format!(
            "expected CAPTURE_STARTED, got {line:?}"
        )));
    }

    let header = transport.read_binary(HEADER_LEN, PAYLOAD_TIMEOUT).map_err(CaptureError::Device)?;
    let header_value = u32::from_le_bytes(header.try_into().unwrap());
    let timestamp_bytes = timestamp_trailer_len(plan);
    let is_serial = transport.target().is_serial();

    // Serial devices use the header as a generic length; network devices use
    // it as the sample count directly (spec §4.6 step 5). The two arithmetics
    // are equivalent when the invariants hold; on a malformed device they can
    // diverge, and the spec explicitly leaves behavior on mismatch undefined —
    // so fail the capture rather than guess (spec §9 open question). No
    // exemption for a zero header: a real device never reports a zero-length
    // payload for a started capture, so `0` is itself a mismatch.
    let sample_count = if is_serial {
        let expected = plan.pre_samples + plan.post_samples;
        let expected_len = expected as usize * plan.mode.divisor() as usize + 1 + timestamp_bytes;
        if header_value as usize != expected_len {
            return Err(CaptureError::UnexpectedError(format!(
                "serial length header {header_value} does not match expected payload length {expected_len}"
            )));
        }
        expected
    } else {
        header_value
    };

    let body_len = sample_count as usize * plan.mode.divisor() as usize + 1 + timestamp_bytes;
    let body = transport.read_binary(body_len, PAYLOAD_TIMEOUT).map_err(CaptureError::Device)?;

    let (channels, bursts) = parser::parse_capture_payload(
        &body,
        sample_count as usize,
        plan.mode,
        plan.channels.len(),
        plan.measure,
        plan.loop_count,
        session.frequency,
        plan.pre_samples,
        plan.post_samples,
    )?;

    apply_parsed_results(session, &plan.channels, channels, bursts);
    Ok(())
}

fn timestamp_trailer_len(plan: &Plan) -> usize {
    if plan.measure && plan.loop_count > 0 {
        (plan.loop_count as usize + 2) * 4
    } else {
        0
    }
}

fn apply_parsed_results(
    session: &mut CaptureSession,
    plan_channels: &[u8],
    unpacked: Vec<Vec<u8>>,
    bursts: Vec<BurstInfo>,
) {
    for ch in &mut session.capture_channels {
        if let Some(idx) = plan_channels.iter().position(|&n| n == ch.number) {
            ch.samples = unpacked[idx].clone();
        }
    }
    session.bursts = if bursts.is_empty() { None } else { Some(bursts) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Channel, PackingMode, TriggerType};

    fn plan_fixture(measure: bool, loop_count: u8) -> Plan {
        Plan {
            mode: PackingMode::M8,
            limits: planner::CaptureLimits::compute(32 * 1024, PackingMode::M8),
            channels: vec![0, 1],
            pre_samples: 100,
            post_samples: 200,
            loop_count,
            measure,
        }
    }

    #[test]
    fn timestamp_trailer_len_zero_without_measure() {
        assert_eq!(timestamp_trailer_len(&plan_fixture(false, 3)), 0);
    }

    #[test]
    fn timestamp_trailer_len_follows_loop_count_plus_two() {
        assert_eq!(timestamp_trailer_len(&plan_fixture(true, 3)), (3 + 2) * 4);
    }

    #[test]
    fn timestamp_trailer_len_zero_when_loop_count_is_zero() {
        assert_eq!(timestamp_trailer_len(&plan_fixture(true, 0)), 0);
    }

    #[test]
    fn apply_parsed_results_maps_by_channel_number_not_index() {
        let mut session = CaptureSession {
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
            capture_channels: vec![Channel::new(5, "A"), Channel::new(2, "B")],
            bursts: None,
        };
        // plan_channels order is request order [2, 5]; unpacked[0] belongs to
        // channel 2, unpacked[1] to channel 5.
        apply_parsed_results(&mut session, &[2, 5], vec![vec![0, 1], vec![1, 0]], Vec::new());
        assert_eq!(session.capture_channels[0].samples, vec![1, 0]); // channel 5
        assert_eq!(session.capture_channels[1].samples, vec![0, 1]); // channel 2
    }

    #[test]
    fn apply_parsed_results_clears_bursts_when_empty() {
        let mut session = CaptureSession {
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
            bursts: Some(vec![BurstInfo { sample_start: 0, sample_end: 1, sample_gap: 0, time_gap_nanos: 0 }]),
        };
        apply_parsed_results(&mut session, &[0], vec![vec![1]], Vec::new());
        assert!(session.bursts.is_none());
    }
}
