//! Multi-device coordinator (C8): parallel connect, aggregate capability
//! computation, channel partitioning, and synchronized slave/master capture
//! (spec §4.8).
//!
//! Grounded on the teacher's exclusive-ownership model — a `Connection`
//! owns its stream outright — generalized to a coordinator that owns a
//! fleet of [`DeviceSession`]s exclusively. Parallel connect uses
//! `std::thread::scope` rather than a new async runtime dependency, matching
//! the synchronous-I/O style used throughout the rest of the pack for this
//! class of device driver.

use crate::addr::DeviceTarget;
use crate::capture;
use crate::device::DeviceSession;
use crate::error::{CaptureError, CaptureResult, DeviceError, DeviceResult};
use crate::events::CaptureEvent;
use crate::planner::{self, PlanOptions};
use crate::session::{CaptureSession, Channel, TriggerType};

pub const MIN_MEMBERS: usize = 2;
pub const MAX_MEMBERS: usize = 5;

/// Capabilities computed across every connected member (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateCapabilities {
    pub channel_count: u32,
    pub max_frequency: u32,
    pub min_frequency: u32,
    pub buffer_size_bytes: u32,
    /// Always 0 — multi-device does not support Blast (spec §4.8).
    pub blast_frequency: u32,
    pub per_device_channels: u8,
    pub member_count: usize,
}

/// A synchronized fleet of 2-5 devices, started together through a shared
/// external-trigger bus.
pub struct MultiDeviceSession {
    members: Vec<DeviceSession>,
    capabilities: AggregateCapabilities,
}

impl MultiDeviceSession {
    pub fn capabilities(&self) -> AggregateCapabilities {
        self.capabilities
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

/// Open and handshake every member in parallel, then validate exact version
/// agreement and compute aggregate capabilities (spec §4.8).
pub fn connect(targets: Vec<DeviceTarget>) -> DeviceResult<MultiDeviceSession> {
    if !(MIN_MEMBERS..=MAX_MEMBERS).contains(&targets.len()) {
        return Err(DeviceError::InvalidAddress(format!(
            "multi-device requires {MIN_MEMBERS}-{MAX_MEMBERS} connection strings, got {}",
            targets.len()
        )));
    }

    let results: Vec<DeviceResult<DeviceSession>> = std::thread::scope(|scope| {
        let handles: Vec<_> = targets
            .into_iter()
            .map(|target| {
                scope.spawn(move || {
                    let mut device = DeviceSession::open(target)?;
                    device.handshake()?;
                    Ok(device)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().expect("device connect thread panicked")).collect()
    });

    let mut members = Vec::with_capacity(results.len());
    for result in results {
        members.push(result?);
    }

    let reference_version = members[0].identity().expect("handshake populates identity").version_tuple();
    for member in &members[1..] {
        let v = member.identity().expect("handshake populates identity").version_tuple();
        if v != reference_version {
            return Err(DeviceError::UnsupportedVersion {
                found: v.unwrap_or((0, 0)),
                minimum: reference_version.unwrap_or((0, 0)),
            });
        }
    }

    let per_device_channels =
        members.iter().map(|m| m.identity().unwrap().channel_count).min().unwrap();
    let max_frequency = members.iter().map(|m| m.identity().unwrap().max_frequency).min().unwrap();
    let min_frequency = members.iter().map(|m| m.identity().unwrap().min_frequency()).max().unwrap();
    let buffer_size_bytes = members.iter().map(|m| m.identity().unwrap().buffer_size_bytes).min().unwrap();

    let capabilities = AggregateCapabilities {
        channel_count: per_device_channels as u32 * members.len() as u32,
        max_frequency,
        min_frequency,
        buffer_size_bytes,
        blast_frequency: 0,
        per_device_channels,
        member_count: members.len(),
    };

    Ok(MultiDeviceSession { members, capabilities })
}

/// Partition a request-ordered global channel list across `member_count`
/// devices of `per_device` channels each. Returns the per-device local
/// channel lists plus a `(global, device_index, local)` mapping used to
/// merge results back afterward (spec §4.8, scenario E).
fn partition_channels(
    channels: &[u8],
    per_device: u8,
    member_count: usize,
) -> CaptureResult<(Vec<Vec<u8>>, Vec<(u8, u8, u8)>)> {
    let mut by_device = vec![Vec::new(); member_count];
    let mut mapping = Vec::with_capacity(channels.len());
    for &global in channels {
        let d = (global / per_device) as usize;
        if d >= member_count {
            return Err(CaptureError::BadParams(format!(
                "channel {global} exceeds multi-device channel count {}",
                per_device as usize * member_count
            )));
        }
        let local = global - d as u8 * per_device;
        by_device[d].push(local);
        mapping.push((global, d as u8, local));
    }
    Ok((by_device, mapping))
}

/// Run a synchronized capture across every member: slaves armed first (in
/// order), the master started last so its trigger fans out over the bus. Any
/// member failure aborts and stops the whole fleet (spec §4.8).
pub fn start(
    multi: &mut MultiDeviceSession,
    session: &mut CaptureSession,
    on_event: &mut dyn FnMut(CaptureEvent),
) -> CaptureResult<()> {
    if session.trigger_type == TriggerType::Edge {
        return Err(CaptureError::BadParams(
            "multi-device synchronization requires Complex or Fast, not Edge".into(),
        ));
    }

    let per_device = multi.capabilities.per_device_channels;
    let member_count = multi.capabilities.member_count;
    let (by_device, mapping) = partition_channels(&session.channel_numbers(), per_device, member_count)?;

    let offset = planner::latency_offset(session.frequency, multi.capabilities.max_frequency, session.trigger_type);

    let mut device_sessions: Vec<CaptureSession> = Vec::with_capacity(member_count);
    for (d, locals) in by_device.iter().enumerate() {
        let channels: Vec<Channel> = locals.iter().map(|&n| Channel::new(n, format!("CH{n}"))).collect();
        if d == 0 {
            let mut master = session.clone();
            master.capture_channels = channels;
            device_sessions.push(master);
        } else {
            device_sessions.push(CaptureSession {
                frequency: session.frequency,
                pre_trigger_samples: session.pre_trigger_samples + offset,
                post_trigger_samples: session.post_trigger_samples.saturating_sub(offset),
                trigger_type: TriggerType::Edge,
                trigger_channel: per_device,
                trigger_inverted: false,
                trigger_bit_count: 1,
                trigger_pattern: 0,
                loop_count: 0,
                measure_bursts: false,
                capture_channels: channels,
                bursts: None,
            });
        }
    }

    let abort = |multi: &mut MultiDeviceSession, session: &CaptureSession, err: CaptureError,
                 on_event: &mut dyn FnMut(CaptureEvent)| {
        for member in &mut multi.members {
            capture::stop(member);
        }
        on_event(CaptureEvent::CaptureCompleted { success: false, session: session.clone() });
        err
    };

    // Slave sessions carry the external-trigger channel (`trigger_channel ==
    // per_device`), so they must opt in to the planner's external-trigger
    // allowance; the master keeps its caller-supplied trigger channel and
    // plans with the ordinary (strict) rule.
    let slave_opts = PlanOptions { allow_external_trigger: true };

    for d in 1..member_count {
        if by_device[d].is_empty() {
            continue;
        }
        if let Err(e) =
            capture::start_with_options(&mut multi.members[d], &mut device_sessions[d], &mut |_| {}, slave_opts)
        {
            return Err(abort(multi, session, e, on_event));
        }
    }

    if !by_device[0].is_empty() {
        if let Err(e) = capture::start(&mut multi.members[0], &mut device_sessions[0], &mut |_| {}) {
            return Err(abort(multi, session, e, on_event));
        }
    }

    merge_results(session, &device_sessions, &mapping);
    on_event(CaptureEvent::CaptureCompleted { success: true, session: session.clone() });
    Ok(())
}

fn merge_results(session: &mut CaptureSession, device_sessions: &[CaptureSession], mapping: &[(u8, u8, u8)]) {
    for &(global, device_idx, local) in mapping {
        let Some(source) = device_sessions[device_idx as usize]
            .capture_channels
            .iter()
            .find(|c| c.number == local)
        else {
            continue;
        };
        for ch in &mut session.capture_channels {
            if ch.number == global {
                ch.samples = source.samples.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_e_partition_is_total_and_disjoint() {
        let (by_device, mapping) = partition_channels(&[0, 8, 17, 23], 16, 2).unwrap();
        assert_eq!(by_device[0], vec![0, 8]);
        assert_eq!(by_device[1], vec![1, 7]);
        assert_eq!(mapping, vec![(0, 0, 0), (8, 0, 8), (17, 1, 1), (23, 1, 7)]);
    }

    #[test]
    fn partition_rejects_channel_beyond_fleet_capacity() {
        let err = partition_channels(&[0, 40], 16, 2).unwrap_err();
        assert!(matches!(err, CaptureError::BadParams(_)));
    }

    #[test]
    fn partition_every_channel_lands_in_exactly_one_bucket() {
        let channels: Vec<u8> = (0..32).collect();
        let (by_device, mapping) = partition_channels(&channels, 16, 2).unwrap();
        let total: usize = by_device.iter().map(|v| v.len()).sum();
        assert_eq!(total, channels.len());
        assert_eq!(mapping.len(), channels.len());
        for (global, d, local) in mapping {
            assert_eq!(local, global - d * 16);
            assert!(local < 16);
        }
    }

    #[test]
    fn merge_results_maps_slave_locals_back_to_globals() {
        let mut session = CaptureSession {
            frequency: 1,
            pre_trigger_samples: 1,
            post_trigger_samples: 1,
            trigger_type: TriggerType::Complex,
            trigger_channel: 0,
            trigger_inverted: false,
            trigger_bit_count: 1,
            trigger_pattern: 0,
            loop_count: 0,
            measure_bursts: false,
            capture_channels: vec![Channel::new(17, "CH17"), Channel::new(23, "CH23")],
            bursts: None,
        };
        let mut slave_ch1 = Channel::new(1, "CH1");
        slave_ch1.samples = vec![1, 0, 1];
        let mut slave_ch7 = Channel::new(7, "CH7");
        slave_ch7.samples = vec![0, 1, 0];
        let device_sessions = vec![
            session.clone(),
            CaptureSession { capture_channels: vec![slave_ch1, slave_ch7], ..session.clone() },
        ];
        let mapping = vec![(17u8, 1u8, 1u8), (23u8, 1u8, 7u8)];
        merge_results(&mut session, &device_sessions, &mapping);
        assert_eq!(session.capture_channels[0].samples, vec![1, 0, 1]);
        assert_eq!(session.capture_channels[1].samples, vec![0, 1, 0]);
    }
}
