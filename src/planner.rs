//! Capture planner and validator (C5): packing-mode limits, full parameter
//! validation, and the Complex/Fast latency-offset formula (spec §4.5).

use crate::error::{CaptureError, CaptureResult};
use crate::identity::DeviceIdentity;
use crate::session::{CaptureSession, PackingMode, TriggerType};

/// Sample-count limits derived from a device's buffer size and the chosen
/// packing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureLimits {
    pub total_samples: u32,
    pub min_pre_samples: u32,
    pub min_post_samples: u32,
    pub max_pre_samples: u32,
    pub max_post_samples: u32,
    pub max_total_samples: u32,
}

impl CaptureLimits {
    /// Margin is chosen as the smallest value that keeps
    /// `maxPreSamples + maxPostSamples <= totalSamples` (spec §4.5) —
    /// equivalently, `maxTotalSamples = totalSamples - margin`.
    pub fn compute(buffer_size_bytes: u32, mode: PackingMode) -> Self {
        let total_samples = buffer_size_bytes / mode.divisor();
        let min_pre_samples = 2;
        let min_post_samples = 2;
        let max_pre_samples = total_samples / 10;
        let margin = max_pre_samples.saturating_sub(min_pre_samples);
        let max_post_samples = total_samples.saturating_sub(min_pre_samples + margin);
        let max_total_samples = min_pre_samples + max_post_samples;
        Self {
            total_samples,
            min_pre_samples,
            min_post_samples,
            max_pre_samples,
            max_post_samples,
            max_total_samples,
        }
    }
}

/// Caller-context flags that alter validation rules. `allow_external_trigger`
/// permits `triggerChannel == channelCount` (the external-trigger slot used
/// when constructing multi-device slave sessions per §4.8); ordinary callers
/// leave this `false` (spec §4.5 open question, resolved in favor of an
/// explicit opt-in rather than an implicit always-allowed +1 slot).
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    pub allow_external_trigger: bool,
}

/// The fully validated, ready-to-serialize plan for a single device's capture.
#[derive(Debug, Clone)]
pub struct Plan {
    pub mode: PackingMode,
    pub limits: CaptureLimits,
    pub channels: Vec<u8>,
    /// Pre/post sample counts with the Complex/Fast latency offset folded in.
    pub pre_samples: u32,
    pub post_samples: u32,
    pub loop_count: u8,
    pub measure: bool,
}

/// The constant trigger delay, in units of `1/maxFrequency`, per trigger type
/// (spec §4.5: 3 for Fast, 5 for Complex, not applicable otherwise).
fn delay_constant(trigger_type: TriggerType) -> Option<f64> {
    match trigger_type {
        TriggerType::Fast => Some(3.0),
        TriggerType::Complex => Some(5.0),
        TriggerType::Edge | TriggerType::Blast => None,
    }
}

/// `offset = round(delayPeriodNs/samplePeriodNs + 0.3)` (spec §4.5). The
/// `+0.3` is an empirical trigger-latency bias and must not be "cleaned up"
/// (spec §9).
pub fn latency_offset(frequency: u32, max_frequency: u32, trigger_type: TriggerType) -> u32 {
    let Some(delay_const) = delay_constant(trigger_type) else { return 0 };
    let sample_period_ns = 1e9 / frequency as f64;
    let delay_period_ns = delay_const * 1e9 / max_frequency as f64;
    (delay_period_ns / sample_period_ns + 0.3).round() as u32
}

/// Validate `session` against `identity`'s capabilities and produce a fully
/// resolved [`Plan`]. Returns [`CaptureError::BadParams`] describing the
/// first violated constraint.
pub fn plan(session: &CaptureSession, identity: &DeviceIdentity, opts: PlanOptions) -> CaptureResult<Plan> {
    let channel_count = identity.channel_count;
    let channels = session.channel_numbers();

    for &ch in &channels {
        if ch >= channel_count {
            return Err(CaptureError::BadParams(format!(
                "channel {ch} out of range [0, {channel_count})"
            )));
        }
    }

    let trigger_upper = if opts.allow_external_trigger { channel_count } else { channel_count.saturating_sub(1) };
    if session.trigger_channel > trigger_upper {
        return Err(CaptureError::BadParams(format!(
            "triggerChannel {} out of range [0, {trigger_upper}]",
            session.trigger_channel
        )));
    }

    let mode = PackingMode::select(&channels.iter().copied().collect());
    let limits = CaptureLimits::compute(identity.buffer_size_bytes, mode);

    let pre = session.pre_trigger_samples;
    let post = session.post_trigger_samples;
    if pre < limits.min_pre_samples || pre > limits.max_pre_samples {
        return Err(CaptureError::BadParams(format!(
            "preTriggerSamples {pre} out of range [{}, {}]",
            limits.min_pre_samples, limits.max_pre_samples
        )));
    }
    if post < limits.min_post_samples || post > limits.max_post_samples {
        return Err(CaptureError::BadParams(format!(
            "postTriggerSamples {post} out of range [{}, {}]",
            limits.min_post_samples, limits.max_post_samples
        )));
    }
    if pre + post > limits.max_total_samples {
        return Err(CaptureError::BadParams(format!(
            "pre + post ({}) exceeds maxTotalSamples ({})",
            pre + post,
            limits.max_total_samples
        )));
    }

    if session.frequency < identity.min_frequency() || session.frequency > identity.max_frequency {
        return Err(CaptureError::BadParams(format!(
            "frequency {} out of range [{}, {}]",
            session.frequency,
            identity.min_frequency(),
            identity.max_frequency
        )));
    }

    match session.trigger_type {
        TriggerType::Edge => {
            if session.loop_count > 254 {
                return Err(CaptureError::BadParams("Edge loopCount must be <= 254".into()));
            }
        }
        TriggerType::Blast => {}
        TriggerType::Complex => {
            validate_pattern_trigger(session, 16)?;
        }
        TriggerType::Fast => {
            validate_pattern_trigger(session, 5)?;
        }
    }

    let (offset, loop_count, measure) = match delay_constant(session.trigger_type) {
        Some(_) => (latency_offset(session.frequency, identity.max_frequency, session.trigger_type), 0u8, false),
        None => (0, session.loop_count, session.measure_bursts),
    };

    Ok(Plan {
        mode,
        limits,
        channels,
        pre_samples: pre + offset,
        post_samples: post - offset,
        loop_count,
        measure,
    })
}

fn validate_pattern_trigger(session: &CaptureSession, width: u8) -> CaptureResult<()> {
    let bits = session.trigger_bit_count;
    let ch = session.trigger_channel;
    if bits < 1 || bits > width {
        return Err(CaptureError::BadParams(format!("triggerBitCount {bits} out of range [1, {width}]")));
    }
    if ch > width - 1 {
        return Err(CaptureError::BadParams(format!("triggerChannel {ch} out of range [0, {}]", width - 1)));
    }
    if ch + bits > width {
        return Err(CaptureError::BadParams(format!(
            "triggerChannel + triggerBitCount ({}) exceeds {width}",
            ch + bits
        )));
    }
    Ok(())
}
