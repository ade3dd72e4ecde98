//! Sample-payload parser (C7): unpacks what the device actually sends —
//! packed sample words and an optional burst-timestamp trailer — into dense
//! per-channel bit arrays and [`BurstInfo`] entries (spec §4.7).

use crate::error::{WireError, WireResult};
use crate::session::{BurstInfo, PackingMode};

/// The device's internal tick period (a 200 MHz clock), in nanoseconds.
const TICK_NANOS: f64 = 5.0;

/// Unpack `sample_count` little-endian packed words of `divisor` bytes each
/// from `data`, then split bit `k` of each word into the `k`-th channel's
/// sample stream — bit position, not channel number, per the requested
/// channel order (spec §4.7).
pub fn unpack_samples(
    data: &[u8],
    sample_count: usize,
    divisor: u32,
    channel_count: usize,
) -> WireResult<Vec<Vec<u8>>> {
    let width = divisor as usize;
    let needed = sample_count * width;
    if data.len() < needed {
        return Err(WireError::payload_too_short("packed samples", needed, data.len()).with_raw(data));
    }

    let mut words = Vec::with_capacity(sample_count);
    for i in 0..sample_count {
        let chunk = &data[i * width..(i + 1) * width];
        let mut buf = [0u8; 4];
        buf[..width].copy_from_slice(chunk);
        words.push(u32::from_le_bytes(buf));
    }

    let mut channels = vec![Vec::with_capacity(sample_count); channel_count];
    for word in &words {
        for (k, channel) in channels.iter_mut().enumerate() {
            channel.push(((word >> k) & 1) as u8);
        }
    }
    Ok(channels)
}

/// Parse `timestamp_count` little-endian u32 timestamps from `data` (which
/// must already have the one-byte length indicator stripped).
pub fn parse_timestamps(data: &[u8], timestamp_count: usize) -> WireResult<Vec<u32>> {
    let needed = timestamp_count * 4;
    if data.len() < needed {
        return Err(WireError::payload_too_short("burst timestamps", needed, data.len()).with_raw(data));
    }
    Ok(data[..needed]
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

/// Undo the device's decrementing 24-bit SysTick counter with its 8-bit wrap
/// tag: keep the high byte, invert the low 24 bits (spec §4.7 step 1).
fn normalize_timestamp(t: u32) -> u64 {
    ((t & 0xFF00_0000) | (0x00FF_FFFF - (t & 0x00FF_FFFF))) as u64
}

/// Reconstruct the burst list from normalized, wrap-unfolded, jitter-corrected
/// timestamps (spec §4.7 steps 1-5). Returns an empty list when fewer than 3
/// timestamps are present — too few to bracket even one inter-burst gap.
pub fn reconstruct_bursts(raw_timestamps: &[u32], frequency: u32, pre: u32, post: u32) -> Vec<BurstInfo> {
    let n = raw_timestamps.len();
    if n < 3 {
        return Vec::new();
    }

    let mut t: Vec<u64> = raw_timestamps.iter().copied().map(normalize_timestamp).collect();

    let ns_per_sample = 1e9 / frequency as f64;
    let ticks_per_sample = ns_per_sample / TICK_NANOS;
    let ns_per_burst = ns_per_sample * post as f64;
    let ticks_per_burst = ns_per_burst / TICK_NANOS;

    // delay[i - 2] for i = 2..n (spec step 4); computed in the same left-to-right
    // scan as the wrap-unfold/jitter correction of step 3, so a correction
    // applied at index i is visible to every later index's `t'[i-1]` lookup.
    let mut delay = vec![0u64; n.saturating_sub(2)];
    for i in 1..n {
        let top = if t[i] < t[i - 1] { t[i] + (1u64 << 32) } else { t[i] };
        if (top as f64 - t[i - 1] as f64) <= ticks_per_burst {
            let diff = (ticks_per_burst - (top as f64 - t[i - 1] as f64) + 2.0 * ticks_per_sample).floor();
            let diff = diff.max(0.0) as u64;
            for slot in t.iter_mut().skip(i) {
                *slot += diff;
            }
        }
        if i >= 2 {
            let d_ns = (top as f64 - t[i - 1] as f64 - ticks_per_burst.floor()) * TICK_NANOS;
            delay[i - 2] = d_ns.max(0.0) as u64;
        }
    }

    let mut bursts = Vec::with_capacity(n - 1);
    for i in 1..n {
        let sample_start = if i == 1 { pre } else { pre + post * (i as u32 - 1) };
        let sample_end = pre + post * i as u32;
        let time_gap_nanos = if i == 1 { 0 } else { delay[i - 2] };
        let sample_gap = if i == 1 { 0 } else { (time_gap_nanos as f64 / ns_per_sample).floor() as u32 };
        bursts.push(BurstInfo { sample_start, sample_end, sample_gap, time_gap_nanos });
    }
    bursts
}

/// Parse a complete post-header capture payload body: packed samples, the
/// timestamp-length byte, and (when present) the timestamp trailer.
#[allow(clippy::too_many_arguments)]
pub fn parse_capture_payload(
    body: &[u8],
    sample_count: usize,
    mode: PackingMode,
    channel_count: usize,
    measure_bursts: bool,
    loop_count: u8,
    frequency: u32,
    pre: u32,
    post: u32,
) -> WireResult<(Vec<Vec<u8>>, Vec<BurstInfo>)> {
    let divisor = mode.divisor();
    let sample_bytes = sample_count * divisor as usize;
    if body.len() < sample_bytes + 1 {
        return Err(WireError::payload_too_short("capture payload", sample_bytes + 1, body.len()).with_raw(body));
    }

    let channels = unpack_samples(&body[..sample_bytes], sample_count, divisor, channel_count)?;
    let rest = &body[sample_bytes + 1..];

    let timestamp_count = if measure_bursts && loop_count > 0 { loop_count as usize + 2 } else { 0 };
    let bursts = if timestamp_count >= 3 {
        let raw_ts = parse_timestamps(rest, timestamp_count)?;
        reconstruct_bursts(&raw_ts, frequency, pre, post)
    } else {
        Vec::new()
    };

    Ok((channels, bursts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpack_m8_bit_k_maps_to_kth_requested_channel() {
        // word 0b0000_0101 -> channel 0 = 1, channel 1 = 0, channel 2 = 1
        let data = [0b0000_0101u8];
        let channels = unpack_samples(&data, 1, 1, 3).unwrap();
        assert_eq!(channels[0], vec![1]);
        assert_eq!(channels[1], vec![0]);
        assert_eq!(channels[2], vec![1]);
    }

    #[test]
    fn unpack_m16_reads_little_endian_words() {
        let data = [0x01, 0x00, 0x00, 0x02]; // word0=1, word1=512
        let channels = unpack_samples(&data, 2, 2, 10).unwrap();
        assert_eq!(channels[0], vec![1, 0]);
        assert_eq!(channels[9], vec![0, 1]);
    }

    #[test]
    fn unpack_rejects_truncated_input() {
        let data = [0x00u8];
        assert!(unpack_samples(&data, 2, 1, 4).is_err());
    }

    #[test]
    fn normalize_timestamp_keeps_high_byte_inverts_low_24() {
        let t = 0x42_00_00_01u32;
        let t_prime = normalize_timestamp(t);
        assert_eq!(t_prime, (0x42_00_00_00u64) | (0x00FF_FFFF - 1));
    }

    #[test]
    fn fewer_than_three_timestamps_yields_no_bursts() {
        assert!(reconstruct_bursts(&[1, 2], 1_000_000, 100, 200).is_empty());
    }

    #[test]
    fn scenario_d_blast_capture_four_bursts() {
        // pre=100, post=200, loopCount=3 -> timestampCount = 5, bursts = 4.
        let pre = 100;
        let post = 200;
        let raw = [0x00FF_FFFFu32, 0x00FF_FFF0, 0x00FF_FFE0, 0x00FF_FFD0, 0x00FF_FFC0];
        let bursts = reconstruct_bursts(&raw, 24_000_000, pre, post);
        assert_eq!(bursts.len(), 4);
        let ends: Vec<u32> = bursts.iter().map(|b| b.sample_end).collect();
        assert_eq!(ends, vec![300, 500, 700, 900]);
        assert_eq!(bursts[0].sample_start, 100);
        assert_eq!(bursts[0].time_gap_nanos, 0);
        assert_eq!(bursts[0].sample_gap, 0);
    }

    #[test]
    fn parse_capture_payload_produces_totalsamples_length_channels() {
        let sample_count = 4;
        let mut body = vec![0u8; sample_count + 1]; // M8: 1 byte/sample + length byte
        body[0] = 0b01;
        body[1] = 0b10;
        body[2] = 0b01;
        body[3] = 0b00;
        let (channels, bursts) =
            parse_capture_payload(&body, sample_count, PackingMode::M8, 2, false, 0, 24_000_000, 0, 0).unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].len(), sample_count);
        assert_eq!(channels[1].len(), sample_count);
        assert!(channels.iter().all(|c| c.iter().all(|&b| b == 0 || b == 1)));
        assert!(bursts.is_empty());
    }
}
