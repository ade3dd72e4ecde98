//! Capture data model (spec §3): packing mode, trigger type, channels, and
//! the `CaptureSession` request/result container.

use std::collections::BTreeSet;

/// How many bits per sample the device packs on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PackingMode {
    M8,
    M16,
    M24,
}

impl PackingMode {
    /// Bytes per packed sample for this mode.
    pub fn divisor(self) -> u32 {
        match self {
            PackingMode::M8 => 1,
            PackingMode::M16 => 2,
            PackingMode::M24 => 4,
        }
    }

    /// Wire mode index used in `CaptureRequest.captureMode` (spec §4.2).
    pub fn wire_index(self) -> u8 {
        match self {
            PackingMode::M8 => 0,
            PackingMode::M16 => 1,
            PackingMode::M24 => 2,
        }
    }

    /// Smallest mode whose ceiling exceeds the maximum channel index in use
    /// (spec §4.5). Empty channel sets select `M8`.
    pub fn select(channels: &BTreeSet<u8>) -> PackingMode {
        let max = channels.iter().copied().max().unwrap_or(0);
        if max < 8 {
            PackingMode::M8
        } else if max < 16 {
            PackingMode::M16
        } else {
            PackingMode::M24
        }
    }
}

/// Trigger behavior for a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TriggerType {
    Edge,
    Complex,
    Fast,
    Blast,
}

impl TriggerType {
    /// Wire value in `CaptureRequest.triggerType` (spec §4.2).
    pub fn wire_value(self) -> u8 {
        match self {
            TriggerType::Edge => 0,
            TriggerType::Complex => 1,
            TriggerType::Fast => 2,
            TriggerType::Blast => 3,
        }
    }
}

/// A single captured/requested channel.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Channel {
    pub number: u8,
    pub name: String,
    pub hidden: bool,
    /// Per-sample 0/1 bytes, populated after a successful capture.
    pub samples: Vec<u8>,
}

impl Channel {
    pub fn new(number: u8, name: impl Into<String>) -> Self {
        Self { number, name: name.into(), hidden: false, samples: Vec::new() }
    }
}

/// One iteration of a repeated post-trigger capture (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BurstInfo {
    pub sample_start: u32,
    pub sample_end: u32,
    pub sample_gap: u32,
    pub time_gap_nanos: u64,
}

/// The request/result container passed between caller and the acquisition core.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CaptureSession {
    pub frequency: u32,
    pub pre_trigger_samples: u32,
    pub post_trigger_samples: u32,
    pub trigger_type: TriggerType,
    /// 0..=DeviceChannelCount; the "+1" slot is the external trigger input.
    pub trigger_channel: u8,
    pub trigger_inverted: bool,
    /// 1..=16 for Complex, 1..=5 for Fast.
    pub trigger_bit_count: u8,
    /// Up to 16 bits, low-order bit is `trigger_channel`.
    pub trigger_pattern: u16,
    /// 0..=254 Edge, 0..=255 Blast; 0 for Complex/Fast.
    pub loop_count: u8,
    pub measure_bursts: bool,
    /// Ordered, unique-by-number channel set (insertion order preserved).
    pub capture_channels: Vec<Channel>,
    pub bursts: Option<Vec<BurstInfo>>,
}

impl CaptureSession {
    pub fn total_samples(&self) -> u32 {
        self.pre_trigger_samples + self.post_trigger_samples
    }

    /// The set of requested channel numbers, in request order, deduplicated
    /// by number (first occurrence wins — spec §3 invariant on `capture_channels`).
    pub fn channel_numbers(&self) -> Vec<u8> {
        let mut seen = BTreeSet::new();
        self.capture_channels
            .iter()
            .filter(|c| seen.insert(c.number))
            .map(|c| c.number)
            .collect()
    }

    pub fn packing_mode(&self) -> PackingMode {
        PackingMode::select(&self.channel_numbers().into_iter().collect())
    }

    /// Clear prior sample/burst data without touching channel identities —
    /// used before a retry so a failed capture never leaves stale samples
    /// that outlive the failure (spec §3 invariant 1).
    pub fn clear_results(&mut self) {
        for ch in &mut self.capture_channels {
            ch.samples.clear();
        }
        self.bursts = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(channels: &[u8]) -> CaptureSession {
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
            capture_channels: channels.iter().map(|&n| Channel::new(n, format!("CH{n}"))).collect(),
            bursts: None,
        }
    }

    #[test]
    fn packing_mode_selection_boundaries() {
        assert_eq!(PackingMode::select(&[].into_iter().collect()), PackingMode::M8);
        assert_eq!(PackingMode::select(&[7].into_iter().collect()), PackingMode::M8);
        assert_eq!(PackingMode::select(&[8].into_iter().collect()), PackingMode::M16);
        assert_eq!(PackingMode::select(&[15].into_iter().collect()), PackingMode::M16);
        assert_eq!(PackingMode::select(&[16].into_iter().collect()), PackingMode::M24);
        assert_eq!(PackingMode::select(&[23].into_iter().collect()), PackingMode::M24);
    }

    #[test]
    fn packing_mode_never_truncates() {
        // property 1: for any valid channel set, max(S) < 8 * 2^mode_index
        for max_ch in 0u8..24 {
            let set: std::collections::BTreeSet<u8> = (0..=max_ch).collect();
            let mode = PackingMode::select(&set);
            let ceiling = 8u32 << mode.wire_index();
            assert!((max_ch as u32) < ceiling);
        }
    }

    #[test]
    fn total_samples_and_channel_numbers() {
        let s = session(&[0, 1]);
        assert_eq!(s.total_samples(), 10_000);
        assert_eq!(s.channel_numbers(), vec![0, 1]);
        assert_eq!(s.packing_mode(), PackingMode::M8);
    }

    #[test]
    fn dedup_preserves_first_occurrence_order() {
        let mut s = session(&[3, 1, 3, 2]);
        s.capture_channels[2].name = "dup".to_string();
        assert_eq!(s.channel_numbers(), vec![3, 1, 2]);
    }

    #[test]
    fn clear_results_drops_samples_and_bursts() {
        let mut s = session(&[0]);
        s.capture_channels[0].samples = vec![1, 0, 1];
        s.bursts = Some(vec![BurstInfo { sample_start: 0, sample_end: 10, sample_gap: 0, time_gap_nanos: 0 }]);
        s.clear_results();
        assert!(s.capture_channels[0].samples.is_empty());
        assert!(s.bursts.is_none());
    }
}
