//! Throughput delta tracking.
//!
//! Turns cumulative egress byte counters plus a coarse device clock into
//! per-interval deltas relative to the first interval that carried traffic.
//! The tracker never assumes the counters were cleared between samples; it
//! always subtracts the previous absolute reading.

use std::fmt;

use serde::Serialize;

use crate::error::ControlError;

/// Traffic classification tracked independently by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Benign,
    Malicious,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Benign, Channel::Malicious];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Benign => "benign",
            Channel::Malicious => "malicious",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cumulative byte counters of both channels at one sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelTotals {
    pub benign: u64,
    pub malicious: u64,
}

impl ChannelTotals {
    pub fn new(benign: u64, malicious: u64) -> Self {
        Self { benign, malicious }
    }

    pub fn get(&self, channel: Channel) -> u64 {
        match channel {
            Channel::Benign => self.benign,
            Channel::Malicious => self.malicious,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.benign == 0 && self.malicious == 0
    }
}

/// One output row for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThroughputRecord {
    pub channel: Channel,
    /// Nanoseconds since the first qualifying interval.
    pub relative_timestamp: u64,
    pub delta_bytes: u64,
}

impl ThroughputRecord {
    /// Delta in bits, or `None` if it does not fit in a `u64`.
    pub fn delta_bits(&self) -> Option<u64> {
        self.delta_bytes.checked_mul(BITS_PER_BYTE)
    }
}

const BITS_PER_BYTE: u64 = 8;

/// Rebuild a full-resolution timestamp from the device clock register.
/// The device drops the low `shift` bits; they are taken as zero.
pub fn reconstruct_timestamp(raw: u64, shift: u32) -> u64 {
    raw << shift
}

/// Outcome of one sample: rows for every channel that measured cleanly and
/// the anomalies of those that did not.
#[derive(Debug, Default)]
pub struct Observation {
    pub records: Vec<ThroughputRecord>,
    pub anomalies: Vec<ControlError>,
}

impl Observation {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.anomalies.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ThroughputTracker {
    baseline_timestamp: Option<u64>,
    last: ChannelTotals,
}

impl ThroughputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sample. Nothing is produced for an idle interval.
    ///
    /// Channels are measured independently. A channel whose counter went
    /// backwards gets a [`ControlError::CounterAnomaly`] instead of a row and
    /// is re-based on its new reading; the other channel still gets its row.
    /// A delta too large to express in bits is reported as
    /// [`ControlError::BitsOverflow`] the same way.
    ///
    /// A clock earlier than the baseline fails the whole sample with
    /// [`ControlError::ClockAnomaly`] and leaves the tracker unchanged.
    pub fn observe(
        &mut self,
        timestamp: u64,
        totals: ChannelTotals,
    ) -> Result<Observation, ControlError> {
        if totals.is_idle() {
            return Ok(Observation::default());
        }

        let (relative_timestamp, previous) = match self.baseline_timestamp {
            None => {
                self.baseline_timestamp = Some(timestamp);
                (0, ChannelTotals::default())
            }
            Some(baseline) => {
                let relative = timestamp
                    .checked_sub(baseline)
                    .ok_or(ControlError::ClockAnomaly {
                        baseline,
                        current: timestamp,
                    })?;
                (relative, self.last)
            }
        };
        self.last = totals;

        let mut observation = Observation::default();
        for channel in Channel::ALL {
            let (prev, cur) = (previous.get(channel), totals.get(channel));
            let Some(delta_bytes) = cur.checked_sub(prev) else {
                observation.anomalies.push(ControlError::CounterAnomaly {
                    channel,
                    previous: prev,
                    current: cur,
                });
                continue;
            };
            let record = ThroughputRecord {
                channel,
                relative_timestamp,
                delta_bytes,
            };
            if record.delta_bits().is_none() {
                observation.anomalies.push(ControlError::BitsOverflow {
                    channel,
                    delta_bytes,
                });
                continue;
            }
            observation.records.push(record);
        }
        Ok(observation)
    }

    pub fn baseline_timestamp(&self) -> Option<u64> {
        self.baseline_timestamp
    }

    pub fn first_sample_seen(&self) -> bool {
        self.baseline_timestamp.is_some()
    }

    pub fn last_totals(&self) -> ChannelTotals {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(records: &[ThroughputRecord], channel: Channel) -> Vec<(u64, u64)> {
        records
            .iter()
            .filter(|r| r.channel == channel)
            .map(|r| (r.relative_timestamp, r.delta_bytes))
            .collect()
    }

    #[test]
    fn baseline_then_deltas() {
        let mut tracker = ThroughputTracker::new();

        let first = tracker.observe(0, ChannelTotals::new(0, 0)).unwrap();
        assert!(first.is_empty());
        assert!(!tracker.first_sample_seen());

        let second = tracker.observe(5, ChannelTotals::new(400, 1200)).unwrap().records;
        assert_eq!(pairs(&second, Channel::Malicious), vec![(0, 1200)]);
        assert_eq!(pairs(&second, Channel::Benign), vec![(0, 400)]);
        assert_eq!(tracker.baseline_timestamp(), Some(5));

        let third = tracker.observe(9, ChannelTotals::new(400, 3000)).unwrap().records;
        assert_eq!(pairs(&third, Channel::Malicious), vec![(4, 1800)]);
        assert_eq!(pairs(&third, Channel::Benign), vec![(4, 0)]);
    }

    #[test]
    fn one_busy_channel_qualifies_both() {
        let mut tracker = ThroughputTracker::new();
        let records = tracker.observe(100, ChannelTotals::new(0, 64)).unwrap().records;
        assert_eq!(records.len(), 2);
        assert_eq!(pairs(&records, Channel::Benign), vec![(0, 0)]);
    }

    #[test]
    fn counter_regression_is_reported() {
        let mut tracker = ThroughputTracker::new();
        tracker.observe(10, ChannelTotals::new(500, 900)).unwrap();

        let obs = tracker.observe(20, ChannelTotals::new(600, 300)).unwrap();
        assert_eq!(obs.anomalies.len(), 1);
        match &obs.anomalies[0] {
            ControlError::CounterAnomaly {
                channel,
                previous,
                current,
            } => {
                assert_eq!(*channel, Channel::Malicious);
                assert_eq!(*previous, 900);
                assert_eq!(*current, 300);
            }
            other => panic!("expected counter anomaly, got {other:?}"),
        }
        assert_eq!(pairs(&obs.records, Channel::Benign), vec![(10, 100)]);
        assert!(pairs(&obs.records, Channel::Malicious).is_empty());

        let next = tracker.observe(30, ChannelTotals::new(650, 350)).unwrap();
        assert!(next.anomalies.is_empty());
        assert_eq!(pairs(&next.records, Channel::Benign), vec![(20, 50)]);
        assert_eq!(pairs(&next.records, Channel::Malicious), vec![(20, 50)]);
        assert_eq!(tracker.baseline_timestamp(), Some(10));
    }

    #[test]
    fn healthy_channel_deltas_add_up_across_a_regression() {
        let mut tracker = ThroughputTracker::new();
        let samples = [(1, 500, 900), (2, 600, 300), (3, 650, 400)];

        let mut benign_sum = 0;
        for (ts, benign, malicious) in samples {
            let obs = tracker.observe(ts, ChannelTotals::new(benign, malicious)).unwrap();
            benign_sum += obs
                .records
                .iter()
                .filter(|r| r.channel == Channel::Benign)
                .map(|r| r.delta_bytes)
                .sum::<u64>();
        }
        assert_eq!(benign_sum, 650);
    }

    #[test]
    fn oversized_delta_is_reported_not_clamped() {
        let mut tracker = ThroughputTracker::new();
        let obs = tracker.observe(1, ChannelTotals::new(100, u64::MAX)).unwrap();

        assert_eq!(pairs(&obs.records, Channel::Benign), vec![(0, 100)]);
        assert_eq!(obs.anomalies.len(), 1);
        assert!(matches!(
            obs.anomalies[0],
            ControlError::BitsOverflow {
                channel: Channel::Malicious,
                delta_bytes: u64::MAX
            }
        ));
        assert!(obs.anomalies[0].is_anomaly());
    }

    #[test]
    fn clock_before_baseline_is_reported() {
        let mut tracker = ThroughputTracker::new();
        tracker.observe(1 << 20, ChannelTotals::new(1, 1)).unwrap();
        let err = tracker.observe(1 << 16, ChannelTotals::new(2, 2)).unwrap_err();
        assert!(matches!(err, ControlError::ClockAnomaly { .. }));
        assert!(err.is_anomaly());
        assert_eq!(tracker.last_totals(), ChannelTotals::new(1, 1));
    }

    #[test]
    fn idle_interval_after_baseline_emits_nothing() {
        let mut tracker = ThroughputTracker::new();
        tracker.observe(1, ChannelTotals::new(10, 10)).unwrap();
        assert!(tracker.observe(2, ChannelTotals::new(0, 0)).unwrap().is_empty());
        assert_eq!(tracker.last_totals(), ChannelTotals::new(10, 10));
    }

    #[test]
    fn timestamp_reconstruction_shifts_in_zero_bits() {
        assert_eq!(reconstruct_timestamp(0, 16), 0);
        assert_eq!(reconstruct_timestamp(3, 16), 196_608);
        assert_eq!(reconstruct_timestamp(3, 0), 3);
    }

    #[test]
    fn bits_are_bytes_times_eight() {
        let r = ThroughputRecord {
            channel: Channel::Benign,
            relative_timestamp: 0,
            delta_bytes: 1500,
        };
        assert_eq!(r.delta_bits(), Some(12_000));

        let huge = ThroughputRecord {
            delta_bytes: u64::MAX / 4,
            ..r
        };
        assert_eq!(huge.delta_bits(), None);
    }
}
