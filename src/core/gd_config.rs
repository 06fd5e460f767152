//! Guaranteed-delivery protocol tunables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timer thresholds and window sizes shared by every stream.
///
/// Values are explicit about their units.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GdConfig {
    /// Internal input: delay before coalesced acks go upstream. 0 sends at once.
    pub ack_coalesce_ms: u64,
    /// Internal input: how long a Requested range waits before reverting to Unknown.
    pub request_forget_ms: u64,
    /// Target: delay before a new gap is first nacked.
    pub gap_curiosity_ms: u64,
    /// Target: base re-nack interval for a still-missing gap.
    pub nack_repetition_ms: u64,
    /// Target: cap for the backed-off re-nack interval.
    pub max_nack_repetition_ms: u64,
    /// Source: initial AckExpected interval.
    pub ack_expected_ms: u64,
    /// Source: cap for the backed-off AckExpected interval.
    pub max_ack_expected_ms: u64,
    /// Source: messages in doubt before further values are held back.
    pub send_window: u64,
    /// Target: silence moving the stream this many ticks past the last ack triggers an ack.
    pub ack_gap_for_silence_ticks: u64,
    /// Target: duplicate percentage that triggers a warning.
    pub repeated_value_percentage: u64,
    /// Target: values per duplicate-statistics sample.
    pub repeated_value_interval: u64,
    /// Target: minimum gap between two duplicate warnings.
    pub repeated_value_warning_ms: u64,
    /// Target: AckExpected rounds a blocked stream waits before re-nacking the blocking tick.
    pub blocked_renack_rounds: u32,
    /// Input side: delay before an unanswered flush query is repeated.
    pub flush_query_ms: u64,
}

impl Default for GdConfig {
    fn default() -> Self {
        Self {
            ack_coalesce_ms: 30,
            request_forget_ms: 2_000,
            gap_curiosity_ms: 200,
            nack_repetition_ms: 2_000,
            max_nack_repetition_ms: 60_000,
            ack_expected_ms: 3_000,
            max_ack_expected_ms: 60_000,
            send_window: 1_000,
            ack_gap_for_silence_ticks: 50,
            repeated_value_percentage: 50,
            repeated_value_interval: 100,
            repeated_value_warning_ms: 60_000,
            blocked_renack_rounds: 3,
            flush_query_ms: 10_000,
        }
    }
}

impl GdConfig {
    pub fn ack_coalesce(&self) -> Duration {
        Duration::from_millis(self.ack_coalesce_ms)
    }

    pub fn request_forget(&self) -> Duration {
        Duration::from_millis(self.request_forget_ms)
    }

    pub fn gap_curiosity(&self) -> Duration {
        Duration::from_millis(self.gap_curiosity_ms)
    }

    pub fn nack_repetition(&self) -> Duration {
        Duration::from_millis(self.nack_repetition_ms)
    }

    pub fn flush_query(&self) -> Duration {
        Duration::from_millis(self.flush_query_ms)
    }

    /// Largest re-nack backoff multiplier: how many base intervals fit in the cap.
    pub fn max_nack_repetitions(&self) -> u64 {
        if self.nack_repetition_ms == 0 {
            1
        } else {
            (self.max_nack_repetition_ms / self.nack_repetition_ms).max(1)
        }
    }
}
