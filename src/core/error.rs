//! Core capability errors (parsing, validation, interval-engine invariants).
//!
//! These are bounded and stable: core errors represent domain/refusal states,
//! not library implementation details.

use thiserror::Error;

use crate::core::tick::Tick;
use crate::error::{Effect, Transience};

/// Invalid identifier string.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum InvalidId {
    #[error("stream id `{raw}` is invalid: {reason}")]
    Stream { raw: String, reason: String },
    #[error("neighbour id `{raw}` is invalid: {reason}")]
    Neighbour { raw: String, reason: String },
    #[error("reliability `{raw}` is invalid")]
    Reliability { raw: String },
}

/// Generic range violation.
#[derive(Debug, Error, Clone)]
#[error("{field} value {value} out of range {min}..={max}")]
pub struct RangeError {
    pub field: &'static str,
    pub value: u8,
    pub min: u8,
    pub max: u8,
}

/// Broken interval-engine or protocol invariant.
///
/// Never expected in a healthy process. The stream that raised it should be
/// treated as suspect.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InternalError {
    #[error("range list gap after {op}: [{left_start}, {left_end}] is followed by [{right_start}, {right_end}]")]
    Gap {
        op: &'static str,
        left_start: Tick,
        left_end: Tick,
        right_start: Tick,
        right_end: Tick,
    },
    #[error("range list does not cover [0, inf] after {op}: first start {first_start}, last end {last_end}")]
    Coverage {
        op: &'static str,
        first_start: Tick,
        last_end: Tick,
    },
    #[error("split at {tick} outside range [{start}, {end}] under cursor")]
    SplitOutsideRange { tick: Tick, start: Tick, end: Tick },
    #[error("replacement is not an ascending contiguous run: {reason}")]
    InvalidReplacement { reason: String },
    #[error("mark taken at version {mark} is stale (list at version {current})")]
    StaleMark { mark: u64, current: u64 },
    #[error("range [{start}, {end}] is inverted")]
    InvertedRange { start: Tick, end: Tick },
}

#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    InvalidId(#[from] InvalidId),
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl CoreError {
    pub fn transience(&self) -> Transience {
        // Core errors are pure domain/input failures.
        Transience::Permanent
    }

    pub fn effect(&self) -> Effect {
        match self {
            CoreError::Internal(_) => Effect::Unknown,
            _ => Effect::None,
        }
    }
}
