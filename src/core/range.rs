//! Typed tick ranges.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::InternalError;
use super::identity::MessageRef;
use super::tick::{self, INFINITY, Tick};

/// A message occupying one tick of a Value/Uncommitted range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueRef {
    pub value_tick: Tick,
    pub item: MessageRef,
}

/// State carried by a range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TickState {
    /// No information.
    Unknown,
    /// A nack is outstanding.
    Requested,
    /// Source-side message whose transaction has not committed yet.
    Uncommitted(ValueRef),
    /// A message in flight. Ticks of the range other than `value_tick` are silence.
    Value(ValueRef),
    /// Durably finished, safe to discard.
    Completed,
}

/// Payload-free view of [`TickState`] for queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TickKind {
    Unknown,
    Requested,
    Uncommitted,
    Value,
    Completed,
}

impl TickKind {
    pub fn as_char(self) -> char {
        match self {
            TickKind::Unknown => 'U',
            TickKind::Requested => 'R',
            TickKind::Uncommitted => 'L',
            TickKind::Value => 'V',
            TickKind::Completed => 'C',
        }
    }
}

impl TickState {
    pub fn kind(&self) -> TickKind {
        match self {
            TickState::Unknown => TickKind::Unknown,
            TickState::Requested => TickKind::Requested,
            TickState::Uncommitted(_) => TickKind::Uncommitted,
            TickState::Value(_) => TickKind::Value,
            TickState::Completed => TickKind::Completed,
        }
    }

    pub fn value_ref(&self) -> Option<ValueRef> {
        match self {
            TickState::Uncommitted(v) | TickState::Value(v) => Some(*v),
            _ => None,
        }
    }

    /// Plain states merge with equal neighbours; message-bearing states never do.
    pub fn is_mergeable_with(&self, other: &TickState) -> bool {
        self.value_ref().is_none() && self == other
    }
}

/// A closed interval `[start, end]` sharing one state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TickRange {
    pub start: Tick,
    pub end: Tick,
    pub state: TickState,
}

impl TickRange {
    pub fn new(state: TickState, start: Tick, end: Tick) -> Result<Self, InternalError> {
        if start > end {
            return Err(InternalError::InvertedRange { start, end });
        }
        if let Some(v) = state.value_ref()
            && (v.value_tick < start || v.value_tick > end)
        {
            return Err(InternalError::InvalidReplacement {
                reason: format!("value tick {} outside [{start}, {end}]", v.value_tick),
            });
        }
        Ok(Self { start, end, state })
    }

    pub fn unknown(start: Tick, end: Tick) -> Self {
        Self::plain(TickState::Unknown, start, end)
    }

    pub fn requested(start: Tick, end: Tick) -> Self {
        Self::plain(TickState::Requested, start, end)
    }

    pub fn completed(start: Tick, end: Tick) -> Self {
        Self::plain(TickState::Completed, start, end)
    }

    fn plain(state: TickState, start: Tick, end: Tick) -> Self {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        Self { start, end, state }
    }

    /// Single-tick value range.
    pub fn value(tick: Tick, item: MessageRef) -> Self {
        Self::combined_value(tick, tick, tick, item)
    }

    /// Value at `value_tick` with silence over the rest of `[start, end]`.
    pub fn combined_value(start: Tick, value_tick: Tick, end: Tick, item: MessageRef) -> Self {
        let start = start.min(value_tick);
        let end = end.max(value_tick);
        Self {
            start,
            end,
            state: TickState::Value(ValueRef { value_tick, item }),
        }
    }

    pub fn uncommitted(start: Tick, value_tick: Tick, end: Tick, item: MessageRef) -> Self {
        let start = start.min(value_tick);
        let end = end.max(value_tick);
        Self {
            start,
            end,
            state: TickState::Uncommitted(ValueRef { value_tick, item }),
        }
    }

    pub fn kind(&self) -> TickKind {
        self.state.kind()
    }

    pub fn value_ref(&self) -> Option<ValueRef> {
        self.state.value_ref()
    }

    pub fn value_tick(&self) -> Option<Tick> {
        self.value_ref().map(|v| v.value_tick)
    }

    pub fn contains(&self, tick: Tick) -> bool {
        self.start <= tick && tick <= self.end
    }

    pub fn overlaps(&self, start: Tick, end: Tick) -> bool {
        self.start <= end && start <= self.end
    }

    /// Number of ticks covered, saturating for the infinite tail.
    pub fn tick_count(&self) -> u64 {
        (self.end - self.start).saturating_add(1)
    }

    pub fn with_state(&self, state: TickState) -> Self {
        Self {
            start: self.start,
            end: self.end,
            state,
        }
    }

    /// The part of this range inside `[start, end]`, or `None` if disjoint.
    ///
    /// A message-bearing range clipped so that its value tick falls outside
    /// the kept part turns into silence.
    pub fn clipped(&self, start: Tick, end: Tick) -> Option<Self> {
        if !self.overlaps(start, end) {
            return None;
        }
        let start = start.max(self.start);
        let end = end.min(self.end);
        let state = match self.state.value_ref() {
            Some(v) if v.value_tick < start || v.value_tick > end => TickState::Completed,
            _ => self.state,
        };
        Some(Self { start, end, state })
    }
}

impl fmt::Display for TickRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{},{}]",
            self.kind().as_char(),
            tick::display(self.start),
            tick::display(self.end)
        )?;
        if let Some(v) = self.value_ref() {
            write!(f, "@{}", v.value_tick)?;
        }
        Ok(())
    }
}

/// The whole tick space, unknown.
pub fn unknown_universe() -> TickRange {
    TickRange::unknown(0, INFINITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clipping_a_value_range_away_from_its_tick_leaves_silence() {
        let r = TickRange::combined_value(3, 7, 9, MessageRef::new(1));
        let low = r.clipped(0, 5).unwrap();
        assert_eq!((low.start, low.end), (3, 5));
        assert_eq!(low.kind(), TickKind::Completed);

        let mid = r.clipped(6, 8).unwrap();
        assert_eq!(mid.kind(), TickKind::Value);
        assert_eq!(mid.value_tick(), Some(7));

        assert!(r.clipped(10, 20).is_none());
    }

    #[test]
    fn new_validates_bounds() {
        assert!(TickRange::new(TickState::Unknown, 5, 4).is_err());
        let v = ValueRef {
            value_tick: 12,
            item: MessageRef::new(1),
        };
        assert!(TickRange::new(TickState::Value(v), 1, 10).is_err());
        assert!(TickRange::new(TickState::Value(v), 1, 12).is_ok());
    }

    #[test]
    fn display_marks_infinity() {
        assert_eq!(unknown_universe().to_string(), "U[0,inf]");
        assert_eq!(
            TickRange::value(4, MessageRef::new(2)).to_string(),
            "V[4,4]@4"
        );
    }
}
