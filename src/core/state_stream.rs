//! Per-stream tick state on top of the interval engine.
//!
//! A `StateStream` always starts with `[0, completed_prefix]` as one
//! Completed range. Writes never touch ticks at or below the prefix, plain
//! neighbours with equal state are kept merged, and the prefix absorbs any
//! Completed run that starts right after it.

use std::fmt;

use super::error::InternalError;
use super::range::{TickKind, TickRange, TickState};
use super::range_list::RangeList;
use super::tick::{self, INFINITY, Tick};

#[derive(Clone, Debug, PartialEq)]
pub struct StateStream {
    list: RangeList,
}

impl Default for StateStream {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStream {
    /// Tick 0 Completed, everything above Unknown.
    pub fn new() -> Self {
        Self::with_completed_prefix(0)
    }

    pub fn with_completed_prefix(prefix: Tick) -> Self {
        Self {
            list: RangeList::with_completed_prefix(prefix),
        }
    }

    pub fn list(&self) -> &RangeList {
        &self.list
    }

    pub fn completed_prefix(&self) -> Tick {
        let first = self.list.first();
        if first.kind() == TickKind::Completed {
            first.end
        } else {
            0
        }
    }

    /// Mark `[0, prefix]` Completed. Returns whether the prefix moved.
    pub fn set_completed_prefix(&mut self, prefix: Tick) -> Result<bool, InternalError> {
        if prefix <= self.completed_prefix() {
            return Ok(false);
        }
        self.list.replace_prefix(TickRange::completed(0, prefix))?;
        self.coalesce_prefix()?;
        Ok(true)
    }

    /// Write a plain-state range. Requested only replaces Unknown, Unknown
    /// only replaces Requested, Completed replaces both. Message-bearing
    /// ranges go through [`StateStream::write_combined_range`].
    pub fn write_range(&mut self, range: TickRange) -> Result<bool, InternalError> {
        let target = range.state;
        let changed = match target {
            TickState::Requested => {
                self.rewrite(range.start, range.end, |r| {
                    (r.kind() == TickKind::Unknown).then_some(TickState::Requested)
                })?
            }
            TickState::Unknown => {
                self.rewrite(range.start, range.end, |r| {
                    (r.kind() == TickKind::Requested).then_some(TickState::Unknown)
                })?
            }
            TickState::Completed => self.rewrite(range.start, range.end, |r| {
                matches!(r.kind(), TickKind::Unknown | TickKind::Requested)
                    .then_some(TickState::Completed)
            })?,
            TickState::Value(_) | TickState::Uncommitted(_) => {
                return self.write_combined_range(range);
            }
        };
        Ok(changed.is_some())
    }

    /// Silence over `[start, end]` for every tick not carrying a message.
    pub fn write_completed_range(&mut self, start: Tick, end: Tick) -> Result<bool, InternalError> {
        self.write_range(TickRange::completed(start, end))
    }

    /// Mark `[start, end]` Completed whatever it held. Returns the Completed
    /// run enclosing the range afterwards.
    pub fn write_completed_range_forced(
        &mut self,
        start: Tick,
        end: Tick,
    ) -> Result<TickRange, InternalError> {
        self.rewrite(start, end, |r| {
            (r.kind() != TickKind::Completed).then_some(TickState::Completed)
        })?;
        let (start, end) = self.find_completed_range(start, end);
        Ok(TickRange::completed(start, end))
    }

    /// Write a Value or Uncommitted range. Ticks of the range other than its
    /// value tick are silence.
    ///
    /// Returns `false` when the value tick already holds a value, is
    /// Completed, or is Uncommitted and the write is Uncommitted too.
    pub fn write_combined_range(&mut self, range: TickRange) -> Result<bool, InternalError> {
        let Some(value) = range.value_ref() else {
            return Err(InternalError::InvalidReplacement {
                reason: format!("{range} carries no value"),
            });
        };
        let value_tick = value.value_tick;
        let floor = tick::next(self.completed_prefix());
        if value_tick < floor {
            return Ok(false);
        }
        let current = *self.list.range_at(value_tick);
        let duplicate = match (current.kind(), range.kind()) {
            (TickKind::Value | TickKind::Completed, _) => true,
            (TickKind::Uncommitted, TickKind::Uncommitted) => true,
            _ => false,
        };
        if duplicate {
            return Ok(false);
        }

        // Never swallow a neighbouring message into this range's silence.
        let mut start = range.start.max(floor);
        let mut end = range.end;
        for other in self.list.overlapping(start, end) {
            if other.contains(value_tick) || other.value_ref().is_none() {
                continue;
            }
            if other.end < value_tick {
                start = start.max(other.end + 1);
            } else {
                end = end.min(other.start - 1);
            }
        }
        let written = TickRange::new(range.state, start, end)?;
        self.replace_merged(vec![written])?;
        Ok(true)
    }

    /// Bounds of the Completed run around `[start, end]`, extended over
    /// adjacent Completed ranges on both sides.
    pub fn find_completed_range(&self, start: Tick, end: Tick) -> (Tick, Tick) {
        let ranges = self.list.ranges();
        let mut lo = self.list.index_of(start);
        let mut hi = self.list.index_of(end);
        while lo > 0 && ranges[lo - 1].kind() == TickKind::Completed {
            lo -= 1;
        }
        while hi + 1 < ranges.len() && ranges[hi + 1].kind() == TickKind::Completed {
            hi += 1;
        }
        (ranges[lo].start.min(start), ranges[hi].end.max(end))
    }

    pub fn range_at(&self, tick: Tick) -> TickRange {
        *self.list.range_at(tick)
    }

    pub fn ranges_in(&self, start: Tick, end: Tick) -> Vec<TickRange> {
        let mut out = Vec::new();
        self.list.get(start, end, &mut out);
        out
    }

    /// Whether any tick of `[start, end]` is in state `kind`.
    pub fn contains_state(&self, start: Tick, end: Tick, kind: TickKind) -> bool {
        self.list
            .overlapping(start, end)
            .iter()
            .any(|r| r.kind() == kind)
    }

    /// Maximal runs inside `[start, end]` whose ticks satisfy `pred`, clipped
    /// to the query.
    pub fn segments(
        &self,
        start: Tick,
        end: Tick,
        pred: impl Fn(TickKind) -> bool,
    ) -> Vec<(Tick, Tick)> {
        let mut out: Vec<(Tick, Tick)> = Vec::new();
        if start > end {
            return out;
        }
        for r in self.list.overlapping(start, end) {
            if !pred(r.kind()) {
                continue;
            }
            let (s, e) = (r.start.max(start), r.end.min(end));
            match out.last_mut() {
                Some(last) if last.1 != INFINITY && last.1 + 1 == s => last.1 = e,
                _ => out.push((s, e)),
            }
        }
        out
    }

    /// Message-bearing ranges above the prefix, ascending.
    pub fn message_ranges(&self) -> Vec<TickRange> {
        self.list
            .iter()
            .filter(|r| r.value_ref().is_some())
            .copied()
            .collect()
    }

    /// Highest tick with any information, or the prefix if nothing is known
    /// above it.
    pub fn last_known_tick(&self) -> Tick {
        let last = self.list.last();
        if last.kind() == TickKind::Unknown {
            tick::prev(last.start)
        } else {
            INFINITY
        }
    }

    pub fn ticks_on_stream(&self) -> TicksOnStream {
        let ranges: Vec<TickRange> = self
            .list
            .iter()
            .skip(1)
            .filter(|r| r.end != INFINITY || r.value_ref().is_some())
            .copied()
            .collect();
        TicksOnStream {
            ranges: ranges.into_iter(),
            pending: None,
        }
    }

    pub fn state_string(&self) -> String {
        self.list.to_string()
    }

    /// Apply `f` to each part of `[start, end]` above the prefix; `Some`
    /// replaces that part's state. Returns the clipped bounds when anything
    /// changed.
    fn rewrite(
        &mut self,
        start: Tick,
        end: Tick,
        f: impl Fn(&TickRange) -> Option<TickState>,
    ) -> Result<Option<(Tick, Tick)>, InternalError> {
        let start = start.max(tick::next(self.completed_prefix()));
        if start > end {
            return Ok(None);
        }
        let mut pieces: Vec<TickRange> = Vec::new();
        let mut changed = false;
        for existing in self.list.overlapping(start, end) {
            let Some(clip) = existing.clipped(start, end) else {
                continue;
            };
            let piece = match f(&clip) {
                Some(state) if state != clip.state => {
                    changed = true;
                    clip.with_state(state)
                }
                _ => clip,
            };
            push_merged(&mut pieces, piece);
        }
        if !changed {
            return Ok(None);
        }
        self.replace_merged(pieces)?;
        Ok(Some((start, end)))
    }

    /// Replace with `pieces`, first widening the outer pieces over equal
    /// plain neighbours.
    fn replace_merged(&mut self, mut pieces: Vec<TickRange>) -> Result<(), InternalError> {
        if let Some(first) = pieces.first_mut()
            && first.start > 0
        {
            let before = *self.list.range_at(first.start - 1);
            if before.state.is_mergeable_with(&first.state) {
                first.start = before.start;
            }
        }
        if let Some(last) = pieces.last_mut()
            && last.end < INFINITY
        {
            let after = *self.list.range_at(last.end + 1);
            if after.state.is_mergeable_with(&last.state) {
                last.end = after.end;
            }
        }
        self.list.replace(&pieces)?;
        self.coalesce_prefix()
    }

    fn coalesce_prefix(&mut self) -> Result<(), InternalError> {
        let ranges = self.list.ranges();
        if ranges[0].kind() != TickKind::Completed {
            return Ok(());
        }
        let mut end = ranges[0].end;
        let mut absorbed = 0usize;
        for r in &ranges[1..] {
            if r.kind() != TickKind::Completed {
                break;
            }
            end = r.end;
            absorbed += 1;
        }
        if absorbed > 0 {
            self.list.replace_prefix(TickRange::completed(0, end))?;
        }
        Ok(())
    }
}

fn push_merged(pieces: &mut Vec<TickRange>, piece: TickRange) {
    if let Some(prev) = pieces.last_mut()
        && prev.state.is_mergeable_with(&piece.state)
    {
        prev.end = piece.end;
        return;
    }
    pieces.push(piece);
}

impl fmt::Display for StateStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.list, f)
    }
}

/// Non-Completed tick positions of a stream, computed lazily from a snapshot.
///
/// Message-bearing ranges yield their value tick; Unknown and Requested
/// ranges yield every tick they cover. The terminal infinite Unknown range
/// is skipped.
#[derive(Debug)]
pub struct TicksOnStream {
    ranges: std::vec::IntoIter<TickRange>,
    pending: Option<(Tick, Tick)>,
}

impl TicksOnStream {
    pub fn empty() -> Self {
        Self {
            ranges: Vec::new().into_iter(),
            pending: None,
        }
    }
}

impl Iterator for TicksOnStream {
    type Item = Tick;

    fn next(&mut self) -> Option<Tick> {
        loop {
            if let Some((next, end)) = self.pending {
                self.pending = (next < end).then(|| (next + 1, end));
                return Some(next);
            }
            let range = self.ranges.next()?;
            match range.state {
                TickState::Completed => continue,
                TickState::Value(v) | TickState::Uncommitted(v) => return Some(v.value_tick),
                TickState::Unknown | TickState::Requested => {
                    self.pending = Some((range.start, range.end));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::identity::MessageRef;

    fn item(n: u64) -> MessageRef {
        MessageRef::new(n)
    }

    #[test]
    fn starts_with_tick_zero_completed() {
        let s = StateStream::new();
        assert_eq!(s.completed_prefix(), 0);
        assert_eq!(s.state_string(), "C[0,0] U[1,inf]");
        assert_eq!(s.ticks_on_stream().count(), 0);
    }

    #[test]
    fn completed_runs_fold_into_prefix() {
        let mut s = StateStream::new();
        s.write_completed_range(3, 4).unwrap();
        assert_eq!(s.completed_prefix(), 0);
        s.write_completed_range(1, 2).unwrap();
        assert_eq!(s.completed_prefix(), 4);
        assert_eq!(s.state_string(), "C[0,4] U[5,inf]");
    }

    #[test]
    fn requested_never_overwrites_values() {
        let mut s = StateStream::new();
        assert!(s.write_combined_range(TickRange::value(5, item(1))).unwrap());
        assert!(s.write_range(TickRange::requested(1, 8)).unwrap());
        assert_eq!(s.state_string(), "C[0,0] R[1,4] V[5,5]@5 R[6,8] U[9,inf]");
        // forgetting only reverts Requested
        assert!(s.write_range(TickRange::unknown(1, 8)).unwrap());
        assert_eq!(s.state_string(), "C[0,0] U[1,4] V[5,5]@5 U[6,inf]");
        assert!(!s.write_range(TickRange::unknown(1, 8)).unwrap());
    }

    #[test]
    fn duplicate_values_are_reported() {
        let mut s = StateStream::new();
        assert!(s.write_combined_range(TickRange::value(2, item(1))).unwrap());
        assert!(!s.write_combined_range(TickRange::value(2, item(1))).unwrap());
        assert!(!s.write_combined_range(TickRange::value(0, item(1))).unwrap());
    }

    #[test]
    fn uncommitted_commits_to_value_once() {
        let mut s = StateStream::new();
        assert!(s.write_combined_range(TickRange::uncommitted(1, 1, 1, item(7))).unwrap());
        assert!(!s.write_combined_range(TickRange::uncommitted(1, 1, 1, item(7))).unwrap());
        assert!(s.write_combined_range(TickRange::value(1, item(7))).unwrap());
        assert!(s.contains_state(1, 1, TickKind::Value));
    }

    #[test]
    fn combined_range_stops_at_neighbouring_messages() {
        let mut s = StateStream::new();
        s.write_combined_range(TickRange::value(3, item(1))).unwrap();
        s.write_combined_range(TickRange::combined_value(1, 6, 9, item(2)))
            .unwrap();
        assert_eq!(s.state_string(), "C[0,0] U[1,2] V[3,3]@3 V[4,9]@6 U[10,inf]");
    }

    #[test]
    fn forced_completion_overwrites_values_and_reports_run() {
        let mut s = StateStream::new();
        s.write_combined_range(TickRange::value(2, item(1))).unwrap();
        s.write_completed_range(3, 5).unwrap();
        let run = s.write_completed_range_forced(2, 2).unwrap();
        assert_eq!((run.start, run.end), (2, 5));
        assert_eq!(s.completed_prefix(), 0);
        s.write_completed_range(1, 1).unwrap();
        assert_eq!(s.completed_prefix(), 5);
    }

    #[test]
    fn set_completed_prefix_is_monotonic() {
        let mut s = StateStream::new();
        assert!(s.set_completed_prefix(10).unwrap());
        assert!(!s.set_completed_prefix(4).unwrap());
        assert_eq!(s.completed_prefix(), 10);
        s.write_completed_range(11, 12).unwrap();
        assert_eq!(s.completed_prefix(), 12);
    }

    #[test]
    fn ticks_on_stream_lists_open_positions() {
        let mut s = StateStream::new();
        s.write_range(TickRange::requested(2, 3)).unwrap();
        s.write_combined_range(TickRange::combined_value(4, 6, 6, item(1)))
            .unwrap();
        s.write_completed_range(7, 8).unwrap();
        s.write_combined_range(TickRange::value(9, item(2))).unwrap();
        let ticks: Vec<_> = s.ticks_on_stream().collect();
        assert_eq!(ticks, vec![1, 2, 3, 6, 9]);
    }

    #[test]
    fn segments_merge_adjacent_matches() {
        let mut s = StateStream::new();
        s.write_range(TickRange::requested(3, 4)).unwrap();
        s.write_combined_range(TickRange::value(6, item(1))).unwrap();
        let open = s.segments(2, 9, |k| matches!(k, TickKind::Unknown | TickKind::Requested));
        assert_eq!(open, vec![(2, 5), (7, 9)]);
        assert!(s.segments(9, 2, |_| true).is_empty());
    }

    #[test]
    fn find_completed_range_extends_both_ways() {
        let mut s = StateStream::new();
        s.write_completed_range(5, 6).unwrap();
        s.write_combined_range(TickRange::value(7, item(1))).unwrap();
        s.write_completed_range(8, 9).unwrap();
        assert_eq!(s.find_completed_range(5, 5), (5, 6));
        assert_eq!(s.find_completed_range(8, 8), (8, 9));
        assert_eq!(s.last_known_tick(), 9);
    }
}
