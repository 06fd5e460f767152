//! Interval engine: an ordered list of typed ranges partitioning `[0, inf]`.
//!
//! Invariants, checked after every mutation:
//! - the first range starts at 0 and the last ends at [`INFINITY`]
//! - consecutive ranges `[a,b]`, `[c,d]` satisfy `c = b + 1`
//!
//! The list keeps a cursor on one range. Protocol access is strongly local
//! (acks, nacks and values land near the previous position), so lookups start
//! at the cursor before falling back to a bounded search. The cursor is
//! atomic so that readers holding `&RangeList` may reposition it concurrently
//! while no mutator runs.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::error::InternalError;
use super::range::{TickRange, unknown_universe};
use super::tick::{INFINITY, Tick};

/// Snapshot of the cursor position. Valid until the next mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mark {
    index: usize,
    version: u64,
}

#[derive(Debug)]
pub struct RangeList {
    ranges: Vec<TickRange>,
    cursor: AtomicUsize,
    version: u64,
}

impl Default for RangeList {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for RangeList {
    fn clone(&self) -> Self {
        Self {
            ranges: self.ranges.clone(),
            cursor: AtomicUsize::new(self.cursor()),
            version: self.version,
        }
    }
}

impl PartialEq for RangeList {
    fn eq(&self, other: &Self) -> bool {
        self.ranges == other.ranges
    }
}

impl RangeList {
    /// A single Unknown range covering the whole tick space.
    pub fn new() -> Self {
        Self {
            ranges: vec![unknown_universe()],
            cursor: AtomicUsize::new(0),
            version: 0,
        }
    }

    /// `[0, prefix]` Completed followed by Unknown.
    pub fn with_completed_prefix(prefix: Tick) -> Self {
        let mut ranges = vec![TickRange::completed(0, prefix)];
        if prefix < INFINITY {
            ranges.push(TickRange::unknown(prefix + 1, INFINITY));
        }
        Self {
            ranges,
            cursor: AtomicUsize::new(0),
            version: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Always false: the list covers `[0, inf]`.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[TickRange] {
        &self.ranges
    }

    pub fn iter(&self) -> impl Iterator<Item = &TickRange> {
        self.ranges.iter()
    }

    pub fn first(&self) -> &TickRange {
        &self.ranges[0]
    }

    pub fn last(&self) -> &TickRange {
        &self.ranges[self.ranges.len() - 1]
    }

    pub fn cursor(&self) -> usize {
        self.cursor
            .load(Ordering::Relaxed)
            .min(self.ranges.len() - 1)
    }

    fn set_cursor_index(&self, index: usize) {
        self.cursor.store(index, Ordering::Relaxed);
    }

    pub fn cursor_range(&self) -> &TickRange {
        &self.ranges[self.cursor()]
    }

    /// Move the cursor to the range containing `tick`.
    pub fn set_cursor(&self, tick: Tick) {
        let index = if tick == 0 { 0 } else { self.index_of(tick) };
        self.set_cursor_index(index);
    }

    /// Range at the cursor; the cursor then moves forward, clamping at the end.
    pub fn get_next(&self) -> &TickRange {
        let index = self.cursor();
        self.set_cursor_index((index + 1).min(self.ranges.len() - 1));
        &self.ranges[index]
    }

    /// Range at the cursor; the cursor then moves back, clamping at the start.
    pub fn get_prev(&self) -> &TickRange {
        let index = self.cursor();
        self.set_cursor_index(index.saturating_sub(1));
        &self.ranges[index]
    }

    /// Index of the range containing `tick`. Does not move the cursor.
    pub fn index_of(&self, tick: Tick) -> usize {
        let cur = self.cursor();
        let at = &self.ranges[cur];
        if at.contains(tick) {
            return cur;
        }
        let last = self.ranges.len() - 1;
        // Every range holds at least one tick, so the distance in ticks bounds
        // the distance in slots. Scan from that bound back toward the cursor.
        if tick > at.end {
            let span = usize::try_from(tick - at.end).unwrap_or(usize::MAX);
            let lo = cur + 1;
            let hi = last.min(cur.saturating_add(span));
            (lo..=hi)
                .rev()
                .find(|&i| self.ranges[i].start <= tick)
                .unwrap_or(lo)
        } else {
            let span = usize::try_from(at.start - tick).unwrap_or(usize::MAX);
            let lo = cur.saturating_sub(span);
            let hi = cur - 1;
            (lo..=hi)
                .find(|&i| self.ranges[i].end >= tick)
                .unwrap_or(hi)
        }
    }

    /// Range containing `tick`. Does not move the cursor.
    pub fn range_at(&self, tick: Tick) -> &TickRange {
        &self.ranges[self.index_of(tick)]
    }

    /// Append every range overlapping `[start, end]` to `out`, ascending, and
    /// leave the cursor on the first of them.
    pub fn get(&self, start: Tick, end: Tick, out: &mut Vec<TickRange>) {
        out.extend_from_slice(self.overlapping(start, end));
    }

    /// Borrowing form of [`RangeList::get`].
    pub fn overlapping(&self, start: Tick, end: Tick) -> &[TickRange] {
        let first = self.index_of(start);
        self.set_cursor_index(first);
        let count = self.ranges[first..]
            .iter()
            .take_while(|r| r.start <= end)
            .count();
        &self.ranges[first..first + count]
    }

    /// Substitute the ascending contiguous run `replacement` into the list.
    ///
    /// Existing ranges straddling either end of the run are trimmed; a single
    /// range enclosing the whole run becomes a before piece and an after piece.
    /// The cursor ends on the first replacement range.
    pub fn replace(&mut self, replacement: &[TickRange]) -> Result<(), InternalError> {
        validate_run(replacement)?;
        let (Some(first), Some(last)) = (replacement.first(), replacement.last()) else {
            return Err(InternalError::InvalidReplacement {
                reason: "empty replacement".to_string(),
            });
        };
        let (start, end) = (first.start, last.end);

        let i = self.index_of(start);
        self.set_cursor_index(i);
        let j = self.index_of(end);

        let mut spliced = Vec::with_capacity(replacement.len() + 2);
        let head = self.ranges[i];
        let has_head = head.start < start;
        if has_head && let Some(piece) = head.clipped(head.start, start - 1) {
            spliced.push(piece);
        }
        spliced.extend_from_slice(replacement);
        let tail = self.ranges[j];
        if tail.end > end
            && let Some(piece) = tail.clipped(end + 1, tail.end)
        {
            spliced.push(piece);
        }
        let inserted = spliced.len();
        self.ranges.splice(i..=j, spliced);
        self.version += 1;

        let first_new = i + usize::from(has_head);
        self.set_cursor_index(first_new);
        self.check_window(i, i + inserted, "replace")
    }

    /// Replace everything from tick 0 through `range.end` with `range`.
    pub fn replace_prefix(&mut self, range: TickRange) -> Result<(), InternalError> {
        if range.start != 0 {
            return Err(InternalError::InvalidReplacement {
                reason: format!("prefix range starts at {}", range.start),
            });
        }
        self.set_cursor_index(0);
        self.replace(std::slice::from_ref(&range))
    }

    /// Split the cursor range so that `tick` starts the later part. The cursor
    /// moves to the part containing `tick`.
    pub fn split_start(&mut self, tick: Tick) -> Result<(), InternalError> {
        let c = self.cursor();
        let at = self.ranges[c];
        if !at.contains(tick) {
            return Err(InternalError::SplitOutsideRange {
                tick,
                start: at.start,
                end: at.end,
            });
        }
        if tick == at.start {
            return Ok(());
        }
        self.split_at(c, tick - 1)?;
        self.set_cursor_index(c + 1);
        Ok(())
    }

    /// Split the cursor range so that `tick` ends the earlier part. The cursor
    /// stays on the earlier part.
    pub fn split_end(&mut self, tick: Tick) -> Result<(), InternalError> {
        let c = self.cursor();
        let at = self.ranges[c];
        if !at.contains(tick) {
            return Err(InternalError::SplitOutsideRange {
                tick,
                start: at.start,
                end: at.end,
            });
        }
        if tick == at.end {
            return Ok(());
        }
        self.split_at(c, tick)?;
        self.set_cursor_index(c);
        Ok(())
    }

    /// Split slot `index` into `[start, boundary]` and `[boundary + 1, end]`.
    fn split_at(&mut self, index: usize, boundary: Tick) -> Result<(), InternalError> {
        let at = self.ranges[index];
        let (Some(lower), Some(upper)) = (
            at.clipped(at.start, boundary),
            at.clipped(boundary + 1, at.end),
        ) else {
            return Err(InternalError::SplitOutsideRange {
                tick: boundary,
                start: at.start,
                end: at.end,
            });
        };
        self.ranges[index] = lower;
        self.ranges.insert(index + 1, upper);
        self.version += 1;
        self.check_window(index, index + 2, "split")
    }

    pub fn mark(&self) -> Mark {
        Mark {
            index: self.cursor(),
            version: self.version,
        }
    }

    pub fn reset_to_mark(&self, mark: Mark) -> Result<(), InternalError> {
        if mark.version != self.version {
            return Err(InternalError::StaleMark {
                mark: mark.version,
                current: self.version,
            });
        }
        self.set_cursor_index(mark.index);
        Ok(())
    }

    /// Full invariant check.
    pub fn verify(&self) -> Result<(), InternalError> {
        self.check_window(0, self.ranges.len(), "verify")
    }

    /// Check contiguity of slots `[from, to)` against their neighbours, plus
    /// the outer bounds of the list.
    fn check_window(&self, from: usize, to: usize, op: &'static str) -> Result<(), InternalError> {
        let first = self.ranges.first();
        let last = self.ranges.last();
        match (first, last) {
            (Some(first), Some(last)) if first.start == 0 && last.end == INFINITY => {}
            (first, last) => {
                let err = InternalError::Coverage {
                    op,
                    first_start: first.map_or(INFINITY, |r| r.start),
                    last_end: last.map_or(0, |r| r.end),
                };
                tracing::error!("{err}");
                return Err(err);
            }
        }
        let lo = from.saturating_sub(1);
        let hi = (to + 1).min(self.ranges.len());
        for pair in self.ranges[lo..hi].windows(2) {
            let (left, right) = (&pair[0], &pair[1]);
            if left.start > left.end || left.end == INFINITY || right.start != left.end + 1 {
                let err = InternalError::Gap {
                    op,
                    left_start: left.start,
                    left_end: left.end,
                    right_start: right.start,
                    right_end: right.end,
                };
                tracing::error!(list = %self, "{err}");
                return Err(err);
            }
        }
        Ok(())
    }
}

fn validate_run(run: &[TickRange]) -> Result<(), InternalError> {
    for r in run {
        if r.start > r.end {
            return Err(InternalError::InvertedRange {
                start: r.start,
                end: r.end,
            });
        }
    }
    for pair in run.windows(2) {
        if pair[0].end == INFINITY || pair[1].start != pair[0].end + 1 {
            return Err(InternalError::InvalidReplacement {
                reason: format!("{} is not followed by its successor {}", pair[0], pair[1]),
            });
        }
    }
    Ok(())
}

impl fmt::Display for RangeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{r}")?;
        }
        Ok(())
    }
}
