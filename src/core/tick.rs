//! Tick primitives.

/// Position of a message within one stream. Tick 0 is the initial minimum.
pub type Tick = u64;

/// Open upper bound of every stream.
pub const INFINITY: Tick = u64::MAX;

/// Next tick, saturating at [`INFINITY`].
pub fn next(tick: Tick) -> Tick {
    tick.saturating_add(1)
}

/// Previous tick, saturating at 0.
pub fn prev(tick: Tick) -> Tick {
    tick.saturating_sub(1)
}

/// Render a tick the way logs and `state_string` show it.
pub fn display(tick: Tick) -> String {
    if tick == INFINITY {
        "inf".to_string()
    } else {
        tick.to_string()
    }
}
