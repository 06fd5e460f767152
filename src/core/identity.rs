//! Identifiers and quality-of-service keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{CoreError, InvalidId, RangeError};

fn parse_uuid_id(
    s: &str,
    make_err: impl FnOnce(String, String) -> InvalidId,
) -> Result<Uuid, CoreError> {
    Uuid::parse_str(s).map_err(|e| make_err(s.to_string(), e.to_string()).into())
}

/// Identifier shared by every priority/reliability variant of one logical stream.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(Uuid);

impl StreamId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Unset identifier. Keys the output side's shell stream set.
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn parse_str(s: &str) -> Result<Self, CoreError> {
        parse_uuid_id(s, |raw, reason| InvalidId::Stream { raw, reason }).map(Self)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({})", self.0)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for StreamId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Downstream neighbour of an intermediate node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NeighbourId(Uuid);

impl NeighbourId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn parse_str(s: &str) -> Result<Self, CoreError> {
        parse_uuid_id(s, |raw, reason| InvalidId::Neighbour { raw, reason }).map(Self)
    }
}

impl fmt::Debug for NeighbourId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NeighbourId({})", self.0)
    }
}

impl fmt::Display for NeighbourId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlates an `AreYouFlushed` query with its `NotFlushed` answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Opaque handle to a message held by the message store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageRef(u64);

impl MessageRef {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Quality-of-service tier, ordered from best-effort to assured persistent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    BestEffortNonPersistent,
    ExpressNonPersistent,
    ReliableNonPersistent,
    ReliablePersistent,
    AssuredPersistent,
}

impl Reliability {
    pub const ALL: [Reliability; 5] = [
        Reliability::BestEffortNonPersistent,
        Reliability::ExpressNonPersistent,
        Reliability::ReliableNonPersistent,
        Reliability::ReliablePersistent,
        Reliability::AssuredPersistent,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Best-effort traffic never gets a stream.
    pub fn has_stream(self) -> bool {
        self > Reliability::BestEffortNonPersistent
    }

    /// Express streams skip gap and ack tracking.
    pub fn is_express(self) -> bool {
        self == Reliability::ExpressNonPersistent
    }

    pub fn is_persistent(self) -> bool {
        self >= Reliability::ReliablePersistent
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Reliability::BestEffortNonPersistent => "best_effort_non_persistent",
            Reliability::ExpressNonPersistent => "express_non_persistent",
            Reliability::ReliableNonPersistent => "reliable_non_persistent",
            Reliability::ReliablePersistent => "reliable_persistent",
            Reliability::AssuredPersistent => "assured_persistent",
        }
    }
}

impl fmt::Display for Reliability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Reliability {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Reliability::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| InvalidId::Reliability { raw: s.to_string() }.into())
    }
}

/// Message priority: 0-9 inclusive.
///
/// Validated at construction - invalid values are unrepresentable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const MAX: u8 = 9;
    pub const COUNT: usize = Self::MAX as usize + 1;
    pub const DEFAULT: Priority = Priority(4);

    pub fn new(n: u8) -> Result<Self, CoreError> {
        if n > Self::MAX {
            Err(RangeError {
                field: "priority",
                value: n,
                min: 0,
                max: Self::MAX,
            }
            .into())
        } else {
            Ok(Self(n))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn all() -> impl Iterator<Item = Priority> {
        (0..=Self::MAX).map(Priority)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u8> for Priority {
    type Error = CoreError;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Priority::new(n)
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        p.0
    }
}

/// Selects one stream within a stream set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    pub priority: Priority,
    pub reliability: Reliability,
}

impl StreamKey {
    pub fn new(priority: Priority, reliability: Reliability) -> Self {
        Self {
            priority,
            reliability,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/p{}", self.reliability, self.priority.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_rejects_out_of_range() {
        assert!(Priority::new(Priority::MAX).is_ok());
        let err = Priority::new(10).unwrap_err();
        assert!(matches!(err, CoreError::Range(RangeError { value: 10, .. })));
    }

    #[test]
    fn reliability_ordering_and_tiers() {
        assert!(Reliability::BestEffortNonPersistent < Reliability::AssuredPersistent);
        assert!(!Reliability::BestEffortNonPersistent.has_stream());
        assert!(Reliability::ExpressNonPersistent.is_express());
        assert!(!Reliability::ReliableNonPersistent.is_persistent());
        assert!(Reliability::ReliablePersistent.is_persistent());
        for (i, r) in Reliability::ALL.into_iter().enumerate() {
            assert_eq!(r.index(), i);
            assert_eq!(Reliability::from_index(i), Some(r));
            assert_eq!(r.as_str().parse::<Reliability>().unwrap(), r);
        }
    }

    #[test]
    fn stream_id_parse_roundtrip() {
        let id = StreamId::random();
        assert_eq!(StreamId::parse_str(&id.to_string()).unwrap(), id);
        assert!(StreamId::parse_str("not-a-uuid").is_err());
        assert!(StreamId::nil().is_nil());
    }

    #[test]
    fn priority_serde_validates() {
        let ok: Priority = serde_json::from_str("3").unwrap();
        assert_eq!(ok.value(), 3);
        assert!(serde_json::from_str::<Priority>("42").is_err());
    }
}
