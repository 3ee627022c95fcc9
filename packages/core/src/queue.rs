//! Queue domain types: names, timing policy and listings.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{Millis, ValidationError, parse_timestamp};

/// Name of a queue. Queues exist implicitly once a job is enqueued to them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct QueueName(String);

impl QueueName {
    /// Wrap a queue name, rejecting empty strings.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::EmptyQueueName);
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for QueueName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        QueueName::new(raw).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Timing and retry policy shared by every queue.
///
/// All windows derive from one base tick: idle workers expire after
/// `tick * idle_expiry_multiplier`, leases stall after
/// `tick * max_lease_multiplier`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Base tick interval in milliseconds. Also the stall sweep period.
    pub tick_interval_ms: u64,
    /// Idle announcements older than this many ticks are purged.
    pub idle_expiry_multiplier: u32,
    /// Leases without a heartbeat for this many ticks are reclaimed.
    pub max_lease_multiplier: u32,
    /// Stall reclaims allowed before a job is failed. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 3_000,
            idle_expiry_multiplier: 3,
            max_lease_multiplier: 10,
            max_retries: Some(5),
        }
    }
}

impl QueueConfig {
    /// Set the base tick interval.
    pub fn with_tick_interval_ms(mut self, tick_interval_ms: u64) -> Self {
        self.tick_interval_ms = tick_interval_ms;
        self
    }

    /// Set the idle expiry multiplier.
    pub fn with_idle_expiry_multiplier(mut self, multiplier: u32) -> Self {
        self.idle_expiry_multiplier = multiplier;
        self
    }

    /// Set the max lease multiplier.
    pub fn with_max_lease_multiplier(mut self, multiplier: u32) -> Self {
        self.max_lease_multiplier = multiplier;
        self
    }

    /// Set the stall retry limit.
    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Ticker period, never shorter than 1 ms.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Idle expiry window in milliseconds.
    pub fn idle_expiry_ms(&self) -> Millis {
        (self.tick_interval_ms as Millis).saturating_mul(self.idle_expiry_multiplier as Millis)
    }

    /// Maximum lease duration without a heartbeat, in milliseconds.
    pub fn max_lease_ms(&self) -> Millis {
        (self.tick_interval_ms as Millis).saturating_mul(self.max_lease_multiplier as Millis)
    }

    /// Idle entries with a score at or below this are expired.
    pub fn idle_cutoff(&self, now: Millis) -> Millis {
        now.saturating_sub(self.idle_expiry_ms())
    }

    /// Leases with a heartbeat strictly below this are stalled.
    pub fn stall_cutoff(&self, now: Millis) -> Millis {
        now.saturating_sub(self.max_lease_ms())
    }
}

/// Sorted sets kept per queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoredSet {
    /// Job id -> lease heartbeat.
    Leased,
    /// Job id -> processing heartbeat.
    Processing,
    /// Job id -> progress score.
    Progress,
    /// Worker id -> last idle announcement.
    Idle,
}

/// One end of a score range query. Both ends are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScoreBound {
    NegInfinity,
    PosInfinity,
    At(f64),
}

impl ScoreBound {
    /// Lower bound from a `later_than` field.
    ///
    /// Absent fields use `absent`; the literal `"-inf"` and anything that
    /// doesn't parse as a date both mean unbounded.
    pub fn parse_lower(raw: Option<&Value>, absent: ScoreBound) -> ScoreBound {
        match raw {
            None => absent,
            Some(value) => match bound_instant(value, "-inf") {
                Some(millis) => ScoreBound::At(millis as f64),
                None => ScoreBound::NegInfinity,
            },
        }
    }

    /// Upper bound from an `earlier_than` field.
    ///
    /// Absent fields, the literal `"+inf"` and unparseable values all mean
    /// unbounded.
    pub fn parse_upper(raw: Option<&Value>) -> ScoreBound {
        match raw.and_then(|value| bound_instant(value, "+inf")) {
            Some(millis) => ScoreBound::At(millis as f64),
            None => ScoreBound::PosInfinity,
        }
    }

    /// Range argument as the store expects it.
    pub fn to_arg(&self) -> String {
        match self {
            ScoreBound::NegInfinity => "-inf".to_string(),
            ScoreBound::PosInfinity => "+inf".to_string(),
            ScoreBound::At(score) => score.to_string(),
        }
    }

    /// Whether `score` is at or above this bound.
    pub fn admits_from(&self, score: f64) -> bool {
        match self {
            ScoreBound::NegInfinity => true,
            ScoreBound::PosInfinity => false,
            ScoreBound::At(bound) => score >= *bound,
        }
    }

    /// Whether `score` is at or below this bound.
    pub fn admits_to(&self, score: f64) -> bool {
        match self {
            ScoreBound::NegInfinity => false,
            ScoreBound::PosInfinity => true,
            ScoreBound::At(bound) => score <= *bound,
        }
    }
}

fn bound_instant(value: &Value, unbounded: &str) -> Option<Millis> {
    match value {
        Value::String(text) if text == unbounded => None,
        Value::String(text) => parse_timestamp(text),
        Value::Number(number) => number.as_f64().filter(|n| n.is_finite()).map(|n| n as Millis),
        _ => None,
    }
}

/// A sorted-set member with its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

impl ScoredMember {
    pub fn new(member: impl Into<String>, score: f64) -> Self {
        Self {
            member: member.into(),
            score,
        }
    }
}

/// What to list for a queue.
#[derive(Debug, Clone, PartialEq)]
pub enum ListRequest {
    /// Queued job ids in FIFO order.
    Queued,
    /// Leased job ids with lease heartbeats.
    Leased,
    /// Processing job ids with processing heartbeats.
    Processing,
    /// Job ids with progress scores.
    Progress,
    /// Idle workers announced within the range.
    Idle { from: ScoreBound, to: ScoreBound },
}

/// Result of a [`ListRequest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueueListing {
    Jobs(Vec<String>),
    Scored(Vec<ScoredMember>),
}

impl QueueListing {
    pub fn len(&self) -> usize {
        match self {
            QueueListing::Jobs(ids) => ids.len(),
            QueueListing::Scored(members) => members.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Member names in listing order.
    pub fn members(&self) -> Vec<&str> {
        match self {
            QueueListing::Jobs(ids) => ids.iter().map(String::as_str).collect(),
            QueueListing::Scored(members) => members.iter().map(|m| m.member.as_str()).collect(),
        }
    }
}
