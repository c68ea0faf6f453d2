//! Priority levels, tie-break policy and the winner selection rule
//!
//! Selection happens in three levels:
//!
//! 1. Only jobs at the highest priority present are considered.
//! 2. Within that priority, each job class nominates one champion: its most
//!    recently submitted job.
//! 3. The [`SchedulingPolicy`] picks the winner among the champions.
//!
//! Step 2 keeps a prolific class (for example a burst of metadata lookups)
//! from starving a different class waiting at the same priority.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Ordinal precedence of a job, lowest to highest
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Idle = 0,
    Low = 10,
    BelowNormal = 20,
    #[default]
    Normal = 30,
    AboveNormal = 40,
    High = 50,
    Realtime = 60,
}

impl Priority {
    /// All levels in ascending order
    pub const ALL: [Priority; 7] = [
        Self::Idle,
        Self::Low,
        Self::BelowNormal,
        Self::Normal,
        Self::AboveNormal,
        Self::High,
        Self::Realtime,
    ];

    /// Numeric weight of this level
    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Low => "low",
            Self::BelowNormal => "below_normal",
            Self::Normal => "normal",
            Self::AboveNormal => "above_normal",
            Self::High => "high",
            Self::Realtime => "realtime",
        }
    }
}

impl FromStr for Priority {
    type Err = SchedulerError;

    /// Accepts `below_normal`, `below-normal` and `BelowNormal` alike
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();

        Ok(match normalized.as_str() {
            "idle" => Self::Idle,
            "low" => Self::Low,
            "belownormal" => Self::BelowNormal,
            "normal" => Self::Normal,
            "abovenormal" => Self::AboveNormal,
            "high" => Self::High,
            "realtime" => Self::Realtime,
            _ => return Err(SchedulerError::unknown_variant("priority", s)),
        })
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Global tie-break applied among per-class champions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingPolicy {
    /// Most recently submitted champion wins
    #[default]
    Lifo,
    /// Earliest submitted champion wins
    Fifo,
}

impl FromStr for SchedulingPolicy {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lifo" => Ok(Self::Lifo),
            "fifo" => Ok(Self::Fifo),
            _ => Err(SchedulerError::unknown_variant("scheduling policy", s)),
        }
    }
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lifo => write!(f, "lifo"),
            Self::Fifo => write!(f, "fifo"),
        }
    }
}

/// A job's concrete kind, used to group jobs for fairness
///
/// Two jobs share a class exactly when their names are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobClass(&'static str);

impl JobClass {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Class named after a concrete Rust type
    pub fn of<T: ?Sized>() -> Self {
        Self(std::any::type_name::<T>())
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for JobClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// The scheduling-relevant view of a waiting job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate<K> {
    pub key: K,
    pub priority: Priority,
    pub class: JobClass,
    /// Submission order; strictly increasing, never reused
    pub submitted: u64,
}

/// Pick the job to run next from a set of eligible candidates
///
/// Returns `None` only when `candidates` is empty.
pub fn select_winner<K: Copy>(
    candidates: impl IntoIterator<Item = Candidate<K>>,
    policy: SchedulingPolicy,
) -> Option<Candidate<K>> {
    let candidates: Vec<Candidate<K>> = candidates.into_iter().collect();
    let top = candidates.iter().map(|c| c.priority).max()?;

    let mut champions: HashMap<JobClass, Candidate<K>> = HashMap::new();
    for candidate in candidates.into_iter().filter(|c| c.priority == top) {
        champions
            .entry(candidate.class)
            .and_modify(|champion| {
                if candidate.submitted > champion.submitted {
                    *champion = candidate;
                }
            })
            .or_insert(candidate);
    }

    champions
        .into_values()
        .reduce(|best, next| if prefers(policy, &next, &best) { next } else { best })
}

fn prefers<K>(policy: SchedulingPolicy, a: &Candidate<K>, b: &Candidate<K>) -> bool {
    match policy {
        SchedulingPolicy::Lifo => a.submitted > b.submitted,
        SchedulingPolicy::Fifo => a.submitted < b.submitted,
    }
}
