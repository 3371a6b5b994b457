//! Which proxy calls get their target field blanked.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Set of 1-based call numbers on which the proxy blanks its target field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u64>", into = "Vec<u64>")]
pub struct FaultSchedule(BTreeSet<u64>);

/// Invalid schedule input.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    /// Call numbers start at 1.
    #[error("fault schedule indices are 1-based; 0 is not a call number")]
    ZeroIndex,
    /// A list entry was not an integer.
    #[error("bad fault index `{0}`")]
    BadIndex(String),
}

impl FaultSchedule {
    /// Schedule that never injects.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Build from call numbers; duplicates collapse.
    pub fn from_indices<I: IntoIterator<Item = u64>>(indices: I) -> Result<Self, ScheduleError> {
        let set: BTreeSet<u64> = indices.into_iter().collect();
        if set.contains(&0) {
            return Err(ScheduleError::ZeroIndex);
        }
        Ok(Self(set))
    }

    /// Whether call `n` is corrupted.
    #[inline]
    #[must_use]
    pub fn hits(&self, n: u64) -> bool {
        self.0.contains(&n)
    }

    /// No scheduled calls.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Scheduled calls in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.iter().copied()
    }
}

impl TryFrom<Vec<u64>> for FaultSchedule {
    type Error = ScheduleError;

    fn try_from(v: Vec<u64>) -> Result<Self, Self::Error> {
        Self::from_indices(v)
    }
}

impl From<FaultSchedule> for Vec<u64> {
    fn from(s: FaultSchedule) -> Self {
        s.0.into_iter().collect()
    }
}

/// Parses `"2"` or `"1, 3,5"`; an empty string is the empty schedule.
impl FromStr for FaultSchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let indices = s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| p.parse::<u64>().map_err(|_| ScheduleError::BadIndex(p.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_indices(indices)
    }
}

impl fmt::Display for FaultSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for n in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{n}")?;
            first = false;
        }
        Ok(())
    }
}
