//! Canonical record types used across the memfault workspace.
//!
//! These live in `memfault-core` and are re-exported at the crate root so
//! other crates can import via `memfault_core::MemoryInfo` etc. Serialized
//! forms are plain serde structs so records can cross a process boundary as
//! JSON lines.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Process whose memory is being inspected.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Subject(pub u32);

impl Subject {
    /// The calling process.
    #[inline]
    #[must_use]
    pub fn current() -> Self {
        Self(std::process::id())
    }

    /// Raw OS process id.
    #[inline]
    #[must_use]
    pub const fn pid(self) -> u32 {
        self.0
    }
}

impl From<u32> for Subject {
    fn from(pid: u32) -> Self {
        Self(pid)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

/// Named numeric field of a [`MemoryInfo`] record.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StatField {
    /// Resident set size.
    Rss,
    /// Virtual memory size.
    Vms,
    /// Unique set size (private clean + private dirty).
    Uss,
    /// Proportional set size.
    Pss,
    /// Swapped-out size.
    Swap,
}

impl StatField {
    /// Every field, in record order.
    pub const ALL: [Self; 5] = [Self::Rss, Self::Vms, Self::Uss, Self::Pss, Self::Swap];

    /// Lowercase field name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rss => "rss",
            Self::Vms => "vms",
            Self::Uss => "uss",
            Self::Pss => "pss",
            Self::Swap => "swap",
        }
    }
}

impl fmt::Display for StatField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a [`StatField`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown memory field `{0}` (expected rss|vms|uss|pss|swap)")]
pub struct UnknownField(pub String);

impl FromStr for StatField {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rss" => Ok(Self::Rss),
            "vms" => Ok(Self::Vms),
            "uss" => Ok(Self::Uss),
            "pss" => Ok(Self::Pss),
            "swap" => Ok(Self::Swap),
            _ => Err(UnknownField(s.to_string())),
        }
    }
}

/// Memory statistics for one process at one instant, in bytes.
///
/// Every field is optional: `None` is how an absent or unavailable
/// measurement is represented (the missing-value sentinel).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryInfo {
    /// Resident set size.
    pub rss: Option<u64>,
    /// Virtual memory size.
    pub vms: Option<u64>,
    /// Unique set size.
    pub uss: Option<u64>,
    /// Proportional set size.
    pub pss: Option<u64>,
    /// Swapped-out size.
    pub swap: Option<u64>,
}

impl MemoryInfo {
    /// Read one field.
    #[inline]
    #[must_use]
    pub const fn get(&self, field: StatField) -> Option<u64> {
        match field {
            StatField::Rss => self.rss,
            StatField::Vms => self.vms,
            StatField::Uss => self.uss,
            StatField::Pss => self.pss,
            StatField::Swap => self.swap,
        }
    }

    /// Derived copy with exactly one field overwritten.
    #[must_use]
    pub const fn with_field(mut self, field: StatField, value: Option<u64>) -> Self {
        match field {
            StatField::Rss => self.rss = value,
            StatField::Vms => self.vms = value,
            StatField::Uss => self.uss = value,
            StatField::Pss => self.pss = value,
            StatField::Swap => self.swap = value,
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryInfo {
        MemoryInfo {
            rss: Some(10),
            vms: Some(20),
            uss: Some(5),
            pss: Some(7),
            swap: Some(0),
        }
    }

    #[test]
    fn with_field_touches_only_target() {
        let base = sample();
        for field in StatField::ALL {
            let derived = base.with_field(field, None);
            for other in StatField::ALL {
                if other == field {
                    assert_eq!(derived.get(other), None);
                } else {
                    assert_eq!(derived.get(other), base.get(other), "{other} changed");
                }
            }
        }
    }

    #[test]
    fn field_names_parse_back() {
        for field in StatField::ALL {
            assert_eq!(field.as_str().parse::<StatField>(), Ok(field));
        }
        assert_eq!(" USS ".parse::<StatField>(), Ok(StatField::Uss));
        assert!("heap".parse::<StatField>().is_err());
    }

    #[test]
    fn missing_field_serializes_as_null() {
        let json = serde_json::to_string(&sample().with_field(StatField::Uss, None)).unwrap();
        assert!(json.contains("\"uss\":null"), "{json}");
    }
}
