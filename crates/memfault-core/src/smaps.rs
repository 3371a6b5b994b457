//! Parser for Linux `/proc/<pid>/smaps_rollup` (or full `smaps`).
//!
//! USS is `Private_Clean + Private_Dirty`. Values in the file are in kB.

/// Totals extracted from an smaps listing, in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SmapsTotals {
    /// Unique set size.
    pub uss: u64,
    /// Proportional set size.
    pub pss: u64,
    /// Swapped-out size.
    pub swap: u64,
}

/// Sum the relevant counters across every mapping in `content`.
///
/// Works on both `smaps_rollup` (one aggregated block) and `smaps` (one
/// block per mapping). Returns `None` when no recognized counter is present.
#[must_use]
pub fn parse_smaps(content: &str) -> Option<SmapsTotals> {
    let mut totals = SmapsTotals::default();
    let mut seen = false;
    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let slot = match key {
            "Private_Clean" | "Private_Dirty" => &mut totals.uss,
            "Pss" => &mut totals.pss,
            "Swap" => &mut totals.swap,
            _ => continue,
        };
        let Some(kb) = rest.split_whitespace().next().and_then(|v| v.parse::<u64>().ok()) else {
            continue;
        };
        *slot = slot.saturating_add(kb.saturating_mul(1024));
        seen = true;
    }
    seen.then_some(totals)
}
