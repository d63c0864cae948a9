//! Charging phases and phase-group sets.
//!
//! Every phase carries a fixed numeric tag. The tags are ordered so that
//! range checks such as "is the alternator running" reduce to
//! `WarmUp..=Equalize`, and the enum derives `Ord` in the same order.
//!
//! # Example
//!
//! ```rust
//! use alt_regulator::phase::{ChargingPhase, PhaseSet};
//!
//! assert!(ChargingPhase::Bulk.is_running());
//! assert!(!ChargingPhase::Faulted.is_running());
//! assert_eq!(ChargingPhase::Acceptance.tag(), 21);
//!
//! const FLOATING: PhaseSet = PhaseSet::of(&[ChargingPhase::Float, ChargingPhase::ForcedFloat]);
//! assert!(FLOATING.contains(ChargingPhase::ForcedFloat));
//! ```

use core::fmt;

/// Active phase of the charge cycle.
///
/// Exactly one phase is active at a time. The regulator starts in
/// [`Unknown`](Self::Unknown); [`Faulted`](Self::Faulted) is left only by an
/// external reset and [`ForcedShutdown`](Self::ForcedShutdown) only when the
/// battery management override is lifted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ChargingPhase {
    /// Power-on state, before the first control iteration.
    #[default]
    Unknown = 0,
    /// Regulator switched off by the host.
    Disabled = 1,
    /// A fault was recorded. Field drive is held at zero.
    Faulted = 2,
    /// Engine warm-up delay before any load is placed on it.
    WarmUp = 10,
    /// Soft start of the field drive.
    Ramping = 11,
    /// Driving the alternator hard to learn its output capacity.
    DetermineCapacity = 12,
    /// Constant-current bulk charge up to the acceptance voltage.
    Bulk = 20,
    /// Constant-voltage absorption.
    Acceptance = 21,
    /// Current-limited overcharge stage.
    Overcharge = 22,
    /// Maintenance float voltage.
    Float = 30,
    /// Float held by an external request or a missing battery sensor.
    ForcedFloat = 31,
    /// Field held off by the battery management system.
    ForcedShutdown = 32,
    /// Alternator off, battery voltage watched for a reload.
    PostFloat = 36,
    /// Controlled overcharge to equalize flooded cells.
    Equalize = 38,
}

impl ChargingPhase {
    /// Every phase, in tag order.
    pub const ALL: [ChargingPhase; 14] = [
        ChargingPhase::Unknown,
        ChargingPhase::Disabled,
        ChargingPhase::Faulted,
        ChargingPhase::WarmUp,
        ChargingPhase::Ramping,
        ChargingPhase::DetermineCapacity,
        ChargingPhase::Bulk,
        ChargingPhase::Acceptance,
        ChargingPhase::Overcharge,
        ChargingPhase::Float,
        ChargingPhase::ForcedFloat,
        ChargingPhase::ForcedShutdown,
        ChargingPhase::PostFloat,
        ChargingPhase::Equalize,
    ];

    /// Numeric tag reported over telemetry.
    #[inline]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Looks a phase up by its numeric tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.tag() == tag)
    }

    /// Position of the phase in [`ALL`](Self::ALL); used as the bit index
    /// of a [`PhaseSet`].
    const fn index(self) -> u8 {
        match self {
            ChargingPhase::Unknown => 0,
            ChargingPhase::Disabled => 1,
            ChargingPhase::Faulted => 2,
            ChargingPhase::WarmUp => 3,
            ChargingPhase::Ramping => 4,
            ChargingPhase::DetermineCapacity => 5,
            ChargingPhase::Bulk => 6,
            ChargingPhase::Acceptance => 7,
            ChargingPhase::Overcharge => 8,
            ChargingPhase::Float => 9,
            ChargingPhase::ForcedFloat => 10,
            ChargingPhase::ForcedShutdown => 11,
            ChargingPhase::PostFloat => 12,
            ChargingPhase::Equalize => 13,
        }
    }

    /// True while the alternator is part of a charge cycle
    /// (`WarmUp..=Equalize`).
    #[inline]
    pub fn is_running(self) -> bool {
        (ChargingPhase::WarmUp..=ChargingPhase::Equalize).contains(&self)
    }

    /// True for phases in which the field output is always written as zero.
    #[inline]
    pub fn field_disabled(self) -> bool {
        matches!(
            self,
            ChargingPhase::Unknown | ChargingPhase::Disabled | ChargingPhase::Faulted
        )
    }

    /// Short upper-case label, as shown on status displays.
    pub const fn as_str(self) -> &'static str {
        match self {
            ChargingPhase::Unknown => "UNKNOWN",
            ChargingPhase::Disabled => "DISABLED",
            ChargingPhase::Faulted => "FAULTED",
            ChargingPhase::WarmUp => "WARMUP",
            ChargingPhase::Ramping => "RAMPING",
            ChargingPhase::DetermineCapacity => "DET ALT CAP",
            ChargingPhase::Bulk => "BULK",
            ChargingPhase::Acceptance => "ACCEPTANCE",
            ChargingPhase::Overcharge => "OVER CHARGE",
            ChargingPhase::Float => "FLOAT",
            ChargingPhase::ForcedFloat => "FORCE FLOAT",
            ChargingPhase::ForcedShutdown => "SHUTDOWN",
            ChargingPhase::PostFloat => "POST FLOAT",
            ChargingPhase::Equalize => "EQUALIZE",
        }
    }
}

impl fmt::Display for ChargingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of phases, stored as a bit mask.
///
/// Used to key fault checks and temperature guards by phase-group
/// membership instead of relying on match-arm ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseSet(u16);

impl PhaseSet {
    /// The empty set.
    pub const EMPTY: PhaseSet = PhaseSet(0);

    /// Every phase.
    pub const ALL: PhaseSet = PhaseSet((1 << ChargingPhase::ALL.len()) - 1);

    /// Builds a set from a list of phases.
    pub const fn of(phases: &[ChargingPhase]) -> Self {
        let mut bits = 0u16;
        let mut i = 0;
        while i < phases.len() {
            bits |= 1 << phases[i].index();
            i += 1;
        }
        PhaseSet(bits)
    }

    /// Union of two sets.
    pub const fn union(self, other: PhaseSet) -> Self {
        PhaseSet(self.0 | other.0)
    }

    /// Membership test.
    #[inline]
    pub const fn contains(self, phase: ChargingPhase) -> bool {
        self.0 & (1 << phase.index()) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Tag Tests
    // =========================================================================

    #[test]
    fn tags_match_telemetry_values() {
        assert_eq!(ChargingPhase::Unknown.tag(), 0);
        assert_eq!(ChargingPhase::WarmUp.tag(), 10);
        assert_eq!(ChargingPhase::Bulk.tag(), 20);
        assert_eq!(ChargingPhase::Float.tag(), 30);
        assert_eq!(ChargingPhase::PostFloat.tag(), 36);
        assert_eq!(ChargingPhase::Equalize.tag(), 38);
    }

    #[test]
    fn from_tag_finds_every_phase() {
        for phase in ChargingPhase::ALL {
            assert_eq!(ChargingPhase::from_tag(phase.tag()), Some(phase));
        }
        assert_eq!(ChargingPhase::from_tag(99), None);
    }

    #[test]
    fn ordering_follows_tags() {
        for pair in ChargingPhase::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].tag() < pair[1].tag());
        }
    }

    #[test]
    fn running_range() {
        assert!(!ChargingPhase::Unknown.is_running());
        assert!(!ChargingPhase::Disabled.is_running());
        assert!(!ChargingPhase::Faulted.is_running());
        assert!(ChargingPhase::WarmUp.is_running());
        assert!(ChargingPhase::ForcedShutdown.is_running());
        assert!(ChargingPhase::Equalize.is_running());
    }

    #[test]
    fn default_is_unknown() {
        assert_eq!(ChargingPhase::default(), ChargingPhase::Unknown);
    }

    // =========================================================================
    // PhaseSet Tests
    // =========================================================================

    #[test]
    fn set_membership() {
        let set = PhaseSet::of(&[ChargingPhase::Bulk, ChargingPhase::Equalize]);
        assert!(set.contains(ChargingPhase::Bulk));
        assert!(set.contains(ChargingPhase::Equalize));
        assert!(!set.contains(ChargingPhase::Float));
    }

    #[test]
    fn all_and_empty() {
        for phase in ChargingPhase::ALL {
            assert!(PhaseSet::ALL.contains(phase));
            assert!(!PhaseSet::EMPTY.contains(phase));
        }
    }

    #[test]
    fn union_combines() {
        let a = PhaseSet::of(&[ChargingPhase::Float]);
        let b = PhaseSet::of(&[ChargingPhase::PostFloat]);
        let both = a.union(b);
        assert!(both.contains(ChargingPhase::Float));
        assert!(both.contains(ChargingPhase::PostFloat));
    }
}
