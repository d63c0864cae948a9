//! Per-chemistry charge profiles.
//!
//! All volts and amps are normalised to a 12 V / 500 Ah battery and are
//! scaled by [`SystemConfig::volt_mult`] and [`SystemConfig::amp_mult`]
//! before use. Temperature limits and durations are never scaled.
//!
//! [`SystemConfig::volt_mult`]: crate::config::SystemConfig::volt_mult
//! [`SystemConfig::amp_mult`]: crate::config::SystemConfig::amp_mult

use crate::config::{label, ConfigError, Label};

/// Number of entries in the profile table.
pub const PROFILE_COUNT: usize = 8;

const HOUR_MS: u32 = 3_600_000;

/// How acceptance ends when its duration has not yet run out.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AcceptExit {
    /// Leave after the bulk time multiplied by a fixed factor.
    Adaptive,
    /// No current based exit.
    Disabled,
    /// Leave once smoothed battery current falls to this many amps. Zero
    /// acts as [`Disabled`](Self::Disabled), a negative value as
    /// [`Adaptive`](Self::Adaptive).
    Amps(f32),
}

/// Current regulation while floating.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FloatAmps {
    /// Voltage only.
    Unregulated,
    /// Cap alternator current (zero is a valid cap).
    Amps(f32),
}

/// Optional current-limited stage after acceptance.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OverchargeStage {
    /// Current cap
    pub amps: f32,
    /// Terminal voltage ending the stage
    pub volts: f32,
    /// Maximum duration in ms
    pub duration_ms: u32,
}

/// One charge profile.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChargeProfile {
    /// Display name
    pub label: Label,
    /// Bulk/acceptance target volts
    pub accept_volts: f32,
    /// Acceptance time limit in ms (0 = none)
    pub accept_duration_ms: u32,
    /// Acceptance current exit
    pub accept_exit: AcceptExit,
    /// Overcharge stage, if any
    pub overcharge: Option<OverchargeStage>,
    /// Float target volts
    pub float_volts: f32,
    /// Float current regulation
    pub float_amps: FloatAmps,
    /// Float time limit in ms before post-float (0 = stay)
    pub float_duration_ms: u32,
    /// Restart charge when smoothed battery amps fall to this value
    pub float_to_bulk_amps: Option<f32>,
    /// Restart charge when amp-hours since float fall to this value
    pub float_to_bulk_ah: Option<f32>,
    /// Restart charge when smoothed volts fall to this value
    pub float_to_bulk_volts: Option<f32>,
    /// Post-float time limit in ms (0 = stay)
    pub post_float_duration_ms: u32,
    /// Restart charge from post-float below these volts
    pub post_float_to_bulk_volts: Option<f32>,
    /// Restart charge from post-float at these amp-hours
    pub post_float_to_bulk_ah: Option<f32>,
    /// Equalize target volts
    pub equalize_volts: f32,
    /// Equalize current cap
    pub equalize_amps: Option<f32>,
    /// Equalize duration in ms
    pub equalize_duration_ms: u32,
    /// Leave equalize at or below these amps
    pub equalize_exit_amps: Option<f32>,
    /// Compensation in volts per °C away from 25 °C
    pub temp_comp_per_c: f32,
    /// Colder than this, compensation stops growing
    pub min_temp_comp_c: i16,
    /// Coldest battery temperature for charging
    pub min_charge_temp_c: i16,
    /// Warmest battery temperature for charging
    pub max_charge_temp_c: i16,
    /// Lithium chemistry: never equalized
    pub lithium: bool,
}

impl ChargeProfile {
    fn lead_acid(name: &str, accept_volts: f32, accept_hours: f32, exit_amps: f32, float_volts: f32) -> Self {
        Self {
            label: label(name),
            accept_volts,
            accept_duration_ms: (accept_hours * HOUR_MS as f32) as u32,
            accept_exit: AcceptExit::Amps(exit_amps),
            overcharge: None,
            float_volts,
            float_amps: FloatAmps::Unregulated,
            float_duration_ms: 0,
            float_to_bulk_amps: Some(-10.0),
            float_to_bulk_ah: None,
            float_to_bulk_volts: Some(12.8),
            post_float_duration_ms: 0,
            post_float_to_bulk_volts: None,
            post_float_to_bulk_ah: None,
            equalize_volts: 0.0,
            equalize_amps: None,
            equalize_duration_ms: 0,
            equalize_exit_amps: None,
            temp_comp_per_c: 0.030,
            min_temp_comp_c: -9,
            min_charge_temp_c: -45,
            max_charge_temp_c: 45,
            lithium: false,
        }
    }

    fn with_equalize(mut self, volts: f32, amps: Option<f32>, hours: f32, exit_amps: Option<f32>) -> Self {
        self.equalize_volts = volts;
        self.equalize_amps = amps;
        self.equalize_duration_ms = (hours * HOUR_MS as f32) as u32;
        self.equalize_exit_amps = exit_amps;
        self
    }

    fn with_temp_comp(mut self, per_c: f32, min_comp: i16, min_charge: i16, max_charge: i16) -> Self {
        self.temp_comp_per_c = per_c;
        self.min_temp_comp_c = min_comp;
        self.min_charge_temp_c = min_charge;
        self.max_charge_temp_c = max_charge;
        self
    }

    /// Lifeline AGM; the safe default.
    pub fn lifeline() -> Self {
        Self::lead_acid("LIFELINE", 14.3, 6.0, 15.0, 13.3).with_temp_comp(0.0234, -9, -45, 45)
    }

    /// Standard flooded lead acid.
    pub fn standard_fla() -> Self {
        Self::lead_acid("STD FLA", 14.8, 3.0, 5.0, 13.5)
    }

    /// Heavy-duty flooded lead acid (golf cart, L16).
    pub fn heavy_duty_fla() -> Self {
        Self::lead_acid("HD FLA", 14.6, 4.5, 5.0, 13.2).with_equalize(15.3, Some(25.0), 3.0, None)
    }

    /// Higher voltage AGM.
    pub fn agm2() -> Self {
        Self::lead_acid("AGM #2", 14.7, 4.5, 3.0, 13.4).with_temp_comp(0.024, -9, -45, 45)
    }

    /// Gel cell.
    pub fn gel() -> Self {
        Self::lead_acid("GEL", 14.1, 6.0, 5.0, 13.5)
    }

    /// Firefly carbon foam.
    pub fn firefly() -> Self {
        let mut p = Self::lead_acid("FIREFLY", 14.4, 6.0, 7.0, 13.4)
            .with_equalize(14.4, None, 3.0, Some(3.0))
            .with_temp_comp(0.024, -20, -20, 50);
        p.float_to_bulk_amps = Some(-20.0);
        p.float_to_bulk_volts = Some(12.0);
        p
    }

    /// Four-stage heavy-duty flooded with overcharge; user adjustable slot.
    pub fn custom() -> Self {
        let mut p = Self::lead_acid("CUSTOM", 14.4, 6.0, 15.0, 13.1)
            .with_equalize(15.3, Some(25.0), 3.0, None);
        p.overcharge = Some(OverchargeStage {
            amps: 15.0,
            volts: 5.3,
            duration_ms: 3 * HOUR_MS,
        });
        p
    }

    /// Lithium iron phosphate; user adjustable slot.
    pub fn lifepo4() -> Self {
        let mut p = Self::lead_acid("LiFePO4", 13.8, 1.0, 15.0, 13.6).with_temp_comp(0.0, 0, 0, 40);
        p.float_amps = FloatAmps::Amps(0.0);
        p.float_to_bulk_amps = None;
        p.float_to_bulk_ah = Some(-50.0);
        p.float_to_bulk_volts = Some(13.3);
        p.lithium = true;
        p
    }
}

impl Default for ChargeProfile {
    fn default() -> Self {
        Self::lifeline()
    }
}

/// The eight built-in profiles and the selected entry.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProfileTable {
    /// Profile entries
    pub profiles: [ChargeProfile; PROFILE_COUNT],
    /// Index of the active entry
    pub selected: usize,
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self {
            profiles: [
                ChargeProfile::lifeline(),
                ChargeProfile::standard_fla(),
                ChargeProfile::heavy_duty_fla(),
                ChargeProfile::agm2(),
                ChargeProfile::gel(),
                ChargeProfile::firefly(),
                ChargeProfile::custom(),
                ChargeProfile::lifepo4(),
            ],
            selected: 0,
        }
    }
}

impl ProfileTable {
    /// Select the active profile.
    pub fn select(&mut self, index: usize) -> Result<(), ConfigError> {
        if index >= PROFILE_COUNT {
            return Err(ConfigError::ProfileIndex(index));
        }
        self.selected = index;
        Ok(())
    }

    /// Builder form of [`select`](Self::select).
    pub fn with_selected(mut self, index: usize) -> Result<Self, ConfigError> {
        self.select(index)?;
        Ok(self)
    }

    /// Replace one of the entries.
    pub fn with_profile(mut self, index: usize, profile: ChargeProfile) -> Self {
        if let Some(slot) = self.profiles.get_mut(index) {
            *slot = profile;
        }
        self
    }

    /// The active profile, or `None` if the selection is out of range.
    pub fn active(&self) -> Option<&ChargeProfile> {
        self.profiles.get(self.selected)
    }
}
