//!
//! Sector to half-bridge mapping.  Each sector puts PWM on one leg's high
//! side and turns another leg's low side fully on; the third leg floats.
//! When synchronous switching is allowed the PWM leg's low side also gets an
//! inverted duty so the bridge can rectify and regen brake.
//!

use defmt::Format;

use crate::hall::Sector;

/// Highest level the bridge accepts
const LEVEL_MAX: u16 = 255;

/// Levels above this snap to fully on.  Keeps the high-side bootstrap
/// supplies from starving on very short off times.
const LEVEL_SNAP_THRESHOLD: u8 = 245;

/// The synchronous complement is computed against this instead of 255, which
/// leaves a dead gap between the high and low gates of the PWM leg.
const SYNC_LEVEL_CEILING: u8 = 248;

/// Gate levels for all six bridge switches, 0..=255 each.  A high-side entry
/// is either 0 or the PWM duty; a low-side entry is 0, the synchronous
/// complement, or fully on.
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseLevels {
    pub a_high: u8,
    pub b_high: u8,
    pub c_high: u8,
    pub a_low: u8,
    pub b_low: u8,
    pub c_low: u8,
}

impl PhaseLevels {
    /// Every switch off, motor coasting
    pub const OFF: Self = Self {
        a_high: 0,
        b_high: 0,
        c_high: 0,
        a_low: 0,
        b_low: 0,
        c_low: 0,
    };
}

/// Work out the six gate levels for a sector and 8-bit duty.
///
/// No sector, zero duty, or an out-of-range duty turns everything off.
pub fn drive_levels(sector: Option<Sector>, duty: u16, synchronous: bool) -> PhaseLevels {
    let sector = match sector {
        Some(sector) => sector,
        None => return PhaseLevels::OFF,
    };
    if duty == 0 || duty > LEVEL_MAX {
        return PhaseLevels::OFF;
    }

    let duty = if duty > LEVEL_SNAP_THRESHOLD as u16 {
        255
    } else {
        duty as u8
    };
    let complement = if synchronous {
        SYNC_LEVEL_CEILING.saturating_sub(duty)
    } else {
        0
    };

    match sector {
        Sector::S0 => PhaseLevels {
            b_high: duty,
            a_low: 255,
            b_low: complement,
            ..PhaseLevels::OFF
        },
        Sector::S1 => PhaseLevels {
            c_high: duty,
            a_low: 255,
            c_low: complement,
            ..PhaseLevels::OFF
        },
        Sector::S2 => PhaseLevels {
            c_high: duty,
            b_low: 255,
            c_low: complement,
            ..PhaseLevels::OFF
        },
        Sector::S3 => PhaseLevels {
            a_high: duty,
            b_low: 255,
            a_low: complement,
            ..PhaseLevels::OFF
        },
        Sector::S4 => PhaseLevels {
            a_high: duty,
            c_low: 255,
            a_low: complement,
            ..PhaseLevels::OFF
        },
        Sector::S5 => PhaseLevels {
            b_high: duty,
            c_low: 255,
            b_low: complement,
            ..PhaseLevels::OFF
        },
    }
}
