//!
//! Hall sensor decoding.  The three hall lines form a 3-bit code that maps
//! onto one of six commutation sectors; codes 0 and 7 mean a disconnected or
//! shorted sensor and drive nothing.
//!

use defmt::Format;

use crate::config::HALL_OVERSAMPLE;

/// One of the six commutation positions of the rotor.
///
/// | Sector | PWM leg | Low leg |
/// |--------|---------|---------|
/// | S0     | B       | A       |
/// | S1     | C       | A       |
/// | S2     | C       | B       |
/// | S3     | A       | B       |
/// | S4     | A       | C       |
/// | S5     | B       | C       |
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Sector {
    S0 = 0,
    S1 = 1,
    S2 = 2,
    S3 = 3,
    S4 = 4,
    S5 = 5,
}

impl Sector {
    /// The sector's position in commutation order
    pub fn index(self) -> u8 {
        self as u8
    }

    /// The next sector in the forward commutation order, useful for stepping
    /// the motor open loop.
    pub fn next(self) -> Self {
        match self {
            Sector::S0 => Sector::S1,
            Sector::S1 => Sector::S2,
            Sector::S2 => Sector::S3,
            Sector::S3 => Sector::S4,
            Sector::S4 => Sector::S5,
            Sector::S5 => Sector::S0,
        }
    }
}

/// Commutation table indexed by hall code.  Calibrated for the forward
/// direction of the fitted motor; 0 and 7 are not real positions.
pub const HALL_TO_SECTOR: [Option<Sector>; 8] = [
    None,
    Some(Sector::S3),
    Some(Sector::S1),
    Some(Sector::S2),
    Some(Sector::S5),
    Some(Sector::S4),
    Some(Sector::S0),
    None,
];

/// A 3-bit hall sensor reading.  Bit 0 is hall 1, bit 1 hall 2, bit 2
/// hall 3.
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub struct HallCode(u8);

impl HallCode {
    pub fn new(bits: u8) -> Self {
        Self(bits & 0b111)
    }

    pub fn from_lines(hall_1: bool, hall_2: bool, hall_3: bool) -> Self {
        Self((hall_1 as u8) | ((hall_2 as u8) << 1) | ((hall_3 as u8) << 2))
    }

    /// Majority vote over per-line high counts from an oversampled read.  A
    /// line counts as high when it read high on more than half the samples.
    pub fn from_majority(high_counts: [u8; 3]) -> Self {
        let mut bits = 0u8;
        for (line, count) in high_counts.iter().enumerate() {
            if *count > HALL_OVERSAMPLE / 2 {
                bits |= 1 << line;
            }
        }
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// The commutation sector this code selects, if it is a valid position
    pub fn sector(self) -> Option<Sector> {
        HALL_TO_SECTOR[self.0 as usize]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_valid_codes_map_to_distinct_sectors() {
        let mut seen = [false; 6];
        for code in 1..=6u8 {
            let sector = HallCode::new(code).sector().unwrap();
            assert!(!seen[sector.index() as usize]);
            seen[sector.index() as usize] = true;
        }
        assert_eq!(seen, [true; 6]);
    }

    #[test]
    fn test_invalid_codes_map_to_none() {
        assert_eq!(HallCode::new(0).sector(), None);
        assert_eq!(HallCode::new(7).sector(), None);
    }

    #[test]
    fn test_line_bit_order() {
        assert_eq!(HallCode::from_lines(true, false, false).bits(), 0b001);
        assert_eq!(HallCode::from_lines(false, true, false).bits(), 0b010);
        assert_eq!(HallCode::from_lines(false, false, true).bits(), 0b100);
    }

    #[test]
    fn test_majority_vote() {
        // 5 of 8 is a majority, 4 of 8 is not
        assert_eq!(HallCode::from_majority([5, 4, 8]).bits(), 0b101);
        assert_eq!(HallCode::from_majority([0, 8, 3]).bits(), 0b010);
    }

    #[test]
    fn test_sector_stepping_wraps() {
        let mut sector = Sector::S0;
        for _ in 0..6 {
            sector = sector.next();
        }
        assert_eq!(sector, Sector::S0);
    }
}
