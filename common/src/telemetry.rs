//!
//! Telemetry reported by the drive controller
//!

use defmt::Format;
use ncomm_utils::packing::{Packable, PackingError};

/// Packed size of a telemetry frame
pub const TELEMETRY_FRAME_SIZE: usize = 26;

/// Snapshot of the drive controller's state, sent over serial every 250 ms
/// and on request.
///
/// The status byte packs the mode wire value into bits 0..=1 and the launch,
/// cruise, and synchronous flags into bits 2, 3, and 4.
#[derive(Format, Debug, PartialEq, Clone, Copy)]
pub struct TelemetryFrame {
    /// Bus voltage (mV)
    pub voltage_mv: u32,
    /// Smoothed phase current (mA)
    pub current_ma: i32,
    /// Estimated battery-side current (mA)
    pub battery_current_ma: i32,
    /// Wheel speed (RPM)
    pub rpm: u16,
    /// Road speed in tenths of a mph
    pub speed_mph_x10: u16,
    /// Duty cycle as a percentage
    pub duty_pct: u8,
    /// Normalized throttle as a percentage
    pub throttle_pct: u8,
    /// Mode and flag bits
    pub status: u8,
    /// Lifetime sector transition count
    pub odometer: u32,
    /// Control ticks dropped to malformed sample batches
    pub dropped_ticks: u16,
    /// Wraps every 256 frames so gaps are visible
    pub sequence: u8,
}

impl TelemetryFrame {
    const MODE_MASK: u8 = 0b0000_0011;
    const LAUNCH_BIT: u8 = 1 << 2;
    const CRUISE_BIT: u8 = 1 << 3;
    const SYNCHRONOUS_BIT: u8 = 1 << 4;

    /// Compose the status byte from a mode wire value and the flags
    pub fn status_bits(mode_wire: u8, launch: bool, cruise: bool, synchronous: bool) -> u8 {
        let mut status = mode_wire & Self::MODE_MASK;
        if launch {
            status |= Self::LAUNCH_BIT;
        }
        if cruise {
            status |= Self::CRUISE_BIT;
        }
        if synchronous {
            status |= Self::SYNCHRONOUS_BIT;
        }
        status
    }

    pub fn mode_wire(&self) -> u8 {
        self.status & Self::MODE_MASK
    }

    pub fn launch(&self) -> bool {
        self.status & Self::LAUNCH_BIT != 0
    }

    pub fn cruise(&self) -> bool {
        self.status & Self::CRUISE_BIT != 0
    }

    pub fn synchronous(&self) -> bool {
        self.status & Self::SYNCHRONOUS_BIT != 0
    }
}

impl Packable for TelemetryFrame {
    fn len() -> usize {
        TELEMETRY_FRAME_SIZE
    }

    fn pack(self, buffer: &mut [u8]) -> Result<(), PackingError> {
        if buffer.len() < Self::len() {
            return Err(PackingError::InvalidBufferSize);
        }

        buffer[0..4].copy_from_slice(&self.voltage_mv.to_le_bytes());
        buffer[4..8].copy_from_slice(&self.current_ma.to_le_bytes());
        buffer[8..12].copy_from_slice(&self.battery_current_ma.to_le_bytes());
        buffer[12..14].copy_from_slice(&self.rpm.to_le_bytes());
        buffer[14..16].copy_from_slice(&self.speed_mph_x10.to_le_bytes());
        buffer[16] = self.duty_pct;
        buffer[17] = self.throttle_pct;
        buffer[18] = self.status;
        buffer[19..23].copy_from_slice(&self.odometer.to_le_bytes());
        buffer[23..25].copy_from_slice(&self.dropped_ticks.to_le_bytes());
        buffer[25] = self.sequence;

        Ok(())
    }

    fn unpack(data: &[u8]) -> Result<Self, PackingError> {
        if data.len() < Self::len() {
            return Err(PackingError::InvalidBufferSize);
        }

        Ok(Self {
            voltage_mv: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            current_ma: i32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            battery_current_ma: i32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            rpm: u16::from_le_bytes([data[12], data[13]]),
            speed_mph_x10: u16::from_le_bytes([data[14], data[15]]),
            duty_pct: data[16],
            throttle_pct: data[17],
            status: data[18],
            odometer: u32::from_le_bytes([data[19], data[20], data[21], data[22]]),
            dropped_ticks: u16::from_le_bytes([data[23], data[24]]),
            sequence: data[25],
        })
    }
}

impl Default for TelemetryFrame {
    fn default() -> Self {
        Self {
            voltage_mv: 0,
            current_ma: 0,
            battery_current_ma: 0,
            rpm: 0,
            speed_mph_x10: 0,
            duty_pct: 0,
            throttle_pct: 0,
            status: 0,
            odometer: 0,
            dropped_ticks: 0,
            sequence: 0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pack_unpack_telemetry_frame() {
        let frame = TelemetryFrame {
            voltage_mv: 36_500,
            current_ma: 4_160,
            battery_current_ma: -250,
            rpm: 312,
            speed_mph_x10: 148,
            duty_pct: 42,
            throttle_pct: 61,
            status: TelemetryFrame::status_bits(1, false, true, true),
            odometer: 1_234_567,
            dropped_ticks: 3,
            sequence: 17,
        };

        let mut buffer = [0u8; TELEMETRY_FRAME_SIZE];
        frame.pack(&mut buffer).unwrap();

        let unpacked = TelemetryFrame::unpack(&buffer).unwrap();
        assert_eq!(frame, unpacked);
    }

    #[test]
    fn test_status_bits() {
        let status = TelemetryFrame::status_bits(2, true, false, true);
        let frame = TelemetryFrame {
            status,
            ..Default::default()
        };

        assert_eq!(frame.mode_wire(), 2);
        assert!(frame.launch());
        assert!(!frame.cruise());
        assert!(frame.synchronous());
    }

    #[test]
    fn test_mode_bits_masked() {
        // a bogus mode value can't clobber the flag bits
        let status = TelemetryFrame::status_bits(0xff, false, false, false);
        assert_eq!(status, 0b0000_0011);
    }

    #[test]
    fn test_short_buffer_errors() {
        let frame = TelemetryFrame::default();
        let mut buffer = [0u8; TELEMETRY_FRAME_SIZE - 1];
        assert_eq!(frame.pack(&mut buffer), Err(PackingError::InvalidBufferSize));
        assert_eq!(
            TelemetryFrame::unpack(&buffer),
            Err(PackingError::InvalidBufferSize),
        );
    }
}
