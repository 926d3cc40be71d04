//!
//! Commands sent to the drive controller
//!

use defmt::Format;
use ncomm_utils::packing::{Packable, PackingError};

/// Packed size of a control command: a discriminant byte plus a 4-byte
/// little-endian payload
pub const CONTROL_COMMAND_SIZE: usize = 5;

/// Commands that can be sent to the drive controller
#[derive(Format, Debug, PartialEq, Clone, Copy)]
pub enum ControlCommand {
    /// Select the operating mode (wire value from `DriveMode::to_wire`)
    SetMode {
        /// The mode to switch into
        mode: u8,
    },
    /// Set the cruise control speed setpoint
    SetTargetSpeed {
        /// The road speed to hold (mph)
        mph: f32,
    },
    /// Set the fixed current target used by test mode
    SetTestCurrent {
        /// The phase current to regulate to (mA)
        ma: i32,
    },
    /// Ask for a telemetry frame right now instead of waiting for the
    /// periodic one
    RequestTelemetry,
    /// Unknown Command
    Unknown,
}

impl Packable for ControlCommand {
    fn len() -> usize {
        CONTROL_COMMAND_SIZE
    }

    fn pack(self, buffer: &mut [u8]) -> Result<(), PackingError> {
        if buffer.len() < Self::len() {
            return Err(PackingError::InvalidBufferSize);
        }

        match self {
            Self::SetMode { mode } => {
                buffer[0] = 0x01;
                buffer[1] = mode;
            }
            Self::SetTargetSpeed { mph } => {
                buffer[0] = 0x02;
                buffer[1..5].copy_from_slice(&mph.to_le_bytes());
            }
            Self::SetTestCurrent { ma } => {
                buffer[0] = 0x03;
                buffer[1..5].copy_from_slice(&ma.to_le_bytes());
            }
            Self::RequestTelemetry => {
                buffer[0] = 0x04;
            }
            Self::Unknown => (),
        }

        Ok(())
    }

    fn unpack(data: &[u8]) -> Result<Self, PackingError> {
        if data.len() < Self::len() {
            return Err(PackingError::InvalidBufferSize);
        }

        match data[0] {
            0x01 => Ok(Self::SetMode { mode: data[1] }),
            0x02 => Ok(Self::SetTargetSpeed {
                mph: f32::from_le_bytes([data[1], data[2], data[3], data[4]]),
            }),
            0x03 => Ok(Self::SetTestCurrent {
                ma: i32::from_le_bytes([data[1], data[2], data[3], data[4]]),
            }),
            0x04 => Ok(Self::RequestTelemetry),
            _ => Ok(Self::Unknown),
        }
    }
}

impl Default for ControlCommand {
    fn default() -> Self {
        Self::RequestTelemetry
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pack_unpack_set_mode_command() {
        let command = ControlCommand::SetMode { mode: 2 };

        let mut buffer = [0u8; CONTROL_COMMAND_SIZE];
        command.pack(&mut buffer).unwrap();

        let unpacked = ControlCommand::unpack(&buffer).unwrap();
        assert_eq!(command, unpacked);
    }

    #[test]
    fn test_pack_unpack_set_target_speed_command() {
        let command = ControlCommand::SetTargetSpeed { mph: 16.5 };

        let mut buffer = [0u8; CONTROL_COMMAND_SIZE];
        command.pack(&mut buffer).unwrap();

        let unpacked = ControlCommand::unpack(&buffer).unwrap();
        assert_eq!(command, unpacked);
    }

    #[test]
    fn test_pack_unpack_set_test_current_command() {
        let command = ControlCommand::SetTestCurrent { ma: -1_500 };

        let mut buffer = [0u8; CONTROL_COMMAND_SIZE];
        command.pack(&mut buffer).unwrap();

        let unpacked = ControlCommand::unpack(&buffer).unwrap();
        assert_eq!(command, unpacked);
    }

    #[test]
    fn test_pack_unpack_request_telemetry_command() {
        let command = ControlCommand::RequestTelemetry;

        let mut buffer = [0u8; CONTROL_COMMAND_SIZE];
        command.pack(&mut buffer).unwrap();

        let unpacked = ControlCommand::unpack(&buffer).unwrap();
        assert_eq!(command, unpacked);
    }

    #[test]
    fn test_unknown_discriminant_unpacks_to_unknown() {
        let buffer = [0x7f, 0, 0, 0, 0];
        assert_eq!(
            ControlCommand::unpack(&buffer).unwrap(),
            ControlCommand::Unknown,
        );
    }

    #[test]
    fn test_short_buffer_errors() {
        let command = ControlCommand::SetMode { mode: 0 };
        let mut buffer = [0u8; CONTROL_COMMAND_SIZE - 1];
        assert_eq!(
            command.pack(&mut buffer),
            Err(PackingError::InvalidBufferSize),
        );
        assert_eq!(
            ControlCommand::unpack(&buffer),
            Err(PackingError::InvalidBufferSize),
        );
    }
}
