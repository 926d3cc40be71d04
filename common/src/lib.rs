//!
//! Wire types shared between the drive controller firmware and whatever sits
//! on the other end of its serial link
//!

#![no_std]

pub mod command;
pub mod telemetry;

pub use command::{CONTROL_COMMAND_SIZE, ControlCommand};
pub use telemetry::{TELEMETRY_FRAME_SIZE, TelemetryFrame};

/// Every serial frame, in either direction, starts with this byte
pub const SYNC_BYTE: u8 = 0x11;
