//!
//! Control math for the brushless traction drive.  Everything that decides
//! what the half bridges should do lives here, away from any peripheral
//! access, so the whole loop can be unit tested on the host.  The firmware
//! crate feeds in hall codes, ADC batches, and timestamps and applies the
//! returned phase levels.
//!

#![no_std]

pub mod config;
pub mod control;
pub mod cruise;
pub mod hall;
pub mod pwm;
pub mod rpm;
pub mod state;

pub use control::{SampleBatch, control_tick};
pub use cruise::CruiseController;
pub use hall::{HALL_TO_SECTOR, HallCode, Sector};
pub use pwm::{PhaseLevels, drive_levels};
pub use rpm::RpmEstimator;
pub use state::{ControlState, DriveMode};
