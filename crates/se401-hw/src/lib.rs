//! se401-hw — Hardware abstraction for the Endpoints SE401 USB bridge.
//!
//! Provides the vendor control request channel, HV7131 sensor register
//! programming, camera descriptor parsing and the reset level calibration
//! loop.

pub mod calibration;
pub mod control;
pub mod controls;
pub mod descriptor;
pub mod quirks;
pub mod registers;
pub mod sim;
pub mod transport;

pub use calibration::CalibrationLoop;
pub use control::{ControlChannel, ControlError};
pub use controls::{ControlValues, LineFrequency};
pub use descriptor::{CameraDescriptor, CaptureProfile, DescriptorError, Mode};
pub use transport::{Transport, TransportError};
