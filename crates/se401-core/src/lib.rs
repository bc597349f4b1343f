//! se401-core — Frame assembly and capture session for SE401 cameras.
//!
//! Turns the bulk endpoint's byte stream into frames (raw bayer or janggu
//! compressed), drops frames spoiled by exposure changes, recovers from
//! stream desyncs and keeps the sensor's reset level calibrated.

pub mod assembler;
pub mod button;
pub mod exposure;
pub mod frame;
pub mod session;

pub use assembler::{Desync, FeedOutcome, FrameAssembler};
pub use exposure::{ExposureGate, ExposureState};
pub use frame::{Frame, FrameCollector, FrameSink};
pub use session::{CaptureSession, SessionConfig, SessionError, SessionState};
