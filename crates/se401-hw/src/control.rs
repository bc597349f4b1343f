//! Vendor request channel with a sticky first-error latch.
//!
//! The first failing request is remembered. Until [`ControlChannel::clear_error`]
//! (or [`ControlChannel::reset_device`]) is called, every further request
//! returns that error without touching the transport, so a long programming
//! sequence can be issued back to back and checked once at the end.

use crate::registers::{Request, FEATURE_READ_SIZE, READ_REQ_SIZE};
use crate::transport::{Transport, TransportError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("request {request:#04x} failed: {source}")]
    Transport {
        request: u8,
        source: TransportError,
    },
    #[error("transfer buffer too small: need {required} bytes, have {capacity}")]
    InvalidBuffer { required: usize, capacity: usize },
}

/// Synchronous request/response channel to the bridge.
pub struct ControlChannel<T> {
    transport: T,
    buf: Vec<u8>,
    error: Option<ControlError>,
}

impl<T: Transport> ControlChannel<T> {
    /// Wrap a transport, allocating a transfer buffer of `buf_capacity` bytes.
    pub fn new(transport: T, buf_capacity: usize) -> Self {
        Self {
            transport,
            buf: vec![0; buf_capacity],
            error: None,
        }
    }

    /// Verify the transfer buffer can hold a full vendor read.
    ///
    /// This is a static configuration invariant; call it once before use.
    pub fn check_buffer(&self) -> Result<(), ControlError> {
        if self.buf.len() < READ_REQ_SIZE {
            return Err(ControlError::InvalidBuffer {
                required: READ_REQ_SIZE,
                capacity: self.buf.len(),
            });
        }
        Ok(())
    }

    /// The latched error, if any request has failed since the last clear.
    pub fn error(&self) -> Option<&ControlError> {
        self.error.as_ref()
    }

    /// `Err` with the latched error, `Ok` if the channel is clean.
    pub fn status(&self) -> Result<(), ControlError> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Kick the device with a port reset and clear the latch.
    pub fn reset_device(&mut self) {
        tracing::warn!(error = ?self.error, "resetting unresponsive device");
        if let Err(e) = self.transport.reset_device() {
            tracing::warn!(error = %e, "device reset failed");
        }
        self.error = None;
    }

    pub fn write_request(&mut self, request: Request, value: u16) -> Result<(), ControlError> {
        self.write(request, value, false)
    }

    /// Like [`write_request`](Self::write_request) but a failure is latched
    /// without being logged. Used for probes that are expected to fail.
    pub fn write_request_silent(
        &mut self,
        request: Request,
        value: u16,
    ) -> Result<(), ControlError> {
        self.write(request, value, true)
    }

    pub fn read_request(&mut self, request: Request) -> Result<&[u8], ControlError> {
        self.read(request, false)
    }

    pub fn read_request_silent(&mut self, request: Request) -> Result<&[u8], ControlError> {
        self.read(request, true)
    }

    /// Write `param` to the extended feature (sensor register) `selector`.
    pub fn set_feature(&mut self, selector: u16, param: u16) -> Result<(), ControlError> {
        self.status()?;
        let request = Request::SetExtFeature;
        if let Err(source) = self.transport.send_request(request, param, selector) {
            tracing::error!(
                selector,
                param,
                error = %source,
                "set feature failed"
            );
            return Err(self.latch(ControlError::Transport {
                request: request.id(),
                source,
            }));
        }
        Ok(())
    }

    /// Read the 16-bit little-endian value of extended feature `selector`.
    pub fn get_feature(&mut self, selector: u16) -> Result<u16, ControlError> {
        self.status()?;
        self.require_buffer(FEATURE_READ_SIZE)?;
        let request = Request::GetExtFeature;
        let buf = &mut self.buf[..FEATURE_READ_SIZE];
        if let Err(source) = self.transport.recv_request(request, 0, selector, buf) {
            tracing::error!(
                selector,
                error = %source,
                "get feature failed"
            );
            return Err(self.latch(ControlError::Transport {
                request: request.id(),
                source,
            }));
        }
        Ok(u16::from_le_bytes([self.buf[0], self.buf[1]]))
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn write(&mut self, request: Request, value: u16, silent: bool) -> Result<(), ControlError> {
        self.status()?;
        if let Err(source) = self.transport.send_request(request, value, 0) {
            if !silent {
                tracing::error!(
                    request = request.id(),
                    value,
                    error = %source,
                    "write request failed"
                );
            }
            return Err(self.latch(ControlError::Transport {
                request: request.id(),
                source,
            }));
        }
        Ok(())
    }

    fn read(&mut self, request: Request, silent: bool) -> Result<&[u8], ControlError> {
        self.status()?;
        self.require_buffer(READ_REQ_SIZE)?;
        let buf = &mut self.buf[..READ_REQ_SIZE];
        buf.fill(0);
        if let Err(source) = self.transport.recv_request(request, 0, 0, buf) {
            if !silent {
                tracing::error!(
                    request = request.id(),
                    error = %source,
                    "read request failed"
                );
            }
            return Err(self.latch(ControlError::Transport {
                request: request.id(),
                source,
            }));
        }
        Ok(&self.buf[..READ_REQ_SIZE])
    }

    fn require_buffer(&mut self, required: usize) -> Result<(), ControlError> {
        if self.buf.len() < required {
            tracing::error!(required, capacity = self.buf.len(), "transfer buffer too small");
            return Err(self.latch(ControlError::InvalidBuffer {
                required,
                capacity: self.buf.len(),
            }));
        }
        Ok(())
    }

    fn latch(&mut self, err: ControlError) -> ControlError {
        if self.error.is_none() {
            self.error = Some(err.clone());
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{HV7131_REG_ARLV, HV7131_REG_HIREFNOL};
    use crate::sim::SimulatedSensor;

    fn channel() -> ControlChannel<SimulatedSensor> {
        ControlChannel::new(SimulatedSensor::new(), READ_REQ_SIZE)
    }

    #[test]
    fn test_set_then_get_feature() {
        let mut ch = channel();
        ch.set_feature(HV7131_REG_ARLV, 0x2d).unwrap();
        assert_eq!(ch.get_feature(HV7131_REG_ARLV).unwrap(), 0x2d);
        assert!(ch.error().is_none());
    }

    #[test]
    fn test_first_error_is_sticky() {
        let mut ch = channel();
        ch.transport_mut().fail_next(TransportError::Timeout);
        let first = ch.write_request(Request::LedControl, 1).unwrap_err();

        // Transport would succeed now, but the latch short-circuits.
        let sent_before = ch.transport().requests().len();
        let second = ch.set_feature(HV7131_REG_ARLV, 1).unwrap_err();
        assert_eq!(first, second);
        assert_eq!(ch.transport().requests().len(), sent_before);
        assert!(ch.get_feature(HV7131_REG_HIREFNOL).is_err());
    }

    #[test]
    fn test_silent_failure_still_latches() {
        let mut ch = channel();
        ch.transport_mut().fail_next(TransportError::Stall);
        assert!(ch.write_request_silent(Request::CameraPower, 1).is_err());
        assert!(matches!(
            ch.error(),
            Some(ControlError::Transport {
                source: TransportError::Stall,
                ..
            })
        ));
    }

    #[test]
    fn test_success_does_not_clear_latch() {
        let mut ch = channel();
        ch.transport_mut().fail_next(TransportError::Timeout);
        let _ = ch.write_request(Request::LedControl, 0);
        ch.clear_error();
        ch.write_request(Request::LedControl, 0).unwrap();
        assert!(ch.error().is_none());
    }

    #[test]
    fn test_reset_device_clears_latch() {
        let mut ch = channel();
        ch.transport_mut().fail_next(TransportError::NoDevice);
        let _ = ch.read_request(Request::GetCameraDescriptor);
        assert!(ch.error().is_some());
        ch.reset_device();
        assert!(ch.error().is_none());
        assert_eq!(ch.transport().resets(), 1);
    }

    #[test]
    fn test_small_buffer_is_invalid() {
        let mut ch = ControlChannel::new(SimulatedSensor::new(), 1);
        assert!(matches!(
            ch.check_buffer(),
            Err(ControlError::InvalidBuffer { required: 64, capacity: 1 })
        ));
        assert!(matches!(
            ch.get_feature(HV7131_REG_ARLV),
            Err(ControlError::InvalidBuffer { required: 2, .. })
        ));
        assert!(ch.error().is_some());
    }
}
