//! Boundary to the USB control pipe.
//!
//! The capture stack never talks to USB directly; it issues vendor requests
//! through a [`Transport`]. Every call is synchronous and bounded by
//! [`CONTROL_TIMEOUT_MS`](crate::registers::CONTROL_TIMEOUT_MS).

use crate::registers::Request;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("control transfer timed out")]
    Timeout,
    #[error("endpoint stalled")]
    Stall,
    #[error("device disconnected")]
    NoDevice,
    #[error("transfer failed with status {0}")]
    Io(i32),
}

/// Vendor control requests (`USB_TYPE_VENDOR | USB_RECIP_DEVICE`).
pub trait Transport {
    /// Host-to-device request with no data stage.
    fn send_request(&mut self, request: Request, value: u16, index: u16)
        -> Result<(), TransportError>;

    /// Device-to-host request. Fills `buf` and returns the bytes received.
    fn recv_request(
        &mut self,
        request: Request,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize, TransportError>;

    /// Port-level reset. The SE401 sometimes stops answering after sitting
    /// idle and needs one of these before it responds again.
    fn reset_device(&mut self) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_request(
        &mut self,
        request: Request,
        value: u16,
        index: u16,
    ) -> Result<(), TransportError> {
        (**self).send_request(request, value, index)
    }

    fn recv_request(
        &mut self,
        request: Request,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize, TransportError> {
        (**self).recv_request(request, value, index, buf)
    }

    fn reset_device(&mut self) -> Result<(), TransportError> {
        (**self).reset_device()
    }
}
