//! In-memory SE401 stand-in.
//!
//! Answers vendor requests from a register map, records every request for
//! later inspection and can be told to fail. Used by the test suites and by
//! the CLI's dump replay, where no camera is attached.

use crate::registers::{Request, DESCRIPTOR_TYPE, FORMAT_BAYER, READ_REQ_SIZE};
use crate::transport::{Transport, TransportError};
use std::collections::{HashMap, VecDeque};

/// One request seen by the simulated bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggedRequest {
    pub request: Request,
    pub value: u16,
    pub index: u16,
}

pub struct SimulatedSensor {
    descriptor: Vec<u8>,
    features: HashMap<u16, u16>,
    scripted_reads: HashMap<u16, VecDeque<u16>>,
    brightness: Option<u16>,
    log: Vec<LoggedRequest>,
    fail_next: Option<TransportError>,
    fail_always: HashMap<Request, TransportError>,
    resets: usize,
}

impl SimulatedSensor {
    /// A camera advertising 352x288, 176x144 and 88x72.
    pub fn new() -> Self {
        Self::with_sizes(&[(352, 288), (176, 144), (88, 72)])
    }

    /// A camera whose descriptor advertises `sizes`.
    pub fn with_sizes(sizes: &[(u16, u16)]) -> Self {
        Self {
            descriptor: build_descriptor(sizes),
            features: HashMap::new(),
            scripted_reads: HashMap::new(),
            brightness: Some(0),
            log: Vec::new(),
            fail_next: None,
            fail_always: HashMap::new(),
            resets: 0,
        }
    }

    /// Replace the raw descriptor bytes returned by `GetCameraDescriptor`.
    pub fn with_descriptor(mut self, descriptor: Vec<u8>) -> Self {
        self.descriptor = descriptor;
        self
    }

    /// Make `GetBrightness` stall, as on bridges without brightness support.
    pub fn without_brightness(mut self) -> Self {
        self.brightness = None;
        self
    }

    /// Fail the next request of any kind with `err`.
    pub fn fail_next(&mut self, err: TransportError) {
        self.fail_next = Some(err);
    }

    /// Fail every future `request` with `err`.
    pub fn fail_always(&mut self, request: Request, err: TransportError) {
        self.fail_always.insert(request, err);
    }

    /// Queue readings returned by `GetExtFeature(selector)` before falling
    /// back to the register map.
    pub fn script_reads(&mut self, selector: u16, values: &[u16]) {
        self.scripted_reads
            .entry(selector)
            .or_default()
            .extend(values.iter().copied());
    }

    pub fn set_register(&mut self, selector: u16, value: u16) {
        self.features.insert(selector, value);
    }

    pub fn register(&self, selector: u16) -> Option<u16> {
        self.features.get(&selector).copied()
    }

    pub fn requests(&self) -> &[LoggedRequest] {
        &self.log
    }

    /// Drop all injected failures.
    pub fn clear_failures(&mut self) {
        self.fail_next = None;
        self.fail_always.clear();
    }

    /// Values written to extended feature `selector`, in order.
    pub fn feature_writes(&self, selector: u16) -> Vec<u16> {
        self.log
            .iter()
            .filter(|r| r.request == Request::SetExtFeature && r.index == selector)
            .map(|r| r.value)
            .collect()
    }

    /// Number of times `request` was issued.
    pub fn count(&self, request: Request) -> usize {
        self.log.iter().filter(|r| r.request == request).count()
    }

    pub fn resets(&self) -> usize {
        self.resets
    }

    fn record(&mut self, request: Request, value: u16, index: u16) -> Result<(), TransportError> {
        self.log.push(LoggedRequest {
            request,
            value,
            index,
        });
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }
        if let Some(err) = self.fail_always.get(&request) {
            return Err(err.clone());
        }
        Ok(())
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimulatedSensor {
    fn send_request(
        &mut self,
        request: Request,
        value: u16,
        index: u16,
    ) -> Result<(), TransportError> {
        self.record(request, value, index)?;
        match request {
            Request::SetExtFeature => {
                self.features.insert(index, value);
            }
            Request::SetBrightness => {
                if self.brightness.is_none() {
                    return Err(TransportError::Stall);
                }
                self.brightness = Some(value);
            }
            _ => {}
        }
        Ok(())
    }

    fn recv_request(
        &mut self,
        request: Request,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize, TransportError> {
        self.record(request, value, index)?;
        let reply: Vec<u8> = match request {
            Request::GetCameraDescriptor => self.descriptor.clone(),
            Request::GetBrightness => match self.brightness {
                Some(b) => b.to_le_bytes().to_vec(),
                None => return Err(TransportError::Stall),
            },
            Request::GetExtFeature => {
                let scripted = self
                    .scripted_reads
                    .get_mut(&index)
                    .and_then(|q| q.pop_front());
                let v = scripted
                    .or_else(|| self.features.get(&index).copied())
                    .unwrap_or(0);
                v.to_le_bytes().to_vec()
            }
            _ => return Err(TransportError::Stall),
        };
        let n = reply.len().min(buf.len());
        buf[..n].copy_from_slice(&reply[..n]);
        Ok(n)
    }

    fn reset_device(&mut self) -> Result<(), TransportError> {
        self.resets += 1;
        Ok(())
    }
}

/// Encode a camera descriptor advertising bayer output at `sizes`.
pub fn build_descriptor(sizes: &[(u16, u16)]) -> Vec<u8> {
    let mut cd = vec![0u8; READ_REQ_SIZE];
    cd[0] = READ_REQ_SIZE as u8;
    cd[1] = DESCRIPTOR_TYPE;
    cd[2] = FORMAT_BAYER;
    cd[4..6].copy_from_slice(&(sizes.len() as u16).to_le_bytes());
    for (i, (w, h)) in sizes.iter().enumerate() {
        let off = 6 + i * 4;
        if off + 4 > cd.len() {
            break;
        }
        cd[off..off + 2].copy_from_slice(&w.to_le_bytes());
        cd[off + 2..off + 4].copy_from_slice(&h.to_le_bytes());
    }
    cd
}
