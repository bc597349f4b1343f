//! Janggu compressed stream framing.
//!
//! The compressed stream is a sequence of variable length packets, each
//! starting with a 4-byte header:
//!
//! ```text
//!  byte 0      byte 1      byte 2      byte 3
//! [ii pppppp] [pppppppp] [bbbbbbbb] [bbbbbbbb]
//!  i = info (0 data, 1 end of frame, 2 start of frame)
//!  p = pixels encoded in this packet
//!  b = payload length in bits
//! ```
//!
//! Packets span bulk chunk boundaries freely. Whole packets, header
//! included, are passed to the sink for the userspace decoder.

use super::{Desync, FrameEmitter, PacketScanner, PacketType};
use se401_hw::registers::PACKET_SIZE;

const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketInfo {
    Data,
    Eof,
    Sof,
}

impl PacketInfo {
    fn bits(self) -> u8 {
        match self {
            PacketInfo::Data => 0,
            PacketInfo::Eof => 1,
            PacketInfo::Sof => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub info: PacketInfo,
    /// 14-bit pixel count.
    pub pixel_count: u16,
    pub bit_count: u16,
}

impl PacketHeader {
    pub fn new(info: PacketInfo, pixel_count: u16, bit_count: u16) -> Self {
        Self {
            info,
            pixel_count: pixel_count & 0x3fff,
            bit_count,
        }
    }

    /// Decode and sanity check a header.
    pub fn decode(b: [u8; HEADER_LEN]) -> Result<Self, Desync> {
        let bit_count = u16::from_be_bytes([b[2], b[3]]);
        let pixel_count = u16::from_be_bytes([b[0] & 0x3f, b[1]]);

        let len = packet_len(bit_count);
        if len > PACKET_SIZE {
            return Err(Desync::PacketTooLong(len));
        }
        let info = match b[0] >> 6 {
            0 => PacketInfo::Data,
            1 => PacketInfo::Eof,
            2 => PacketInfo::Sof,
            _ => return Err(Desync::InvalidInfo),
        };
        Ok(Self {
            info,
            pixel_count,
            bit_count,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let [p0, p1] = self.pixel_count.to_be_bytes();
        let [b0, b1] = self.bit_count.to_be_bytes();
        [(self.info.bits() << 6) | (p0 & 0x3f), p1, b0, b1]
    }

    /// Total packet length in bytes, header included.
    pub fn packet_len(&self) -> usize {
        packet_len(self.bit_count)
    }
}

/// Header plus payload rounded up to 16-bit words; always even, at least 4.
fn packet_len(bit_count: u16) -> usize {
    ((bit_count as usize + 47) >> 4) << 1
}

pub struct JangguScanner {
    packet: Vec<u8>,
    packet_read: usize,
    pixels_read: u32,
    image_pixels: u32,
}

impl JangguScanner {
    /// `image_pixels` is `width * height` of the output frame.
    pub fn new(image_pixels: u32) -> Self {
        Self {
            packet: vec![0; PACKET_SIZE],
            packet_read: 0,
            pixels_read: 0,
            image_pixels,
        }
    }

    /// Copy up to `want` total bytes into the packet buffer; returns bytes taken.
    fn fill(&mut self, data: &[u8], want: usize) -> usize {
        let count = want.saturating_sub(self.packet_read).min(data.len());
        self.packet[self.packet_read..self.packet_read + count].copy_from_slice(&data[..count]);
        self.packet_read += count;
        count
    }
}

impl PacketScanner for JangguScanner {
    fn scan(&mut self, data: &[u8], frame: &mut FrameEmitter<'_>) -> Result<(), Desync> {
        // The bridge sometimes sends a 1024 byte garbage chunk between frames.
        if frame.last_packet() == PacketType::Last && data.len() == PACKET_SIZE {
            tracing::trace!("dropping inter-frame garbage chunk");
            frame.discard();
            return Ok(());
        }

        let mut i = 0;
        while i < data.len() {
            if self.packet_read < HEADER_LEN {
                i += self.fill(&data[i..], HEADER_LEN);
                if self.packet_read < HEADER_LEN {
                    break;
                }
            }

            let mut raw = [0u8; HEADER_LEN];
            raw.copy_from_slice(&self.packet[..HEADER_LEN]);
            let header = PacketHeader::decode(raw)?;
            let plen = header.packet_len();

            i += self.fill(&data[i..], plen);
            if self.packet_read < plen {
                break;
            }

            self.pixels_read = self.pixels_read.saturating_add(header.pixel_count as u32);
            self.packet_read = 0;
            let packet = &self.packet[..plen];

            match header.info {
                PacketInfo::Data => frame.inter(packet),
                PacketInfo::Eof => {
                    if self.pixels_read != self.image_pixels {
                        return Err(Desync::PixelCount {
                            actual: self.pixels_read,
                            expected: self.image_pixels,
                        });
                    }
                    frame.complete(packet);
                    // At most one frame boundary per chunk; the rest is dropped.
                    return Ok(());
                }
                PacketInfo::Sof => {
                    frame.first(packet);
                    self.pixels_read = header.pixel_count as u32;
                }
            }

            // Past the frame size no EOF can match any more.
            if self.pixels_read > self.image_pixels {
                return Err(Desync::PixelCount {
                    actual: self.pixels_read,
                    expected: self.image_pixels,
                });
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.packet_read = 0;
        self.pixels_read = 0;
    }
}
