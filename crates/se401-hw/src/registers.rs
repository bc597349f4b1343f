//! Vendor request ids, HV7131 sensor registers and transfer size constants.

/// Bytes per bulk transfer submitted on the video endpoint.
pub const BULK_SIZE: usize = 4096;

/// Largest janggu packet (header included) the bridge ever sends.
pub const PACKET_SIZE: usize = 1024;

/// Length of a vendor read request (camera descriptor, brightness).
pub const READ_REQ_SIZE: usize = 64;

/// Length of an extended feature read.
pub const FEATURE_READ_SIZE: usize = 2;

/// Descriptor capacity: a 6-byte preamble followed by 4 bytes per size.
pub const MAX_MODES: usize = (READ_REQ_SIZE - 6) / 4;

/// Fixed janggu quantisation factor, programmed into the high nibble of
/// [`OPERATING_MODE`]. Must match the userspace decoder.
pub const QUANT_FACTOR: u16 = 8;

/// Control transfer timeout in milliseconds.
pub const CONTROL_TIMEOUT_MS: u64 = 1000;

/// Bridge vendor requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Request {
    GetCameraDescriptor = 0x06,
    StartContinuousCapture = 0x41,
    StopContinuousCapture = 0x42,
    GetBrightness = 0x44,
    SetBrightness = 0x45,
    SetWidth = 0x4d,
    SetHeight = 0x4f,
    GetExtFeature = 0x52,
    SetExtFeature = 0x53,
    CameraPower = 0x56,
    LedControl = 0x57,
}

impl Request {
    pub fn id(self) -> u8 {
        self as u8
    }
}

/// Bayer output supported flag in descriptor byte 2.
pub const FORMAT_BAYER: u8 = 0x40;

/// Descriptor type byte expected at offset 1.
pub const DESCRIPTOR_TYPE: u8 = 0x41;

// HV7131 mode registers
pub const HV7131_REG_MODE_B: u16 = 0x01;

// Integration time, upper/mid/low byte
pub const HV7131_REG_TITU: u16 = 0x25;
pub const HV7131_REG_TITM: u16 = 0x26;
pub const HV7131_REG_TITL: u16 = 0x27;

// Adjust registers
pub const HV7131_REG_ARLV: u16 = 0x30;
pub const HV7131_REG_ARCG: u16 = 0x31;
pub const HV7131_REG_AGCG: u16 = 0x32;
pub const HV7131_REG_ABCG: u16 = 0x33;

// Reset level statistics, not cleared on read
pub const HV7131_REG_LOREFNOH: u16 = 0x57;
pub const HV7131_REG_LOREFNOL: u16 = 0x58;
pub const HV7131_REG_HIREFNOH: u16 = 0x59;
pub const HV7131_REG_HIREFNOL: u16 = 0x5a;

/// Bridge operating mode feature selector.
pub const OPERATING_MODE: u16 = 0x2000;
