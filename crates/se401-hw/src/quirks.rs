//! Supported device table.
//!
//! Lists the USB VID:PID pairs of cameras built on the SE401 bridge. The
//! table is embedded at compile time from `contrib/hw/se401.toml`.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const DEVICE_TABLE: &str = include_str!("../../../contrib/hw/se401.toml");

static DEVICE_DB: OnceLock<Vec<KnownDevice>> = OnceLock::new();

#[derive(Debug, Deserialize)]
struct DeviceTable {
    device: Vec<KnownDevice>,
}

/// One `[[device]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownDevice {
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: String,
}

fn device_db() -> &'static Vec<KnownDevice> {
    DEVICE_DB.get_or_init(|| match toml::from_str::<DeviceTable>(DEVICE_TABLE) {
        Ok(table) => table.device,
        Err(e) => {
            tracing::error!(error = %e, "bad device table TOML");
            Vec::new()
        }
    })
}

/// Look up a camera by USB vendor:product ID.
pub fn lookup_device(vid: u16, pid: u16) -> Option<&'static KnownDevice> {
    device_db()
        .iter()
        .find(|d| d.vendor_id == vid && d.product_id == pid)
}

/// All supported cameras.
pub fn list_devices() -> &'static [KnownDevice] {
    device_db()
}

/// Parse a `vvvv:pppp` hex pair as printed by `lsusb`.
pub fn parse_usb_id(s: &str) -> Option<(u16, u16)> {
    let (vid, pid) = s.trim().split_once(':')?;
    let vid = u16::from_str_radix(vid, 16).ok()?;
    let pid = u16::from_str_radix(pid, 16).ok()?;
    Some((vid, pid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_loads() {
        assert_eq!(list_devices().len(), 5);
    }

    #[test]
    fn test_lookup() {
        let dev = lookup_device(0x0471, 0x030b).unwrap();
        assert_eq!(dev.name, "Philips PCVC665K");
        assert!(lookup_device(0x04f2, 0xb6d9).is_none());
    }

    #[test]
    fn test_parse_usb_id() {
        assert_eq!(parse_usb_id("047d:5003"), Some((0x047d, 0x5003)));
        assert_eq!(parse_usb_id("047d"), None);
        assert_eq!(parse_usb_id("zz:0001"), None);
    }
}
