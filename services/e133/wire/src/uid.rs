//! RDM unique identifiers.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Device id used by broadcast and vendorcast addresses
const BROADCAST_DEVICE_ID: u32 = 0xFFFF_FFFF;

/// Manufacturer id of the all-devices broadcast address
const ALL_MANUFACTURERS: u16 = 0xFFFF;

/// UID size on the wire
pub const UID_SIZE: usize = 6;

/// UID errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UidError {
    /// Text did not have the `mmmm:dddddddd` form
    #[error("invalid uid '{0}'")]
    Parse(String),

    /// Stepped past the first or last UID
    #[error("uid out of range")]
    OutOfRange,
}

/// 48-bit RDM unique id, ordered by manufacturer then device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid {
    manufacturer_id: u16,
    device_id: u32,
}

impl Uid {
    /// Create a UID
    pub const fn new(manufacturer_id: u16, device_id: u32) -> Self {
        Self {
            manufacturer_id,
            device_id,
        }
    }

    /// Address every device of every manufacturer
    pub const fn all_devices() -> Self {
        Self::new(ALL_MANUFACTURERS, BROADCAST_DEVICE_ID)
    }

    /// Address every device of one manufacturer
    pub const fn vendorcast(manufacturer_id: u16) -> Self {
        Self::new(manufacturer_id, BROADCAST_DEVICE_ID)
    }

    /// ESTA manufacturer id
    pub fn manufacturer_id(&self) -> u16 {
        self.manufacturer_id
    }

    /// Device id within the manufacturer
    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    /// True for the all-devices and vendorcast addresses
    pub fn is_broadcast(&self) -> bool {
        self.device_id == BROADCAST_DEVICE_ID
    }

    /// The following UID, carrying into the manufacturer id
    pub fn next(&self) -> Result<Self, UidError> {
        if self.device_id == u32::MAX {
            if self.manufacturer_id == u16::MAX {
                return Err(UidError::OutOfRange);
            }
            Ok(Self::new(self.manufacturer_id + 1, 0))
        } else {
            Ok(Self::new(self.manufacturer_id, self.device_id + 1))
        }
    }

    /// The preceding UID, borrowing from the manufacturer id
    pub fn previous(&self) -> Result<Self, UidError> {
        if self.device_id == 0 {
            if self.manufacturer_id == 0 {
                return Err(UidError::OutOfRange);
            }
            Ok(Self::new(self.manufacturer_id - 1, u32::MAX))
        } else {
            Ok(Self::new(self.manufacturer_id, self.device_id - 1))
        }
    }

    /// Decode the 6-byte big-endian wire form
    pub fn from_bytes(bytes: [u8; UID_SIZE]) -> Self {
        Self::new(
            u16::from_be_bytes([bytes[0], bytes[1]]),
            u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
        )
    }

    /// Encode to the 6-byte big-endian wire form
    pub fn to_bytes(&self) -> [u8; UID_SIZE] {
        let m = self.manufacturer_id.to_be_bytes();
        let d = self.device_id.to_be_bytes();
        [m[0], m[1], d[0], d[1], d[2], d[3]]
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:08x}", self.manufacturer_id, self.device_id)
    }
}

impl FromStr for Uid {
    type Err = UidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || UidError::Parse(s.to_string());

        let (manufacturer, device) = s.split_once(':').ok_or_else(invalid)?;
        if manufacturer.is_empty()
            || device.is_empty()
            || manufacturer.len() > 4
            || device.len() > 8
            || !manufacturer.chars().all(|c| c.is_ascii_hexdigit())
            || !device.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(invalid());
        }

        let manufacturer_id = u16::from_str_radix(manufacturer, 16).map_err(|_| invalid())?;
        let device_id = u32::from_str_radix(device, 16).map_err(|_| invalid())?;
        Ok(Self::new(manufacturer_id, device_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic() {
        let uid = Uid::new(0x707a, 0x12345678);
        assert_eq!(uid.manufacturer_id(), 0x707a);
        assert_eq!(uid.device_id(), 0x12345678);
        assert_eq!(uid.to_string(), "707a:12345678");
        assert!(!uid.is_broadcast());

        assert!(Uid::new(0x707a, 0x12345679) > uid);
        assert!(uid > Uid::new(0x7079, 0x12345678));
    }

    #[test]
    fn test_broadcast_addresses() {
        assert!(Uid::all_devices().is_broadcast());
        assert!(Uid::vendorcast(0x707a).is_broadcast());
    }

    #[test]
    fn test_from_str() {
        for bad in ["", "abc", ":", "0:1:2", "12345:1234", "1:123456789", "zz:1"] {
            assert!(bad.parse::<Uid>().is_err(), "{bad} should not parse");
        }

        let uid: Uid = "00a0:12345678".parse().unwrap();
        assert_eq!(uid, Uid::new(0x00a0, 0x12345678));
        assert_eq!(uid.to_string(), "00a0:12345678");
    }

    #[test]
    fn test_sorting() {
        let mut uids = vec![
            Uid::new(0x4845, 0xfffffffe),
            Uid::new(0x4845, 0x0000022e),
            Uid::new(0x4844, 0x0000022e),
            Uid::new(0x4846, 0x0000022e),
        ];
        uids.sort();
        assert_eq!(
            uids,
            vec![
                Uid::new(0x4844, 0x0000022e),
                Uid::new(0x4845, 0x0000022e),
                Uid::new(0x4845, 0xfffffffe),
                Uid::new(0x4846, 0x0000022e),
            ]
        );
    }

    #[test]
    fn test_next_and_previous() {
        let u1 = Uid::new(0x4845, 0xfffffffe);
        let u2 = u1.next().unwrap();
        assert_eq!(u2.to_string(), "4845:ffffffff");
        let u3 = u2.next().unwrap();
        assert_eq!(u3.to_string(), "4846:00000000");

        assert_eq!(u3.previous().unwrap(), u2);
        assert_eq!(u2.previous().unwrap(), u1);

        assert_eq!(Uid::new(0, 0).previous(), Err(UidError::OutOfRange));
        assert_eq!(Uid::all_devices().next(), Err(UidError::OutOfRange));
    }

    #[test]
    fn test_wire_bytes() {
        let uid = Uid::new(0x7a70, 0x00000102);
        assert_eq!(uid.to_bytes(), [0x7a, 0x70, 0, 0, 1, 2]);
        assert_eq!(Uid::from_bytes(uid.to_bytes()), uid);
    }
}
