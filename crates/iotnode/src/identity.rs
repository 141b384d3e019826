use alloc::string::String;

const HEX_CHARS: &[u8; 16] = b"0123456789ABCDEF";

/// A device identifier.
///
/// The hardware `MAC` address of the node network interface is unique
/// enough to identify a device, so it is hex-encoded and used as
/// identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceUuid(String);

impl DeviceUuid {
    /// Creates a [`DeviceUuid`] from a `MAC` address.
    ///
    /// Each byte is encoded as two uppercase hexadecimal digits, high nibble
    /// first, without separators.
    ///
    /// Firmware which encodes each byte low nibble first reports a
    /// different `device_id` for the same board, e.g. `A1` instead of `1A`
    /// for the byte `0x1A`. A collector keyed on those identifiers sees
    /// a node flashed with this firmware as a new device.
    #[must_use]
    pub fn from_mac(mac: [u8; 6]) -> Self {
        let mut uuid = String::with_capacity(mac.len() * 2);
        for byte in mac {
            uuid.push(nibble_to_hex(byte >> 4));
            uuid.push(nibble_to_hex(byte));
        }
        Self(uuid)
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for DeviceUuid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[inline]
fn nibble_to_hex(nibble: u8) -> char {
    char::from(HEX_CHARS[usize::from(nibble & 0x0F)])
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;

    use super::DeviceUuid;

    #[test]
    fn hex_encode_mac() {
        let uuid = DeviceUuid::from_mac([0x00, 0x1A, 0x2B, 0x3C, 0x4D, 0xFE]);

        assert_eq!(uuid.as_str(), "001A2B3C4DFE");
        assert_eq!(uuid.to_string(), "001A2B3C4DFE");
    }

    #[test]
    fn high_nibble_first() {
        let uuid = DeviceUuid::from_mac([0x1A, 0x2B, 0x00, 0x00, 0x00, 0xF0]);

        assert!(uuid.as_str().starts_with("1A2B"));
        assert!(uuid.as_str().ends_with("F0"));
    }

    #[test]
    fn identifier_length() {
        assert_eq!(DeviceUuid::from_mac([0xFF; 6]).as_str().len(), 12);
        assert_eq!(DeviceUuid::from_mac([0; 6]).as_str(), "000000000000");
    }
}
