use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Link-layer address of a node (6 bytes, same shape as a WiFi MAC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const LEN: usize = 6;
    pub const BROADCAST: MacAddr = MacAddr([0xFF; 6]);

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn is_broadcast(&self) -> bool {
        self.0.iter().all(|&b| b == 0xFF)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Expand to 12 nibble bytes (high nibble first). The configuration
    /// protocol rides over a SysEx carrier that forbids bytes >= 0x80, so
    /// addresses are never sent as raw octets.
    pub fn to_nibbles(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        for (i, &b) in self.0.iter().enumerate() {
            out[i * 2] = (b >> 4) & 0x0F;
            out[i * 2 + 1] = b & 0x0F;
        }
        out
    }

    /// Recombine 12 nibble bytes into an address. Returns None if fewer than
    /// 12 bytes are supplied; extra bytes are ignored.
    pub fn from_nibbles(data: &[u8]) -> Option<MacAddr> {
        if data.len() < 12 {
            return None;
        }
        let mut mac = [0u8; 6];
        for i in 0..6 {
            mac[i] = ((data[i * 2] & 0x0F) << 4) | (data[i * 2 + 1] & 0x0F);
        }
        Some(MacAddr(mac))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMacError;

impl fmt::Display for ParseMacError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid MAC address, expected XX:XX:XX:XX:XX:XX")
    }
}

impl std::error::Error for ParseMacError {}

impl FromStr for MacAddr {
    type Err = ParseMacError;

    /// Strict `XX:XX:XX:XX:XX:XX` parse, case-insensitive hex.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 17 {
            return Err(ParseMacError);
        }
        let bytes = s.as_bytes();
        let mut mac = [0u8; 6];
        for i in 0..6 {
            let pos = i * 3;
            let hi = hex_nibble(bytes[pos]).ok_or(ParseMacError)?;
            let lo = hex_nibble(bytes[pos + 1]).ok_or(ParseMacError)?;
            mac[i] = (hi << 4) | lo;
            if i < 5 && bytes[pos + 2] != b':' {
                return Err(ParseMacError);
            }
        }
        Ok(MacAddr(mac))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = ParseMacError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> String {
        mac.to_string()
    }
}

fn hex_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display_roundtrip() {
        let mac: MacAddr = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        assert_eq!(mac.0, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(mac.to_string(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_parse_lowercase() {
        let mac: MacAddr = "a4:cf:12:09:fe:01".parse().unwrap();
        assert_eq!(mac.0, [0xA4, 0xCF, 0x12, 0x09, 0xFE, 0x01]);
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        assert!("AA:BB:CC:DD:EE".parse::<MacAddr>().is_err());
        assert!("AA:BB:CC:DD:EE:F".parse::<MacAddr>().is_err());
        assert!("AA-BB-CC-DD-EE-FF".parse::<MacAddr>().is_err());
        assert!("GG:BB:CC:DD:EE:FF".parse::<MacAddr>().is_err());
        assert!("".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_nibble_roundtrip() {
        let mac = MacAddr([0xA4, 0xCF, 0x12, 0x00, 0xFE, 0x7D]);
        let nibbles = mac.to_nibbles();
        assert!(nibbles.iter().all(|&n| n < 0x10));
        assert_eq!(MacAddr::from_nibbles(&nibbles), Some(mac));
    }

    #[test]
    fn test_from_nibbles_short_buffer() {
        assert_eq!(MacAddr::from_nibbles(&[0x0A; 11]), None);
    }

    #[test]
    fn test_zero_and_broadcast() {
        assert!(MacAddr([0; 6]).is_zero());
        assert!(MacAddr::BROADCAST.is_broadcast());
        assert!(!MacAddr::BROADCAST.is_zero());
    }
}
