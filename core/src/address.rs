//! IPv4 address model and client address normalization.
//!
//! Rules and candidates are compared as 32-bit integers. Only two IPv6 forms
//! are understood: the loopback address and IPv4-mapped literals. Everything
//! else containing a `:` is left untouched and never matches a rule.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// The IPv4 loopback literal that `::1` is rewritten to.
pub const IPV4_LOOPBACK: &str = "127.0.0.1";

const IPV6_LOOPBACK_SHORT: &str = "::1";
const IPV6_LOOPBACK_EXPANDED: &str = "0:0:0:0:0:0:0:1";

/// Errors that can occur while parsing a dotted-quad address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,

    #[error("expected 4 octets, found {0}")]
    OctetCount(usize),

    #[error("octet '{0}' is not a 1-3 digit decimal number")]
    Malformed(String),

    #[error("octet {0} is out of range 0-255")]
    OutOfRange(u16),

    #[error("'{0}' is an IPv6 literal with no IPv4 form")]
    Ipv6Unsupported(String),
}

/// An IPv4 address stored as a host-order `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Address(u32);

impl Address {
    pub const fn new(bits: u32) -> Self {
        Address(bits)
    }

    pub const fn from_octets(octets: [u8; 4]) -> Self {
        Address(u32::from_be_bytes(octets))
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn octets(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Parse a dotted quad. Leading zeros are accepted (`010` is 10).
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AddressError::Empty);
        }
        if s.contains(':') {
            return Err(AddressError::Ipv6Unsupported(s.to_string()));
        }

        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 4 {
            return Err(AddressError::OctetCount(parts.len()));
        }

        let mut octets = [0u8; 4];
        for (slot, part) in octets.iter_mut().zip(parts) {
            *slot = parse_octet(part)?;
        }
        Ok(Address::from_octets(octets))
    }
}

/// Parse a single decimal octet of one to three digits.
pub fn parse_octet(s: &str) -> Result<u8, AddressError> {
    if s.is_empty() || s.len() > 3 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AddressError::Malformed(s.to_string()));
    }
    // At most three digits, so this cannot overflow a u16.
    let value: u16 = s
        .parse()
        .map_err(|_| AddressError::Malformed(s.to_string()))?;
    u8::try_from(value).map_err(|_| AddressError::OutOfRange(value))
}

/// Network mask for a prefix length. `None` when the prefix exceeds 32.
pub fn prefix_mask(prefix: u8) -> Option<u32> {
    match prefix {
        0 => Some(0),
        1..=32 => Some(u32::MAX << (32 - u32::from(prefix))),
        _ => None,
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.octets();
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

impl From<Ipv4Addr> for Address {
    fn from(addr: Ipv4Addr) -> Self {
        Address(u32::from(addr))
    }
}

impl From<Address> for Ipv4Addr {
    fn from(addr: Address) -> Self {
        Ipv4Addr::from(addr.0)
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.to_string()
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Address::parse(&s)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Client address normalization
// ═══════════════════════════════════════════════════════════════════════════

fn ipv6_mapped_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^::ffff:(\d+\.\d+\.\d+\.\d+)$").ok())
        .as_ref()
}

/// Rewrite an address literal to IPv4 when possible.
///
/// - blank input yields `None`
/// - an IPv4 literal (no `:`) is returned trimmed
/// - `::1` and `0:0:0:0:0:0:0:1` become `127.0.0.1`
/// - `::ffff:a.b.c.d` becomes `a.b.c.d`
/// - any other IPv6 literal yields `None`
pub fn to_ipv4_if_possible(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if !s.contains(':') {
        return Some(s.to_string());
    }
    if s == IPV6_LOOPBACK_SHORT || s.eq_ignore_ascii_case(IPV6_LOOPBACK_EXPANDED) {
        return Some(IPV4_LOOPBACK.to_string());
    }
    ipv6_mapped_regex()
        .and_then(|re| re.captures(s))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Normalize a candidate for evaluation: the IPv4 form when one exists,
/// otherwise the trimmed literal unchanged.
pub fn normalize_candidate(raw: &str) -> String {
    to_ipv4_if_possible(raw).unwrap_or_else(|| raw.trim().to_string())
}
