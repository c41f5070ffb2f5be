#![forbid(unsafe_code)]

//! EAPOL frame model.
//!
//! An EAPOL MPDU begins at the EtherType (`0x888E`) and is carried in an
//! ordinary Ethernet II frame, optionally behind a single 802.1Q tag. The
//! types here are plain values: one [`EapolPacket`] is built per capture and
//! copied per egress interface, so mutating the copy (VLAN edit, length
//! adjustment) never affects another egress.

pub mod buffer;
pub mod codec;
pub mod decode;

use std::fmt;
use std::str::FromStr;

/// PAE EtherType, IEEE Std 802.1X-2010 §11.3.
pub const ETH_P_EAPOL: u16 = 0x888e;
/// 802.1Q Tag Protocol Identifier.
pub const TPID_8021Q: u16 = 0x8100;

/// Bytes in a hardware address.
pub const MAC_LEN: usize = 6;
/// Minimum capture size: the 64-byte minimum Ethernet frame less the FCS.
pub const MIN_FRAME_LEN: usize = 60;

/// EAPOL packet types, IEEE Std 802.1X-2010 §11.3.2.
pub const EAPOL_EAP: u8 = 0;
pub const EAPOL_START: u8 = 1;
pub const EAPOL_LOGOFF: u8 = 2;
pub const EAPOL_KEY: u8 = 3;
pub const EAPOL_ENCAP_ASF_ALERT: u8 = 4;
pub const EAPOL_MKA: u8 = 5;
pub const EAPOL_ANNOUNCEMENT_GENERIC: u8 = 6;
pub const EAPOL_ANNOUNCEMENT_SPECIFIC: u8 = 7;
pub const EAPOL_ANNOUNCEMENT_REQ: u8 = 8;
/// Highest defined EAPOL packet type.
pub const EAPOL_TYPE_MAX: u8 = EAPOL_ANNOUNCEMENT_REQ;

/// EAP codes, RFC 3748 §4.
pub const EAP_CODE_REQUEST: u8 = 1;
pub const EAP_CODE_RESPONSE: u8 = 2;
pub const EAP_CODE_SUCCESS: u8 = 3;
pub const EAP_CODE_FAILURE: u8 = 4;

/// A six-byte IEEE 802 hardware address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; MAC_LEN]);

impl MacAddr {
    pub const fn octets(self) -> [u8; MAC_LEN] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<[u8; MAC_LEN]> for MacAddr {
    fn from(octets: [u8; MAC_LEN]) -> Self {
        MacAddr(octets)
    }
}

/// Error returned when a hardware-address string does not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacParseError(pub String);

impl fmt::Display for MacParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid MAC address '{}'", self.0)
    }
}

impl std::error::Error for MacParseError {}

impl FromStr for MacAddr {
    type Err = MacParseError;

    /// Parses the colon-delimited form, e.g. `02:00:5e:00:53:01`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; MAC_LEN];
        let mut parts = s.split(':');
        for octet in &mut octets {
            let part = parts.next().ok_or_else(|| MacParseError(s.to_string()))?;
            if part.len() != 2 {
                return Err(MacParseError(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| MacParseError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(MacParseError(s.to_string()));
        }
        Ok(MacAddr(octets))
    }
}

/// 802.1Q Tag Control Information: the lower 16 bits of the VLAN tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tci {
    /// Priority Code Point, 0–7.
    pub pcp: u8,
    /// Drop Eligible Indicator.
    pub dei: bool,
    /// VLAN identifier, 0–4094.
    pub vid: u16,
}

impl Tci {
    /// Packs the TCI as `pcp(3) | dei(1) | vid(12)`.
    pub fn to_u16(self) -> u16 {
        (u16::from(self.pcp & 0x07) << 13) | (u16::from(self.dei) << 12) | (self.vid & 0x0fff)
    }

    pub fn from_u16(raw: u16) -> Self {
        Tci {
            pcp: ((raw & 0xe000) >> 13) as u8,
            dei: raw & 0x1000 != 0,
            vid: raw & 0x0fff,
        }
    }

    /// The complete 4-byte tag (TPID + TCI) as a host-order integer; callers
    /// emit it with `to_be_bytes`.
    pub fn to_dot1q(self) -> u32 {
        (u32::from(TPID_8021Q) << 16) | u32::from(self.to_u16())
    }
}

impl fmt::Display for Tci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "vlan {} (prio {}, dei {}set)",
            self.vid,
            self.pcp,
            if self.dei { "" } else { "un" }
        )
    }
}

/// Capture timestamp, seconds and microseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub sec: i64,
    pub usec: i64,
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sec, self.usec)
    }
}

/// Header of an EAP packet carried in an EAPOL-EAP frame, RFC 3748 §4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EapHeader {
    pub code: u8,
    pub id: u8,
    /// EAP packet length field (big-endian on the wire).
    pub len: u16,
    /// Method type; present only for Request/Response codes.
    pub method: Option<u8>,
}

/// The interesting bytes of an EAPOL-Key descriptor header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDescriptor {
    pub desc_type: u8,
    pub key_len: u16,
    pub key_index: u8,
}

/// An EAPOL frame with its metadata extracted, as it flows through the
/// capture → fan-out pipeline.
///
/// The `*_orig` fields are frozen at capture time; the unsuffixed fields are
/// rewritten per egress interface. Interfaces are referred to by their stable
/// position in the configured table.
#[derive(Debug, Clone, Copy)]
pub struct EapolPacket {
    pub ts: Timestamp,
    /// Current interface (capture interface until the fan-out retargets it).
    pub iface: usize,
    /// Interface the frame was captured on.
    pub iface_orig: usize,
    /// Current on-wire length, including the 4 tag bytes when tagged.
    pub len: usize,
    pub len_orig: usize,
    pub dest: MacAddr,
    pub source: MacAddr,
    /// Current 802.1Q tag, if the frame carries one.
    pub vlan: Option<Tci>,
    pub vlan_orig: Option<Tci>,
    /// EAPOL protocol version byte.
    pub version: u8,
    /// EAPOL packet type.
    pub eapol_type: u8,
    /// EAP header, when `eapol_type` is EAPOL-EAP and the body is long enough.
    pub eap: Option<EapHeader>,
    /// Key descriptor header, when `eapol_type` is EAPOL-Key.
    pub key: Option<KeyDescriptor>,
}

impl EapolPacket {
    /// The EAP code, or 0 when the frame does not carry an EAP packet.
    pub fn eap_code(&self) -> u8 {
        self.eap.map_or(0, |eap| eap.code)
    }

    /// True while the frame has not been retargeted to an egress interface.
    pub fn is_original(&self) -> bool {
        self.iface == self.iface_orig
    }
}
