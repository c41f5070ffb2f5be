#![forbid(unsafe_code)]

//! Human-readable rendering of EAPOL/EAP field values.
//!
//! Used for log lines and for the `*_DESC` variables handed to helper
//! scripts. Unknown values decode to `"Unknown"`.

use std::fmt::Write as _;

use tracing::{debug, enabled, trace, Level};

use super::{EapolPacket, EAPOL_EAP, EAPOL_KEY, EAP_CODE_REQUEST, EAP_CODE_RESPONSE};

/// EAPOL packet types, IEEE Std 802.1X-2010 §11.3.2.
pub const EAPOL_TYPES: &[(u8, &str)] = &[
    (0, "EAPOL-EAP"),
    (1, "EAPOL-Start"),
    (2, "EAPOL-Logoff"),
    (3, "EAPOL-Key"),
    (4, "EAPOL-Encapsulated-ASF-Alert"),
    (5, "EAPOL-MKA"),
    (6, "EAPOL-Announcement (Generic)"),
    (7, "EAPOL-Announcement (Specific)"),
    (8, "EAPOL-Announcement-Req"),
];

/// EAP codes, RFC 3748 §4.
pub const EAP_CODES: &[(u8, &str)] = &[
    (1, "Request"),
    (2, "Response"),
    (3, "Success"),
    (4, "Failure"),
];

/// EAP Request/Response method types. RFC 3748 §5 for the initial ones; the
/// rest are the commonly deployed methods.
pub const EAP_METHODS: &[(u8, &str)] = &[
    (1, "Identity"),
    (2, "Notification"),
    (3, "Nak (Response only)"),
    (4, "MD5-Challenge"),
    (5, "One Time Password (OTP)"),
    (6, "Generic Token Card (GTC)"),
    (13, "EAP TLS"),
    (18, "EAP-SIM"),
    (21, "EAP-TTLS"),
    (23, "EAP-AKA"),
    (25, "PEAP"),
    (26, "EAP MS-CHAP-V2"),
    (29, "EAP MS-CHAP V2"),
    (43, "EAP-FAST"),
    (49, "EAP-IKEv2"),
    (254, "Expanded Types"),
    (255, "Experimental use"),
];

/// EAPOL-Key descriptor types. Only the deprecated RC4 descriptor is decoded
/// in any depth; IEEE 802.11 key data is labeled, not parsed.
pub const EAPOL_KEY_TYPES: &[(u8, &str)] = &[(1, "RC4"), (2, "IEEE 802.11")];

/// Looks `val` up in a value→description table.
pub fn describe(val: u8, table: &'static [(u8, &'static str)]) -> &'static str {
    table
        .iter()
        .find(|&&(v, _)| v == val)
        .map_or("Unknown", |&(_, desc)| desc)
}

/// Builds the one-line tcpdump-like summary of a frame.
///
/// `recv 60 bytes on 'eth0': aa:bb:cc:dd:ee:ff > 01:80:c2:00:00:03,
/// vlan 100 (prio 5, dei unset), EAPOL-Start (1) v1`
pub fn summarize(packet: &EapolPacket, iface_name: &str) -> String {
    let mut line = format!(
        "{} {} bytes on '{}': {} > {}",
        if packet.is_original() { "recv" } else { "send" },
        packet.len,
        iface_name,
        packet.source,
        packet.dest,
    );

    if let Some(tci) = packet.vlan {
        let _ = write!(line, ", {tci}");
    }

    let _ = write!(
        line,
        ", {} ({}) v{}",
        describe(packet.eapol_type, EAPOL_TYPES),
        packet.eapol_type,
        packet.version
    );

    if packet.eapol_type == EAPOL_EAP {
        if let Some(eap) = packet.eap {
            let _ = write!(line, ", {}", describe(eap.code, EAP_CODES));
            if eap.code == EAP_CODE_REQUEST || eap.code == EAP_CODE_RESPONSE {
                if let Some(method) = eap.method {
                    let _ = write!(line, "/{} ({})", describe(method, EAP_METHODS), method);
                }
            }
            let _ = write!(line, ", id {}, len {}", eap.id, eap.len);
        }
    } else if packet.eapol_type == EAPOL_KEY {
        if let Some(key) = packet.key {
            if key.desc_type == 1 {
                let _ = write!(
                    line,
                    ", type {}-{} ({})",
                    describe(key.desc_type, EAPOL_KEY_TYPES),
                    u32::from(key.key_len) * 8,
                    key.desc_type
                );
                let _ = write!(
                    line,
                    ", index {} ({}cast)",
                    key.key_index & 0x7f,
                    if key.key_index & 0x80 != 0 { "uni" } else { "broad" }
                );
            } else {
                let _ = write!(
                    line,
                    ", type {} ({})",
                    describe(key.desc_type, EAPOL_KEY_TYPES),
                    key.desc_type
                );
            }
        }
    }

    line
}

/// Logs the one-line summary at debug level.
pub fn log_frame(packet: &EapolPacket, iface_name: &str) {
    debug!("{}", summarize(packet, iface_name));
}

/// Logs a 16-bytes-per-row hexdump of `frame` at trace level.
///
/// ```text
///   0x0000:  0180 c200 0003 feed face ca11 8100 6000
///   0x0010:  888e 0101 0000 0000 0000 0000 0000 0000
/// ```
pub fn dump_frame(frame: &[u8]) {
    if !enabled!(Level::TRACE) {
        return;
    }

    for (row, bytes) in frame.chunks(16).enumerate() {
        let mut line = format!("  0x{:04x}: ", row * 16);
        for (i, byte) in bytes.iter().enumerate() {
            if i % 2 == 0 {
                line.push(' ');
            }
            let _ = write!(line, "{byte:02x}");
        }
        trace!("{}", line);
    }
}
