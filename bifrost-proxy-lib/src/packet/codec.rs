#![forbid(unsafe_code)]

//! Turning raw captures into [`EapolPacket`] records and cooking records for
//! egress.
//!
//! The kernel strips 802.1Q tags from raw reads; the tag comes back out of
//! band in the `PACKET_AUXDATA` control message and is folded back into the
//! record here, including the 4 bytes it adds to the logical wire length.

use thiserror::Error;

use crate::iface::socket::RawCapture;
use crate::iface::VlanEdit;
use crate::packet::buffer::FrameArena;
use crate::packet::{
    EapHeader, EapolPacket, KeyDescriptor, Tci, Timestamp, EAPOL_EAP, EAPOL_KEY,
    EAP_CODE_REQUEST, EAP_CODE_RESPONSE, MAC_LEN, MIN_FRAME_LEN, TPID_8021Q,
};

/// Byte offsets within the MPDU (which begins at the EtherType).
const OFF_VERSION: usize = 2;
const OFF_TYPE: usize = 3;
const OFF_EAP_CODE: usize = 6;
const OFF_EAP_ID: usize = 7;
const OFF_EAP_LEN: usize = 8;
const OFF_EAP_METHOD: usize = 10;
const OFF_KEY_DESC_TYPE: usize = 6;
const OFF_KEY_LEN: usize = 7;
const OFF_KEY_INDEX: usize = 33;

/// A capture that cannot become a frame record.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Below the 60-byte minimum (64 on the wire including the FCS).
    #[error("runt frame ({0} bytes)")]
    Runt(usize),

    /// The kernel saw more bytes on the wire than fit in the arena; the MTU
    /// of the ingress interface was not honored.
    #[error("giant frame ({wire_len} bytes on the wire, {len} captured)")]
    Giant { len: usize, wire_len: usize },
}

/// Builds the frame record for one capture: size checks, 802.1Q recovery
/// from auxiliary data, EAPOL/EAP metadata extraction, and the `*_orig`
/// mirror initialization.
pub fn assemble(
    raw: RawCapture,
    arena: &FrameArena,
    iface: usize,
    ts: Timestamp,
) -> Result<EapolPacket, FrameError> {
    if raw.len < MIN_FRAME_LEN {
        return Err(FrameError::Runt(raw.len));
    }

    let mut len = raw.len;
    let mut vlan = None;
    if let Some(aux) = raw.aux {
        let wire_len = aux.wire_len as usize;
        if raw.len < wire_len {
            return Err(FrameError::Giant { len: raw.len, wire_len });
        }
        if aux.status & libc::TP_STATUS_VLAN_VALID != 0 && aux.vlan_tpid == TPID_8021Q {
            vlan = Some(Tci::from_u16(aux.vlan_tci));
            // The tag is not in the buffer but is part of the wire length.
            len += 4;
        }
    }

    let mpdu = &arena.mpdu()[..raw.len - 2 * MAC_LEN];
    let version = mpdu[OFF_VERSION];
    let eapol_type = mpdu[OFF_TYPE];

    let eap = (eapol_type == EAPOL_EAP)
        .then(|| parse_eap(mpdu))
        .flatten();
    let key = (eapol_type == EAPOL_KEY)
        .then(|| parse_key(mpdu))
        .flatten();

    Ok(EapolPacket {
        ts,
        iface,
        iface_orig: iface,
        len,
        len_orig: len,
        dest: raw.dest,
        source: raw.source,
        vlan,
        vlan_orig: vlan,
        version,
        eapol_type,
        eap,
        key,
    })
}

fn parse_eap(mpdu: &[u8]) -> Option<EapHeader> {
    let code = *mpdu.get(OFF_EAP_CODE)?;
    let id = *mpdu.get(OFF_EAP_ID)?;
    let len = u16::from_be_bytes([*mpdu.get(OFF_EAP_LEN)?, *mpdu.get(OFF_EAP_LEN + 1)?]);
    let method = if code == EAP_CODE_REQUEST || code == EAP_CODE_RESPONSE {
        mpdu.get(OFF_EAP_METHOD).copied()
    } else {
        None
    };
    Some(EapHeader { code, id, len, method })
}

fn parse_key(mpdu: &[u8]) -> Option<KeyDescriptor> {
    Some(KeyDescriptor {
        desc_type: *mpdu.get(OFF_KEY_DESC_TYPE)?,
        key_len: u16::from_be_bytes([*mpdu.get(OFF_KEY_LEN)?, *mpdu.get(OFF_KEY_LEN + 1)?]),
        key_index: *mpdu.get(OFF_KEY_INDEX)?,
    })
}

/// Retargets a per-egress copy of the record: point it at the egress
/// interface, apply that interface's 802.1Q override, and resync the length
/// with the tag's presence.
pub fn retarget(packet: &mut EapolPacket, egress: usize, vlan_edit: Option<VlanEdit>) {
    packet.iface = egress;

    match vlan_edit {
        Some(VlanEdit::Strip) => packet.vlan = None,
        Some(VlanEdit::Retag(edit)) => {
            let captured = packet.vlan.unwrap_or_default();
            packet.vlan = Some(Tci {
                pcp: edit.pcp.apply(captured.pcp),
                dei: edit.dei.apply(captured.dei),
                vid: edit.vid.apply(captured.vid),
            });
        }
        None => {}
    }

    packet.len = match (packet.vlan.is_some(), packet.vlan_orig.is_some()) {
        (true, false) => packet.len_orig + 4,
        (false, true) => packet.len_orig - 4,
        _ => packet.len_orig,
    };
}
