#![forbid(unsafe_code)]

//! The frame arena: one contiguous buffer holding the single in-flight frame.
//!
//! The kernel deposits the EAPOL MPDU (EtherType onward) at byte 16; the 16
//! bytes ahead of it are scratch used to rebuild the Ethernet header. With a
//! tag the header needs all 16 (two addresses + 4 tag bytes), without one it
//! needs 12, so a finished frame always starts at offset 0 or 4 and a send is
//! a plain `write` of one slice. No copies of the MPDU are ever made.

use super::{EapolPacket, MacAddr, Tci, MAC_LEN};

/// Offset of the MPDU within the arena: two addresses plus room for a tag.
pub const MPDU_OFFSET: usize = 2 * MAC_LEN + 4;

/// Scratch buffer for one frame, sized for the largest configured MTU.
#[derive(Debug)]
pub struct FrameArena {
    buf: Vec<u8>,
}

impl FrameArena {
    /// Allocates the arena: 12 address bytes, 4 optional tag bytes, 2
    /// EtherType bytes and `max_mtu` of payload (1518 bytes at a 1500 MTU).
    pub fn new(max_mtu: usize) -> Self {
        FrameArena { buf: vec![0u8; MPDU_OFFSET + 2 + max_mtu] }
    }

    /// Capacity of the MPDU region (EtherType + MTU).
    pub fn mpdu_capacity(&self) -> usize {
        self.buf.len() - MPDU_OFFSET
    }

    /// The MPDU region the capture path reads into.
    pub fn mpdu_mut(&mut self) -> &mut [u8] {
        &mut self.buf[MPDU_OFFSET..]
    }

    pub fn mpdu(&self) -> &[u8] {
        &self.buf[MPDU_OFFSET..]
    }

    /// Rebuilds the Ethernet header in the scratch bytes and returns the
    /// complete on-wire frame.
    ///
    /// With `original` set the header is rebuilt exactly as captured on the
    /// ingress interface; otherwise it reflects the packet's current fields
    /// (possibly with the tag rewritten or stripped for an egress interface).
    /// Idempotent for a given `(packet, original)` pair.
    pub fn frame(&mut self, packet: &EapolPacket, original: bool) -> &[u8] {
        let (vlan, len) = if original {
            (packet.vlan_orig, packet.len_orig)
        } else {
            (packet.vlan, packet.len)
        };

        match vlan {
            Some(tci) => {
                self.write_header(0, packet.dest, packet.source, Some(tci));
                &self.buf[..len]
            }
            None => {
                self.write_header(4, packet.dest, packet.source, None);
                &self.buf[4..4 + len]
            }
        }
    }

    fn write_header(&mut self, at: usize, dest: MacAddr, source: MacAddr, tag: Option<Tci>) {
        self.buf[at..at + MAC_LEN].copy_from_slice(&dest.octets());
        self.buf[at + MAC_LEN..at + 2 * MAC_LEN].copy_from_slice(&source.octets());
        if let Some(tci) = tag {
            self.buf[at + 2 * MAC_LEN..MPDU_OFFSET].copy_from_slice(&tci.to_dot1q().to_be_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Timestamp, EAPOL_START};

    fn start_packet(len: usize, vlan: Option<Tci>) -> EapolPacket {
        EapolPacket {
            ts: Timestamp::default(),
            iface: 0,
            iface_orig: 0,
            len,
            len_orig: len,
            dest: MacAddr([0x01, 0x80, 0xc2, 0x00, 0x00, 0x03]),
            source: MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]),
            vlan,
            vlan_orig: vlan,
            version: 1,
            eapol_type: EAPOL_START,
            eap: None,
            key: None,
        }
    }

    #[test]
    fn untagged_frame_starts_at_offset_four() {
        let mut arena = FrameArena::new(1500);
        arena.mpdu_mut()[..8].copy_from_slice(&[0x88, 0x8e, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00]);

        let packet = start_packet(60, None);
        let frame = arena.frame(&packet, false);
        assert_eq!(frame.len(), 60);
        assert_eq!(&frame[..6], &[0x01, 0x80, 0xc2, 0x00, 0x00, 0x03]);
        assert_eq!(&frame[6..12], &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(&frame[12..14], &[0x88, 0x8e]);
    }

    #[test]
    fn tagged_frame_starts_at_offset_zero() {
        let mut arena = FrameArena::new(1500);
        arena.mpdu_mut()[..8].copy_from_slice(&[0x88, 0x8e, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00]);

        let mut packet = start_packet(60, None);
        packet.vlan = Some(Tci { pcp: 5, dei: false, vid: 100 });
        packet.len = 64;

        let frame = arena.frame(&packet, false);
        assert_eq!(frame.len(), 64);
        assert_eq!(&frame[..6], &[0x01, 0x80, 0xc2, 0x00, 0x00, 0x03]);
        assert_eq!(&frame[6..12], &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(&frame[12..16], &[0x81, 0x00, 0xa0, 0x64]);
        assert_eq!(&frame[16..18], &[0x88, 0x8e]);
    }

    #[test]
    fn original_view_is_unaffected_by_current_edits() {
        let mut arena = FrameArena::new(1500);
        arena.mpdu_mut()[..8].copy_from_slice(&[0x88, 0x8e, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00]);

        let mut packet = start_packet(60, Some(Tci { pcp: 3, dei: true, vid: 7 }));
        packet.len_orig = 64;
        packet.len = 64;

        // Strip the tag for egress, then ask for both views.
        packet.vlan = None;
        packet.len = 60;

        let current = arena.frame(&packet, false).to_vec();
        assert_eq!(current.len(), 60);
        assert_eq!(&current[12..14], &[0x88, 0x8e]);

        let original = arena.frame(&packet, true).to_vec();
        assert_eq!(original.len(), 64);
        assert_eq!(
            &original[12..16],
            &Tci { pcp: 3, dei: true, vid: 7 }.to_dot1q().to_be_bytes()
        );
    }

    #[test]
    fn arena_capacity_matches_highest_mtu() {
        let arena = FrameArena::new(1500);
        assert_eq!(arena.mpdu_capacity(), 1502);
        assert_eq!(arena.mpdu().len(), 1502);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let mut arena = FrameArena::new(1500);
        arena.mpdu_mut()[..4].copy_from_slice(&[0x88, 0x8e, 0x01, 0x01]);
        let packet = start_packet(60, Some(Tci { pcp: 1, dei: false, vid: 42 }));

        let first = arena.frame(&packet, false).to_vec();
        let second = arena.frame(&packet, false).to_vec();
        assert_eq!(first, second);
    }
}
