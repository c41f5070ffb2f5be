//! End-to-end checks of the capture → egress-rebuild pipeline, driven through
//! the same calls the event loop makes, with hand-built captures standing in
//! for the kernel.

use bifrost_proxy_lib::iface::socket::{Auxdata, RawCapture};
use bifrost_proxy_lib::iface::{FieldEdit, TciEdit, VlanEdit};
use bifrost_proxy_lib::packet::buffer::FrameArena;
use bifrost_proxy_lib::packet::{codec, MacAddr, Tci, Timestamp, TPID_8021Q};

const DEST: MacAddr = MacAddr([0x01, 0x80, 0xc2, 0x00, 0x00, 0x03]);
const SOURCE: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

/// An EAPOL-Logoff (type 2) MPDU padded so the capture is exactly 60 bytes.
fn logoff_arena() -> FrameArena {
    let mut arena = FrameArena::new(1500);
    let mpdu = [0x88, 0x8e, 0x02, 0x02, 0x00, 0x00];
    arena.mpdu_mut()[..mpdu.len()].copy_from_slice(&mpdu);
    arena
}

fn untagged_capture() -> RawCapture {
    RawCapture { len: 60, dest: DEST, source: SOURCE, aux: None }
}

fn tagged_capture(tci: Tci) -> RawCapture {
    RawCapture {
        len: 60,
        dest: DEST,
        source: SOURCE,
        aux: Some(Auxdata {
            status: libc::TP_STATUS_VLAN_VALID,
            wire_len: 60,
            vlan_tci: tci.to_u16(),
            vlan_tpid: TPID_8021Q,
        }),
    }
}

#[test]
fn plain_relay_reemits_the_captured_bytes() {
    let mut arena = logoff_arena();
    let packet = codec::assemble(untagged_capture(), &arena, 0, Timestamp::default())
        .expect("frame");
    let captured = arena.frame(&packet, true).to_vec();
    assert_eq!(captured.len(), 60);

    // No egress policy on either peer: the bytes must be identical on both.
    for peer in [1usize, 2] {
        let mut out = packet;
        codec::retarget(&mut out, peer, None);
        let emitted = arena.frame(&out, false);
        assert_eq!(emitted, &captured[..], "peer {peer}");
    }
}

#[test]
fn tag_add_on_egress_prepends_the_configured_tag() {
    let mut arena = logoff_arena();
    let packet = codec::assemble(untagged_capture(), &arena, 0, Timestamp::default())
        .expect("frame");

    let mut out = packet;
    codec::retarget(
        &mut out,
        1,
        Some(VlanEdit::Retag(TciEdit {
            pcp: FieldEdit::Set(5),
            dei: FieldEdit::Set(false),
            vid: FieldEdit::Set(100),
        })),
    );

    let emitted = arena.frame(&out, false);
    assert_eq!(emitted.len(), 64);
    assert_eq!(&emitted[0..6], &DEST.octets());
    assert_eq!(&emitted[6..12], &SOURCE.octets());
    assert_eq!(&emitted[12..16], &[0x81, 0x00, 0xa0, 0x64]);
    assert_eq!(&emitted[16..18], &[0x88, 0x8e]);
}

#[test]
fn tag_strip_on_egress_drops_exactly_four_bytes() {
    let mut arena = logoff_arena();
    let tci = Tci { pcp: 3, dei: false, vid: 4094 };
    let packet = codec::assemble(tagged_capture(tci), &arena, 0, Timestamp::default())
        .expect("frame");
    assert_eq!(packet.len, 64);

    let mut out = packet;
    codec::retarget(&mut out, 1, Some(VlanEdit::Strip));

    let emitted = arena.frame(&out, false);
    assert_eq!(emitted.len(), 60);
    // EtherType follows the source address directly: no TPID anywhere.
    assert_eq!(&emitted[12..14], &[0x88, 0x8e]);
}

#[test]
fn partial_override_keeps_captured_subfields() {
    let mut arena = logoff_arena();
    let tci = Tci { pcp: 6, dei: true, vid: 33 };
    let packet = codec::assemble(tagged_capture(tci), &arena, 0, Timestamp::default())
        .expect("frame");

    let mut out = packet;
    codec::retarget(
        &mut out,
        1,
        Some(VlanEdit::Retag(TciEdit {
            pcp: FieldEdit::Keep,
            dei: FieldEdit::Keep,
            vid: FieldEdit::Set(44),
        })),
    );

    let expected = Tci { pcp: 6, dei: true, vid: 44 };
    let emitted = arena.frame(&out, false);
    assert_eq!(&emitted[12..16], &expected.to_dot1q().to_be_bytes());
    assert_eq!(emitted.len(), 64);
}

#[test]
fn sequential_captures_keep_their_order_per_peer() {
    let mut arena = logoff_arena();
    let mut emitted = Vec::new();

    for id in [1u8, 2] {
        // Two captures that differ in one MPDU byte.
        arena.mpdu_mut()[3] = id;
        let packet = codec::assemble(untagged_capture(), &arena, 0, Timestamp::default())
            .expect("frame");
        let mut out = packet;
        codec::retarget(&mut out, 1, None);
        emitted.push(arena.frame(&out, false).to_vec());
    }

    assert_eq!(emitted.len(), 2);
    assert_eq!(emitted[0][15], 1);
    assert_eq!(emitted[1][15], 2);
}
