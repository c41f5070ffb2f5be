//! Raw EAPOL capture sockets.
//!
//! One non-blocking `AF_PACKET`/`SOCK_RAW` socket per interface, bound to the
//! interface index at protocol `ETH_P_ALL` and narrowed to EAPOL by a
//! four-instruction classic BPF program. Binding at `ETH_P_PAE` directly
//! would be simpler but suppresses the `PACKET_AUXDATA` control messages
//! that carry stripped 802.1Q tags, so the wildcard-protocol + filter
//! combination is load-bearing.

use std::io;
use std::mem;
use std::os::fd::AsRawFd;
use std::ptr;
use std::task::{Context, Poll};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{info, trace};

use crate::packet::buffer::FrameArena;
use crate::packet::{MacAddr, Timestamp, ETH_P_EAPOL, MAC_LEN};

/// Reserved group addresses EAPOL may be sent to, IEEE Std 802.1X-2010
/// §11.1.1: Bridge, Port Access Entity, LLDP.
const EAPOL_GROUP_MACS: [[u8; MAC_LEN]; 3] = [
    [0x01, 0x80, 0xc2, 0x00, 0x00, 0x00],
    [0x01, 0x80, 0xc2, 0x00, 0x00, 0x03],
    [0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e],
];

/// Accept frames whose half-word at byte 12 (EtherType after any tag strip)
/// is 0x888E:
///
/// ```text
/// (000) ldh [12]
/// (001) jeq #0x888e  jt 2  jf 3
/// (002) ret #0xbef001ed
/// (003) ret #0
/// ```
static EAPOL_FILTER: [libc::sock_filter; 4] = [
    libc::sock_filter { code: 0x28, jt: 0, jf: 0, k: 0x0000_000c },
    libc::sock_filter { code: 0x15, jt: 0, jf: 1, k: ETH_P_EAPOL as u32 },
    libc::sock_filter { code: 0x06, jt: 0, jf: 0, k: 0xbef0_01ed },
    libc::sock_filter { code: 0x06, jt: 0, jf: 0, k: 0x0000_0000 },
];

/// One captured datagram before it is turned into an `EapolPacket`.
///
/// `len` is the byte count returned by `recvmsg`: both addresses plus the
/// MPDU, with any 802.1Q tag already stripped by the kernel.
#[derive(Debug, Clone, Copy)]
pub struct RawCapture {
    pub len: usize,
    pub dest: MacAddr,
    pub source: MacAddr,
    pub aux: Option<Auxdata>,
}

/// The `tpacket_auxdata` fields the codec cares about.
#[derive(Debug, Clone, Copy)]
pub struct Auxdata {
    pub status: u32,
    /// Original wire length as seen by the kernel.
    pub wire_len: u32,
    pub vlan_tci: u16,
    pub vlan_tpid: u16,
}

/// A capture socket registered with the runtime's readiness driver.
#[derive(Debug)]
pub struct EapolSocket {
    fd: tokio::io::unix::AsyncFd<Socket>,
}

impl EapolSocket {
    /// Opens, binds and configures the capture socket for one interface.
    ///
    /// With `promisc` the whole port is opened up; otherwise only the three
    /// reserved 802.1X group addresses are joined (unicast reaches us by
    /// virtue of the bind). `PACKET_AUXDATA` failure degrades VLAN recovery
    /// but does not fail bring-up.
    pub fn open(index: i32, promisc: bool) -> io::Result<Self> {
        let proto_all = (libc::ETH_P_ALL as u16).to_be();
        let socket = Socket::new(
            Domain::PACKET,
            Type::RAW,
            Some(Protocol::from(i32::from(proto_all))),
        )?;
        socket.set_nonblocking(true)?;

        let mut sll: libc::sockaddr_ll = unsafe { mem::zeroed() };
        sll.sll_family = libc::AF_PACKET as libc::sa_family_t;
        sll.sll_protocol = proto_all;
        sll.sll_ifindex = index;
        sll.sll_pkttype = (libc::PACKET_HOST | libc::PACKET_MULTICAST) as u8;
        let rc = unsafe {
            libc::bind(
                socket.as_raw_fd(),
                (&sll as *const libc::sockaddr_ll).cast(),
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }

        let prog = libc::sock_fprog {
            len: EAPOL_FILTER.len() as libc::c_ushort,
            filter: EAPOL_FILTER.as_ptr().cast_mut(),
        };
        setsockopt(
            &socket,
            libc::SOL_SOCKET,
            libc::SO_ATTACH_FILTER,
            (&prog as *const libc::sock_fprog).cast(),
            mem::size_of::<libc::sock_fprog>() as libc::socklen_t,
        )?;

        if promisc {
            add_membership(&socket, index, libc::PACKET_MR_PROMISC as libc::c_ushort, None)?;
        } else {
            for group in &EAPOL_GROUP_MACS {
                add_membership(
                    &socket,
                    index,
                    libc::PACKET_MR_MULTICAST as libc::c_ushort,
                    Some(*group),
                )?;
            }
        }

        // Tags are stripped from raw reads; ask the kernel to hand them back
        // in a control message.
        let one: libc::c_int = 1;
        if setsockopt(
            &socket,
            libc::SOL_PACKET,
            libc::PACKET_AUXDATA,
            (&one as *const libc::c_int).cast(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
        .is_err()
        {
            info!(ifindex = index, "no PACKET_AUXDATA: 802.1Q tags will not be recovered");
        }

        Ok(EapolSocket { fd: tokio::io::unix::AsyncFd::new(socket)? })
    }

    /// Polls for readability and performs one gather receive: destination
    /// address, source address, and the MPDU straight into the arena.
    ///
    /// Exactly one datagram is consumed per `Ready` result; spurious
    /// readiness re-arms the watcher instead of surfacing `WouldBlock`.
    pub fn poll_recv(
        &self,
        cx: &mut Context<'_>,
        arena: &mut FrameArena,
    ) -> Poll<io::Result<RawCapture>> {
        loop {
            let mut guard = match self.fd.poll_read_ready(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Ready(Ok(guard)) => guard,
            };
            match self.recv_gather(arena) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    guard.clear_ready();
                    continue;
                }
                res => return Poll::Ready(res),
            }
        }
    }

    fn recv_gather(&self, arena: &mut FrameArena) -> io::Result<RawCapture> {
        let mut dest = [0u8; MAC_LEN];
        let mut source = [0u8; MAC_LEN];
        let mpdu = arena.mpdu_mut();

        let mut iov = [
            libc::iovec { iov_base: dest.as_mut_ptr().cast(), iov_len: dest.len() },
            libc::iovec { iov_base: source.as_mut_ptr().cast(), iov_len: source.len() },
            libc::iovec { iov_base: mpdu.as_mut_ptr().cast(), iov_len: mpdu.len() },
        ];

        // Room for a single tpacket_auxdata control message.
        #[repr(C, align(8))]
        struct CmsgBuffer([u8; 64]);
        let mut cmsg_buf = CmsgBuffer([0; 64]);

        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = iov.as_mut_ptr();
        msg.msg_iovlen = iov.len() as _;
        msg.msg_control = cmsg_buf.0.as_mut_ptr().cast();
        msg.msg_controllen = cmsg_buf.0.len() as _;

        let n = unsafe { libc::recvmsg(self.fd.get_ref().as_raw_fd(), &mut msg, 0) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut aux = None;
        let mut hdr = unsafe { libc::CMSG_FIRSTHDR(&msg) };
        while !hdr.is_null() {
            let cmsg = unsafe { &*hdr };
            if cmsg.cmsg_level == libc::SOL_PACKET && cmsg.cmsg_type == libc::PACKET_AUXDATA {
                let mut raw: libc::tpacket_auxdata = unsafe { mem::zeroed() };
                unsafe {
                    ptr::copy_nonoverlapping(
                        libc::CMSG_DATA(hdr),
                        (&mut raw as *mut libc::tpacket_auxdata).cast::<u8>(),
                        mem::size_of::<libc::tpacket_auxdata>(),
                    );
                }
                trace!(
                    status = format_args!("{:#010x}", raw.tp_status),
                    wire_len = raw.tp_len,
                    snaplen = raw.tp_snaplen,
                    vlan_tci = format_args!("{:#06x}", raw.tp_vlan_tci),
                    vlan_tpid = format_args!("{:#06x}", raw.tp_vlan_tpid),
                    "received a PACKET_AUXDATA cmsg"
                );
                aux = Some(Auxdata {
                    status: raw.tp_status,
                    wire_len: raw.tp_len,
                    vlan_tci: raw.tp_vlan_tci,
                    vlan_tpid: raw.tp_vlan_tpid,
                });
                break;
            }
            hdr = unsafe { libc::CMSG_NXTHDR(&mut msg, hdr) };
        }

        Ok(RawCapture { len: n as usize, dest: MacAddr(dest), source: MacAddr(source), aux })
    }

    /// The kernel's reception timestamp for the last datagram read.
    pub fn rx_timestamp(&self) -> io::Result<Timestamp> {
        // Not exposed by the `libc` crate; value is from linux/sockios.h.
        const SIOCGSTAMP: libc::c_ulong = 0x8906;
        let mut tv: libc::timeval = unsafe { mem::zeroed() };
        let rc = unsafe {
            libc::ioctl(self.fd.get_ref().as_raw_fd(), SIOCGSTAMP, &mut tv)
        };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(Timestamp { sec: tv.tv_sec as i64, usec: tv.tv_usec as i64 })
    }

    /// Writes one complete frame, waiting for the socket to become writable.
    pub async fn send(&self, frame: &[u8]) -> io::Result<usize> {
        self.fd
            .async_io(tokio::io::Interest::WRITABLE, |socket| socket.send(frame))
            .await
    }
}

fn setsockopt(
    socket: &Socket,
    level: libc::c_int,
    name: libc::c_int,
    value: *const libc::c_void,
    len: libc::socklen_t,
) -> io::Result<()> {
    let rc = unsafe { libc::setsockopt(socket.as_raw_fd(), level, name, value, len) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn add_membership(
    socket: &Socket,
    index: i32,
    mr_type: libc::c_ushort,
    address: Option<[u8; MAC_LEN]>,
) -> io::Result<()> {
    let mut mreq: libc::packet_mreq = unsafe { mem::zeroed() };
    mreq.mr_ifindex = index;
    mreq.mr_type = mr_type;
    if let Some(addr) = address {
        mreq.mr_alen = MAC_LEN as libc::c_ushort;
        mreq.mr_address[..MAC_LEN].copy_from_slice(&addr);
    }
    setsockopt(
        socket,
        libc::SOL_PACKET,
        libc::PACKET_ADD_MEMBERSHIP,
        (&mreq as *const libc::packet_mreq).cast(),
        mem::size_of::<libc::packet_mreq>() as libc::socklen_t,
    )
}
