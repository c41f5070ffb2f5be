//! Netdevice ioctl surface: flags, MTU, index and hardware address.
//!
//! Every query opens a throwaway `AF_INET` dgram socket so none of this
//! depends on the interface's raw capture socket, which may be closed or in
//! the middle of being replaced. All unsafety in this module is plain libc
//! FFI on stack-owned `ifreq` structures.

use std::io;
use std::mem;
use std::os::fd::AsRawFd;

use socket2::{Domain, Socket, Type};
use tracing::info;

use crate::packet::{MacAddr, MAC_LEN};

/// State of a network device as reported by the kernel.
#[derive(Debug, Clone, Copy)]
pub struct DeviceState {
    pub index: i32,
    pub mtu: u32,
    pub up: bool,
    pub hwaddr: MacAddr,
}

fn ioctl_socket() -> io::Result<Socket> {
    Socket::new(Domain::IPV4, Type::DGRAM, None)
}

fn ifreq_for(name: &str) -> io::Result<libc::ifreq> {
    let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
    let bytes = name.as_bytes();
    if bytes.len() >= ifr.ifr_name.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("interface name '{name}' exceeds IFNAMSIZ"),
        ));
    }
    for (dst, src) in ifr.ifr_name.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }
    Ok(ifr)
}

fn ioctl(socket: &Socket, request: libc::c_ulong, ifr: &mut libc::ifreq) -> io::Result<()> {
    let rc = unsafe { libc::ioctl(socket.as_raw_fd(), request, ifr as *mut libc::ifreq) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Queries flags, MTU, index and hardware address in one pass.
///
/// Fails with `InvalidData` when the device is not Ethernet; everything the
/// proxy does (BPF offsets, the 16-byte scratch header, MAC rewriting)
/// assumes `ARPHRD_ETHER` framing.
pub fn query(name: &str) -> io::Result<DeviceState> {
    let socket = ioctl_socket()?;

    let mut ifr = ifreq_for(name)?;
    ioctl(&socket, libc::SIOCGIFFLAGS, &mut ifr)?;
    let up = unsafe { ifr.ifr_ifru.ifru_flags } & libc::IFF_UP as libc::c_short != 0;

    let mut ifr = ifreq_for(name)?;
    ioctl(&socket, libc::SIOCGIFMTU, &mut ifr)?;
    let mtu = unsafe { ifr.ifr_ifru.ifru_mtu }.max(0) as u32;

    let mut ifr = ifreq_for(name)?;
    ioctl(&socket, libc::SIOCGIFINDEX, &mut ifr)?;
    let index = unsafe { ifr.ifr_ifru.ifru_ifindex };

    let hwaddr = hwaddr_on(&socket, name)?;

    Ok(DeviceState { index, mtu, up, hwaddr })
}

fn hwaddr_on(socket: &Socket, name: &str) -> io::Result<MacAddr> {
    let mut ifr = ifreq_for(name)?;
    ioctl(socket, libc::SIOCGIFHWADDR, &mut ifr)?;

    let sa = unsafe { ifr.ifr_ifru.ifru_hwaddr };
    if sa.sa_family != libc::ARPHRD_ETHER as libc::sa_family_t {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("interface '{name}' is not Ethernet"),
        ));
    }

    let mut octets = [0u8; MAC_LEN];
    for (dst, src) in octets.iter_mut().zip(sa.sa_data.iter()) {
        *dst = *src as u8;
    }
    Ok(MacAddr(octets))
}

/// Reads the current hardware address of `name`.
pub fn hwaddr(name: &str) -> io::Result<MacAddr> {
    let socket = ioctl_socket()?;
    hwaddr_on(&socket, name)
}

/// Sets the hardware address of `name`, bouncing the link around the write.
///
/// The kernel refuses `SIOCSIFHWADDR` on a running device, so the sequence is
/// read flags → clear `IFF_UP` → write address → set `IFF_UP` → re-read and
/// verify. A no-op when the device already has `target`. Any failure leaves
/// the device in whatever state the last successful step reached; callers
/// treat that as not retryable.
///
/// Bouncing the link invalidates every packet socket bound to the device.
pub fn set_mac(name: &str, target: MacAddr) -> io::Result<()> {
    let socket = ioctl_socket()?;

    if hwaddr_on(&socket, name)? == target {
        return Ok(());
    }

    let mut ifr = ifreq_for(name)?;
    ioctl(&socket, libc::SIOCGIFFLAGS, &mut ifr)?;
    let flags = unsafe { ifr.ifr_ifru.ifru_flags };

    ifr.ifr_ifru.ifru_flags = flags & !(libc::IFF_UP as libc::c_short);
    ioctl(&socket, libc::SIOCSIFFLAGS, &mut ifr).map_err(|e| {
        io::Error::new(e.kind(), format!("cannot bring down '{name}': {e}"))
    })?;

    let mut ifr = ifreq_for(name)?;
    let mut sa: libc::sockaddr = unsafe { mem::zeroed() };
    sa.sa_family = libc::ARPHRD_ETHER as libc::sa_family_t;
    for (dst, src) in sa.sa_data.iter_mut().zip(target.octets()) {
        *dst = src as libc::c_char;
    }
    ifr.ifr_ifru.ifru_hwaddr = sa;
    ioctl(&socket, libc::SIOCSIFHWADDR, &mut ifr).map_err(|e| {
        io::Error::new(e.kind(), format!("cannot set MAC to {target} on '{name}': {e}"))
    })?;

    let mut ifr = ifreq_for(name)?;
    ioctl(&socket, libc::SIOCGIFFLAGS, &mut ifr)?;
    let flags = unsafe { ifr.ifr_ifru.ifru_flags };
    ifr.ifr_ifru.ifru_flags = flags | libc::IFF_UP as libc::c_short;
    ioctl(&socket, libc::SIOCSIFFLAGS, &mut ifr).map_err(|e| {
        io::Error::new(e.kind(), format!("cannot bring up '{name}': {e}"))
    })?;

    if hwaddr_on(&socket, name)? != target {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("cannot verify MAC is {target} on '{name}'"),
        ));
    }

    info!(iface = name, mac = %target, "set MAC");
    Ok(())
}

/// Effective-uid check used for the startup privilege warning.
pub fn running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}
