//! Per-interface state and the bring-up path.
//!
//! The configured interfaces form a fixed table; policies refer to other
//! interfaces by table position, so those references stay valid for the
//! process lifetime and resolve in O(1).

pub mod netdev;
pub mod socket;

use std::path::PathBuf;

use tracing::{debug, error, warn};

use crate::packet::{EapolPacket, MacAddr, EAPOL_EAP, EAPOL_TYPE_MAX};
use socket::EapolSocket;

/// Drop masks over EAPOL packet types (bit n ⇒ drop type n) and EAP codes
/// (bit n ⇒ drop code n, checked only on EAPOL-EAP frames).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterMask {
    pub types: u16,
    pub codes: u8,
}

impl FilterMask {
    pub fn drops_type(&self, eapol_type: u8) -> bool {
        eapol_type < 16 && self.types & (1 << eapol_type) != 0
    }

    pub fn drops_code(&self, code: u8) -> bool {
        code < 8 && self.codes & (1 << code) != 0
    }

    /// The drop decision for a frame: its EAPOL type is masked, or it is an
    /// EAPOL-EAP frame whose EAP code is masked.
    pub fn drops(&self, packet: &EapolPacket) -> bool {
        self.drops_type(packet.eapol_type)
            || (packet.eapol_type == EAPOL_EAP && self.drops_code(packet.eap_code()))
    }
}

/// Scripts keyed by EAPOL packet type (0..=8) and EAP code (1..=4).
///
/// Paths are absolute; the configuration layer enforces that.
#[derive(Debug, Clone, Default)]
pub struct ActionTable {
    pub by_type: [Option<PathBuf>; EAPOL_TYPE_MAX as usize + 1],
    pub by_code: [Option<PathBuf>; 5],
}

impl ActionTable {
    /// Picks the script for a frame: the type entry wins; EAPOL-EAP frames
    /// fall back to the code entry. At most one script per frame.
    pub fn lookup(&self, packet: &EapolPacket) -> Option<&PathBuf> {
        if let Some(path) = self
            .by_type
            .get(packet.eapol_type as usize)
            .and_then(Option::as_ref)
        {
            return Some(path);
        }
        if packet.eapol_type == EAPOL_EAP {
            if let Some(path) = self.by_code.get(packet.eap_code() as usize).and_then(Option::as_ref)
            {
                return Some(path);
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.iter().all(Option::is_none) && self.by_code.iter().all(Option::is_none)
    }
}

/// One sub-field of an egress 802.1Q override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldEdit<T> {
    /// Preserve the captured value.
    #[default]
    Keep,
    Set(T),
}

impl<T: Copy> FieldEdit<T> {
    pub fn apply(self, captured: T) -> T {
        match self {
            FieldEdit::Keep => captured,
            FieldEdit::Set(value) => value,
        }
    }
}

/// Per-field rewrite of the Tag Control Information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TciEdit {
    pub pcp: FieldEdit<u8>,
    pub dei: FieldEdit<bool>,
    pub vid: FieldEdit<u16>,
}

/// What to do to the 802.1Q tag of frames leaving an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VlanEdit {
    /// Remove the tag entirely.
    Strip,
    /// Emit a tag, taking each sub-field from the override or the capture.
    Retag(TciEdit),
}

/// Policy applied to frames entering an interface.
#[derive(Debug, Clone, Default)]
pub struct IngressPolicy {
    /// Adopt the source address of the first frame seen on this *other*
    /// interface (table position). Cleared once acted on.
    pub set_mac_from: Option<usize>,
    pub filter: Option<FilterMask>,
    pub actions: Option<ActionTable>,
}

/// Policy applied to frames leaving an interface.
#[derive(Debug, Clone, Default)]
pub struct EgressPolicy {
    pub vlan: Option<VlanEdit>,
    pub filter: Option<FilterMask>,
    pub actions: Option<ActionTable>,
}

/// A configured network interface and its runtime state.
#[derive(Debug)]
pub struct Iface {
    pub name: String,
    /// Kernel interface index; 0 until the first bring-up.
    pub index: i32,
    pub mtu: u32,
    /// Open capture socket while the interface is ready.
    pub socket: Option<EapolSocket>,
    /// Frames captured here. Wraps; only ever compared for the first frame.
    pub recv_ctr: u32,
    pub send_ctr: u32,
    pub promisc: bool,
    /// One-shot static hardware-address override, applied at bring-up.
    pub set_mac: Option<MacAddr>,
    pub ingress: Option<IngressPolicy>,
    pub egress: Option<EgressPolicy>,
}

impl Iface {
    pub fn new(name: String) -> Self {
        Iface {
            name,
            index: 0,
            mtu: 0,
            socket: None,
            recv_ctr: 0,
            send_ctr: 0,
            promisc: false,
            set_mac: None,
            ingress: None,
            egress: None,
        }
    }

    pub fn ingress_filter(&self) -> Option<&FilterMask> {
        self.ingress.as_ref().and_then(|p| p.filter.as_ref())
    }

    pub fn egress_filter(&self) -> Option<&FilterMask> {
        self.egress.as_ref().and_then(|p| p.filter.as_ref())
    }

    /// Brings this interface from "configured" to "ready": validate it is up
    /// and Ethernet, record MTU and index, apply a pending one-shot MAC
    /// override, then open and configure the capture socket.
    pub fn bring_up(&mut self) -> std::io::Result<()> {
        self.socket = None;

        let state = netdev::query(&self.name)?;
        if !state.up {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                format!("interface '{}' is not up", self.name),
            ));
        }
        self.index = state.index;
        self.mtu = state.mtu;

        // One attempt only, whether or not it succeeds.
        if let Some(target) = self.set_mac.take() {
            if let Err(e) = netdev::set_mac(&self.name, target) {
                warn!(iface = %self.name, error = %e, "cannot set MAC, won't try again");
            }
        }

        self.socket = Some(EapolSocket::open(self.index, self.promisc)?);
        debug!(iface = %self.name, index = self.index, mtu = self.mtu, "initialized interface");
        Ok(())
    }
}

/// Brings every interface up and returns how many are ready.
///
/// Failures are logged per interface; the caller decides whether a partial
/// table is fatal.
pub fn bring_up_all(ifaces: &mut [Iface]) -> usize {
    let mut ready = 0;
    for iface in ifaces.iter_mut() {
        match iface.bring_up() {
            Ok(()) => ready += 1,
            Err(e) => error!(iface = %iface.name, error = %e, "cannot initialize interface"),
        }
    }
    ready
}

/// The largest MTU over the table, used to size the frame arena.
pub fn max_mtu(ifaces: &[Iface]) -> usize {
    ifaces.iter().map(|i| i.mtu as usize).max().unwrap_or(1500)
}
