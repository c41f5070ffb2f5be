#![forbid(unsafe_code)]

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Exit instead of restarting after proxy errors
    /// The --oneshot command-line flag also sets this
    /// Default: false
    #[serde(default)]
    pub oneshot: bool,
    /// Interfaces to proxy between, in fan-out order
    /// At least two are required
    pub interfaces: Vec<IfaceConfig>,
}

/// One proxied network interface
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct IfaceConfig {
    /// Kernel name of the interface, e.g. "eth0"
    pub name: String,
    /// Capture in promiscuous mode instead of joining the three reserved
    /// 802.1X group addresses
    /// Default: false
    #[serde(default)]
    pub promisc: bool,
    /// Hardware address to set once at bring-up, colon-delimited
    /// Mutually exclusive with ingress.set-mac-from
    #[serde(default)]
    pub set_mac: Option<String>,
    /// Policy for frames entering on this interface (optional)
    #[serde(default)]
    pub ingress: Option<IngressConfig>,
    /// Policy for frames leaving on this interface (optional)
    #[serde(default)]
    pub egress: Option<EgressConfig>,
}

/// Ingress-side policy
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct IngressConfig {
    /// Name of another configured interface; adopt the source address of the
    /// first frame captured there. One-shot.
    #[serde(default)]
    pub set_mac_from: Option<String>,
    /// Frames to drop on ingress
    #[serde(default)]
    pub filter: Option<FilterConfig>,
    /// Scripts to run on ingress
    #[serde(default)]
    pub exec: Option<ExecConfig>,
}

/// Egress-side policy
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct EgressConfig {
    /// 802.1Q rewrite for frames leaving here
    /// Either the string "none" (strip the tag) or a table of pcp/dei/vid
    /// where an omitted field keeps the captured value
    #[serde(default)]
    pub dot1q: Option<Dot1qConfig>,
    /// Frames to drop on egress
    #[serde(default)]
    pub filter: Option<FilterConfig>,
    /// Scripts to run on egress
    #[serde(default)]
    pub exec: Option<ExecConfig>,
}

/// Drop masks by name. EAPOL packet types: eap, start, logoff, key,
/// encapsulated-asf-alert, mka, announcement-generic, announcement-specific,
/// announcement-req. EAP codes: request, response, success, failure.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FilterConfig {
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub codes: Vec<String>,
}

/// Script hooks keyed by the same names as [`FilterConfig`]. Paths must be
/// absolute.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ExecConfig {
    #[serde(default)]
    pub types: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub codes: BTreeMap<String, PathBuf>,
}

/// The `dot1q` key of an egress block
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum Dot1qConfig {
    /// "none": emit the frame untagged
    Mode(String),
    /// Per-field override; omitted fields keep the captured value
    Tag {
        #[serde(default)]
        pcp: Option<u8>,
        #[serde(default)]
        dei: Option<u8>,
        #[serde(default)]
        vid: Option<u16>,
    },
}
