#![forbid(unsafe_code)]

//! Per-frame policy: drop decisions and helper-script execution.
//!
//! Scripts get the frame twice in their environment (`PKT_ORIG` exactly as
//! captured, `PKT` as it will leave the egress interface) plus decoded
//! metadata. They run with stdio on `/dev/null` and an environment reduced
//! to `PATH` and the `PKT_*` variables; every descriptor this process opens
//! is close-on-exec, so the child starts with nothing but the standard
//! streams. The parent waits for the child before touching the next frame,
//! which keeps per-frame ordering strict even with slow scripts.

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{info, warn};

use crate::b64;
use crate::iface::{ActionTable, FilterMask};
use crate::packet::buffer::FrameArena;
use crate::packet::decode::{describe, EAPOL_TYPES, EAP_CODES, EAP_METHODS};
use crate::packet::{EapolPacket, EAPOL_EAP, EAP_CODE_REQUEST, EAP_CODE_RESPONSE};

/// `PATH` handed to helper scripts; nothing else of the parent environment
/// survives.
const SCRIPT_PATH: &str = "/usr/bin:/bin:/usr/sbin:/sbin";

/// Which side of the proxy a frame is on when a policy runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Ingress,
    Egress,
}

/// Names a script needs to describe where the frame came from and where it is
/// going; both refer to the same interface during the ingress phase.
#[derive(Debug, Clone, Copy)]
pub struct FrameEndpoints<'a> {
    pub orig_name: &'a str,
    pub orig_mtu: u32,
    pub name: &'a str,
    pub mtu: u32,
}

/// The drop decision for one frame against one mask, with the decision
/// logged the way the capture log reads.
pub fn should_drop(
    packet: &EapolPacket,
    mask: &FilterMask,
    name: &str,
    orig_name: Option<&str>,
) -> bool {
    if mask.drops_type(packet.eapol_type) {
        let desc = describe(packet.eapol_type, EAPOL_TYPES);
        match orig_name {
            None => info!("filtered {desc} packet entering on '{name}'"),
            Some(from) => info!("filtered {desc} packet from '{from}' leaving on '{name}'"),
        }
        return true;
    }

    if packet.eapol_type == EAPOL_EAP && mask.drops_code(packet.eap_code()) {
        let desc = describe(packet.eap_code(), EAP_CODES);
        match orig_name {
            None => info!("filtered EAP-{desc} entering on '{name}'"),
            Some(from) => info!("filtered EAP-{desc} from '{from}' leaving on '{name}'"),
        }
        return true;
    }

    false
}

/// Runs the action table's script for this frame, if any. The relay decision
/// never depends on the script's outcome; failures are logged and ignored.
pub fn run_action(
    packet: &EapolPacket,
    actions: &ActionTable,
    phase: Phase,
    arena: &mut FrameArena,
    endpoints: FrameEndpoints<'_>,
) {
    let Some(path) = actions.lookup(packet) else {
        return;
    };

    let matched_type = actions
        .by_type
        .get(packet.eapol_type as usize)
        .and_then(Option::as_ref)
        .is_some();
    let desc = if matched_type {
        describe(packet.eapol_type, EAPOL_TYPES).to_string()
    } else {
        format!("EAP-{}", describe(packet.eap_code(), EAP_CODES))
    };

    match phase {
        Phase::Ingress => info!(
            "received {desc} on '{}'; executing '{}'",
            endpoints.name,
            path.display()
        ),
        Phase::Egress => info!(
            "sending {desc} from '{}' on '{}'; executing '{}'",
            endpoints.orig_name,
            endpoints.name,
            path.display()
        ),
    }

    let env = environment(packet, arena, endpoints);
    execute(path, &env);
}

/// Builds the `PKT_*` environment for a script.
fn environment(
    packet: &EapolPacket,
    arena: &mut FrameArena,
    endpoints: FrameEndpoints<'_>,
) -> Vec<(String, String)> {
    let mut env = vec![
        ("PKT_TIME".into(), packet.ts.to_string()),
        ("PKT_DEST".into(), packet.dest.to_string()),
        ("PKT_SOURCE".into(), packet.source.to_string()),
        ("PKT_TYPE".into(), packet.eapol_type.to_string()),
        (
            "PKT_TYPE_DESC".into(),
            describe(packet.eapol_type, EAPOL_TYPES).to_string(),
        ),
    ];

    if packet.eapol_type == EAPOL_EAP {
        if let Some(eap) = packet.eap {
            env.push(("PKT_CODE".into(), eap.code.to_string()));
            env.push(("PKT_CODE_DESC".into(), describe(eap.code, EAP_CODES).to_string()));
            env.push(("PKT_ID".into(), eap.id.to_string()));

            if eap.code == EAP_CODE_REQUEST || eap.code == EAP_CODE_RESPONSE {
                if let Some(method) = eap.method {
                    env.push(("PKT_REQRESP_TYPE".into(), method.to_string()));
                    env.push((
                        "PKT_REQRESP_DESC".into(),
                        describe(method, EAP_METHODS).to_string(),
                    ));
                }
            }
        }
    }

    env.push(("PKT_LENGTH_ORIG".into(), packet.len_orig.to_string()));
    env.push(("PKT_ORIG".into(), b64::encode(arena.frame(packet, true))));
    env.push(("PKT_IFACE_ORIG".into(), endpoints.orig_name.to_string()));
    env.push(("PKT_IFACE_MTU_ORIG".into(), endpoints.orig_mtu.to_string()));
    if let Some(tci) = packet.vlan_orig {
        env.push(("PKT_DOT1Q_TCI_ORIG".into(), format!("{:04x}", tci.to_u16())));
    }

    env.push(("PKT_LENGTH".into(), packet.len.to_string()));
    env.push(("PKT".into(), b64::encode(arena.frame(packet, false))));
    env.push(("PKT_IFACE".into(), endpoints.name.to_string()));
    env.push(("PKT_IFACE_MTU".into(), endpoints.mtu.to_string()));
    if let Some(tci) = packet.vlan {
        env.push(("PKT_DOT1Q_TCI".into(), format!("{:04x}", tci.to_u16())));
    }

    env
}

/// Spawns the script and waits for it.
fn execute(path: &Path, env: &[(String, String)]) {
    let mut cmd = Command::new(path);
    cmd.env_clear().env("PATH", SCRIPT_PATH);
    for (key, value) in env {
        cmd.env(key, value);
    }
    cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());

    match cmd.status() {
        Err(e) => warn!(script = %path.display(), error = %e, "cannot execute script"),
        Ok(status) if status.signal().is_some() => {
            warn!(script = %path.display(), "script was terminated by a signal");
        }
        Ok(status) if !status.success() => {
            warn!(
                script = %path.display(),
                code = status.code().unwrap_or(-1),
                "script did not exit cleanly"
            );
        }
        Ok(_) => {}
    }
}
