#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::config::types::{Config, Dot1qConfig, ExecConfig, FilterConfig, IfaceConfig};
use crate::error::{ProxyError, Result};
use crate::iface::{
    ActionTable, EgressPolicy, FieldEdit, FilterMask, Iface, IngressPolicy, TciEdit, VlanEdit,
};
use crate::packet::MacAddr;

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| ProxyError::Config(format!("Failed to read config file: {e}")))?;
    let cfg: Config = toml::from_str(&txt)
        .map_err(|e| ProxyError::Config(format!("Failed to parse config: {e}")))?;

    validate_config(&cfg)?;

    Ok(cfg)
}

fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.interfaces.len() < 2 {
        return Err(ProxyError::Config(
            "at least two interfaces are required".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for iface in &cfg.interfaces {
        if iface.name.is_empty() {
            return Err(ProxyError::Config("interface name must not be empty".to_string()));
        }
        if !names.insert(iface.name.as_str()) {
            return Err(ProxyError::Config(format!(
                "interface '{}' is configured twice",
                iface.name
            )));
        }

        let set_mac_from = iface.ingress.as_ref().and_then(|i| i.set_mac_from.as_ref());
        if iface.set_mac.is_some() && set_mac_from.is_some() {
            return Err(ProxyError::Config(format!(
                "interface '{}': set-mac and set-mac-from are mutually exclusive",
                iface.name
            )));
        }
    }

    Ok(())
}

/// Resolves a validated [`Config`] into the runtime interface table: names
/// become table positions, address strings become addresses, filter and
/// script names become masks and tables, and the `dot1q` key becomes the
/// strip/retag policy.
pub fn build_table(cfg: &Config) -> Result<Vec<Iface>> {
    validate_config(cfg)?;

    let position: HashMap<&str, usize> = cfg
        .interfaces
        .iter()
        .enumerate()
        .map(|(idx, iface)| (iface.name.as_str(), idx))
        .collect();

    cfg.interfaces
        .iter()
        .enumerate()
        .map(|(idx, icfg)| build_iface(icfg, idx, &position))
        .collect()
}

fn build_iface(
    icfg: &IfaceConfig,
    idx: usize,
    position: &HashMap<&str, usize>,
) -> Result<Iface> {
    let mut iface = Iface::new(icfg.name.clone());
    iface.promisc = icfg.promisc;

    if let Some(mac) = &icfg.set_mac {
        let parsed: MacAddr = mac.parse().map_err(|e| {
            ProxyError::Config(format!("interface '{}': {e}", icfg.name))
        })?;
        iface.set_mac = Some(parsed);
    }

    if let Some(ingress) = &icfg.ingress {
        let set_mac_from = match &ingress.set_mac_from {
            None => None,
            Some(peer) => {
                let &peer_idx = position.get(peer.as_str()).ok_or_else(|| {
                    ProxyError::Config(format!(
                        "interface '{}': set-mac-from references unknown interface '{peer}'",
                        icfg.name
                    ))
                })?;
                if peer_idx == idx {
                    return Err(ProxyError::Config(format!(
                        "interface '{}': set-mac-from must name another interface",
                        icfg.name
                    )));
                }
                Some(peer_idx)
            }
        };

        iface.ingress = Some(IngressPolicy {
            set_mac_from,
            filter: build_filter(&icfg.name, ingress.filter.as_ref())?,
            actions: build_actions(&icfg.name, ingress.exec.as_ref())?,
        });
    }

    if let Some(egress) = &icfg.egress {
        iface.egress = Some(EgressPolicy {
            vlan: egress
                .dot1q
                .as_ref()
                .map(|d| build_vlan_edit(&icfg.name, d))
                .transpose()?,
            filter: build_filter(&icfg.name, egress.filter.as_ref())?,
            actions: build_actions(&icfg.name, egress.exec.as_ref())?,
        });
    }

    Ok(iface)
}

fn eapol_type_value(name: &str) -> Option<u8> {
    Some(match name {
        "eap" => 0,
        "start" => 1,
        "logoff" => 2,
        "key" => 3,
        "encapsulated-asf-alert" => 4,
        "mka" => 5,
        "announcement-generic" => 6,
        "announcement-specific" => 7,
        "announcement-req" => 8,
        _ => return None,
    })
}

fn eap_code_value(name: &str) -> Option<u8> {
    Some(match name {
        "request" => 1,
        "response" => 2,
        "success" => 3,
        "failure" => 4,
        _ => return None,
    })
}

fn build_filter(iface: &str, filter: Option<&FilterConfig>) -> Result<Option<FilterMask>> {
    let Some(filter) = filter else {
        return Ok(None);
    };

    let mut mask = FilterMask::default();
    for name in &filter.types {
        let value = eapol_type_value(name).ok_or_else(|| {
            ProxyError::Config(format!("interface '{iface}': unknown EAPOL type '{name}'"))
        })?;
        mask.types |= 1 << value;
    }
    for name in &filter.codes {
        let value = eap_code_value(name).ok_or_else(|| {
            ProxyError::Config(format!("interface '{iface}': unknown EAP code '{name}'"))
        })?;
        mask.codes |= 1 << value;
    }
    Ok(Some(mask))
}

fn build_actions(iface: &str, exec: Option<&ExecConfig>) -> Result<Option<ActionTable>> {
    let Some(exec) = exec else {
        return Ok(None);
    };

    let mut table = ActionTable::default();
    for (name, path) in &exec.types {
        let value = eapol_type_value(name).ok_or_else(|| {
            ProxyError::Config(format!("interface '{iface}': unknown EAPOL type '{name}'"))
        })?;
        if !path.is_absolute() {
            return Err(ProxyError::Config(format!(
                "interface '{iface}': script path '{}' must be absolute",
                path.display()
            )));
        }
        table.by_type[value as usize] = Some(path.clone());
    }
    for (name, path) in &exec.codes {
        let value = eap_code_value(name).ok_or_else(|| {
            ProxyError::Config(format!("interface '{iface}': unknown EAP code '{name}'"))
        })?;
        if !path.is_absolute() {
            return Err(ProxyError::Config(format!(
                "interface '{iface}': script path '{}' must be absolute",
                path.display()
            )));
        }
        table.by_code[value as usize] = Some(path.clone());
    }
    Ok(Some(table))
}

fn build_vlan_edit(iface: &str, dot1q: &Dot1qConfig) -> Result<VlanEdit> {
    match dot1q {
        Dot1qConfig::Mode(mode) if mode == "none" => Ok(VlanEdit::Strip),
        Dot1qConfig::Mode(mode) => Err(ProxyError::Config(format!(
            "interface '{iface}': unknown dot1q mode '{mode}' (expected \"none\" or a table)"
        ))),
        Dot1qConfig::Tag { pcp, dei, vid } => {
            let pcp = match pcp {
                None => FieldEdit::Keep,
                Some(p @ 0..=7) => FieldEdit::Set(*p),
                Some(p) => {
                    return Err(ProxyError::Config(format!(
                        "interface '{iface}': dot1q pcp {p} out of range (0-7)"
                    )))
                }
            };
            let dei = match dei {
                None => FieldEdit::Keep,
                Some(0) => FieldEdit::Set(false),
                Some(1) => FieldEdit::Set(true),
                Some(d) => {
                    return Err(ProxyError::Config(format!(
                        "interface '{iface}': dot1q dei {d} out of range (0-1)"
                    )))
                }
            };
            let vid = match vid {
                None => FieldEdit::Keep,
                Some(v @ 0..=4094) => FieldEdit::Set(*v),
                Some(v) => {
                    return Err(ProxyError::Config(format!(
                        "interface '{iface}': dot1q vid {v} out of range (0-4094)"
                    )))
                }
            };
            Ok(VlanEdit::Retag(TciEdit { pcp, dei, vid }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::IngressConfig;

    fn iface_named(name: &str) -> IfaceConfig {
        IfaceConfig {
            name: name.to_string(),
            promisc: false,
            set_mac: None,
            ingress: None,
            egress: None,
        }
    }

    fn two_ifaces() -> Config {
        Config { oneshot: false, interfaces: vec![iface_named("eth0"), iface_named("eth1")] }
    }

    #[test]
    fn rejects_fewer_than_two_interfaces() {
        let cfg = Config { oneshot: false, interfaces: vec![iface_named("eth0")] };
        assert!(matches!(validate_config(&cfg), Err(ProxyError::Config(_))));
    }

    #[test]
    fn rejects_duplicate_names() {
        let cfg =
            Config { oneshot: false, interfaces: vec![iface_named("eth0"), iface_named("eth0")] };
        assert!(matches!(validate_config(&cfg), Err(ProxyError::Config(_))));
    }

    #[test]
    fn rejects_set_mac_together_with_set_mac_from() {
        let mut cfg = two_ifaces();
        cfg.interfaces[0].set_mac = Some("02:00:00:00:00:01".to_string());
        cfg.interfaces[0].ingress = Some(IngressConfig {
            set_mac_from: Some("eth1".to_string()),
            ..Default::default()
        });
        assert!(matches!(validate_config(&cfg), Err(ProxyError::Config(_))));
    }

    #[test]
    fn resolves_set_mac_from_to_table_position() {
        let mut cfg = two_ifaces();
        cfg.interfaces[1].ingress = Some(IngressConfig {
            set_mac_from: Some("eth0".to_string()),
            ..Default::default()
        });

        let table = build_table(&cfg).expect("table");
        let policy = table[1].ingress.as_ref().expect("ingress");
        assert_eq!(policy.set_mac_from, Some(0));
    }

    #[test]
    fn rejects_self_referential_set_mac_from() {
        let mut cfg = two_ifaces();
        cfg.interfaces[0].ingress = Some(IngressConfig {
            set_mac_from: Some("eth0".to_string()),
            ..Default::default()
        });
        assert!(build_table(&cfg).is_err());
    }

    #[test]
    fn rejects_unknown_set_mac_from_target() {
        let mut cfg = two_ifaces();
        cfg.interfaces[0].ingress = Some(IngressConfig {
            set_mac_from: Some("eth9".to_string()),
            ..Default::default()
        });
        assert!(build_table(&cfg).is_err());
    }

    #[test]
    fn builds_filter_masks_from_names() {
        let filter = FilterConfig {
            types: vec!["eap".to_string(), "start".to_string()],
            codes: vec!["request".to_string()],
        };
        let mask = build_filter("eth0", Some(&filter)).expect("mask").expect("some");
        assert_eq!(mask.types, 0b11);
        assert_eq!(mask.codes, 0b10);
    }

    #[test]
    fn rejects_unknown_filter_names() {
        let filter = FilterConfig { types: vec!["bogus".to_string()], codes: vec![] };
        assert!(build_filter("eth0", Some(&filter)).is_err());

        let filter = FilterConfig { types: vec![], codes: vec!["bogus".to_string()] };
        assert!(build_filter("eth0", Some(&filter)).is_err());
    }

    #[test]
    fn rejects_relative_script_paths() {
        let mut exec = ExecConfig::default();
        exec.types.insert("start".to_string(), "scripts/on-start.sh".into());
        assert!(build_actions("eth0", Some(&exec)).is_err());
    }

    #[test]
    fn builds_action_table() {
        let mut exec = ExecConfig::default();
        exec.types.insert("key".to_string(), "/usr/local/libexec/on-key.sh".into());
        exec.codes.insert("failure".to_string(), "/usr/local/libexec/on-failure.sh".into());

        let table = build_actions("eth0", Some(&exec)).expect("ok").expect("some");
        assert!(table.by_type[3].is_some());
        assert!(table.by_code[4].is_some());
        assert!(!table.is_empty());
    }

    #[test]
    fn dot1q_none_strips() {
        let edit = build_vlan_edit("eth0", &Dot1qConfig::Mode("none".to_string())).expect("edit");
        assert_eq!(edit, VlanEdit::Strip);
    }

    #[test]
    fn dot1q_table_sets_and_keeps_fields() {
        let edit = build_vlan_edit(
            "eth0",
            &Dot1qConfig::Tag { pcp: Some(5), dei: None, vid: Some(100) },
        )
        .expect("edit");
        assert_eq!(
            edit,
            VlanEdit::Retag(TciEdit {
                pcp: FieldEdit::Set(5),
                dei: FieldEdit::Keep,
                vid: FieldEdit::Set(100),
            })
        );
    }

    #[test]
    fn dot1q_rejects_out_of_range_fields() {
        assert!(build_vlan_edit("e", &Dot1qConfig::Tag { pcp: Some(8), dei: None, vid: None })
            .is_err());
        assert!(build_vlan_edit("e", &Dot1qConfig::Tag { pcp: None, dei: Some(2), vid: None })
            .is_err());
        assert!(build_vlan_edit("e", &Dot1qConfig::Tag { pcp: None, dei: None, vid: Some(4095) })
            .is_err());
    }

    #[test]
    fn dot1q_rejects_unknown_mode() {
        assert!(build_vlan_edit("e", &Dot1qConfig::Mode("off".to_string())).is_err());
    }
}
