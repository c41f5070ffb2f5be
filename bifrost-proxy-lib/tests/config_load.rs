use std::fs;
use std::path::PathBuf;

use bifrost_proxy_lib::config::{build_table, load_from_path};
use bifrost_proxy_lib::iface::{FieldEdit, VlanEdit};
use bifrost_proxy_lib::packet::MacAddr;

fn write_config(dir: &tempfile::TempDir, name: &str, toml: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, toml).expect("write config");
    path
}

#[test]
fn loads_minimal_config() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let dir = tempfile::tempdir()?;
    let path = write_config(
        &dir,
        "minimal.toml",
        r#"
[[interfaces]]
name = "eth0"

[[interfaces]]
name = "eth1"
"#,
    );

    let cfg = load_from_path(&path)?;
    assert!(!cfg.oneshot);
    assert_eq!(cfg.interfaces.len(), 2);
    assert_eq!(cfg.interfaces[0].name, "eth0");
    assert!(!cfg.interfaces[0].promisc);
    assert!(cfg.interfaces[0].ingress.is_none());

    let table = build_table(&cfg)?;
    assert_eq!(table.len(), 2);
    assert_eq!(table[1].name, "eth1");
    assert!(table[0].set_mac.is_none());
    Ok(())
}

#[test]
fn loads_full_policy_config() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let dir = tempfile::tempdir()?;
    let path = write_config(
        &dir,
        "full.toml",
        r#"
oneshot = true

[[interfaces]]
name = "eth0"
promisc = true

[interfaces.ingress]
filter = { types = ["start", "logoff"], codes = ["request"] }

[interfaces.ingress.exec]
types = { eap = "/usr/local/libexec/on-eap.sh" }

[[interfaces]]
name = "eth1"
set-mac = "02:00:00:00:00:01"

[interfaces.egress]
dot1q = { pcp = 5, vid = 100 }

[[interfaces]]
name = "eth2"

[interfaces.ingress]
set-mac-from = "eth0"

[interfaces.egress]
dot1q = "none"
"#,
    );

    let cfg = load_from_path(&path)?;
    assert!(cfg.oneshot);

    let table = build_table(&cfg)?;
    assert_eq!(table.len(), 3);

    assert!(table[0].promisc);
    let ingress = table[0].ingress.as_ref().ok_or("ingress missing")?;
    let mask = ingress.filter.ok_or("filter missing")?;
    assert!(mask.drops_type(1));
    assert!(mask.drops_type(2));
    assert!(!mask.drops_type(0));
    assert!(mask.drops_code(1));
    let actions = ingress.actions.as_ref().ok_or("actions missing")?;
    assert!(actions.by_type[0].is_some());

    assert_eq!(table[1].set_mac, Some("02:00:00:00:00:01".parse::<MacAddr>()?));
    let egress = table[1].egress.as_ref().ok_or("egress missing")?;
    match egress.vlan.ok_or("dot1q missing")? {
        VlanEdit::Retag(edit) => {
            assert_eq!(edit.pcp, FieldEdit::Set(5));
            assert_eq!(edit.dei, FieldEdit::Keep);
            assert_eq!(edit.vid, FieldEdit::Set(100));
        }
        other => panic!("expected retag, got {other:?}"),
    }

    let ingress = table[2].ingress.as_ref().ok_or("ingress missing")?;
    assert_eq!(ingress.set_mac_from, Some(0));
    let egress = table[2].egress.as_ref().ok_or("egress missing")?;
    assert_eq!(egress.vlan, Some(VlanEdit::Strip));
    Ok(())
}

#[test]
fn rejects_single_interface() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(
        &dir,
        "single.toml",
        r#"
[[interfaces]]
name = "eth0"
"#,
    );
    assert!(load_from_path(&path).is_err());
}

#[test]
fn rejects_bad_mac_string() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(
        &dir,
        "badmac.toml",
        r#"
[[interfaces]]
name = "eth0"
set-mac = "not-a-mac"

[[interfaces]]
name = "eth1"
"#,
    );
    let cfg = load_from_path(&path).expect("grammar is fine");
    assert!(build_table(&cfg).is_err());
}

#[test]
fn rejects_missing_file() {
    assert!(load_from_path("/nonexistent/bifrost.toml").is_err());
}
