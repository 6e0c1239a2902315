// IxpTwin: Digital twin of an Internet Exchange Point written in Rust
// Copyright (C) 2022-2023 Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.


use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use test_log::test;

use super::{settings, FILES};
use crate::{
    config::{ConfigError, RpkiKind, Settings},
    dumps::{MemberDumpKind, TableDumpKind},
    model::IpVersion,
    vendor::Vendor,
};

#[test]
fn parse_settings() {
    let s = settings();
    assert_eq!(s.scenario_name, "twin");
    assert_eq!(s.host_interface.as_deref(), Some("eth1.100"));
    assert_eq!(s.peering_configuration.kind, MemberDumpKind::IxpManager);
    assert_eq!(s.rib_dumps.kind, TableDumpKind::Bird);
    assert_eq!(s.rib_dumps.dumps.len(), 1);
    assert_eq!(s.peering_prefix_len(IpVersion::V4), Some(24));
    assert_eq!(s.peering_prefix_len(IpVersion::V6), Some(64));

    let rs = &s.route_servers["rs2_v6"];
    assert_eq!(rs.vendor, Vendor::OpenBgpd);
    assert_eq!(rs.version(), IpVersion::V6);
    assert_eq!(s.route_servers_of(IpVersion::V4).count(), 1);

    assert_eq!(s.rpki.len(), 1);
    assert_eq!(s.rpki[0].kind, RpkiKind::External);
    assert_eq!(s.quarantine.max_rib_prefixes.get(IpVersion::V4), Some(&2));
    assert_eq!(s.quarantine.probe_ips.get(IpVersion::V6), None);
    assert_eq!(s.quarantine.dns_name, "example.com");
}

#[test]
fn resolve_paths() {
    let s = settings();
    assert_eq!(
        s.resolve(&s.route_servers["rs1_v4"].config),
        Path::new(FILES).join("rs/bird.conf")
    );
    assert_eq!(s.resolve("/etc/bird.conf"), PathBuf::from("/etc/bird.conf"));
    assert_eq!(s.lab_dir(), Path::new(FILES).join("lab").join("twin"));
}

#[test]
fn load_from_file() {
    let s = Settings::load(Path::new(FILES).join("settings.json")).unwrap();
    assert_eq!(s.resources, Path::new(FILES));

    let err = Settings::load(Path::new(FILES).join("raw.json")).unwrap_err();
    match err {
        ConfigError::Json(path, _) => assert_eq!(path, Path::new(FILES).join("raw.json")),
        e => panic!("unexpected error: {e}"),
    }
    assert!(matches!(
        Settings::load(Path::new(FILES).join("missing.json")),
        Err(ConfigError::Io(_, _))
    ));
}

#[test]
fn route_server_needs_peering_lan() {
    let content = include_str!("files/settings.json")
        .replace(r#""6": "2001:db8::/64""#, r#""6": null"#);
    assert!(matches!(
        Settings::from_json(&content, FILES),
        Err(ConfigError::MissingPeeringLan(name, IpVersion::V6)) if name == "rs2_v6"
    ));
}

#[test]
fn lab_dir_next_to_settings() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("settings.json");
    std::fs::write(&path, include_str!("files/settings.json"))?;
    let s = Settings::load(&path)?;
    assert_eq!(s.resources, tmp.path());
    assert_eq!(s.lab_dir(), tmp.path().join("lab").join("twin"));

    let content = include_str!("files/settings.json")
        .replacen('{', r#"{"lab_dir": "/var/lib/twin","#, 1);
    std::fs::write(&path, content)?;
    let s = Settings::load(&path)?;
    assert_eq!(s.lab_dir(), Path::new("/var/lib/twin/twin"));
    Ok(())
}
