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

//! Member dump exported by IXP Manager.

use std::net::IpAddr;

use serde::Deserialize;

use super::{DumpError, MacSynthesizer, MemberDump};
use crate::model::{as_key, MacAddr, NeighbourAs, Peering, Topology};

#[derive(Debug, Deserialize)]
struct Export {
    member_list: Vec<Member>,
}

#[derive(Debug, Deserialize)]
struct Member {
    asnum: u32,
    #[serde(default)]
    connection_list: Vec<Connection>,
}

#[derive(Debug, Deserialize)]
struct Connection {
    #[serde(default)]
    vlan_list: Option<Vec<Vlan>>,
}

#[derive(Debug, Deserialize)]
struct Vlan {
    #[serde(default)]
    ipv4: Option<VlanAddress>,
    #[serde(default)]
    ipv6: Option<VlanAddress>,
}

#[derive(Debug, Deserialize)]
struct VlanAddress {
    address: IpAddr,
    #[serde(default)]
    mac_addresses: Vec<String>,
}

/// Parser for the IXP Manager JSON export.
///
/// Every connection of a member with at least one VLAN becomes a router, numbered from 0 in the
/// order of the export. Each VLAN adds a peering per address family. The last listed MAC address
/// is used; if there is none, the MAC synthesized for the AS is used.
#[derive(Debug, Clone, Default)]
pub struct IxpManagerDump {
    macs: MacSynthesizer,
}

impl MemberDump for IxpManagerDump {
    fn load_from_str(&mut self, content: &str) -> Result<Topology, DumpError> {
        let export: Export = serde_json::from_str(content)?;
        let mut topology = Topology::new();

        for member in export.member_list {
            let connections = member
                .connection_list
                .into_iter()
                .filter_map(|c| c.vlan_list)
                .filter(|vlans| !vlans.is_empty());

            for (idx, vlans) in connections.enumerate() {
                let neighbour = topology
                    .entry(as_key(member.asnum))
                    .or_insert_with(|| NeighbourAs::new(member.asnum));
                let router = neighbour.add_router(idx as u32);

                for vlan in vlans {
                    for address in [vlan.ipv4, vlan.ipv6].into_iter().flatten() {
                        let mac = match address.mac_addresses.last() {
                            Some(mac) => mac.parse::<MacAddr>()?,
                            None => self.macs.for_as(member.asnum),
                        };
                        router.add_peering(Peering {
                            l2_address: Some(mac),
                            l3_address: address.address,
                        });
                    }
                }
            }
        }

        log::info!("[dump] parsed {} members", topology.len());
        Ok(topology)
    }
}
