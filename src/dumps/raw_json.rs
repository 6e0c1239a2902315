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

//! Member dump as a flat list of JSON records.

use std::net::IpAddr;

use serde::Deserialize;

use super::{DumpError, MacSynthesizer, MemberDump};
use crate::model::{as_key, MacAddr, NeighbourAs, Peering, Topology};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct Record {
    orig_as_num: u32,
    #[serde(default)]
    mac_addr: Option<String>,
    #[serde(default)]
    peering_addr4: Option<String>,
    #[serde(default)]
    peering_addr6: Option<String>,
}

/// Parser for a list of `{ORIG_AS_NUM, MAC_ADDR, PEERING_ADDR4, PEERING_ADDR6}` records.
///
/// Each record is a new router of its AS. Records without a MAC address get a fresh synthesized
/// MAC.
#[derive(Debug, Clone, Default)]
pub struct RawJsonDump {
    macs: MacSynthesizer,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

impl MemberDump for RawJsonDump {
    fn load_from_str(&mut self, content: &str) -> Result<Topology, DumpError> {
        let records: Vec<Record> = serde_json::from_str(content)?;
        let mut topology = Topology::new();

        for record in records {
            let neighbour = topology
                .entry(as_key(record.orig_as_num))
                .or_insert_with(|| NeighbourAs::new(record.orig_as_num));
            let router = neighbour.add_router(neighbour.num_routers() as u32);

            let mac = match non_empty(record.mac_addr) {
                Some(mac) => mac.parse::<MacAddr>()?,
                None => self.macs.next_mac(),
            };

            for addr in [record.peering_addr4, record.peering_addr6]
                .into_iter()
                .filter_map(non_empty)
            {
                let l3_address: IpAddr = addr
                    .trim()
                    .parse()
                    .map_err(|_| DumpError::InvalidAddress(addr.clone()))?;
                router.add_peering(Peering {
                    l2_address: Some(mac.clone()),
                    l3_address,
                });
            }
        }

        log::info!("[dump] parsed {} members", topology.len());
        Ok(topology)
    }
}
