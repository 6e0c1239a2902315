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

//! Table dump in the format of `bgpctl show rib`.

use std::net::IpAddr;

use ipnet::IpNet;

use super::{attach_route, parse_asn, DumpError, TableDump};
use crate::model::Topology;

/// Number of header lines, present if the first line contains `flags`.
const HEADER_LINES: usize = 6;
/// Validation state of routes rejected by RPKI.
const RPKI_INVALID: &str = "!";
/// Origin markers at the end of the AS path.
const ORIGINS: [&str; 3] = ["i", "e", "?"];

/// Parser for OpenBGPD RIB tables.
///
/// Each row has the columns `flags`, `vs`, `destination`, `gateway`, `lpref`, `med`, followed by
/// the AS path and the origin. Rows that are invalid by RPKI are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenBgpdTableDump;

impl TableDump for OpenBgpdTableDump {
    fn load_from_str(&self, topology: &mut Topology, content: &str) -> Result<usize, DumpError> {
        let mut lines = content.lines().peekable();
        if lines.peek().map(|l| l.contains("flags")).unwrap_or(false) {
            lines.nth(HEADER_LINES - 1);
        }

        let mut attached = 0;
        for line in lines {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 6 {
                continue;
            }
            let (rpki, network, neighbor) = (fields[1], fields[2], fields[3]);
            if rpki == RPKI_INVALID {
                continue;
            }

            let Ok(network) = network.parse::<IpNet>() else {
                log::warn!("[dump] invalid network `{network}`, skipping");
                continue;
            };
            let Ok(neighbor) = neighbor.parse::<IpAddr>() else {
                log::warn!("[dump] invalid neighbor `{neighbor}`, skipping");
                continue;
            };
            let as_path: Option<Vec<u32>> = fields[6..]
                .iter()
                .filter(|t| !ORIGINS.contains(*t))
                .map(|t| parse_asn(t))
                .collect();
            let Some(as_path) = as_path else {
                log::warn!("[dump] invalid AS path for network {network}, skipping");
                continue;
            };

            if attach_route(topology, neighbor, network, as_path) {
                attached += 1;
            }
        }
        Ok(attached)
    }
}
