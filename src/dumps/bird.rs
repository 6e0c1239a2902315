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

//! Table dump in the format of `birdc show route all`.

use std::net::IpAddr;

use ipnet::IpNet;
use lazy_static::lazy_static;
use regex::Regex;

use super::{attach_route, parse_asn, DumpError, TableDump};
use crate::model::Topology;

lazy_static! {
    static ref ROUTE: Regex = Regex::new(r"^(\S+)\s+\w+\s+\[(\S+) (.*?)\]").unwrap();
    static ref ALT_ROUTE: Regex = Regex::new(r"^\w+\s+\[(\S+) (.*?)\]").unwrap();
    static ref VIA: Regex = Regex::new(r"^via (\S+) on (\S+)").unwrap();
    static ref ATTRIBUTE: Regex = Regex::new(r"^BGP\.(\w+): (.+)").unwrap();
}

/// Header lines before the first route.
const HEADER_LINES: usize = 2;
/// First line of the ROA table, which ends the route table.
const ROA_TABLE: &str = "Table T_roa_";

#[derive(Debug, Default)]
struct PartialRoute {
    network: Option<IpNet>,
    neighbor: Option<IpAddr>,
    as_path: Option<Vec<u32>>,
}

/// Parser for BIRD route tables.
///
/// Each route starts with a line `<prefix> <type> [<protocol> <timestamp>] ...`. Alternative
/// routes for the same prefix omit the prefix. The neighbor is taken from the `via` line, and the
/// AS path from the `BGP.as_path` attribute. For AS sets, only the first member is kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct BirdTableDump;

impl BirdTableDump {
    fn parse(content: &str) -> Vec<PartialRoute> {
        let mut routes: Vec<PartialRoute> = Vec::new();
        let mut last_network: Option<IpNet> = None;

        for line in content.lines().skip(HEADER_LINES) {
            let line = line.trim();
            if line.starts_with(ROA_TABLE) {
                break;
            }

            if let Some(caps) = ROUTE.captures(line) {
                last_network = caps[1].parse().ok();
                if last_network.is_none() {
                    log::warn!("[dump] invalid network `{}`, skipping", &caps[1]);
                }
                routes.push(PartialRoute {
                    network: last_network,
                    ..Default::default()
                });
                continue;
            }
            if ALT_ROUTE.is_match(line) {
                routes.push(PartialRoute {
                    network: last_network,
                    ..Default::default()
                });
                continue;
            }

            let Some(current) = routes.last_mut() else {
                continue;
            };

            if let Some(caps) = VIA.captures(line) {
                current.neighbor = caps[1].parse().ok();
            } else if let Some(caps) = ATTRIBUTE.captures(line) {
                if &caps[1] == "as_path" {
                    current.as_path = Some(parse_as_path(&caps[2]));
                }
            }
        }

        routes
    }
}

/// Parse a BIRD AS path. AS sets (`{65002 65003}`) contribute their first member.
fn parse_as_path(s: &str) -> Vec<u32> {
    let mut path = Vec::new();
    let mut in_set = false;
    for token in s.split_whitespace() {
        let opens = token.starts_with('{');
        let closes = token.ends_with('}');
        if !in_set || opens {
            if let Some(asn) = parse_asn(token) {
                path.push(asn);
            }
        }
        in_set = (in_set || opens) && !closes;
    }
    path
}

impl TableDump for BirdTableDump {
    fn load_from_str(&self, topology: &mut Topology, content: &str) -> Result<usize, DumpError> {
        let mut attached = 0;
        for route in Self::parse(content) {
            let (Some(network), Some(neighbor), Some(as_path)) =
                (route.network, route.neighbor, route.as_path)
            else {
                log::debug!("[dump] incomplete route for {:?}, skipping", route.network);
                continue;
            };
            if attach_route(topology, neighbor, network, as_path) {
                attached += 1;
            }
        }
        Ok(attached)
    }
}

