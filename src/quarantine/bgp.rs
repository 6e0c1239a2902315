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

//! Checks of the BGP sessions and of the routes announced to the route servers.

use std::{
    collections::{BTreeMap, BTreeSet},
    net::IpAddr,
};

use ipnet::IpNet;
use itertools::Itertools;

use super::{ActionResult, Candidate, Check, QuarantineContext};
use crate::model::IpVersion;

/// Routes as seen by one route server: (prefix, nexthop, AS path).
type RouteSet = BTreeSet<(IpNet, IpAddr, Vec<u32>)>;

pub(super) async fn verify_session(ctx: &QuarantineContext<'_>, candidate: &Candidate) -> ActionResult {
    let mut result = ActionResult::new(Check::BgpSession);
    let asn = candidate.asn;

    for (name, rs, ip) in ctx.route_servers(candidate) {
        let Some(device) = ctx.scenario.device(name) else {
            continue;
        };
        let vendor = rs.vendor.device();
        let cmd = vendor.command_neighbor_info(device, ip);
        let output = match ctx.runtime.exec(name, &cmd).await {
            Ok(output) if output.success() => output,
            Ok(output) => {
                log::debug!("[{name}] {cmd} exited with {}", output.exit_code);
                result.error(format!(
                    "Error in getting session information for IP {ip} from `{name}`."
                ));
                continue;
            }
            Err(e) => {
                log::debug!("[{name}] {cmd} failed: {e}");
                result.error(format!(
                    "Error in getting session information for IP {ip} from `{name}`."
                ));
                continue;
            }
        };

        let state = vendor.parse_bgp_neighbor_state(&output.stdout);
        let Some(remote_as) = state.remote_as else {
            result.error(format!(
                "Error in getting session information for IP {ip} from `{name}`."
            ));
            continue;
        };
        let Some(uptime) = state.uptime else {
            result.error(format!(
                "BGP Session to AS {asn} is not up for IP {ip} from `{name}`."
            ));
            continue;
        };
        if remote_as != asn {
            result.error(format!(
                "BGP Session established to AS {remote_as} instead of AS {asn} for IP {ip} from \
                 `{name}`."
            ));
            continue;
        }
        result.success(format!(
            "BGP Session correctly established with AS {asn} for IP {ip} from `{name}` (uptime: \
             {}s).",
            uptime.as_secs()
        ));
    }

    result
}

/// Whether the whole network lies in a private range (RFC 1918 for IPv4, unique local
/// addresses for IPv6).
pub(crate) fn is_private(net: &IpNet) -> bool {
    match net {
        IpNet::V4(net) => net.network().is_private() && net.broadcast().is_private(),
        IpNet::V6(net) => {
            let ula = |a: std::net::Ipv6Addr| (a.segments()[0] & 0xfe00) == 0xfc00;
            ula(net.network()) && ula(net.broadcast())
        }
    }
}

pub(super) async fn verify_rib(ctx: &QuarantineContext<'_>, candidate: &Candidate) -> ActionResult {
    let mut result = ActionResult::new(Check::BgpRib);
    let asn = candidate.asn;
    let mut rs_routes: BTreeMap<IpVersion, BTreeMap<&str, RouteSet>> = BTreeMap::new();

    for (name, rs, ip) in ctx.route_servers(candidate) {
        let Some(device) = ctx.scenario.device(name) else {
            continue;
        };
        let v = rs.version();
        let routes = rs_routes.entry(v).or_default().entry(name).or_default();
        let vendor = rs.vendor.device();
        let cmd = vendor.command_neighbor_rib(device, ip);
        let output = match ctx.runtime.exec(name, &cmd).await {
            Ok(output) if output.success() => output,
            _ => {
                result.error(format!(
                    "Error in getting the RIB of IP {ip} from `{name}`."
                ));
                continue;
            }
        };

        let rib = vendor.parse_bgp_neighbor_rib(&output.stdout);
        let num_prefixes = rib.len();
        if num_prefixes == 0 {
            result.error(format!("RIB is empty for IP {ip} from `{name}`."));
            continue;
        }

        match ctx.settings.quarantine.max_rib_prefixes.get(v) {
            Some(max) if num_prefixes > *max => result.error(format!(
                "# advertised prefixes ({num_prefixes}) is more than # maximum prefixes ({max}) \
                 for IP {ip} from `{name}`."
            )),
            Some(max) => result.success(format!(
                "{num_prefixes}/{max} prefixes announced for IP {ip} from `{name}`."
            )),
            None => result.success(format!(
                "{num_prefixes} prefixes announced for IP {ip} from `{name}`."
            )),
        }

        let mut default_route = false;
        let mut private_prefix = false;
        let mut wrong_next_hop = false;
        let mut wrong_as_path = false;
        for (prefix, next_hops) in rib.iter() {
            if prefix.prefix_len() == 0 {
                default_route = true;
                result.error(format!(
                    "IP {ip} announced default route from `{name}`."
                ));
                continue;
            }
            if is_private(prefix) {
                private_prefix = true;
                result.error(format!(
                    "Prefix {prefix} is in the private range for IP {ip} from `{name}`."
                ));
                continue;
            }
            for (next_hop, paths) in next_hops.iter() {
                if *next_hop != ip {
                    wrong_next_hop = true;
                    result.error(format!(
                        "Prefix {prefix} has {next_hop} as nexthop for IP {ip} from `{name}`."
                    ));
                    continue;
                }
                for path in paths {
                    if path.contains(&asn) && path.first() != Some(&asn) {
                        wrong_as_path = true;
                        result.error(format!(
                            "Prefix {prefix} has AS Path [{}] not starting with {asn} from \
                             `{name}`.",
                            path.iter().join(" ")
                        ));
                    }
                    routes.insert((*prefix, *next_hop, path.clone()));
                }
            }
        }

        if !default_route {
            result.success(format!(
                "All prefixes are different from the default route from `{name}`."
            ));
        }
        if !private_prefix {
            result.success(format!(
                "All prefixes are not in the private range from `{name}`."
            ));
        }
        if !wrong_next_hop {
            result.success(format!(
                "All prefixes have {ip} as nexthop from `{name}`."
            ));
        }
        if !wrong_as_path {
            result.success(format!(
                "All AS Paths start with {asn} from `{name}`."
            ));
        }
    }

    let mut consistent = true;
    for routes in rs_routes.values() {
        for ((rs1, routes1), (rs2, routes2)) in routes.iter().cartesian_product(routes.iter()) {
            if rs1 == rs2 {
                continue;
            }
            let diff = routes1.difference(routes2).collect_vec();
            if diff.is_empty() {
                continue;
            }
            consistent = false;
            let data = diff
                .iter()
                .map(|(prefix, nh, path)| format!("{prefix} via {nh}: [{}]", path.iter().join(" ")))
                .join("\n");
            result.add(
                super::Status::Error,
                format!("# announced prefixes on `{rs1}` differs from the ones on `{rs2}`."),
                Some(data),
            );
        }
    }
    if consistent {
        result.success("All RS receive the same announced prefixes.");
    }

    result
}
