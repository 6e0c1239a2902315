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

//! Reachability checks from the route servers towards the candidate.

use std::{collections::BTreeMap, net::Ipv4Addr, time::Duration};

use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;

use super::{ActionResult, Candidate, Check, QuarantineContext};
use crate::model::IpVersion;

const PING_COUNT: usize = 5;
const MAX_MTU: usize = 1500;
const ARPING_COUNT: usize = 5;

lazy_static! {
    static ref PING_LOSS: Regex = Regex::new(r"(\d+)% packet loss").unwrap();
}

/// Packet loss in percent reported by `ping`.
pub(crate) fn parse_packet_loss(output: &str) -> Option<u32> {
    PING_LOSS
        .captures(output)
        .and_then(|c| c[1].parse().ok())
}

/// Number of ICMP echo requests and replies in the output of `tcpdump`.
pub(crate) fn count_echo(output: &str) -> (usize, usize) {
    output.lines().fold((0, 0), |(req, rep), line| {
        (
            req + line.contains("echo request") as usize,
            rep + line.contains("echo reply") as usize,
        )
    })
}

/// ICMP payload that fills a frame of [`MAX_MTU`] bytes.
fn mtu_payload(v: IpVersion) -> usize {
    let ip_header = match v {
        IpVersion::V4 => 20,
        IpVersion::V6 => 40,
    };
    MAX_MTU - ip_header - 8
}

pub(super) async fn verify_ping(ctx: &QuarantineContext<'_>, candidate: &Candidate) -> ActionResult {
    let mut result = ActionResult::new(Check::Ping);

    for (name, _, ip) in ctx.route_servers(candidate) {
        let cmd = format!("ping -c {PING_COUNT} {ip}");
        // the first run resolves the neighbor
        if let Err(e) = ctx.runtime.exec(name, &cmd).await {
            log::debug!("[{name}] {cmd} failed: {e}");
        }
        let loss = match ctx.runtime.exec(name, &cmd).await {
            Ok(output) => parse_packet_loss(&output.stdout),
            Err(e) => {
                log::debug!("[{name}] {cmd} failed: {e}");
                None
            }
        };
        match loss {
            Some(0) => result.success(format!(
                "`{name}` achieved lossless connectivity to IP {ip}"
            )),
            Some(loss) => result.error(format!("`{name}` is facing loss of {loss}% to IP {ip}")),
            None => result.error(format!("Error in pinging IP {ip} from `{name}`.")),
        }
    }

    result
}

pub(super) async fn verify_ping_mtu(
    ctx: &QuarantineContext<'_>,
    candidate: &Candidate,
) -> ActionResult {
    let mut result = ActionResult::new(Check::PingMtu);

    for (name, rs, ip) in ctx.route_servers(candidate) {
        let failed = format!("Link from `{name}` to {ip} is not able to send {MAX_MTU} bytes packets.");
        let capture = format!(
            "timeout 20 tcpdump -tenni any '(icmp or icmp6) and host {ip}' -c {}",
            PING_COUNT * 2
        );
        let mut stream = match ctx.runtime.exec_stream(name, &capture).await {
            Ok(stream) => stream,
            Err(e) => {
                log::debug!("[{name}] {capture} failed: {e}");
                result.error(failed);
                continue;
            }
        };

        tokio::time::sleep(Duration::from_secs(1)).await;

        let ping = format!(
            "ping -c {PING_COUNT} -M do -s {} {ip}",
            mtu_payload(rs.version())
        );
        if let Err(e) = ctx.runtime.exec(name, &ping).await {
            log::debug!("[{name}] {ping} failed: {e}");
        }

        let mut captured = String::new();
        while let Some(line) = stream.recv().await {
            captured.push_str(&line);
            captured.push('\n');
        }

        let (requests, replies) = count_echo(&captured);
        if requests == PING_COUNT && replies == requests {
            result.success(format!(
                "Link from `{name}` to {ip} is able to send {MAX_MTU} bytes packets."
            ));
        } else {
            log::debug!("[{name}] {requests} requests, {replies} replies");
            result.error(failed);
        }
    }

    result
}

pub(super) async fn verify_proxy_arp(
    ctx: &QuarantineContext<'_>,
    candidate: &Candidate,
) -> ActionResult {
    let mut result = ActionResult::new(Check::ProxyArp);
    let mut replies: BTreeMap<&str, Vec<Ipv4Addr>> = BTreeMap::new();

    for (name, rs, _) in ctx.route_servers(candidate) {
        if rs.version() == IpVersion::V6 {
            log::warn!("[{name}] skipping proxy ARP check on an IPv6 route server");
            continue;
        }
        for ip in ctx.settings.quarantine.proxy_arp_ips.iter() {
            let cmd = format!(
                "arping -c {ARPING_COUNT} -t {} -i eth0 {ip}",
                candidate.mac
            );
            match ctx.runtime.exec(name, &cmd).await {
                Ok(output) if output.success() => replies.entry(name).or_default().push(*ip),
                Ok(_) => {}
                Err(e) => log::warn!("[{name}] {cmd} failed: {e}"),
            }
        }
    }

    for (name, ips) in replies.iter() {
        result.error(format!(
            "Candidate router replied to Proxy ARP from `{name}` for IPs {}",
            ips.iter().join(", ")
        ));
    }
    if replies.is_empty() {
        result.success("Candidate router does not have Proxy ARP enabled.");
    }

    result
}
