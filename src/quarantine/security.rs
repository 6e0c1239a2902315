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

//! Checks that the candidate exposes no services and sends no unauthorized traffic.

use std::{
    collections::{BTreeMap, BTreeSet},
    net::IpAddr,
};

use kathara_lab::{LabError, LineStream};
use lazy_static::lazy_static;
use maplit::btreeset;
use regex::Regex;

use super::{ActionResult, Candidate, Check, QuarantineContext, Status};
use crate::{
    model::{all_routers, IpVersion, MacAddr},
    scenario::{fabric_cd, wait_running},
};

/// Name of the probe device
pub const PROBE_DEVICE: &str = "ixp_probe";
/// Image of the probe device
pub const PROBE_IMAGE: &str = "ixp/probe";

lazy_static! {
    static ref BROADCAST: MacAddr = MacAddr::from_int(0xffff_ffff_ffff);
    static ref FRAME: Regex =
        Regex::new(r"^([0-9a-fA-F:]{17}) > ([0-9a-fA-F:]{17}), (.*)$").unwrap();
    static ref IP_PACKET: Regex =
        Regex::new(r"ethertype (IPv4|IPv6) \(0x[0-9a-fA-F]+\), length \d+: (\S+) > (\S+?): (.*)$")
            .unwrap();
}

/// Deploy the probe device on the fabric domain of a route server. A running probe is replaced.
async fn deploy_probe(
    ctx: &QuarantineContext<'_>,
    rs: &str,
    probe_ip: IpAddr,
    prefix_len: u8,
) -> Result<(), LabError> {
    log::info!("[{PROBE_DEVICE}] deploying on {} with address {probe_ip}", fabric_cd(rs));
    let mut scenario = ctx.scenario.clone();
    scenario.remove_device(PROBE_DEVICE);
    scenario.connect(PROBE_DEVICE, fabric_cd(rs), None);
    let device = scenario.new_device(PROBE_DEVICE);
    device.set_image(PROBE_IMAGE);
    device.meta_mut().ipv6 = IpVersion::of(&probe_ip) == IpVersion::V6;
    device.append_startup([format!("ip addr add {probe_ip}/{prefix_len} dev eth0")]);

    let probe = btreeset! {PROBE_DEVICE.to_string()};
    if ctx.runtime.running_devices().await?.contains(PROBE_DEVICE) {
        ctx.runtime.undeploy(&probe).await?;
    }
    ctx.runtime.deploy(&scenario, &probe).await?;
    wait_running(ctx.runtime, &probe).await
}

pub(super) async fn clean_services(ctx: &QuarantineContext<'_>) {
    let probe = btreeset! {PROBE_DEVICE.to_string()};
    log::info!("[{PROBE_DEVICE}] undeploying");
    if let Err(e) = ctx.runtime.undeploy(&probe).await {
        log::warn!("[{PROBE_DEVICE}] cannot undeploy: {e}");
    }
    if let Err(e) = ctx.runtime.save(ctx.scenario).await {
        log::warn!("[{PROBE_DEVICE}] cannot remove from the lab: {e}");
    }
}

/// Run a command on the probe. Returns the exit code, `STDOUT` and `STDERR`; a failure to
/// execute is reported as exit code `-1`.
async fn probe_exec(ctx: &QuarantineContext<'_>, cmd: &str) -> (i32, String, String) {
    match ctx.runtime.exec(PROBE_DEVICE, cmd).await {
        Ok(output) => (output.exit_code, output.stdout, output.stderr),
        Err(e) => (-1, String::new(), e.to_string()),
    }
}

pub(super) async fn verify_services(
    ctx: &QuarantineContext<'_>,
    candidate: &Candidate,
) -> ActionResult {
    let mut result = ActionResult::new(Check::Services);

    for (name, rs, ip) in ctx.route_servers(candidate) {
        let v = rs.version();
        let Some(probe_ip) = ctx.settings.quarantine.probe_ips.get(v) else {
            log::warn!("[{name}] no IPv{v} probe address given, skipping");
            continue;
        };
        let Some(prefix_len) = ctx.settings.peering_prefix_len(v) else {
            log::warn!("[{name}] no IPv{v} peering LAN given, skipping");
            continue;
        };
        if let Err(e) = deploy_probe(ctx, name, *probe_ip, prefix_len).await {
            result.add(
                Status::Error,
                "Error while deploying the probe device.",
                Some(e.to_string()),
            );
            continue;
        }

        let dns_name = &ctx.settings.quarantine.dns_name;
        log::info!("[{PROBE_DEVICE}] querying {dns_name} on {ip}");
        let (code, stdout, _) = probe_exec(ctx, &format!("dig @{ip} {dns_name}")).await;
        if code != 0 {
            result.success(format!("DNS not responding on IP {ip}."));
        } else {
            result.add(Status::Error, format!("DNS responding on IP {ip}."), Some(stdout));
        }

        log::info!("[{PROBE_DEVICE}] querying NTP on {ip}");
        let (_, stdout, stderr) = probe_exec(ctx, &format!("ntpq -c rv {ip}")).await;
        let stderr = stderr.to_lowercase();
        if stdout.trim().is_empty()
            && (stderr.contains("socket error") || stderr.contains("timed out"))
        {
            result.success(format!("NTP not responding on IP {ip}."));
        } else {
            result.add(Status::Error, format!("NTP responding on IP {ip}."), Some(stdout));
        }

        log::info!("[{PROBE_DEVICE}] querying SNMP on {ip}");
        let (code, stdout, _) = probe_exec(ctx, &format!("snmpwalk {ip}")).await;
        if code == 1 {
            result.success(format!("SNMP not responding on IP {ip}."));
        } else {
            result.add(Status::Error, format!("SNMP responding on IP {ip}."), Some(stdout));
        }
    }

    result
}

/// Split a `tcpdump` endpoint (`10.0.0.1.179`, `2001:db8::1.179` or a bare address) into the
/// address and the port.
fn parse_endpoint(s: &str) -> Option<(IpAddr, Option<u16>)> {
    if let Ok(ip) = s.parse() {
        return Some((ip, None));
    }
    let (ip, port) = s.rsplit_once('.')?;
    Some((ip.parse().ok()?, port.parse().ok()))
}

/// Decide whether a frame captured by `tcpdump -tenn` is unauthorized traffic of the
/// candidate with MAC `mac` and address `ip`.
///
/// STP frames are always unauthorized. Frames not involving the candidate and frames exchanged
/// with a whitelisted MAC address are allowed. ARP is allowed only as broadcast, and an IPv6
/// capture allows neighbor solicitations and advertisements. IP packets of the other address
/// family are allowed. Of the IP packets in the address family of `ip`, only BGP and ICMP echo
/// sent from `ip` are allowed.
pub fn is_unauthorized(
    line: &str,
    mac: &MacAddr,
    ip: IpAddr,
    whitelist: &BTreeSet<MacAddr>,
) -> bool {
    if line.contains("STP") {
        return true;
    }
    let Some(frame) = FRAME.captures(line) else {
        return false;
    };
    let (Ok(src), Ok(dst)) = (frame[1].parse::<MacAddr>(), frame[2].parse::<MacAddr>()) else {
        return false;
    };
    if &src != mac && &dst != mac {
        return false;
    }
    let other = if &dst == mac { &src } else { &dst };
    if whitelist.contains(other) {
        return false;
    }

    let rest = &frame[3];
    let capture = IpVersion::of(&ip);
    if rest.starts_with("ethertype ARP") {
        return dst != *BROADCAST;
    }
    if capture == IpVersion::V6
        && (rest.contains("neighbor solicitation") || rest.contains("neighbor advertisement"))
    {
        return false;
    }

    let Some(packet) = IP_PACKET.captures(rest) else {
        return false;
    };
    let version = if &packet[1] == "IPv4" {
        IpVersion::V4
    } else {
        IpVersion::V6
    };
    if version != capture {
        return false;
    }
    let (Some((src_ip, sport)), Some((_, dport))) =
        (parse_endpoint(&packet[2]), parse_endpoint(&packet[3]))
    else {
        return true;
    };
    let payload = &packet[4];
    if src_ip == ip {
        let bgp = payload.starts_with("Flags [") && (sport == Some(179) || dport == Some(179));
        let echo = payload.starts_with("ICMP")
            && (payload.contains("echo request") || payload.contains("echo reply"));
        if bgp || echo {
            return false;
        }
    }
    true
}

/// Exit code of `timeout` when it ended the command.
const TIMEOUT_EXPIRED: i32 = 124;

pub(super) async fn verify_traffic(
    ctx: &QuarantineContext<'_>,
    candidate: &Candidate,
) -> ActionResult {
    let mut result = ActionResult::new(Check::Traffic);

    let mut whitelist: BTreeSet<MacAddr> = all_routers(ctx.topology)
        .filter(|r| r.as_num() != candidate.asn)
        .flat_map(|r| r.all_peerings())
        .filter_map(|p| p.l2_address.clone())
        .collect();
    whitelist.remove(&candidate.mac);

    let secs = ctx.settings.quarantine.traffic_dump_mins * 60;
    let mut streams: BTreeMap<&str, (IpAddr, Option<MacAddr>, LineStream)> = BTreeMap::new();
    for (name, _, ip) in ctx.route_servers(candidate) {
        let own_mac = match ctx.runtime.exec(name, "cat /sys/class/net/eth0/address").await {
            Ok(output) => output.stdout.trim().parse().ok(),
            Err(_) => None,
        };
        let cmd = format!(
            "timeout {secs} tcpdump -l -tenn -i eth0 ether host {}",
            candidate.mac
        );
        log::info!("[{name}] capturing traffic of {} for {secs}s", candidate.mac);
        match ctx.runtime.exec_stream(name, &cmd).await {
            Ok(stream) => {
                streams.insert(name, (ip, own_mac, stream));
            }
            Err(e) => result.add(
                Status::Error,
                format!("Cannot capture traffic on `{name}`."),
                Some(e.to_string()),
            ),
        }
    }

    for (name, (ip, own_mac, mut stream)) in streams {
        let mut whitelist = whitelist.clone();
        whitelist.extend(own_mac);
        let mut unauthorized = Vec::new();
        while let Some(line) = stream.recv().await {
            if is_unauthorized(&line, &candidate.mac, ip, &whitelist) {
                unauthorized.push(line);
            }
        }
        let exit_code = stream.exit_code().await;
        if exit_code != 0 && exit_code != TIMEOUT_EXPIRED {
            log::warn!("[{name}] traffic capture exited with code {exit_code}");
            result.add(
                Status::Error,
                format!("Cannot capture traffic on `{name}`."),
                Some(format!("exit code {exit_code}")),
            );
        } else if unauthorized.is_empty() {
            result.success(format!("No unauthorized traffic on `{name}`."));
        } else {
            result.add(
                Status::Error,
                format!("Unauthorized traffic on `{name}`."),
                Some(unauthorized.join("\n")),
            );
        }
    }

    result
}

pub(super) async fn clean_traffic(ctx: &QuarantineContext<'_>) {
    for name in ctx.settings.route_servers.keys() {
        if !ctx.scenario.has_device(name) {
            continue;
        }
        match ctx.runtime.exec(name, "pkill -f tcpdump").await {
            Ok(output) => log::info!("[{name}] stopped traffic capture ({})", output.exit_code),
            Err(e) => log::warn!("[{name}] cannot stop traffic capture: {e}"),
        }
    }
}
