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


use std::collections::BTreeSet;

use maplit::btreeset;
use pretty_assertions::assert_eq;

use super::{full_scenario, settings, topology, MockRuntime};
use crate::{
    model::MacAddr,
    quarantine::{
        is_unauthorized, ActionManager, ActionResult, Candidate, Check, QuarantineContext,
        QuarantineError, ResultEntry, Status, PROBE_DEVICE,
    },
    Settings, Topology,
};

fn candidate() -> Candidate {
    Candidate::new(
        Some(65001),
        Some("aa:bb:cc:00:00:01"),
        Some("192.0.2.1".parse().unwrap()),
        Some("2001:db8::1".parse().unwrap()),
    )
    .unwrap()
}

/// Reasons of all findings with the given status.
fn reasons(result: &ActionResult, status: Status) -> Vec<&str> {
    result
        .entries
        .iter()
        .filter(|e| e.status == status)
        .map(|e| e.reason.as_str())
        .collect()
}

/// Run a check against a running copy of the full scenario, with the runtime scripted by
/// `script`.
async fn run_check(
    check: Check,
    s: &Settings,
    topo: &Topology,
    script: impl FnOnce(&MockRuntime),
) -> (ActionResult, MockRuntime) {
    let scenario = full_scenario(&settings(), topo);
    let rt = MockRuntime::with_live(scenario.clone());
    script(&rt);
    let ctx = QuarantineContext {
        runtime: &rt,
        scenario: &scenario,
        topology: topo,
        settings: s,
    };
    let result = check.verify(&ctx, &candidate()).await;
    (result, rt)
}

fn bird_route(prefix: &str, next_hop: &str, path: &str) -> String {
    format!(
        "{prefix:<20} unicast [AS65001_1 2023-05-02 09:30:05] * (100) [AS65001i]\n\
         \tvia {next_hop} on eth0\n\
         \tType: BGP univ\n\
         \tBGP.origin: IGP\n\
         \tBGP.as_path: {path}\n\
         \tBGP.next_hop: {next_hop}\n\
         \tBGP.local_pref: 100\n"
    )
}

fn openbgpd_route(prefix: &str, next_hop: &str, path: &str) -> String {
    format!(
        "BGP routing table entry for {prefix}\n    {path}\n    Nexthop {next_hop} (via \
         {next_hop}) Neighbor {next_hop} ({next_hop})\n    Origin IGP, metric 0, localpref 100, \
         weight 0, ovs not-found, external, valid, best\n\n"
    )
}

#[test]
fn status_levels() {
    assert_eq!(Status::from(0), Status::Error);
    assert_eq!(Status::from(1), Status::Success);
    assert_eq!(Status::from(2), Status::Warning);
    assert_eq!(Status::from(7), Status::Warning);
    assert!(Status::Error < Status::Success);
    assert!(Status::Success < Status::Warning);
}

#[test]
fn result_rendering() {
    let mut result = ActionResult::new(Check::BgpSession);
    assert!(result.passed());
    assert_eq!(result.render(Status::Warning), "");

    result.success("up");
    result.add(Status::Warning, "skipped", None);
    assert!(result.passed());

    result.add(Status::Error, "down", Some(String::from("Idle")));
    assert!(!result.passed());
    assert_eq!(
        result.render(Status::Error),
        "[BGP Session] down\nDetails:\nIdle\n"
    );

    let mut later = ActionResult::new(Check::Traffic);
    later.add(Status::Error, "down", None);
    later.success("up");
    later.add(Status::Warning, "skipped", None);
    assert!(!later.passed());
    assert_eq!(
        result.render(Status::Success),
        "[BGP Session] up\n[BGP Session] down\nDetails:\nIdle\n"
    );
    assert_eq!(
        result.render(Status::Warning),
        "[BGP Session] up\n[BGP Session] skipped\n[BGP Session] down\nDetails:\nIdle\n"
    );
}

#[test]
fn check_names() {
    assert_eq!("bgp.bgp_session".parse::<Check>().unwrap(), Check::BgpSession);
    assert_eq!(
        "bgp.CheckBgpSessionAction".parse::<Check>().unwrap(),
        Check::BgpSession
    );
    assert_eq!(
        "connectivity.PingMtu".parse::<Check>().unwrap(),
        Check::PingMtu
    );
    assert_eq!(
        "security.CheckTrafficAction".parse::<Check>().unwrap(),
        Check::Traffic
    );
    assert_eq!("proxy_arp".parse::<Check>().unwrap(), Check::ProxyArp);
    assert!(matches!(
        "foo.bar".parse::<Check>(),
        Err(QuarantineError::UnknownCheck(s)) if s == "foo.bar"
    ));
    assert!("security.ping".parse::<Check>().is_err());

    for check in Check::ALL {
        assert_eq!(check.to_string().parse::<Check>().unwrap(), check);
        assert_eq!(check.to_string(), check.key());
    }
}

#[test]
fn action_manager() {
    let s = settings();
    let all = ActionManager::new(&s, &[]).unwrap();
    assert_eq!(
        all.checks(),
        &[
            Check::BgpSession,
            Check::BgpRib,
            Check::Ping,
            Check::ProxyArp,
            Check::Services,
            Check::Traffic,
        ]
    );

    let exclude = vec![String::from("ping"), String::from("security.traffic")];
    let some = ActionManager::new(&s, &exclude).unwrap();
    assert_eq!(
        some.checks(),
        &[
            Check::BgpSession,
            Check::BgpRib,
            Check::ProxyArp,
            Check::Services
        ]
    );

    let mut s = settings();
    s.quarantine.actions.push(String::from("connectivity.traceroute"));
    assert!(matches!(
        ActionManager::new(&s, &[]),
        Err(QuarantineError::UnknownCheck(_))
    ));
}

#[tokio::test]
async fn run_disabled_check() {
    let (s, topo) = (settings(), topology());
    let scenario = full_scenario(&s, &topo);
    let rt = MockRuntime::with_live(scenario.clone());
    let ctx = QuarantineContext {
        runtime: &rt,
        scenario: &scenario,
        topology: &topo,
        settings: &s,
    };
    let manager = ActionManager::new(&s, &[String::from("ping")]).unwrap();
    assert!(matches!(
        manager
            .run_action_by_name(&ctx, "connectivity.ping", &candidate())
            .await,
        Err(QuarantineError::UnknownCheck(_))
    ));
    assert!(manager
        .clean_action_by_name(&ctx, "connectivity.ping_mtu")
        .await
        .is_err());
    assert!(rt.calls().is_empty());
}

#[test]
fn candidate_fields() {
    let ip = Some("192.0.2.1".parse().unwrap());
    assert!(matches!(
        Candidate::new(None, Some("aa:bb:cc:00:00:01"), ip, None),
        Err(QuarantineError::MissingCandidateField("ASN"))
    ));
    assert!(matches!(
        Candidate::new(Some(65001), None, ip, None),
        Err(QuarantineError::MissingCandidateField("MAC address"))
    ));
    assert!(matches!(
        Candidate::new(Some(65001), Some("aa:bb:cc:00:00:01"), None, None),
        Err(QuarantineError::MissingCandidateField(_))
    ));
    assert!(matches!(
        Candidate::new(Some(65001), Some("aa:bb:cc"), ip, None),
        Err(QuarantineError::Model(_))
    ));

    let c = Candidate::new(Some(65001), Some("AA-BB-CC-00-00-01"), ip, None).unwrap();
    assert_eq!(c.mac.as_str(), "aa:bb:cc:00:00:01");
    assert_eq!(c.ip(crate::model::IpVersion::V4), Some("192.0.2.1".parse().unwrap()));
    assert_eq!(c.ip(crate::model::IpVersion::V6), None);
}

#[test]
fn unauthorized_traffic() {
    let mac: MacAddr = "aa:bb:cc:00:00:01".parse().unwrap();
    let ip = "192.0.2.1".parse().unwrap();
    let whitelist: BTreeSet<MacAddr> = btreeset! {"00:00:00:00:00:01".parse().unwrap()};
    let check = |line: &str| is_unauthorized(line, &mac, ip, &whitelist);

    // spanning tree is never allowed
    assert!(check(
        "aa:bb:cc:00:00:01 > 01:80:c2:00:00:00, 802.3, length 38: LLC, dsap STP (0x42) \
         Individual, ssap STP (0x42) Command, STP 802.1d, Config, Flags [none]"
    ));
    // other hosts
    assert!(!check(
        "02:00:00:00:00:02 > 02:00:00:00:00:03, ethertype IPv4 (0x0800), length 98: 192.0.2.7 \
         > 192.0.2.8: ICMP 192.0.2.7 udp port 53 unreachable, length 36"
    ));
    // other members
    assert!(!check(
        "aa:bb:cc:00:00:01 > 00:00:00:00:00:01, ethertype IPv4 (0x0800), length 90: \
         192.0.2.1.123 > 192.0.2.2.123: NTPv4, Client, length 48"
    ));
    assert!(!check(
        "aa:bb:cc:00:00:01 > ff:ff:ff:ff:ff:ff, ethertype ARP (0x0806), length 42: Request \
         who-has 192.0.2.254 tell 192.0.2.1, length 28"
    ));
    assert!(!check(
        "aa:bb:cc:00:00:01 > 33:33:ff:00:00:fe, ethertype IPv6 (0x86dd), length 86: 2001:db8::1 \
         > ff02::1:ff00:fe: ICMP6, neighbor solicitation, who has 2001:db8::fe, length 32"
    ));
    assert!(!check(
        "aa:bb:cc:00:00:01 > 02:00:00:00:00:fe, ethertype IPv4 (0x0800), length 74: \
         192.0.2.1.40000 > 192.0.2.254.179: Flags [S], seq 1, win 64240, length 0"
    ));
    assert!(!check(
        "aa:bb:cc:00:00:01 > 02:00:00:00:00:fe, ethertype IPv4 (0x0800), length 98: 192.0.2.1 \
         > 192.0.2.254: ICMP echo reply, id 1, seq 1, length 64"
    ));
    // BGP from a foreign address
    assert!(check(
        "aa:bb:cc:00:00:01 > 02:00:00:00:00:fe, ethertype IPv4 (0x0800), length 74: \
         192.0.2.7.40000 > 192.0.2.254.179: Flags [S], seq 1, win 64240, length 0"
    ));
    assert!(check(
        "aa:bb:cc:00:00:01 > 02:00:00:00:00:fe, ethertype IPv4 (0x0800), length 70: 192.0.2.1 \
         > 192.0.2.254: ICMP 192.0.2.1 udp port 53 unreachable, length 36"
    ));
    assert!(check(
        "aa:bb:cc:00:00:01 > 02:00:00:00:00:fe, ethertype IPv4 (0x0800), length 90: \
         192.0.2.1.123 > 192.0.2.254.123: NTPv4, Client, length 48"
    ));
    // the other address family is checked on the other route server
    assert!(!check(
        "aa:bb:cc:00:00:01 > 02:00:00:00:00:fe, ethertype IPv6 (0x86dd), length 90: \
         2001:db8::1.53 > 2001:db8::fe.40000: 1 NXDomain 0/0/0 (28)"
    ));
    // unicast ARP towards a host outside the fabric
    let arp_reply = "aa:bb:cc:00:00:01 > 02:00:00:00:00:99, ethertype ARP (0x0806), length 42: \
                     Reply 192.0.2.1 is-at aa:bb:cc:00:00:01, length 28";
    assert!(check(arp_reply));
    assert!(check(
        "02:00:00:00:00:99 > aa:bb:cc:00:00:01, ethertype ARP (0x0806), length 42: Request \
         who-has 192.0.2.1 tell 192.0.2.99, length 28"
    ));

    let ip = "2001:db8::1".parse().unwrap();
    let check = |line: &str| is_unauthorized(line, &mac, ip, &whitelist);
    assert!(check(arp_reply));
    assert!(!check(
        "aa:bb:cc:00:00:01 > ff:ff:ff:ff:ff:ff, ethertype ARP (0x0806), length 42: Request \
         who-has 192.0.2.254 tell 192.0.2.1, length 28"
    ));
    assert!(!check(
        "aa:bb:cc:00:00:01 > 33:33:ff:00:00:fe, ethertype IPv6 (0x86dd), length 86: 2001:db8::1 \
         > ff02::1:ff00:fe: ICMP6, neighbor solicitation, who has 2001:db8::fe, length 32"
    ));
    assert!(!check(
        "aa:bb:cc:00:00:01 > 02:00:00:00:00:fe, ethertype IPv6 (0x86dd), length 86: 2001:db8::1 \
         > 2001:db8::fe: ICMP6, neighbor advertisement, tgt is 2001:db8::1, length 32"
    ));
    assert!(check(
        "aa:bb:cc:00:00:01 > 02:00:00:00:00:fe, ethertype IPv6 (0x86dd), length 90: \
         2001:db8::1.123 > 2001:db8::fe.123: NTPv4, Client, length 48"
    ));
}

#[tokio::test]
async fn bgp_session() {
    let (s, topo) = (settings(), topology());
    let (result, rt) = run_check(Check::BgpSession, &s, &topo, |rt| {
        rt.on_exec(
            "rs1_v4",
            "show protocols all $name",
            0,
            "AS65001_1  BGP  ---  up  2023-05-02 09:30:00  Established\n  Neighbor AS: 65001\n",
            "",
        )
        .on_exec(
            "rs2_v6",
            "bgpctl show neighbor 2001:db8::1",
            0,
            "BGP neighbor is 2001:db8::1, remote AS 65002\n  BGP state = Established, up for \
             01:02:03\n",
            "",
        );
    })
    .await;

    assert_eq!(result.entries.len(), 2);
    assert_eq!(result.entries[0].status, Status::Success);
    assert!(result.entries[0]
        .reason
        .starts_with("BGP Session correctly established with AS 65001 for IP 192.0.2.1 from `rs1_v4`"));
    assert_eq!(
        reasons(&result, Status::Error),
        vec!["BGP Session established to AS 65002 instead of AS 65001 for IP 2001:db8::1 from `rs2_v6`."]
    );
    assert_eq!(
        rt.execs("rs2_v6"),
        vec!["/usr/sbin/bgpctl show neighbor 2001:db8::1"]
    );
}

#[tokio::test]
async fn bgp_session_down() {
    let (s, topo) = (settings(), topology());
    let (result, _) = run_check(Check::BgpSession, &s, &topo, |rt| {
        rt.on_exec(
            "rs1_v4",
            "show protocols all $name",
            0,
            "AS65001_1  BGP  ---  start  2023-05-02 09:30:00  Active\n  Neighbor AS: 65001\n",
            "",
        )
        .on_exec("rs2_v6", "bgpctl", 1, "", "bgpctl: connect: No such file");
    })
    .await;

    assert!(!result.passed());
    assert_eq!(
        reasons(&result, Status::Error),
        vec![
            "BGP Session to AS 65001 is not up for IP 192.0.2.1 from `rs1_v4`.",
            "Error in getting session information for IP 2001:db8::1 from `rs2_v6`.",
        ]
    );
}

#[tokio::test]
async fn bgp_rib() {
    let (s, topo) = (settings(), topology());
    let rs1 = [
        bird_route("198.51.100.0/24", "192.0.2.1", "65001"),
        bird_route("10.1.0.0/16", "192.0.2.1", "65001"),
        bird_route("203.0.113.0/24", "192.0.2.9", "65001"),
    ]
    .concat();
    let rs2 = openbgpd_route("2001:db8:1::/48", "2001:db8::1", "65010 65001");
    let (result, _) = run_check(Check::BgpRib, &s, &topo, |rt| {
        rt.on_exec("rs1_v4", "show route protocol $name all", 0, &rs1, "")
            .on_exec("rs2_v6", "bgpctl show rib in detail neighbor 2001:db8::1", 0, &rs2, "");
    })
    .await;

    assert_eq!(
        reasons(&result, Status::Error),
        vec![
            "# advertised prefixes (3) is more than # maximum prefixes (2) for IP 192.0.2.1 from \
             `rs1_v4`.",
            "Prefix 10.1.0.0/16 is in the private range for IP 192.0.2.1 from `rs1_v4`.",
            "Prefix 203.0.113.0/24 has 192.0.2.9 as nexthop for IP 192.0.2.1 from `rs1_v4`.",
            "Prefix 2001:db8:1::/48 has AS Path [65010 65001] not starting with 65001 from \
             `rs2_v6`.",
        ]
    );
    let successes = reasons(&result, Status::Success);
    assert!(successes.contains(&"1/10 prefixes announced for IP 2001:db8::1 from `rs2_v6`."));
    assert!(successes.contains(&"All prefixes are different from the default route from `rs1_v4`."));
    assert!(successes.contains(&"All RS receive the same announced prefixes."));
}

#[tokio::test]
async fn bgp_rib_empty() {
    let (s, topo) = (settings(), topology());
    let (result, _) = run_check(Check::BgpRib, &s, &topo, |rt| {
        rt.on_exec("rs2_v6", "bgpctl", 1, "", "");
    })
    .await;

    assert_eq!(
        reasons(&result, Status::Error),
        vec![
            "RIB is empty for IP 192.0.2.1 from `rs1_v4`.",
            "Error in getting the RIB of IP 2001:db8::1 from `rs2_v6`.",
        ]
    );
}

#[tokio::test]
async fn bgp_rib_consistency() {
    let topo = topology();
    let mut s = settings();
    let rs2 = s.route_servers.get_mut("rs2_v6").unwrap();
    rs2.address = "192.0.2.253".parse().unwrap();

    let rs1_rib = bird_route("198.51.100.0/24", "192.0.2.1", "65001");
    let rs2_rib = [
        openbgpd_route("198.51.100.0/24", "192.0.2.1", "65001"),
        openbgpd_route("203.0.113.0/24", "192.0.2.1", "65001"),
    ]
    .concat();
    let (result, _) = run_check(Check::BgpRib, &s, &topo, |rt| {
        rt.on_exec("rs1_v4", "show route protocol $name all", 0, &rs1_rib, "")
            .on_exec("rs2_v6", "show rib in detail neighbor 192.0.2.1", 0, &rs2_rib, "");
    })
    .await;

    let errors = result
        .entries
        .iter()
        .filter(|e| e.status == Status::Error)
        .collect::<Vec<_>>();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].reason,
        "# announced prefixes on `rs2_v6` differs from the ones on `rs1_v4`."
    );
    assert_eq!(
        errors[0].data.as_deref(),
        Some("203.0.113.0/24 via 192.0.2.1: [65001]")
    );
}

#[tokio::test]
async fn ping() {
    let (s, topo) = (settings(), topology());
    let (result, rt) = run_check(Check::Ping, &s, &topo, |rt| {
        rt.on_exec(
            "rs1_v4",
            "ping",
            0,
            "5 packets transmitted, 5 received, 0% packet loss, time 4005ms",
            "",
        )
        .on_exec(
            "rs2_v6",
            "ping",
            1,
            "5 packets transmitted, 3 received, 40% packet loss, time 4005ms",
            "",
        );
    })
    .await;

    assert_eq!(
        reasons(&result, Status::Success),
        vec!["`rs1_v4` achieved lossless connectivity to IP 192.0.2.1"]
    );
    assert_eq!(
        reasons(&result, Status::Error),
        vec!["`rs2_v6` is facing loss of 40% to IP 2001:db8::1"]
    );
    assert_eq!(
        rt.execs("rs1_v4"),
        vec!["ping -c 5 192.0.2.1", "ping -c 5 192.0.2.1"]
    );
}

#[tokio::test(start_paused = true)]
async fn ping_mtu() {
    let (s, topo) = (settings(), topology());
    let requests = (0..5).map(|i| {
        format!("eth0  In  IP 192.0.2.254 > 192.0.2.1: ICMP echo request, id 1, seq {i}, length 1480")
    });
    let replies = (0..5).map(|i| {
        format!("eth0  Out IP 192.0.2.1 > 192.0.2.254: ICMP echo reply, id 1, seq {i}, length 1480")
    });
    let v4 = requests.chain(replies).collect::<Vec<_>>();
    let v4 = v4.iter().map(String::as_str).collect::<Vec<_>>();
    let v6 = [
        "eth0  Out IP6 2001:db8::fe > 2001:db8::1: ICMP6, echo request, id 1, seq 1, length 1460",
        "eth0  In  IP6 2001:db8::1 > 2001:db8::fe: ICMP6, packet too big, mtu 1400, length 1240",
    ];
    let (result, rt) = run_check(Check::PingMtu, &s, &topo, |rt| {
        rt.on_stream("rs1_v4", "tcpdump", &v4, 0)
            .on_stream("rs2_v6", "tcpdump", &v6, 0);
    })
    .await;

    assert_eq!(
        reasons(&result, Status::Success),
        vec!["Link from `rs1_v4` to 192.0.2.1 is able to send 1500 bytes packets."]
    );
    assert_eq!(
        reasons(&result, Status::Error),
        vec!["Link from `rs2_v6` to 2001:db8::1 is not able to send 1500 bytes packets."]
    );
    assert_eq!(rt.execs("rs1_v4"), vec!["ping -c 5 -M do -s 1472 192.0.2.1"]);
    assert_eq!(rt.execs("rs2_v6"), vec!["ping -c 5 -M do -s 1452 2001:db8::1"]);
}

#[tokio::test]
async fn proxy_arp() {
    let (s, topo) = (settings(), topology());
    let (result, rt) = run_check(Check::ProxyArp, &s, &topo, |rt| {
        rt.on_exec("rs1_v4", "arping", 0, "Received 5 response(s)", "");
    })
    .await;
    assert_eq!(
        reasons(&result, Status::Error),
        vec!["Candidate router replied to Proxy ARP from `rs1_v4` for IPs 192.0.2.254"]
    );
    assert_eq!(
        rt.execs("rs1_v4"),
        vec!["arping -c 5 -t aa:bb:cc:00:00:01 -i eth0 192.0.2.254"]
    );
    assert!(rt.execs("rs2_v6").is_empty());

    let (result, _) = run_check(Check::ProxyArp, &s, &topo, |rt| {
        rt.on_exec("rs1_v4", "arping", 1, "Received 0 response(s)", "");
    })
    .await;
    assert!(result.passed());
    assert_eq!(
        reasons(&result, Status::Success),
        vec!["Candidate router does not have Proxy ARP enabled."]
    );
}

#[tokio::test(start_paused = true)]
async fn services() {
    let (s, topo) = (settings(), topology());
    let scenario = full_scenario(&s, &topo);
    let rt = MockRuntime::with_live(scenario.clone());
    rt.on_exec(PROBE_DEVICE, "dig", 9, ";; connection timed out", "")
        .on_exec(PROBE_DEVICE, "ntpq", 1, "", "192.0.2.1: timed out, nothing received")
        .on_exec(PROBE_DEVICE, "snmpwalk", 0, "SNMPv2-MIB::sysDescr.0 = STRING: frr", "");
    let ctx = QuarantineContext {
        runtime: &rt,
        scenario: &scenario,
        topology: &topo,
        settings: &s,
    };
    let manager = ActionManager::new(&s, &[]).unwrap();
    let result = manager
        .run_action_by_name(&ctx, "security.services", &candidate())
        .await
        .unwrap();

    assert_eq!(
        reasons(&result, Status::Success),
        vec![
            "DNS not responding on IP 192.0.2.1.",
            "NTP not responding on IP 192.0.2.1.",
        ]
    );
    assert_eq!(
        reasons(&result, Status::Error),
        vec!["SNMP responding on IP 192.0.2.1."]
    );
    assert_eq!(
        result.entries[2].data.as_deref(),
        Some("SNMPv2-MIB::sysDescr.0 = STRING: frr")
    );
    assert_eq!(
        rt.execs(PROBE_DEVICE),
        vec![
            "dig @192.0.2.1 example.com",
            "ntpq -c rv 192.0.2.1",
            "snmpwalk 192.0.2.1",
        ]
    );

    // the probe is only deployed for the IPv4 route server and removed afterwards
    let calls = rt.calls();
    assert_eq!(
        calls
            .iter()
            .filter(|c| c.as_str() == "deploy ixp_probe")
            .count(),
        1
    );
    assert_eq!(
        &calls[calls.len() - 2..],
        &[
            String::from("undeploy ixp_probe"),
            format!("save {}", scenario.len())
        ]
    );
    assert!(!rt.running().contains(PROBE_DEVICE));
}

#[tokio::test]
async fn traffic() {
    let (s, topo) = (settings(), topology());
    let (result, rt) = run_check(Check::Traffic, &s, &topo, |rt| {
        rt.on_exec("*", "cat /sys/class/net/eth0/address", 0, "02:00:00:00:00:fe\n", "")
            .on_stream(
                "rs1_v4",
                "tcpdump",
                &[
                    "aa:bb:cc:00:00:01 > 02:00:00:00:00:fe, ethertype IPv4 (0x0800), length 90: \
                     192.0.2.1.123 > 192.0.2.254.123: NTPv4, Client, length 48",
                    "aa:bb:cc:00:00:01 > 00:00:00:00:00:01, ethertype IPv4 (0x0800), length 90: \
                     192.0.2.1.123 > 192.0.2.2.123: NTPv4, Client, length 48",
                    "aa:bb:cc:00:00:01 > 02:00:00:00:00:99, ethertype IPv4 (0x0800), length 342: \
                     192.0.2.1.68 > 255.255.255.255.67: BOOTP/DHCP, Request",
                ],
                124,
            );
    })
    .await;

    assert_eq!(
        reasons(&result, Status::Success),
        vec!["No unauthorized traffic on `rs2_v6`."]
    );
    assert_eq!(
        reasons(&result, Status::Error),
        vec!["Unauthorized traffic on `rs1_v4`."]
    );
    assert_eq!(
        result.entries[0].data.as_deref(),
        Some(
            "aa:bb:cc:00:00:01 > 02:00:00:00:00:99, ethertype IPv4 (0x0800), length 342: \
             192.0.2.1.68 > 255.255.255.255.67: BOOTP/DHCP, Request"
        )
    );
    assert!(rt.calls().contains(&String::from(
        "stream rs1_v4: timeout 60 tcpdump -l -tenn -i eth0 ether host aa:bb:cc:00:00:01"
    )));

    let scenario = full_scenario(&s, &topo);
    let ctx = QuarantineContext {
        runtime: &rt,
        scenario: &scenario,
        topology: &topo,
        settings: &s,
    };
    Check::Traffic.clean(&ctx).await;
    assert_eq!(rt.execs("rs2_v6").last().unwrap(), "pkill -f tcpdump");
}

#[tokio::test]
async fn traffic_capture_fails() {
    let (s, topo) = (settings(), topology());
    let (result, _) = run_check(Check::Traffic, &s, &topo, |rt| {
        rt.on_stream("rs1_v4", "tcpdump", &[], 1)
            .on_stream("rs2_v6", "tcpdump", &[], 124);
    })
    .await;

    assert_eq!(
        result.entries,
        vec![
            ResultEntry {
                status: Status::Error,
                reason: String::from("Cannot capture traffic on `rs1_v4`."),
                data: Some(String::from("exit code 1")),
            },
            ResultEntry {
                status: Status::Success,
                reason: String::from("No unauthorized traffic on `rs2_v6`."),
                data: None,
            },
        ]
    );
    assert!(!result.passed());
}
