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

//! FRR configuration of the participant routers.
//!
//! Every participant router peers with all route servers and announces the routes of its table
//! dump. Routes with an AS path longer than one hop were learned by the participant from further
//! away. To reproduce the AS path at the route server, each such route gets its own route-map
//! entry that prepends the remaining hops on export. A final catch-all entry permits all other
//! routes. Route-map entries are evaluated in ascending order, so the catch-all is always last.
//!
//! All builders are used the same way: create the builder, set its options (each setter returns
//! `&mut Self`), and call `build`.

use std::{
    collections::{BTreeMap, BTreeSet},
    net::IpAddr,
};

use ipnet::IpNet;
use itertools::Itertools;
use kathara_lab::{Device, Scenario};

use crate::{
    config::Settings,
    model::{all_routers, IpVersion, Router, Topology},
    vendor::{never_errors, ConfigPush},
};

/// Image of participant routers
pub const FRR_IMAGE: &str = "kathara/frr";
/// Path of the BGP daemon configuration
pub const BGPD_CONF: &str = "/etc/frr/bgpd.conf";
const ZEBRA_CONF: &str = "/etc/frr/zebra.conf";
const DAEMONS: &str = "/etc/frr/daemons";
const ZEBRA_CONFIG: &str = "hostname frr\npassword frr\nenable password frr\n";
/// Route-map preferring the global IPv6 next-hop on import.
pub const PREFER_IPV6_GLOBAL: &str = "PREFER_IPV6_GLOBAL";
/// Maximum number of prefixes accepted from a route server.
const MAXIMUM_PREFIX: u32 = 65536;
/// Connect retry timer towards the route servers, in seconds.
const CONNECT_TIMER: u16 = 10;

fn ip_keyword(v: IpVersion) -> &'static str {
    match v {
        IpVersion::V4 => "ip",
        IpVersion::V6 => "ipv6",
    }
}

/// Name of the export route-map of an address family.
pub fn as_path_route_map(v: IpVersion) -> String {
    format!("SET_AS_PATH_V{v}")
}

/// Prefix-list permitting a set of networks.
///
/// ```
/// # use ixp_twin::frr::PrefixList;
/// let net: ipnet::IpNet = "2001:db8::/32".parse().unwrap();
/// assert_eq!(
///     PrefixList::new("FILTER").prefix(net).build(),
///     "ipv6 prefix-list FILTER permit 2001:db8::/32\n"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixList {
    name: String,
    prefixes: Vec<IpNet>,
}

impl PrefixList {
    /// Create an empty prefix-list
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefixes: Vec::new(),
        }
    }

    /// Name of the prefix-list
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Permit a network
    pub fn prefix(&mut self, net: IpNet) -> &mut Self {
        self.prefixes.push(net);
        self
    }

    /// Address family, taken from the first prefix.
    fn version(&self) -> IpVersion {
        self.prefixes
            .first()
            .map(IpVersion::of_net)
            .unwrap_or(IpVersion::V4)
    }

    /// Generate the configuration
    pub fn build(&self) -> String {
        self.prefixes
            .iter()
            .map(|net| {
                format!(
                    "{} prefix-list {} permit {net}\n",
                    ip_keyword(IpVersion::of_net(net)),
                    self.name
                )
            })
            .collect()
    }
}

impl From<&mut PrefixList> for PrefixList {
    fn from(value: &mut PrefixList) -> Self {
        value.clone()
    }
}

/// A single entry of a route-map.
///
/// ```
/// # use ixp_twin::frr::{PrefixList, RouteMapItem};
/// let net: ipnet::IpNet = "192.0.2.0/24".parse().unwrap();
/// assert_eq!(
///     RouteMapItem::new("SET_AS_PATH_V4", 10, true)
///         .match_prefix_list(PrefixList::new("FILTER_AS_PATH_V4_1").prefix(net))
///         .prepend_as_path([65002, 65003])
///         .build(),
///     "\
/// ip prefix-list FILTER_AS_PATH_V4_1 permit 192.0.2.0/24
/// route-map SET_AS_PATH_V4 permit 10
///   match ip address prefix-list FILTER_AS_PATH_V4_1
///   set as-path prepend 65002 65003
/// exit
/// "
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMapItem {
    name: String,
    order: u32,
    mode: &'static str,
    match_prefix_list: Option<PrefixList>,
    prepend_as_path: Vec<u32>,
    prefer_global_next_hop: bool,
}

impl RouteMapItem {
    /// Create a new route-map entry in the `permit` or `deny` mode.
    pub fn new(name: impl Into<String>, order: u32, permit: bool) -> Self {
        Self {
            name: name.into(),
            order,
            mode: if permit { "permit" } else { "deny" },
            match_prefix_list: None,
            prepend_as_path: Vec::new(),
            prefer_global_next_hop: false,
        }
    }

    /// Sequence number of the entry
    pub fn order(&self) -> u32 {
        self.order
    }

    /// Create a prefix-list and match on it.
    pub fn match_prefix_list(&mut self, prefix_list: impl Into<PrefixList>) -> &mut Self {
        self.match_prefix_list = Some(prefix_list.into());
        self
    }

    /// Prepend the AS path.
    pub fn prepend_as_path(&mut self, path: impl IntoIterator<Item = u32>) -> &mut Self {
        self.prepend_as_path = path.into_iter().collect();
        self
    }

    /// Prefer the global IPv6 next-hop over the link-local one.
    pub fn prefer_global_next_hop(&mut self) -> &mut Self {
        self.prefer_global_next_hop = true;
        self
    }

    /// Generate the configuration, including the prefix-list the entry matches on.
    pub fn build(&self) -> String {
        let mut s = String::new();
        if let Some(pl) = self.match_prefix_list.as_ref() {
            s.push_str(&pl.build());
        }
        s.push_str(&format!("route-map {} {} {}\n", self.name, self.mode, self.order));
        if let Some(pl) = self.match_prefix_list.as_ref() {
            s.push_str(&format!(
                "  match {} address prefix-list {}\n",
                ip_keyword(pl.version()),
                pl.name()
            ));
        }
        if !self.prepend_as_path.is_empty() {
            s.push_str(&format!(
                "  set as-path prepend {}\n",
                self.prepend_as_path.iter().join(" ")
            ));
        }
        if self.prefer_global_next_hop {
            s.push_str("  set ipv6 next-hop prefer-global\n");
        }
        s.push_str("exit\n");
        s
    }
}

impl From<&mut RouteMapItem> for RouteMapItem {
    fn from(value: &mut RouteMapItem) -> Self {
        value.clone()
    }
}

/// BGP neighbor of a [`RouterBgp`]. Session options are written in the `router bgp` block, and
/// address-family options in the block of the neighbor's address family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgpNeighbor {
    address: IpAddr,
    remote_as: Option<u32>,
    timers_connect: Option<u16>,
    solo: bool,
    maximum_prefix: Option<u32>,
    soft_reconfiguration_inbound: bool,
    route_map_in: Option<String>,
    route_map_out: Option<String>,
}

impl BgpNeighbor {
    /// Create a new neighbor builder. The neighbor is activated in its address family.
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            remote_as: None,
            timers_connect: None,
            solo: false,
            maximum_prefix: None,
            soft_reconfiguration_inbound: false,
            route_map_in: None,
            route_map_out: None,
        }
    }

    /// Set the AS of the neighbor
    pub fn remote_as(&mut self, as_num: u32) -> &mut Self {
        self.remote_as = Some(as_num);
        self
    }

    /// Set the connect retry timer
    pub fn timers_connect(&mut self, secs: u16) -> &mut Self {
        self.timers_connect = Some(secs);
        self
    }

    /// Do not send routes back to the neighbor they were learned from.
    pub fn solo(&mut self) -> &mut Self {
        self.solo = true;
        self
    }

    /// Limit the number of received prefixes
    pub fn maximum_prefix(&mut self, max: u32) -> &mut Self {
        self.maximum_prefix = Some(max);
        self
    }

    /// Keep a copy of all received routes.
    pub fn soft_reconfiguration_inbound(&mut self) -> &mut Self {
        self.soft_reconfiguration_inbound = true;
        self
    }

    /// Apply a route-map on import
    pub fn route_map_in(&mut self, name: impl Into<String>) -> &mut Self {
        self.route_map_in = Some(name.into());
        self
    }

    /// Apply a route-map on export
    pub fn route_map_out(&mut self, name: impl Into<String>) -> &mut Self {
        self.route_map_out = Some(name.into());
        self
    }

    fn build_session(&self) -> String {
        let ip = self.address;
        let mut s = String::new();
        if let Some(as_num) = self.remote_as {
            s.push_str(&format!(" neighbor {ip} remote-as {as_num}\n"));
        }
        if let Some(secs) = self.timers_connect {
            s.push_str(&format!(" neighbor {ip} timers connect {secs}\n"));
        }
        if self.solo {
            s.push_str(&format!(" neighbor {ip} solo\n"));
        }
        s
    }

    fn build_af(&self) -> String {
        let ip = self.address;
        let mut s = format!("  neighbor {ip} activate\n");
        if let Some(max) = self.maximum_prefix {
            s.push_str(&format!("  neighbor {ip} maximum-prefix {max}\n"));
        }
        if self.soft_reconfiguration_inbound {
            s.push_str(&format!("  neighbor {ip} soft-reconfiguration inbound\n"));
        }
        if let Some(rm) = self.route_map_in.as_ref() {
            s.push_str(&format!("  neighbor {ip} route-map {rm} in\n"));
        }
        if let Some(rm) = self.route_map_out.as_ref() {
            s.push_str(&format!("  neighbor {ip} route-map {rm} out\n"));
        }
        s
    }
}

impl From<&mut BgpNeighbor> for BgpNeighbor {
    fn from(value: &mut BgpNeighbor) -> Self {
        value.clone()
    }
}

/// BGP router instance.
///
/// ```
/// # use ixp_twin::frr::{BgpNeighbor, RouterBgp};
/// let rs: std::net::IpAddr = "10.0.0.1".parse().unwrap();
/// let net: ipnet::IpNet = "192.0.2.0/24".parse().unwrap();
/// assert_eq!(
///     RouterBgp::new(65001)
///         .no_default_ipv4_unicast()
///         .neighbor(BgpNeighbor::new(rs).remote_as(65000).maximum_prefix(100))
///         .network(net)
///         .build(),
///     "\
/// router bgp 65001
///  no bgp default ipv4-unicast
///  neighbor 10.0.0.1 remote-as 65000
///  address-family ipv4 unicast
///   neighbor 10.0.0.1 activate
///   neighbor 10.0.0.1 maximum-prefix 100
///   network 192.0.2.0/24
///  exit-address-family
/// exit
/// "
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterBgp {
    as_num: u32,
    options: Vec<&'static str>,
    neighbors: Vec<BgpNeighbor>,
    networks: Vec<IpNet>,
}

impl RouterBgp {
    /// Create a new BGP configuration builder
    pub fn new(as_num: u32) -> Self {
        Self {
            as_num,
            options: Vec::new(),
            neighbors: Vec::new(),
            networks: Vec::new(),
        }
    }

    /// Do not activate neighbors in the IPv4 address family by default.
    pub fn no_default_ipv4_unicast(&mut self) -> &mut Self {
        self.options.push("no bgp default ipv4-unicast");
        self
    }

    /// Allow eBGP sessions without explicit policies.
    pub fn no_ebgp_requires_policy(&mut self) -> &mut Self {
        self.options.push("no bgp ebgp-requires-policy");
        self
    }

    /// Announce networks even if they are not in the routing table.
    pub fn no_network_import_check(&mut self) -> &mut Self {
        self.options.push("no bgp network import-check");
        self
    }

    /// Add a neighbor
    pub fn neighbor(&mut self, neighbor: impl Into<BgpNeighbor>) -> &mut Self {
        self.neighbors.push(neighbor.into());
        self
    }

    /// Announce a network
    pub fn network(&mut self, network: IpNet) -> &mut Self {
        self.networks.push(network);
        self
    }

    /// Generate the configuration. An address-family block is written for each family that has
    /// a neighbor or a network.
    pub fn build(&self) -> String {
        let mut s = format!("router bgp {}\n", self.as_num);
        for option in self.options.iter() {
            s.push_str(&format!(" {option}\n"));
        }
        for n in self.neighbors.iter() {
            s.push_str(&n.build_session());
        }
        for v in IpVersion::ALL {
            let neighbors = self
                .neighbors
                .iter()
                .filter(|n| IpVersion::of(&n.address) == v)
                .map(BgpNeighbor::build_af)
                .collect::<String>();
            let networks = self
                .networks
                .iter()
                .filter(|n| IpVersion::of_net(n) == v)
                .map(|n| format!("  network {n}\n"))
                .collect::<String>();
            if neighbors.is_empty() && networks.is_empty() {
                continue;
            }
            s.push_str(&format!(
                " address-family ipv{v} unicast\n{neighbors}{networks} exit-address-family\n"
            ));
        }
        s.push_str("exit\n");
        s
    }
}

/// Generates the FRR configuration of participant routers.
#[derive(Debug, Clone, Copy)]
pub struct FrrConfigurator<'a> {
    settings: &'a Settings,
}

impl<'a> FrrConfigurator<'a> {
    /// Create a new configurator for the route servers in the settings.
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Export route-map entries of one address family: one entry per route with an AS path
    /// longer than one hop (sequence `10`, `20`, ...), followed by the catch-all entry at
    /// `(n + 1) * 10`. Empty if no route needs prepending.
    pub fn as_path_route_maps(router: &Router, v: IpVersion) -> Vec<RouteMapItem> {
        let name = as_path_route_map(v);
        let mut items = router
            .routes(v)
            .iter()
            .filter(|r| r.as_path.len() > 1)
            .enumerate()
            .map(|(i, route)| {
                let i = i as u32 + 1;
                RouteMapItem::new(&name, i * 10, true)
                    .match_prefix_list(
                        PrefixList::new(format!("FILTER_AS_PATH_V{v}_{i}")).prefix(route.network),
                    )
                    .prepend_as_path(route.as_path[1..].iter().copied())
                    .into()
            })
            .collect_vec();
        if !items.is_empty() {
            let n = items.len() as u32;
            items.push(RouteMapItem::new(&name, (n + 1) * 10, true));
        }
        items
    }

    /// Generate `bgpd.conf` of a router.
    pub fn bgpd_config(&self, router: &Router) -> String {
        let mut config = String::from(ZEBRA_CONFIG);
        config.push_str("!\n");

        let mut has_route_maps = BTreeMap::new();
        for v in IpVersion::ALL {
            let items = Self::as_path_route_maps(router, v);
            has_route_maps.insert(v, !items.is_empty());
            for item in items {
                config.push_str(&item.build());
            }
        }
        let has_ipv6 = !router.peerings(IpVersion::V6).is_empty();
        if has_ipv6 {
            config.push_str(
                &RouteMapItem::new(PREFER_IPV6_GLOBAL, 10, true)
                    .prefer_global_next_hop()
                    .build(),
            );
        }
        config.push_str("!\n");

        let mut bgp = RouterBgp::new(router.as_num());
        bgp.no_default_ipv4_unicast()
            .no_ebgp_requires_policy()
            .no_network_import_check();
        for rs in self.settings.route_servers.values() {
            let v = rs.version();
            let mut neighbor = BgpNeighbor::new(rs.address);
            neighbor
                .remote_as(rs.as_num)
                .timers_connect(CONNECT_TIMER)
                .solo()
                .maximum_prefix(MAXIMUM_PREFIX)
                .soft_reconfiguration_inbound();
            if v == IpVersion::V6 {
                neighbor.route_map_in(PREFER_IPV6_GLOBAL);
            }
            if has_route_maps[&v] {
                neighbor.route_map_out(as_path_route_map(v));
            }
            bgp.neighbor(neighbor);
        }
        for v in IpVersion::ALL {
            for route in router.routes(v) {
                bgp.network(route.network);
            }
        }
        config.push_str(&bgp.build());
        config
    }

    /// Install FRR on the device of a router.
    pub fn configure_device(&self, device: &mut Device, router: &Router) {
        log::info!("[{}] configuring FRR", device.name());
        device.set_image(FRR_IMAGE);
        device.add_file(DAEMONS, "zebra=yes\nbgpd=yes\n");
        device.add_file(ZEBRA_CONF, ZEBRA_CONFIG);
        device.add_file(BGPD_CONF, self.bgpd_config(router));
        device.append_startup(["systemctl start frr"]);
    }

    /// Configure every router of the topology that has a device in the scenario.
    pub fn apply_to_scenario(&self, scenario: &mut Scenario, topology: &Topology) {
        for router in all_routers(topology) {
            if let Some(device) = scenario.device_mut(&router.name()) {
                self.configure_device(device, router);
            }
        }
    }

    /// Configure only the selected devices.
    pub fn apply_to_devices(
        &self,
        scenario: &mut Scenario,
        topology: &Topology,
        devices: &BTreeSet<String>,
    ) {
        for router in all_routers(topology).filter(|r| devices.contains(&r.name())) {
            if let Some(device) = scenario.device_mut(&router.name()) {
                self.configure_device(device, router);
            }
        }
    }

    /// Configuration pushes for all routers with a device in the scenario.
    pub fn device_info(
        &self,
        scenario: &Scenario,
        topology: &Topology,
    ) -> BTreeMap<String, ConfigPush> {
        let mut info = BTreeMap::new();
        for router in all_routers(topology) {
            let name = router.name();
            if !scenario.has_device(&name) {
                log::debug!("[{name}] not in the scenario, skipping");
                continue;
            }
            info.insert(
                name,
                ConfigPush {
                    files: [(BGPD_CONF.to_string(), self.bgpd_config(router))]
                        .into_iter()
                        .collect(),
                    command: String::from("systemctl restart frr"),
                    has_errors: never_errors,
                },
            );
        }
        info
    }
}
