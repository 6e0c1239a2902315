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

//! Topology model of the exchange: member ASes, their routers, peerings and announced routes.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
    net::IpAddr,
    str::FromStr,
};

use ipnet::IpNet;
use itertools::Itertools;
use serde::Deserialize;
use thiserror::Error;

/// The full desired topology, keyed by `as{as_num}`.
pub type Topology = BTreeMap<String, NeighbourAs>;

/// Key of an AS in the [`Topology`].
pub fn as_key(as_num: u32) -> String {
    format!("as{as_num}")
}

/// Keep only the first `max` ASes of the topology.
pub fn truncate(topology: &mut Topology, max: usize) {
    if let Some(key) = topology.keys().nth(max).cloned() {
        topology.retain(|k, _| *k < key);
    }
}

/// IP version of an address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub enum IpVersion {
    /// IPv4
    #[serde(rename = "4")]
    V4,
    /// IPv6
    #[serde(rename = "6")]
    V6,
}

impl IpVersion {
    /// Both versions, IPv4 first.
    pub const ALL: [IpVersion; 2] = [IpVersion::V4, IpVersion::V6];

    /// Version of an address.
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }

    /// Version of a network.
    pub fn of_net(net: &IpNet) -> Self {
        match net {
            IpNet::V4(_) => Self::V4,
            IpNet::V6(_) => Self::V6,
        }
    }

    /// `4` or `6`
    pub fn number(&self) -> u8 {
        match self {
            Self::V4 => 4,
            Self::V6 => 6,
        }
    }
}

impl Display for IpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.number())
    }
}

impl FromStr for IpVersion {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "4" | "v4" | "ipv4" => Ok(Self::V4),
            "6" | "v6" | "ipv6" => Ok(Self::V6),
            _ => Err(ModelError::InvalidIpVersion(s.to_string())),
        }
    }
}

/// A MAC address in lowercase colon notation (`aa:bb:cc:dd:ee:ff`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(String);

impl MacAddr {
    /// Build the address from the lower 48 bits of an integer.
    pub fn from_int(value: u64) -> Self {
        let bytes = value.to_be_bytes();
        Self(bytes[2..].iter().map(|b| format!("{b:02x}")).join(":"))
    }

    /// The address as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for MacAddr {
    type Err = ModelError;

    /// Accepts `aa:bb:cc:dd:ee:ff`, `aa-bb-cc-dd-ee-ff`, `aabb.ccdd.eeff` and `aabbccddeeff`, in
    /// any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ':' | '.' | '-'))
            .collect();
        if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ModelError::InvalidMac(s.to_string()));
        }
        Ok(Self(
            hex.to_ascii_lowercase()
                .as_bytes()
                .chunks(2)
                .map(|c| String::from_utf8_lossy(c))
                .join(":"),
        ))
    }
}

impl Display for MacAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Layer-2 / Layer-3 endpoint of a router on the peering LAN.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Peering {
    /// MAC address
    pub l2_address: Option<MacAddr>,
    /// IP address on the peering LAN
    pub l3_address: IpAddr,
}

/// A route announced by a router.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Route {
    /// Announced prefix
    pub network: IpNet,
    /// AS path, starting with the AS of the announcing router.
    pub as_path: Vec<u32>,
}

/// A single BGP speaker of a member AS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Router {
    as_num: u32,
    router_id: u32,
    peerings: BTreeMap<IpVersion, BTreeSet<Peering>>,
    routes: BTreeMap<IpVersion, BTreeSet<Route>>,
}

impl Router {
    /// Create a router without peerings and routes.
    pub fn new(as_num: u32, router_id: u32) -> Self {
        Self {
            as_num,
            router_id,
            peerings: IpVersion::ALL.into_iter().map(|v| (v, BTreeSet::new())).collect(),
            routes: IpVersion::ALL.into_iter().map(|v| (v, BTreeSet::new())).collect(),
        }
    }

    /// AS number of the router
    pub fn as_num(&self) -> u32 {
        self.as_num
    }

    /// Id of the router within its AS
    pub fn router_id(&self) -> u32 {
        self.router_id
    }

    /// Name of the device that emulates this router: `as{as_num}_{router_id}`.
    pub fn name(&self) -> String {
        format!("as{}_{}", self.as_num, self.router_id)
    }

    /// Add a peering. The address family is taken from the layer-3 address.
    pub fn add_peering(&mut self, peering: Peering) {
        self.peerings
            .entry(IpVersion::of(&peering.l3_address))
            .or_default()
            .insert(peering);
    }

    /// Add a route. Adding the same `(network, as_path)` twice has no effect.
    pub fn add_route(&mut self, route: Route) {
        self.routes
            .entry(IpVersion::of_net(&route.network))
            .or_default()
            .insert(route);
    }

    /// Peerings of one address family.
    pub fn peerings(&self, version: IpVersion) -> &BTreeSet<Peering> {
        &self.peerings[&version]
    }

    /// Routes of one address family.
    pub fn routes(&self, version: IpVersion) -> &BTreeSet<Route> {
        &self.routes[&version]
    }

    /// All peerings, IPv4 first.
    pub fn all_peerings(&self) -> impl Iterator<Item = &Peering> {
        self.peerings.values().flatten()
    }

    /// Whether any peering uses the given address.
    pub fn has_peering(&self, ip: &IpAddr) -> bool {
        self.peerings[&IpVersion::of(ip)]
            .iter()
            .any(|p| &p.l3_address == ip)
    }

    /// Whether the router announces anything. Routers without routes are not emulated.
    pub fn has_routes(&self) -> bool {
        self.routes.values().any(|r| !r.is_empty())
    }

    /// Distinct MAC addresses of all peerings.
    pub fn macs(&self) -> BTreeSet<&MacAddr> {
        self.all_peerings()
            .filter_map(|p| p.l2_address.as_ref())
            .collect()
    }
}

/// A member AS of the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighbourAs {
    as_num: u32,
    routers: BTreeMap<u32, Router>,
}

impl NeighbourAs {
    /// Create a new AS without routers.
    pub fn new(as_num: u32) -> Self {
        Self {
            as_num,
            routers: BTreeMap::new(),
        }
    }

    /// AS number
    pub fn as_num(&self) -> u32 {
        self.as_num
    }

    /// Get the router with that id, creating it if necessary.
    pub fn add_router(&mut self, router_id: u32) -> &mut Router {
        let as_num = self.as_num;
        self.routers
            .entry(router_id)
            .or_insert_with(|| Router::new(as_num, router_id))
    }

    /// All routers, ordered by id.
    pub fn routers(&self) -> impl Iterator<Item = &Router> {
        self.routers.values()
    }

    /// All routers mutably.
    pub fn routers_mut(&mut self) -> impl Iterator<Item = &mut Router> {
        self.routers.values_mut()
    }

    /// Number of routers
    pub fn num_routers(&self) -> usize {
        self.routers.len()
    }
}

/// Iterate over all routers of the topology.
pub fn all_routers(topology: &Topology) -> impl Iterator<Item = &Router> {
    topology.values().flat_map(NeighbourAs::routers)
}

/// Find a router by its device name.
pub fn find_router<'a>(topology: &'a Topology, name: &str) -> Option<&'a Router> {
    all_routers(topology).find(|r| r.name() == name)
}

/// Errors when building the model
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    /// Not a MAC address
    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),
    /// Not an IP version
    #[error("Invalid IP version: {0}")]
    InvalidIpVersion(String),
}
