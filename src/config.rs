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

//! This module contains the code for reading the deployment settings.
//!
//! The settings are a JSON document that is read once at startup and passed by reference to
//! every component. Relative paths in the document are resolved against the resources directory,
//! which is the directory containing the settings file.

use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
};

use ipnet::IpNet;
use serde::Deserialize;
use thiserror::Error;

use crate::{
    dumps::{MemberDumpKind, TableDumpKind},
    model::IpVersion,
    vendor::Vendor,
};

/// Environment variable that points to the settings file.
pub const SETTINGS_ENV: &str = "IXP_TWIN_SETTINGS";

/// Deployment settings of the digital twin.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Name of the network scenario
    pub scenario_name: String,
    /// Host interface (`iface` or `iface.vlan`) that connects external peers to the fabric.
    #[serde(default)]
    pub host_interface: Option<String>,
    /// Prefix of the peering LAN per address family.
    pub peering_lan: PerVersion<IpNet>,
    /// Member dump describing all peerings.
    pub peering_configuration: PeeringConfiguration,
    /// Table dumps describing the announced routes.
    pub rib_dumps: RibDumps,
    /// Route servers, keyed by their device name.
    pub route_servers: BTreeMap<String, RouteServer>,
    /// RPKI validators reachable from the route servers.
    #[serde(default)]
    pub rpki: Vec<RpkiServer>,
    /// Quarantine policy
    pub quarantine: QuarantineSettings,
    /// Base directory for the rendered lab. Defaults to `<resources>/lab`.
    #[serde(default)]
    pub lab_dir: Option<PathBuf>,
    /// Directory used to resolve relative paths.
    #[serde(skip)]
    pub resources: PathBuf,
}

/// Value that can be set per address family.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PerVersion<T> {
    /// IPv4 value
    #[serde(rename = "4")]
    pub v4: Option<T>,
    /// IPv6 value
    #[serde(rename = "6")]
    pub v6: Option<T>,
}

impl<T> Default for PerVersion<T> {
    fn default() -> Self {
        Self { v4: None, v6: None }
    }
}

impl<T> PerVersion<T> {
    /// Get the value of an address family
    pub fn get(&self, version: IpVersion) -> Option<&T> {
        match version {
            IpVersion::V4 => self.v4.as_ref(),
            IpVersion::V6 => self.v6.as_ref(),
        }
    }
}

/// Location and format of the member dump.
#[derive(Debug, Clone, Deserialize)]
pub struct PeeringConfiguration {
    /// Format of the dump
    #[serde(rename = "type")]
    pub kind: MemberDumpKind,
    /// Path of the dump
    pub path: PathBuf,
}

/// Location and format of the table dumps.
#[derive(Debug, Clone, Deserialize)]
pub struct RibDumps {
    /// Format of the dumps
    #[serde(rename = "type")]
    pub kind: TableDumpKind,
    /// Path of the dump per address family.
    pub dumps: BTreeMap<IpVersion, PathBuf>,
}

/// A route server of the exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteServer {
    /// Implementation running on the route server
    #[serde(rename = "type")]
    pub vendor: Vendor,
    /// Container image
    pub image: String,
    /// AS number of the route server
    pub as_num: u32,
    /// Configuration file or directory.
    pub config: PathBuf,
    /// Address on the peering LAN. It determines the address family of the route server.
    pub address: IpAddr,
}

impl RouteServer {
    /// Address family of the route server
    pub fn version(&self) -> IpVersion {
        IpVersion::of(&self.address)
    }
}

/// Kind of RPKI validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpkiKind {
    /// Validator outside of the emulation, reached through the gateway.
    External,
}

/// An RPKI validator.
#[derive(Debug, Clone, Deserialize)]
pub struct RpkiServer {
    /// Kind of validator
    #[serde(rename = "type")]
    pub kind: RpkiKind,
    /// Address of the validator
    pub address: IpAddr,
    /// Port of the validator
    pub port: u16,
    /// Transport protocol (`tcp` or `udp`)
    pub protocol: String,
}

/// Policy of the quarantine checks.
#[derive(Debug, Clone, Deserialize)]
pub struct QuarantineSettings {
    /// Ordered list of enabled checks (`category.name`).
    pub actions: Vec<String>,
    /// Maximum number of prefixes a candidate may announce.
    pub max_rib_prefixes: PerVersion<usize>,
    /// Address of the service probe device.
    #[serde(default)]
    pub probe_ips: PerVersion<IpAddr>,
    /// Addresses for which the candidate must not answer ARP requests.
    #[serde(default)]
    pub proxy_arp_ips: Vec<Ipv4Addr>,
    /// Name resolved by the DNS probe
    #[serde(default = "default_dns_name")]
    pub dns_name: String,
    /// Length of the traffic capture in minutes.
    #[serde(default = "default_traffic_dump_mins")]
    pub traffic_dump_mins: u64,
}

fn default_dns_name() -> String {
    String::from("example.com")
}

fn default_traffic_dump_mins() -> u64 {
    1
}

impl Settings {
    /// Read the settings from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        log::debug!("[settings] reading {}", path.display());
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let resources = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_json(&content, resources).map_err(|e| match e {
            ConfigError::Json(_, e) => ConfigError::Json(path.to_path_buf(), e),
            e => e,
        })
    }

    /// Parse the settings from a JSON string, resolving paths against `resources`.
    pub fn from_json(content: &str, resources: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut settings: Settings =
            serde_json::from_str(content).map_err(|e| ConfigError::Json(PathBuf::new(), e))?;
        settings.resources = resources.into();
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, rs) in self.route_servers.iter() {
            if self.peering_lan.get(rs.version()).is_none() {
                return Err(ConfigError::MissingPeeringLan(name.clone(), rs.version()));
            }
        }
        Ok(())
    }

    /// Resolve a path of the settings document.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.resources.join(path)
        }
    }

    /// Directory of the rendered lab of this scenario.
    pub fn lab_dir(&self) -> PathBuf {
        match self.lab_dir.as_ref() {
            Some(dir) => self.resolve(dir),
            None => self.resources.join("lab"),
        }
        .join(&self.scenario_name)
    }

    /// Prefix length of the peering LAN.
    pub fn peering_prefix_len(&self, version: IpVersion) -> Option<u8> {
        self.peering_lan.get(version).map(IpNet::prefix_len)
    }

    /// Route servers of one address family.
    pub fn route_servers_of(
        &self,
        version: IpVersion,
    ) -> impl Iterator<Item = (&String, &RouteServer)> {
        self.route_servers
            .iter()
            .filter(move |(_, rs)| rs.version() == version)
    }
}

/// Error while reading the settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Cannot read a file
    #[error("Cannot read '{0}': {1}")]
    Io(PathBuf, std::io::Error),
    /// Cannot parse the settings
    #[error("Cannot parse '{0}': {1}")]
    Json(PathBuf, serde_json::Error),
    /// No settings file given
    #[error("No settings file given. Use `--settings` or set IXP_TWIN_SETTINGS.")]
    NoSettings,
    /// Route server without a peering LAN of its address family.
    #[error("Route server {0} uses IPv{1}, but no IPv{1} peering LAN is configured")]
    MissingPeeringLan(String, IpVersion),
}
