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

//! Parsers for the dumps that describe the desired state of the exchange.
//!
//! There are two families of dumps:
//!
//! - **Member dumps** describe who is connected to the exchange: member ASes, their routers, and
//!   the MAC and IP addresses of each peering. Parsing a member dump creates the [`Topology`].
//! - **Table dumps** are RIB dumps of a route server. They are always parsed after a member dump,
//!   and attach each route to the router whose peering address matches the neighbor of the route.
//!   Table dumps never create new ASes or routers. Rows that cannot be joined are skipped.

use std::{
    net::IpAddr,
    path::{Path, PathBuf},
};

use ipnet::IpNet;
use serde::Deserialize;
use thiserror::Error;

use crate::model::{as_key, ModelError, Route, Topology};

mod bird;
mod ixp_manager;
mod mac;
mod openbgpd;
mod raw_json;

pub use bird::BirdTableDump;
pub use ixp_manager::IxpManagerDump;
pub use mac::MacSynthesizer;
pub use openbgpd::OpenBgpdTableDump;
pub use raw_json::RawJsonDump;

/// A dump describing the members of the exchange.
pub trait MemberDump {
    /// Parse the content of a dump.
    fn load_from_str(&mut self, content: &str) -> Result<Topology, DumpError>;

    /// Read and parse a dump file.
    fn load_from_file(&mut self, path: &Path) -> Result<Topology, DumpError> {
        log::info!("[dump] loading member dump {}", path.display());
        let content = read(path)?;
        self.load_from_str(&content)
            .map_err(|e| DumpError::InFile(path.to_path_buf(), Box::new(e)))
    }
}

/// A RIB dump that attaches routes to an existing topology.
pub trait TableDump {
    /// Parse the content of a dump and attach all routes. Returns the number of rows that were
    /// attached to at least one router.
    fn load_from_str(&self, topology: &mut Topology, content: &str) -> Result<usize, DumpError>;

    /// Read and parse a dump file.
    fn load_from_file(&self, topology: &mut Topology, path: &Path) -> Result<usize, DumpError> {
        log::info!("[dump] loading table dump {}", path.display());
        let content = read(path)?;
        let attached = self
            .load_from_str(topology, &content)
            .map_err(|e| DumpError::InFile(path.to_path_buf(), Box::new(e)))?;
        log::info!("[dump] attached {attached} routes from {}", path.display());
        Ok(attached)
    }
}

/// Formats of member dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberDumpKind {
    /// JSON export of IXP Manager, with nested connection and VLAN lists.
    IxpManager,
    /// Flat list of JSON records, one router per record.
    RawJson,
}

impl MemberDumpKind {
    /// Parse a member dump file with a fresh parser. The MAC counter starts again at 1.
    pub fn load_from_file(&self, path: &Path) -> Result<Topology, DumpError> {
        match self {
            Self::IxpManager => IxpManagerDump::default().load_from_file(path),
            Self::RawJson => RawJsonDump::default().load_from_file(path),
        }
    }
}

/// Formats of table dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableDumpKind {
    /// Output of `birdc show route all`
    Bird,
    /// Output of `bgpctl show rib`
    OpenBgpd,
}

impl TableDumpKind {
    /// Parse a table dump file into the topology.
    pub fn load_from_file(&self, topology: &mut Topology, path: &Path) -> Result<usize, DumpError> {
        match self {
            Self::Bird => BirdTableDump.load_from_file(topology, path),
            Self::OpenBgpd => OpenBgpdTableDump.load_from_file(topology, path),
        }
    }
}

fn read(path: &Path) -> Result<String, DumpError> {
    std::fs::read_to_string(path).map_err(|e| DumpError::Io(path.to_path_buf(), e))
}

/// Attach a route to every router of the first AS in the path that has a peering with the
/// neighbor address. Returns `false` if the row cannot be joined.
pub(crate) fn attach_route(
    topology: &mut Topology,
    neighbor: IpAddr,
    network: IpNet,
    as_path: Vec<u32>,
) -> bool {
    let Some(first) = as_path.first() else {
        log::warn!("[dump] AS path for network {network} is empty, skipping");
        return false;
    };
    let Some(neighbour) = topology.get_mut(&as_key(*first)) else {
        log::debug!("[dump] AS{first} of {network} is not a member, skipping");
        return false;
    };
    let mut attached = false;
    for router in neighbour.routers_mut().filter(|r| r.has_peering(&neighbor)) {
        router.add_route(Route {
            network,
            as_path: as_path.clone(),
        });
        attached = true;
    }
    if !attached {
        log::debug!("[dump] no router of AS{first} peers with {neighbor}, skipping {network}");
    }
    attached
}

/// Parse an AS number, accepting AS sets (`{65001` or `65002}`) and the `AS` prefix.
pub(crate) fn parse_asn(token: &str) -> Option<u32> {
    token
        .trim_matches(|c| c == '{' || c == '}' || c == ',')
        .trim_start_matches("AS")
        .parse()
        .ok()
}

/// Errors while reading dumps
#[derive(Debug, Error)]
pub enum DumpError {
    /// Cannot read the file
    #[error("Cannot read '{0}': {1}")]
    Io(PathBuf, std::io::Error),
    /// Error in a specific file
    #[error("{0}: {1}")]
    InFile(PathBuf, Box<DumpError>),
    /// Invalid JSON
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Invalid MAC address
    #[error("{0}")]
    Model(#[from] ModelError),
    /// Invalid IP address
    #[error("Invalid IP address `{0}`")]
    InvalidAddress(String),
}
