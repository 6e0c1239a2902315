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

//! Address management of the backbone network.

use ipnet::{Ipv4AddrRange, Ipv4Net};

/// Pool of host addresses of an IPv4 network. The first host address is reserved for the
/// default gateway.
#[derive(Debug, Clone)]
pub struct Ipv4Pool {
    network: Ipv4Net,
    hosts: Ipv4AddrRange,
    default_gw: Option<Ipv4Net>,
}

impl Ipv4Pool {
    /// Create a new pool over the host addresses of `network`.
    pub fn new(network: Ipv4Net) -> Self {
        let mut pool = Self {
            network,
            hosts: network.hosts(),
            default_gw: None,
        };
        pool.default_gw = pool.next();
        pool
    }

    /// Network of the pool
    pub fn network(&self) -> Ipv4Net {
        self.network
    }

    /// Address of the default gateway, including the prefix length. `None` if the network has
    /// no host addresses.
    pub fn default_gw(&self) -> Option<Ipv4Net> {
        self.default_gw
    }
}

impl Iterator for Ipv4Pool {
    type Item = Ipv4Net;

    /// Allocate the next free address, including the prefix length of the pool.
    fn next(&mut self) -> Option<Self::Item> {
        let addr = self.hosts.next()?;
        Ipv4Net::new(addr, self.network.prefix_len()).ok()
    }
}
