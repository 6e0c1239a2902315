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

//! Route server devices.

use std::collections::BTreeMap;

use kathara_lab::Scenario;

use super::{fabric_cd, Ipv4Pool, ScenarioError, BACKBONE, BACKBONE_PREFIX};
use crate::{config::Settings, model::IpVersion, vendor::ConfigPush};

/// Creates and configures one device per route server.
#[derive(Debug)]
pub struct RouteServerManager<'a> {
    settings: &'a Settings,
    pool: Ipv4Pool,
}

impl<'a> RouteServerManager<'a> {
    /// Create a new manager. Backbone addresses are allocated from a fresh pool.
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            pool: Ipv4Pool::new(*BACKBONE_PREFIX),
        }
    }

    /// Add the route servers to the scenario. If RPKI validators are configured, every route
    /// server is connected to the backbone and routes through the gateway.
    pub fn apply_to_scenario(&mut self, scenario: &mut Scenario) -> Result<(), ScenarioError> {
        for (name, rs) in self.settings.route_servers.iter() {
            let v = rs.version();
            let prefix_len = self
                .settings
                .peering_prefix_len(v)
                .ok_or_else(|| ScenarioError::NoPeeringLan(name.clone(), v))?;

            scenario.connect(name, fabric_cd(name), None);
            let mut startup = vec![format!("ip address add {}/{prefix_len} dev eth0", rs.address)];

            if !self.settings.rpki.is_empty() {
                let iface = scenario.connect(name, BACKBONE, None);
                let addr = self
                    .pool
                    .next()
                    .ok_or(ScenarioError::PoolExhausted(self.pool.network()))?;
                let gw = self
                    .pool
                    .default_gw()
                    .ok_or(ScenarioError::PoolExhausted(self.pool.network()))?;
                log::info!("[{name}] connecting to {BACKBONE} with address {addr}");
                startup.push(format!("ip address add {addr} dev eth{iface}"));
                startup.push(format!("ip route add default via {}", gw.addr()));
            }

            let device = scenario.new_device(name);
            device.meta_mut().ipv6 = v == IpVersion::V6;
            device.add_sysctl("net.ipv4.tcp_rmem", "33554432");
            device.add_sysctl("net.ipv4.tcp_wmem", "33554432");
            device.append_startup(startup);

            rs.vendor.device().config_apply_to_device(
                device,
                &self.settings.resolve(&rs.config),
                &rs.image,
            )?;
            log::info!("[{name}] device created");
        }
        Ok(())
    }

    /// Configuration pushes of all route servers in the scenario.
    pub fn device_info(
        &self,
        scenario: &Scenario,
    ) -> Result<BTreeMap<String, ConfigPush>, ScenarioError> {
        let mut info = BTreeMap::new();
        for (name, rs) in self.settings.route_servers.iter() {
            let Some(device) = scenario.device(name) else {
                log::warn!("[{name}] not in the network scenario, skipping");
                continue;
            };
            let push = rs
                .vendor
                .device()
                .config_info_for_device(device, &self.settings.resolve(&rs.config))?;
            log::debug!("[{name}] configuration push: {push:?}");
            info.insert(name.clone(), push);
        }
        Ok(info)
    }
}
