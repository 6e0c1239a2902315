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

//! Gateway towards external RPKI validators.
//!
//! Route servers reach the validators through the backbone and the `ixp_gateway` device, which
//! NATs the backbone towards the host. Forwarding is dropped by default; only traffic to and
//! from the configured validators is accepted.

use std::collections::BTreeMap;

use itertools::Itertools;
use kathara_lab::Scenario;

use super::{Ipv4Pool, ScenarioError, BACKBONE, BACKBONE_PREFIX, GATEWAY};
use crate::{
    config::{RpkiKind, RpkiServer, Settings},
    vendor::{never_errors, ConfigPush},
};

/// Creates the RPKI gateway and its firewall rules.
#[derive(Debug)]
pub struct RpkiManager<'a> {
    settings: &'a Settings,
    pool: Ipv4Pool,
}

impl<'a> RpkiManager<'a> {
    /// Create a new manager. The gateway takes the first address of the backbone.
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            pool: Ipv4Pool::new(*BACKBONE_PREFIX),
        }
    }

    fn accept_rule(&self, rpki: &RpkiServer) -> String {
        let net = self.pool.network();
        let RpkiServer {
            address,
            port,
            protocol,
            ..
        } = rpki;
        format!(
            "iptables -A FORWARD -s {net} -d {address} -p {protocol} --dport {port} -j ACCEPT; \
             iptables -A FORWARD -s {address} -d {net} -p {protocol} --sport {port} -j ACCEPT"
        )
    }

    fn external_rules(&self) -> Vec<String> {
        self.settings
            .rpki
            .iter()
            .filter(|r| r.kind == RpkiKind::External)
            .map(|r| self.accept_rule(r))
            .collect()
    }

    /// Add the gateway to the scenario. Nothing is added without RPKI validators.
    pub fn apply_to_scenario(&self, scenario: &mut Scenario) -> Result<(), ScenarioError> {
        if self.external_rules().is_empty() {
            return Ok(());
        }
        let gw = self
            .pool
            .default_gw()
            .ok_or(ScenarioError::PoolExhausted(self.pool.network()))?;

        if !scenario.has_device(GATEWAY) {
            scenario.connect(GATEWAY, BACKBONE, None);
            let device = scenario.new_device(GATEWAY);
            device.meta_mut().bridged = true;
            device.append_startup([
                format!("ip address add {gw} dev eth0"),
                format!(
                    "iptables -t nat -A POSTROUTING -s {} -o eth1 -j MASQUERADE",
                    self.pool.network()
                ),
                String::from("iptables -P FORWARD DROP"),
            ]);
            log::info!("[{GATEWAY}] device created with address {gw}");
        }

        let externals = self
            .settings
            .rpki
            .iter()
            .filter(|r| r.kind == RpkiKind::External);
        for rpki in externals {
            log::info!(
                "[{GATEWAY}] allowing RPKI traffic to {}:{}/{}",
                rpki.address,
                rpki.port,
                rpki.protocol
            );
            let rule = self.accept_rule(rpki);
            if let Some(device) = scenario.device_mut(GATEWAY) {
                device.append_startup([rule]);
            }
        }
        Ok(())
    }

    /// Configuration push that flushes and re-applies the firewall rules of the gateway.
    pub fn device_info(&self, scenario: &Scenario) -> BTreeMap<String, ConfigPush> {
        let rules = self.external_rules();
        let mut info = BTreeMap::new();
        if rules.is_empty() {
            return info;
        }
        if !scenario.has_device(GATEWAY) {
            log::warn!("[{GATEWAY}] not in the network scenario, skipping RPKI update");
            return info;
        }
        info.insert(
            GATEWAY.to_string(),
            ConfigPush {
                files: BTreeMap::new(),
                command: format!("/bin/bash -c \"iptables -F; {}\"", rules.iter().join("; ")),
                has_errors: never_errors,
            },
        );
        info
    }
}
