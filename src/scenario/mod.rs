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

//! Reconciliation of the emulated exchange with the topology.
//!
//! The [`NetworkScenarioManager`] builds the Kathara scenario from a [`Topology`], either from
//! scratch or as a diff against the running lab, and deploys it through a [`LabRuntime`]. Every
//! device is attached to its own fabric collision domain; the switch bridges all of them (and
//! the host interface, if configured) into one broadcast domain. Static ARP entries are seeded on
//! every device such that BGP sessions do not depend on ARP resolution.

use std::{
    collections::{BTreeMap, BTreeSet},
    net::IpAddr,
    time::Duration,
};

use ipnet::Ipv4Net;
use itertools::Itertools;
use kathara_lab::{check_output, ExternalLink, LabError, LabRuntime, Scenario};
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tokio::process::Command;

use crate::{
    config::Settings,
    model::{all_routers, IpVersion, Router, Topology},
    vendor::{ConfigPush, VendorError},
};

mod ipam;
mod route_servers;
mod rpki;

pub use ipam::Ipv4Pool;
pub use route_servers::RouteServerManager;
pub use rpki::RpkiManager;

/// Name of the switch device
pub const SWITCH: &str = "switch";
/// Collision domain attached to the host interface
pub const EXT_FABRIC: &str = "ext_fabric";
/// Name of the RPKI gateway device
pub const GATEWAY: &str = "ixp_gateway";
/// Collision domain between the route servers and the RPKI gateway
pub const BACKBONE: &str = "backbone";
/// Number of devices deployed at once after the main chunk.
pub const DEPLOY_CHUNK_SIZE: usize = 5;
/// Time between two checks whether deployed devices are running.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

lazy_static! {
    /// Address range of the backbone network
    pub static ref BACKBONE_PREFIX: Ipv4Net = "10.0.0.0/24".parse().unwrap();
    static ref ROUTER_NAME: Regex = Regex::new(r"^as\d+_\d+$").unwrap();
    static ref PEERING_ADDR: Regex = Regex::new(r"^ip addr add (\S+)/\d+ dev eth0$").unwrap();
}

/// Collision domain connecting a device to the switch.
pub fn fabric_cd(device: &str) -> String {
    format!("fabric_{device}")
}

/// Devices that must be created or removed to reach the desired topology.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// Devices in the topology that are not running.
    pub new: BTreeSet<String>,
    /// Running devices that are no longer in the topology.
    pub removed: BTreeSet<String>,
    /// Peering addresses of the removed devices.
    pub stale_neighbors: BTreeSet<IpAddr>,
}

/// Compute the devices to add and to remove. Only names of participant routers (`as<num>_<id>`)
/// are considered; route servers and infrastructure devices are never part of the diff.
pub fn diff_devices<'a, 'b>(
    desired: impl IntoIterator<Item = &'a str>,
    live: impl IntoIterator<Item = &'b str>,
) -> Diff {
    let desired: BTreeSet<&str> = desired
        .into_iter()
        .filter(|n| ROUTER_NAME.is_match(n))
        .collect();
    let live: BTreeSet<&str> = live.into_iter().filter(|n| ROUTER_NAME.is_match(n)).collect();
    Diff {
        new: desired.difference(&live).map(|s| s.to_string()).collect(),
        removed: live.difference(&desired).map(|s| s.to_string()).collect(),
        stale_neighbors: BTreeSet::new(),
    }
}

/// Static ARP entries of all routers that are emulated, except the excluded ones. Peerings
/// without a MAC address are ignored.
pub fn arp_entries(topology: &Topology, exclude: &BTreeSet<String>) -> Vec<String> {
    arp_pairs(topology, |r| !exclude.contains(&r.name()))
        .map(|(ip, mac)| format!("ip neigh add {ip} lladdr {mac} dev eth0"))
        .collect()
}

fn arp_pairs<'a>(
    topology: &'a Topology,
    filter: impl Fn(&Router) -> bool + 'a,
) -> impl Iterator<Item = (IpAddr, &'a str)> + 'a {
    all_routers(topology)
        .filter(|r| r.has_routes())
        .filter(move |r| filter(*r))
        .flat_map(|r| r.all_peerings())
        .filter_map(|p| p.l2_address.as_ref().map(|mac| (p.l3_address, mac.as_str())))
}

/// Wait until all selected devices are running. There is no upper bound on the waiting time.
pub async fn wait_running(
    runtime: &dyn LabRuntime,
    devices: &BTreeSet<String>,
) -> Result<(), LabError> {
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        let running = runtime.running_devices().await?;
        let pending = devices.difference(&running).collect_vec();
        if pending.is_empty() {
            return Ok(());
        }
        log::debug!("[deploy] waiting for {}", pending.iter().join(", "));
    }
}

/// Builds, updates and deploys the network scenario of the exchange.
#[derive(Debug)]
pub struct NetworkScenarioManager<'a> {
    settings: &'a Settings,
    scenario: Scenario,
}

impl<'a> NetworkScenarioManager<'a> {
    /// Create a manager with an empty scenario.
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            scenario: Scenario::new(&settings.scenario_name),
        }
    }

    /// The managed scenario
    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// The managed scenario
    pub fn scenario_mut(&mut self) -> &mut Scenario {
        &mut self.scenario
    }

    /// Build one device for each router that can be emulated.
    pub fn build(&mut self, topology: &Topology) -> Result<(), ScenarioError> {
        if topology.is_empty() {
            return Err(ScenarioError::EmptyTopology);
        }
        log::info!("[scenario] creating network scenario {}", self.scenario.name());
        let mut built = 0;
        for router in all_routers(topology) {
            if self.build_device(router)?.is_some() {
                built += 1;
            }
        }
        if built == 0 {
            return Err(ScenarioError::EmptyTopology);
        }
        log::info!("[scenario] {built} participant devices created");
        Ok(())
    }

    /// Replace the scenario with the running lab.
    pub async fn get(&mut self, runtime: &dyn LabRuntime) -> Result<(), ScenarioError> {
        log::info!("[scenario] fetching running network scenario");
        self.scenario = runtime.get_live_scenario().await?;
        Ok(())
    }

    /// Fetch the running lab and add the devices of all routers that are not yet running. The
    /// removed devices are only reported; they keep running until they are undeployed
    /// explicitly.
    pub async fn build_diff(
        &mut self,
        topology: &Topology,
        runtime: &dyn LabRuntime,
    ) -> Result<Diff, ScenarioError> {
        if topology.is_empty() {
            return Err(ScenarioError::EmptyTopology);
        }
        self.get(runtime).await?;

        log::info!("[scenario] updating network scenario");
        let desired = all_routers(topology).map(Router::name).collect_vec();
        let mut diff = diff_devices(
            desired.iter().map(String::as_str),
            self.scenario.device_names(),
        );

        let mut new = BTreeSet::new();
        for name in diff.new.iter() {
            if let Some(router) = all_routers(topology).find(|r| &r.name() == name) {
                if let Some(name) = self.build_device(router)? {
                    new.insert(name);
                }
            }
        }
        diff.new = new;

        for name in diff.removed.iter() {
            if let Some(device) = self.scenario.device(name) {
                diff.stale_neighbors.extend(
                    device
                        .startup()
                        .iter()
                        .filter_map(|l| PEERING_ADDR.captures(l))
                        .filter_map(|c| c[1].parse::<IpAddr>().ok()),
                );
            }
        }

        log::info!(
            "[scenario] {} new devices, {} removed devices",
            diff.new.len(),
            diff.removed.len()
        );
        Ok(diff)
    }

    /// Create the device of a router. Routers without routes, or with more than one MAC
    /// address, are skipped. Returns the name of the device if it was created.
    pub fn build_device(&mut self, router: &Router) -> Result<Option<String>, ScenarioError> {
        let name = router.name();
        if !router.has_routes() {
            log::info!("[{name}] skipping device without routes");
            return Ok(None);
        }
        let macs = router.macs();
        if macs.len() > 1 {
            log::error!(
                "[{name}] cannot create device with more than one MAC address: {}",
                macs.iter().join(", ")
            );
            return Ok(None);
        }
        let mac = macs.into_iter().next().map(|m| m.to_string());

        let mut startup = Vec::new();
        for v in IpVersion::ALL {
            let peerings = router.peerings(v);
            if peerings.is_empty() {
                continue;
            }
            let prefix_len = self
                .settings
                .peering_prefix_len(v)
                .ok_or_else(|| ScenarioError::NoPeeringLan(name.clone(), v))?;
            startup.extend(
                peerings
                    .iter()
                    .map(|p| format!("ip addr add {}/{prefix_len} dev eth0", p.l3_address)),
            );
        }

        self.scenario.connect(&name, fabric_cd(&name), mac);
        let device = self.scenario.new_device(&name);
        device.meta_mut().ipv6 = !router.peerings(IpVersion::V6).is_empty();
        device.append_startup(startup);

        log::info!("[{name}] device created");
        Ok(Some(name))
    }

    /// Seed the ARP tables and create the switch that bridges all fabric collision domains.
    pub fn interconnect(&mut self, topology: &Topology) -> Result<(), ScenarioError> {
        let arp = arp_entries(topology, &BTreeSet::new());

        let mut switch_cds = BTreeSet::new();
        let names = self.scenario.device_names().map(str::to_string).collect_vec();
        for name in names {
            let Some(device) = self.scenario.device_mut(&name) else {
                continue;
            };
            let cds = device
                .interfaces()
                .iter()
                .filter(|i| i.cd != BACKBONE)
                .map(|i| i.cd.clone())
                .collect_vec();
            if cds.is_empty() {
                continue;
            }
            switch_cds.extend(cds);
            device.append_startup(arp.iter().cloned());
        }

        if let Some(cd) = self.attach_host_interface()? {
            switch_cds.insert(cd);
        }

        let mut startup = vec![
            String::from("ip link add br1 type bridge"),
            String::from("brctl setageing br1 9999999999999"),
        ];
        for cd in switch_cds {
            let iface = self.scenario.connect(SWITCH, cd, None);
            startup.push(format!("ip link set eth{iface} master br1"));
        }
        startup.push(String::from("ip link set dev br1 up"));

        let switch = self.scenario.new_device(SWITCH);
        switch.add_sysctl("net.ipv4.conf.all.proxy_arp", "1");
        switch.append_startup(startup);
        log::info!("[{SWITCH}] device created");
        Ok(())
    }

    fn attach_host_interface(&mut self) -> Result<Option<String>, ScenarioError> {
        let Some(host_iface) = self.settings.host_interface.as_ref() else {
            log::warn!("[scenario] no host interface specified, external peers cannot connect");
            return Ok(None);
        };
        let link = ExternalLink::parse(host_iface)?;
        self.scenario.attach_external(EXT_FABRIC, link);
        log::info!("[scenario] attached {EXT_FABRIC} to host interface {host_iface}");
        Ok(Some(EXT_FABRIC.to_string()))
    }

    /// Update the running lab after new devices were deployed and removed devices were
    /// undeployed. The switch is connected to the fabric domains of the new devices. Running
    /// devices forget the neighbors of the removed devices and learn those of the new ones,
    /// while new devices receive the full ARP table.
    pub async fn update_interconnection(
        &mut self,
        runtime: &dyn LabRuntime,
        topology: &Topology,
        diff: &Diff,
    ) -> Result<(), ScenarioError> {
        log::info!("[scenario] updating network interconnections");

        let mut delta = diff
            .stale_neighbors
            .iter()
            .map(|ip| format!("ip neigh del {ip} dev eth0"))
            .collect_vec();
        delta.extend(
            arp_pairs(topology, |r| diff.new.contains(&r.name()))
                .map(|(ip, mac)| format!("ip neigh replace {ip} lladdr {mac} dev eth0")),
        );
        let full = arp_pairs(topology, |_| true)
            .map(|(ip, mac)| format!("ip neigh replace {ip} lladdr {mac} dev eth0"))
            .collect_vec();

        let names = self
            .scenario
            .device_names()
            .filter(|n| *n != SWITCH && *n != GATEWAY && !diff.removed.contains(*n))
            .map(str::to_string)
            .collect_vec();
        for name in names {
            let cmds = if diff.new.contains(&name) {
                &full
            } else {
                &delta
            };
            if cmds.is_empty() {
                continue;
            }
            let cmd = format!("/bin/bash -c '{}'", cmds.iter().join("; "));
            let output = runtime.exec(&name, &cmd).await?;
            if !output.success() {
                log::warn!(
                    "[{name}] updating the ARP table exited with {}\n{}",
                    output.exit_code,
                    output.stderr
                );
            }
        }

        let mut switch_cmds = Vec::new();
        for name in diff.new.iter() {
            let cd = fabric_cd(name);
            runtime.connect(SWITCH, &cd).await?;
            let iface = self.scenario.connect(SWITCH, cd, None);
            switch_cmds.push(format!("ip link set eth{iface} master br1"));
        }
        if !switch_cmds.is_empty() {
            let cmd = format!("/bin/bash -c '{}'", switch_cmds.join("; "));
            runtime.exec_checked(SWITCH, &cmd).await?;
            if let Some(switch) = self.scenario.device_mut(SWITCH) {
                switch.append_startup(switch_cmds);
            }
        }

        runtime.save(&self.scenario).await?;
        log::info!("[scenario] network interconnections updated");
        Ok(())
    }

    /// Deploy the whole scenario. Route servers, the switch and the gateway are deployed first,
    /// and all other devices follow in chunks of [`DEPLOY_CHUNK_SIZE`].
    pub async fn deploy_chunks(&self, runtime: &dyn LabRuntime) -> Result<(), ScenarioError> {
        log::info!("[deploy] deploying network scenario");
        let devices: BTreeSet<String> = self.scenario.device_names().map(str::to_string).collect();
        let main_chunk: BTreeSet<String> = devices
            .iter()
            .filter(|n| {
                self.settings.route_servers.contains_key(*n)
                    || n.as_str() == SWITCH
                    || n.as_str() == GATEWAY
            })
            .cloned()
            .collect();
        let total = devices.len();

        self.deploy_devices(runtime, &main_chunk).await?;
        let mut deployed = main_chunk.len();
        log::info!("[deploy] {deployed}/{total} devices");

        let rest = devices.difference(&main_chunk).cloned().collect_vec();
        for chunk in rest.chunks(DEPLOY_CHUNK_SIZE) {
            let chunk: BTreeSet<String> = chunk.iter().cloned().collect();
            self.deploy_devices(runtime, &chunk).await?;
            deployed += chunk.len();
            log::info!("[deploy] {deployed}/{total} devices");
        }

        self.on_deploy().await?;
        log::info!("[deploy] network scenario deployed");
        Ok(())
    }

    /// Deploy the selected devices and wait until all of them are running.
    pub async fn deploy_devices(
        &self,
        runtime: &dyn LabRuntime,
        devices: &BTreeSet<String>,
    ) -> Result<(), ScenarioError> {
        if devices.is_empty() {
            return Ok(());
        }
        log::debug!("[deploy] starting {}", devices.iter().join(", "));
        runtime.deploy(&self.scenario, devices).await?;
        wait_running(runtime, devices).await?;
        Ok(())
    }

    /// Undeploy the selected devices and remove them from the scenario.
    pub async fn undeploy_devices(
        &mut self,
        runtime: &dyn LabRuntime,
        devices: &BTreeSet<String>,
    ) -> Result<(), ScenarioError> {
        if devices.is_empty() {
            return Ok(());
        }
        log::info!("[deploy] undeploying {}", devices.iter().join(", "));
        runtime.undeploy(devices).await?;
        for name in devices {
            self.scenario.remove_device(name);
        }
        Ok(())
    }

    /// Undeploy all running devices, except the given ones.
    pub async fn undeploy(
        &self,
        runtime: &dyn LabRuntime,
        except: &BTreeSet<String>,
    ) -> Result<(), ScenarioError> {
        log::info!("[deploy] undeploying network scenario");
        let running = runtime.running_devices().await?;
        let devices: BTreeSet<String> = running.difference(except).cloned().collect();
        runtime.undeploy(&devices).await?;
        Ok(())
    }

    /// Put the host interface into promiscuous mode.
    async fn on_deploy(&self) -> Result<(), ScenarioError> {
        let Some(iface) = self.settings.host_interface.as_ref() else {
            return Ok(());
        };
        log::info!("[host] setting {iface} to promiscuous mode");
        let mut cmd = Command::new("ip");
        cmd.args(["link", "set", iface.as_str(), "promisc", "on", "up"])
            .kill_on_drop(true);
        log::trace!("[tokio::process::Command] {:?}", cmd);
        let output = cmd.output().await.map_err(LabError::from)?;
        check_output("host", output, || {
            format!("ip link set {iface} promisc on up")
        })?;
        Ok(())
    }

    /// Push configurations into running devices. Files are copied first; `.tar.gz` archives are
    /// extracted into the directory of the same name. Then the command is executed. The first
    /// device whose command fails, or whose output reports an error, aborts the whole batch.
    pub async fn copy_and_exec(
        runtime: &dyn LabRuntime,
        pushes: &BTreeMap<String, ConfigPush>,
    ) -> Result<(), ScenarioError> {
        for (device, push) in pushes {
            log::info!(
                "[{device}] copying {}",
                push.files.keys().join(", ")
            );
            runtime.copy_files(device, &push.files).await?;
            for path in push.files.keys() {
                let Some(dir) = path.strip_suffix(".tar.gz") else {
                    continue;
                };
                let cmd = format!(
                    "/bin/bash -c \"mkdir -p {dir}; tar -xvf {path} -C {dir}; rm -r {path}\""
                );
                log::info!("[{device}] executing {cmd}");
                runtime.exec_checked(device, &cmd).await?;
            }

            log::info!("[{device}] executing {}", push.command);
            let output = runtime.exec(device, &push.command).await?;
            if !output.success() {
                log::warn!(
                    "[{device}] updating the configuration failed with exit code {}\n{}",
                    output.exit_code,
                    output.stderr
                );
                return Err(ScenarioError::PushFailed(device.clone(), output.stderr));
            }
            if (push.has_errors)(&output.stdout, &output.stderr) {
                log::warn!(
                    "[{device}] the configuration has errors\n{}",
                    output.stdout
                );
                return Err(ScenarioError::PushFailed(device.clone(), output.stdout));
            }
            log::info!("[{device}] {} returned\n{}", push.command, output.stdout);
        }
        Ok(())
    }
}

/// Errors while building or updating the network scenario.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// The lab runtime failed
    #[error("{0}")]
    Lab(#[from] LabError),
    /// The route server configuration cannot be read
    #[error("{0}")]
    Vendor(#[from] VendorError),
    /// Nothing to emulate
    #[error("Cannot create the network scenario: no router can be emulated")]
    EmptyTopology,
    /// A router peers in an address family without peering LAN.
    #[error("Device {0} has IPv{1} peerings, but no IPv{1} peering LAN is configured")]
    NoPeeringLan(String, IpVersion),
    /// The backbone has no free addresses left.
    #[error("No free address left in {0}")]
    PoolExhausted(Ipv4Net),
    /// Pushing a configuration into a running device failed.
    #[error("Cannot update the configuration of {0}: {1}")]
    PushFailed(String, String),
}
