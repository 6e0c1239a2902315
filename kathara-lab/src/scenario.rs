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

//! In-memory description of a Kathara network scenario, and its on-disk lab directory format.
//!
//! A [`Scenario`] is a set of [`Device`]s, each attached to one or more collision domains. It is
//! rendered into a lab directory with [`Scenario::render`]:
//!
//! - `lab.conf` with one `dev[N]="cd/mac"` line per interface and the device meta
//!   (`image`, `ipv6`, `sysctl`, `bridged`),
//! - `lab.ext` with the collision domains attached to host interfaces,
//! - `<dev>.startup` with the boot script of each device,
//! - `<dev>/...` with the files copied into each device on startup.
//!
//! [`Scenario::from_dir`] reads the topology part back (everything except the device files).

use std::{
    collections::{BTreeMap, BTreeSet},
    io::ErrorKind,
    path::Path,
};

use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;

use crate::LabError;

lazy_static! {
    static ref LAB_CONF_LINE: Regex = Regex::new(r#"^([\w\-]+)\[([\w\-]+)\]="?([^"]*)"?$"#).unwrap();
}

/// Interface of a device, connected to a collision domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Interface {
    /// Collision domain name
    pub cd: String,
    /// MAC address of the interface, if fixed.
    pub mac: Option<String>,
}

/// Host interface attached to a collision domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternalLink {
    /// Name of the interface on the host
    pub iface: String,
    /// VLAN tag, if the link is tagged.
    pub vlan: Option<u16>,
}

impl ExternalLink {
    /// Parse `iface` or `iface.vlan`.
    pub fn parse(s: &str) -> Result<Self, LabError> {
        match s.split_once('.') {
            Some((iface, vlan)) => Ok(Self {
                iface: iface.to_string(),
                vlan: Some(
                    vlan.parse()
                        .map_err(|_| LabError::InvalidExternalLink(s.to_string()))?,
                ),
            }),
            None => Ok(Self {
                iface: s.to_string(),
                vlan: None,
            }),
        }
    }
}

impl std::fmt::Display for ExternalLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.vlan {
            Some(vlan) => write!(f, "{}.{}", self.iface, vlan),
            None => f.write_str(&self.iface),
        }
    }
}

/// Meta information of a device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceMeta {
    /// Container image. If not set, the default image of the runtime is used.
    pub image: Option<String>,
    /// Enable IPv6 forwarding on the device.
    pub ipv6: bool,
    /// Connect the device to the host bridge.
    pub bridged: bool,
    /// Additional sysctls
    pub sysctls: BTreeMap<String, String>,
}

/// A device of the scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    name: String,
    interfaces: Vec<Interface>,
    startup: Vec<String>,
    files: BTreeMap<String, String>,
    meta: DeviceMeta,
}

impl Device {
    /// Create an empty device.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interfaces: Vec::new(),
            startup: Vec::new(),
            files: BTreeMap::new(),
            meta: DeviceMeta::default(),
        }
    }

    /// Name of the device.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Interfaces, where the index is the interface number (`eth{idx}`).
    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    /// Lines of the boot script.
    pub fn startup(&self) -> &[String] {
        &self.startup
    }

    /// Files copied into the device, mapping the absolute guest path to its content.
    pub fn files(&self) -> &BTreeMap<String, String> {
        &self.files
    }

    /// Get the device meta.
    pub fn meta(&self) -> &DeviceMeta {
        &self.meta
    }

    /// Get the device meta mutably.
    pub fn meta_mut(&mut self) -> &mut DeviceMeta {
        &mut self.meta
    }

    /// Container image of the device, if set.
    pub fn image(&self) -> Option<&str> {
        self.meta.image.as_deref()
    }

    /// Set the container image.
    pub fn set_image(&mut self, image: impl Into<String>) {
        self.meta.image = Some(image.into());
    }

    /// Whether IPv6 forwarding is enabled.
    pub fn is_ipv6(&self) -> bool {
        self.meta.ipv6
    }

    /// Add a sysctl of the form `key=value`.
    pub fn add_sysctl(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.meta.sysctls.insert(key.into(), value.into());
    }

    /// Append lines to the boot script.
    pub fn append_startup<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.startup.extend(lines.into_iter().map(Into::into));
    }

    /// Add (or replace) a file at the given guest path.
    pub fn add_file(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    /// Return the interface number that is attached to `cd`.
    pub fn iface_on(&self, cd: &str) -> Option<usize> {
        self.interfaces.iter().position(|i| i.cd == cd)
    }
}

/// A network scenario, consisting of devices and collision domains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    name: String,
    devices: BTreeMap<String, Device>,
    external: BTreeMap<String, BTreeSet<ExternalLink>>,
}

impl Scenario {
    /// Create an empty scenario.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            devices: BTreeMap::new(),
            external: BTreeMap::new(),
        }
    }

    /// Name of the scenario.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the device or create a new one with that name.
    pub fn new_device(&mut self, name: impl Into<String>) -> &mut Device {
        let name = name.into();
        self.devices
            .entry(name.clone())
            .or_insert_with(|| Device::new(name))
    }

    /// Check whether a device exists.
    pub fn has_device(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    /// Get a device
    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }

    /// Get a device mutably
    pub fn device_mut(&mut self, name: &str) -> Option<&mut Device> {
        self.devices.get_mut(name)
    }

    /// Remove a device from the scenario.
    pub fn remove_device(&mut self, name: &str) -> Option<Device> {
        self.devices.remove(name)
    }

    /// Iterate over all devices, ordered by name.
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// Iterate over all device names, ordered.
    pub fn device_names(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    /// Number of devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the scenario contains no devices.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Connect a device to a collision domain, creating the device if necessary. Returns the
    /// interface number of the new interface.
    pub fn connect(&mut self, device: &str, cd: impl Into<String>, mac: Option<String>) -> usize {
        let device = self.new_device(device);
        device.interfaces.push(Interface {
            cd: cd.into(),
            mac,
        });
        device.interfaces.len() - 1
    }

    /// Attach a collision domain to a host interface.
    pub fn attach_external(&mut self, cd: impl Into<String>, link: ExternalLink) {
        self.external.entry(cd.into()).or_default().insert(link);
    }

    /// Host interfaces attached to collision domains.
    pub fn external_links(&self) -> &BTreeMap<String, BTreeSet<ExternalLink>> {
        &self.external
    }

    /// All collision domains, with the devices (and their interface number) attached to them.
    pub fn collision_domains(&self) -> BTreeMap<&str, Vec<(&str, usize)>> {
        let mut cds: BTreeMap<&str, Vec<(&str, usize)>> = BTreeMap::new();
        for cd in self.external.keys() {
            cds.entry(cd.as_str()).or_default();
        }
        for device in self.devices.values() {
            for (num, iface) in device.interfaces.iter().enumerate() {
                cds.entry(iface.cd.as_str())
                    .or_default()
                    .push((device.name(), num));
            }
        }
        cds
    }

    /// Render the `lab.conf` file.
    pub fn lab_conf(&self) -> String {
        let mut lines = vec![format!("LAB_DESCRIPTION=\"{}\"", self.name)];
        for device in self.devices.values() {
            let name = device.name();
            for (num, iface) in device.interfaces.iter().enumerate() {
                match iface.mac.as_ref() {
                    Some(mac) => lines.push(format!("{name}[{num}]=\"{}/{mac}\"", iface.cd)),
                    None => lines.push(format!("{name}[{num}]=\"{}\"", iface.cd)),
                }
            }
            if let Some(image) = device.image() {
                lines.push(format!("{name}[image]=\"{image}\""));
            }
            if device.meta.ipv6 {
                lines.push(format!("{name}[ipv6]=\"true\""));
            }
            if device.meta.bridged {
                lines.push(format!("{name}[bridged]=\"true\""));
            }
            for (key, value) in device.meta.sysctls.iter() {
                lines.push(format!("{name}[sysctl]=\"{key}={value}\""));
            }
        }
        lines.push(String::new());
        lines.join("\n")
    }

    /// Render the `lab.ext` file.
    pub fn lab_ext(&self) -> String {
        self.external
            .iter()
            .flat_map(|(cd, links)| links.iter().map(move |l| format!("{cd} {l}\n")))
            .collect()
    }

    /// Write the scenario into the lab directory. Existing device folders of devices in the
    /// scenario are replaced.
    pub async fn render(&self, dir: impl AsRef<Path>) -> Result<(), LabError> {
        let dir = dir.as_ref();
        log::debug!("[{}] render lab into {}", self.name, dir.display());
        tokio::fs::create_dir_all(dir.join("shared")).await?;
        tokio::fs::write(dir.join("lab.conf"), self.lab_conf()).await?;
        if self.external.is_empty() {
            match tokio::fs::remove_file(dir.join("lab.ext")).await {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(e)?,
                _ => {}
            }
        } else {
            tokio::fs::write(dir.join("lab.ext"), self.lab_ext()).await?;
        }

        for device in self.devices.values() {
            let mut startup = device.startup.join("\n");
            startup.push('\n');
            tokio::fs::write(dir.join(format!("{}.startup", device.name)), startup).await?;

            let device_dir = dir.join(&device.name);
            match tokio::fs::remove_dir_all(&device_dir).await {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(e)?,
                _ => {}
            }
            for (path, content) in device.files.iter() {
                let host_path = device_dir.join(path.trim_start_matches('/'));
                if let Some(parent) = host_path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(host_path, content).await?;
            }
        }
        Ok(())
    }

    /// Parse a `lab.conf` (and optionally a `lab.ext`) into a scenario without boot scripts
    /// and files.
    pub fn parse_lab_conf(
        name: impl Into<String>,
        lab_conf: &str,
        lab_ext: Option<&str>,
    ) -> Result<Self, LabError> {
        let mut scenario = Self::new(name);
        let mut ifaces: BTreeMap<String, BTreeMap<usize, Interface>> = BTreeMap::new();

        for (idx, line) in lab_conf.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("LAB_") {
                continue;
            }
            let caps = LAB_CONF_LINE
                .captures(line)
                .ok_or_else(|| LabError::LabConfSyntax(idx + 1, line.to_string()))?;
            let (device, key, value) = (&caps[1], &caps[2], &caps[3]);
            scenario.new_device(device);

            if let Ok(num) = key.parse::<usize>() {
                let (cd, mac) = match value.split_once('/') {
                    Some((cd, mac)) => (cd.to_string(), Some(mac.to_string())),
                    None => (value.to_string(), None),
                };
                ifaces
                    .entry(device.to_string())
                    .or_default()
                    .insert(num, Interface { cd, mac });
                continue;
            }

            // the device was created above.
            let Some(device) = scenario.device_mut(device) else {
                continue;
            };
            match key {
                "image" => device.meta.image = Some(value.to_string()),
                "ipv6" => device.meta.ipv6 = value == "true",
                "bridged" => device.meta.bridged = value == "true",
                "sysctl" => {
                    let (k, v) = value
                        .split_once('=')
                        .ok_or_else(|| LabError::LabConfSyntax(idx + 1, line.to_string()))?;
                    device.add_sysctl(k, v);
                }
                _ => log::trace!("[{}] ignore unknown meta `{key}`", device.name),
            }
        }

        for (device, ifaces) in ifaces {
            if let Some(device) = scenario.device_mut(&device) {
                device.interfaces = ifaces.into_values().collect_vec();
            }
        }

        for line in lab_ext.unwrap_or_default().lines() {
            if let Some((cd, link)) = line.trim().split_once(char::is_whitespace) {
                scenario.attach_external(cd, ExternalLink::parse(link.trim())?);
            }
        }

        Ok(scenario)
    }

    /// Read a lab directory, including the boot scripts of all devices. The scenario name is
    /// the name of the directory.
    pub async fn from_dir(dir: impl AsRef<Path>) -> Result<Self, LabError> {
        let dir = dir.as_ref();
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let lab_conf = match tokio::fs::read_to_string(dir.join("lab.conf")).await {
            Ok(s) => s,
            // a lab that was never rendered is empty
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::new(name)),
            Err(e) => Err(e)?,
        };
        let lab_ext = match tokio::fs::read_to_string(dir.join("lab.ext")).await {
            Ok(s) => Some(s),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => Err(e)?,
        };
        let mut scenario = Self::parse_lab_conf(name, &lab_conf, lab_ext.as_deref())?;

        for device in scenario.devices.values_mut() {
            let path = dir.join(format!("{}.startup", device.name));
            match tokio::fs::read_to_string(path).await {
                Ok(s) => device.startup = s.lines().map(str::to_string).collect(),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => Err(e)?,
            }
        }

        Ok(scenario)
    }
}
