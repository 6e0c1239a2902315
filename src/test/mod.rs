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


use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Mutex,
};

use async_trait::async_trait;
use kathara_lab::{ExecOutput, LabError, LabRuntime, LineStream, Scenario};

use crate::{
    dumps::{BirdTableDump, IxpManagerDump, MemberDump, TableDump},
    scenario::{NetworkScenarioManager, RouteServerManager, RpkiManager},
    Settings, Topology,
};

mod config;
mod quarantine;

/// Directory of the test fixtures.
pub(crate) const FILES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/src/test/files");

pub(crate) fn settings() -> Settings {
    Settings::from_json(include_str!("files/settings.json"), FILES).unwrap()
}

/// Topology of `ixp_manager.json` with the routes of `bird_table.txt`.
pub(crate) fn topology() -> Topology {
    let mut topo = IxpManagerDump::default()
        .load_from_str(include_str!("files/ixp_manager.json"))
        .unwrap();
    BirdTableDump
        .load_from_str(&mut topo, include_str!("files/bird_table.txt"))
        .unwrap();
    topo
}

/// Full scenario as built by `start`.
pub(crate) fn full_scenario(s: &Settings, topo: &Topology) -> Scenario {
    let mut manager = NetworkScenarioManager::new(s);
    manager.build(topo).unwrap();
    RouteServerManager::new(s)
        .apply_to_scenario(manager.scenario_mut())
        .unwrap();
    RpkiManager::new(s)
        .apply_to_scenario(manager.scenario_mut())
        .unwrap();
    manager.interconnect(topo).unwrap();
    manager.scenario().clone()
}

/// Lab runtime that keeps the running devices in memory and answers commands from a script.
/// Every call is recorded as a line in [`MockRuntime::calls`].
#[derive(Debug, Default)]
pub(crate) struct MockRuntime {
    running: Mutex<BTreeSet<String>>,
    live: Mutex<Option<Scenario>>,
    outputs: Mutex<Vec<(String, String, ExecOutput)>>,
    streams: Mutex<Vec<(String, String, Vec<String>, i32)>>,
    calls: Mutex<Vec<String>>,
}

impl MockRuntime {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Pretend that the scenario is deployed and running.
    pub(crate) fn with_live(scenario: Scenario) -> Self {
        let rt = Self::default();
        *rt.running.lock().unwrap() = scenario.device_names().map(str::to_string).collect();
        *rt.live.lock().unwrap() = Some(scenario);
        rt
    }

    /// Answer commands on `device` that contain `needle`. Use `*` to match any device. The first
    /// matching rule wins. Unmatched commands succeed without output.
    pub(crate) fn on_exec(
        &self,
        device: &str,
        needle: &str,
        exit_code: i32,
        stdout: &str,
        stderr: &str,
    ) -> &Self {
        self.outputs.lock().unwrap().push((
            device.to_string(),
            needle.to_string(),
            ExecOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                exit_code,
            },
        ));
        self
    }

    /// Stream these lines for commands on `device` that contain `needle`, then exit with
    /// `exit_code`. Unmatched streams exit with `0` without output.
    pub(crate) fn on_stream(
        &self,
        device: &str,
        needle: &str,
        lines: &[&str],
        exit_code: i32,
    ) -> &Self {
        self.streams.lock().unwrap().push((
            device.to_string(),
            needle.to_string(),
            lines.iter().map(|l| l.to_string()).collect(),
            exit_code,
        ));
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded commands executed in a device, in order.
    pub(crate) fn execs(&self, device: &str) -> Vec<String> {
        let prefix = format!("exec {device}: ");
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub(crate) fn running(&self) -> BTreeSet<String> {
        self.running.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn matches(rule_device: &str, needle: &str, device: &str, command: &str) -> bool {
    (rule_device == "*" || rule_device == device) && command.contains(needle)
}

#[async_trait]
impl LabRuntime for MockRuntime {
    async fn deploy(
        &self,
        scenario: &Scenario,
        devices: &BTreeSet<String>,
    ) -> Result<(), LabError> {
        self.record(format!(
            "deploy {}",
            devices.iter().cloned().collect::<Vec<_>>().join(",")
        ));
        for d in devices {
            if !scenario.has_device(d) {
                return Err(LabError::UnknownDevice(d.clone()));
            }
        }
        self.running.lock().unwrap().extend(devices.iter().cloned());
        Ok(())
    }

    async fn save(&self, scenario: &Scenario) -> Result<(), LabError> {
        self.record(format!("save {}", scenario.len()));
        *self.live.lock().unwrap() = Some(scenario.clone());
        Ok(())
    }

    async fn undeploy(&self, devices: &BTreeSet<String>) -> Result<(), LabError> {
        self.record(format!(
            "undeploy {}",
            devices.iter().cloned().collect::<Vec<_>>().join(",")
        ));
        let mut running = self.running.lock().unwrap();
        for d in devices {
            running.remove(d);
        }
        Ok(())
    }

    async fn running_devices(&self) -> Result<BTreeSet<String>, LabError> {
        Ok(self.running())
    }

    async fn get_live_scenario(&self) -> Result<Scenario, LabError> {
        let running = self.running();
        let mut scenario = self
            .live
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Scenario::new("twin"));
        let stopped: Vec<String> = scenario
            .device_names()
            .filter(|d| !running.contains(*d))
            .map(str::to_string)
            .collect();
        for d in stopped {
            scenario.remove_device(&d);
        }
        Ok(scenario)
    }

    async fn connect(&self, device: &str, cd: &str) -> Result<(), LabError> {
        self.record(format!("connect {device} {cd}"));
        Ok(())
    }

    async fn copy_files(
        &self,
        device: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<(), LabError> {
        for path in files.keys() {
            self.record(format!("copy {device}: {path}"));
        }
        Ok(())
    }

    async fn exec(&self, device: &str, command: &str) -> Result<ExecOutput, LabError> {
        self.record(format!("exec {device}: {command}"));
        Ok(self
            .outputs
            .lock()
            .unwrap()
            .iter()
            .find(|(d, n, _)| matches(d, n, device, command))
            .map(|(_, _, o)| o.clone())
            .unwrap_or_default())
    }

    async fn exec_stream(&self, device: &str, command: &str) -> Result<LineStream, LabError> {
        self.record(format!("stream {device}: {command}"));
        let (lines, exit_code) = self
            .streams
            .lock()
            .unwrap()
            .iter()
            .find(|(d, n, _, _)| matches(d, n, device, command))
            .map(|(_, _, l, c)| (l.clone(), *c))
            .unwrap_or_default();
        let (tx, rx) = LineStream::channel();
        for line in lines {
            tx.send(line);
        }
        tx.finish(exit_code);
        Ok(rx)
    }
}
