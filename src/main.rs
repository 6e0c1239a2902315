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
    collections::BTreeSet,
    net::{Ipv4Addr, Ipv6Addr},
    path::PathBuf,
};

use clap::{Parser, Subcommand};
use kathara_lab::{KatharaRuntime, LabRuntime};

use ixp_twin::{
    config::{ConfigError, SETTINGS_ENV},
    frr::FrrConfigurator,
    model::{find_router, truncate, IpVersion},
    quarantine::{ActionManager, Candidate, QuarantineContext, QuarantineError, Status},
    rib_diff::{RibDiff, RibDump},
    scenario::{NetworkScenarioManager, RouteServerManager, RpkiManager},
    IxpTwinError, Settings, Topology,
};

/// Digital twin of an Internet Exchange Point.
#[derive(Debug, Parser)]
struct Cli {
    /// Settings file of the deployment.
    #[clap(long, short, env = SETTINGS_ENV)]
    settings: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build the network scenario from the dumps and deploy it from scratch.
    Start {
        /// Only emulate the first N ASes.
        #[clap(long)]
        max_devices: Option<usize>,
    },
    /// Update the running network scenario to the current dumps.
    Reload {
        /// Only push the route server and RPKI configuration.
        #[clap(long)]
        rs_only: bool,
        /// Only emulate the first N ASes.
        #[clap(long)]
        max_devices: Option<usize>,
    },
    /// Verify a candidate participant against the running network scenario.
    Check {
        /// AS number of the candidate
        #[clap(long)]
        asn: Option<u32>,
        /// MAC address of the candidate
        #[clap(long)]
        mac: Option<String>,
        /// IPv4 address of the candidate on the peering LAN
        #[clap(long)]
        ipv4: Option<Ipv4Addr>,
        /// IPv6 address of the candidate on the peering LAN
        #[clap(long)]
        ipv6: Option<Ipv6Addr>,
        /// Checks to skip, comma separated.
        #[clap(long, value_delimiter = ',')]
        exclude_checks: Vec<String>,
        /// Show findings up to this level (0: errors, 1: successes, 2: warnings).
        #[clap(long, default_value_t = 2)]
        result_level: u8,
        /// Run only this check.
        #[clap(long)]
        action: Option<String>,
    },
    /// Print the generated bgpd.conf of a participant router.
    FrrConfig {
        /// Device name (`as<asn>_<router id>`)
        #[clap(long)]
        device: String,
    },
    /// Compare the table dump with the RIB of a running device.
    RibDiff {
        /// Device to query
        #[clap(long)]
        device: String,
        /// Address family of the table dump
        #[clap(long, default_value = "4")]
        version: IpVersion,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_timed();

    let args = Cli::parse();
    let settings = Settings::load(args.settings.ok_or(ConfigError::NoSettings)?)?;

    if let Command::FrrConfig { device } = &args.command {
        let topology = load_topology(&settings, None)?;
        let router = find_router(&topology, device)
            .ok_or_else(|| format!("No router named {device} in the topology"))?;
        print!("{}", FrrConfigurator::new(&settings).bgpd_config(router));
        return Ok(());
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async move {
            let runtime = KatharaRuntime::new(settings.lab_dir());
            match args.command {
                Command::Start { max_devices } => start(&settings, &runtime, max_devices).await?,
                Command::Reload {
                    rs_only,
                    max_devices,
                } => reload(&settings, &runtime, rs_only, max_devices).await?,
                Command::Check {
                    asn,
                    mac,
                    ipv4,
                    ipv6,
                    exclude_checks,
                    result_level,
                    action,
                } => {
                    let candidate = Candidate::new(asn, mac.as_deref(), ipv4, ipv6)?;
                    let passed = check(
                        &settings,
                        &runtime,
                        &candidate,
                        &exclude_checks,
                        Status::from(result_level),
                        action.as_deref(),
                    )
                    .await?;
                    if !passed {
                        return Err(format!("AS{} did not pass the checks", candidate.asn).into());
                    }
                }
                Command::RibDiff { device, version } => {
                    let path = settings
                        .rib_dumps
                        .dumps
                        .get(&version)
                        .ok_or_else(|| format!("No IPv{version} table dump configured"))?;
                    let expected = RibDump::load_from_file(settings.resolve(path))?;
                    let actual = RibDump::live(&runtime, &device).await?;
                    let diff = RibDiff::new(&expected, &actual);
                    println!("{}", serde_json::to_string_pretty(&diff)?);
                }
                Command::FrrConfig { .. } => {}
            }
            Ok::<(), Box<dyn std::error::Error>>(())
        })?;

    Ok(())
}

/// Parse the member dump and the table dumps of all address families.
fn load_topology(
    settings: &Settings,
    max_devices: Option<usize>,
) -> Result<Topology, IxpTwinError> {
    let path = settings.resolve(&settings.peering_configuration.path);
    log::info!("[dump] reading member dump {}", path.display());
    let mut topology = settings.peering_configuration.kind.load_from_file(&path)?;
    for (version, path) in settings.rib_dumps.dumps.iter() {
        let path = settings.resolve(path);
        log::info!("[dump] reading IPv{version} table dump {}", path.display());
        let routes = settings
            .rib_dumps
            .kind
            .load_from_file(&mut topology, &path)?;
        log::info!("[dump] {routes} IPv{version} routes attached");
    }
    if let Some(max) = max_devices {
        truncate(&mut topology, max);
    }
    Ok(topology)
}

async fn start(
    settings: &Settings,
    runtime: &dyn LabRuntime,
    max_devices: Option<usize>,
) -> Result<(), IxpTwinError> {
    let topology = load_topology(settings, max_devices)?;

    let mut manager = NetworkScenarioManager::new(settings);
    manager.build(&topology)?;
    FrrConfigurator::new(settings).apply_to_scenario(manager.scenario_mut(), &topology);
    RouteServerManager::new(settings).apply_to_scenario(manager.scenario_mut())?;
    RpkiManager::new(settings).apply_to_scenario(manager.scenario_mut())?;
    manager.interconnect(&topology)?;

    manager.undeploy(runtime, &BTreeSet::new()).await?;
    manager.deploy_chunks(runtime).await?;
    Ok(())
}

async fn reload(
    settings: &Settings,
    runtime: &dyn LabRuntime,
    rs_only: bool,
    max_devices: Option<usize>,
) -> Result<(), IxpTwinError> {
    let topology = load_topology(settings, max_devices)?;
    let mut manager = NetworkScenarioManager::new(settings);

    if rs_only {
        manager.get(runtime).await?;
    } else {
        let diff = manager.build_diff(&topology, runtime).await?;
        FrrConfigurator::new(settings).apply_to_devices(
            manager.scenario_mut(),
            &topology,
            &diff.new,
        );
        manager.deploy_devices(runtime, &diff.new).await?;
        manager.undeploy_devices(runtime, &diff.removed).await?;
        manager
            .update_interconnection(runtime, &topology, &diff)
            .await?;
    }

    let scenario = manager.scenario();
    let mut pushes = RouteServerManager::new(settings).device_info(scenario)?;
    pushes.extend(RpkiManager::new(settings).device_info(scenario));
    if !rs_only {
        pushes.extend(FrrConfigurator::new(settings).device_info(scenario, &topology));
    }
    NetworkScenarioManager::copy_and_exec(runtime, &pushes).await?;
    log::info!("[reload] configuration of {} devices updated", pushes.len());
    Ok(())
}

async fn check(
    settings: &Settings,
    runtime: &dyn LabRuntime,
    candidate: &Candidate,
    exclude: &[String],
    level: Status,
    action: Option<&str>,
) -> Result<bool, IxpTwinError> {
    let topology = load_topology(settings, None)?;
    let mut manager = NetworkScenarioManager::new(settings);
    manager.get(runtime).await?;
    if manager.scenario().is_empty() {
        return Err(QuarantineError::NotRunning.into());
    }

    let ctx = QuarantineContext {
        runtime,
        scenario: manager.scenario(),
        topology: &topology,
        settings,
    };
    let actions = ActionManager::new(settings, exclude)?;
    let results = match action {
        Some(name) => vec![actions.run_action_by_name(&ctx, name, candidate).await?],
        None => {
            let results = actions.check(&ctx, candidate).await;
            for check in actions.checks() {
                check.clean(&ctx).await;
            }
            results
        }
    };

    for result in results.iter() {
        print!("{}", result.render(level));
    }
    Ok(results.iter().all(|r| r.passed()))
}
