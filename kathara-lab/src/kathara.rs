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

//! Runtime that controls the lab through the `kathara` command line tool.

use std::{
    collections::{BTreeMap, BTreeSet},
    ffi::OsStr,
    path::{Path, PathBuf},
    process::{Output, Stdio},
};

use async_trait::async_trait;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
};

use crate::{ExecOutput, LabError, LabRuntime, LineStream, Scenario};

lazy_static! {
    static ref NAME_TOKEN: Regex = Regex::new(r"[\w\-]+").unwrap();
}

/// Folder inside the shared lab folder used to stage files before copying them into a device.
const STAGING: &str = ".staging";

/// Lab runtime backed by the `kathara` binary. The lab lives in a single directory, which is
/// written on every deployment.
#[derive(Debug, Clone)]
pub struct KatharaRuntime {
    /// Directory of the lab
    lab_dir: PathBuf,
    /// Name or path of the `kathara` binary
    bin: String,
}

impl KatharaRuntime {
    /// Create a new runtime operating on the lab in `lab_dir`.
    pub fn new(lab_dir: impl Into<PathBuf>) -> Self {
        Self {
            lab_dir: lab_dir.into(),
            bin: String::from("kathara"),
        }
    }

    /// Use a different `kathara` binary.
    pub fn with_binary(mut self, bin: impl Into<String>) -> Self {
        self.bin = bin.into();
        self
    }

    /// Directory of the lab.
    pub fn lab_dir(&self) -> &Path {
        &self.lab_dir
    }

    /// Create a `kathara` command for the given subcommand, operating on the lab directory. The
    /// child is killed once the command is dropped.
    fn command(&self, subcommand: &str, args: &[impl AsRef<OsStr>]) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg(subcommand)
            .arg("-d")
            .arg(&self.lab_dir)
            .args(args)
            .kill_on_drop(true);
        log::trace!("[tokio::process::Command] {:?}", cmd);
        cmd
    }

    /// Run a `kathara` subcommand and check its exit code.
    async fn run(
        &self,
        subcommand: &str,
        args: &[impl AsRef<OsStr>],
    ) -> Result<(String, String), LabError> {
        let cmd_str = || {
            format!(
                "kathara {subcommand} {}",
                args.iter().map(|a| a.as_ref().to_string_lossy()).join(" ")
            )
        };
        let output = match self.command(subcommand, args).output().await {
            Ok(out) => out,
            Err(e) => {
                log::error!("[kathara] {} failed: {}", cmd_str(), e);
                Err(e)?
            }
        };
        check_output("kathara", output, cmd_str)
    }

    fn staging_dir(&self, device: &str) -> PathBuf {
        self.lab_dir.join("shared").join(STAGING).join(device)
    }

    /// Write the files into the staging directory on the shared volume and copy them into the
    /// device from there.
    async fn copy_staged(
        &self,
        device: &str,
        files: &BTreeMap<String, String>,
        staging: &Path,
    ) -> Result<(), LabError> {
        for (path, content) in files {
            log::trace!("[{device}] Write file {path}");
            let rel = path.trim_start_matches('/');
            let host_path = staging.join(rel);
            if let Some(parent) = host_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&host_path, content).await?;

            let guest_dir = Path::new(path)
                .parent()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|| String::from("/"));
            let cmd = format!(
                "/bin/sh -c \"mkdir -p {guest_dir} && cp /shared/{STAGING}/{device}/{rel} {path}\""
            );
            self.exec_checked(device, &cmd).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl LabRuntime for KatharaRuntime {
    async fn deploy(
        &self,
        scenario: &Scenario,
        devices: &BTreeSet<String>,
    ) -> Result<(), LabError> {
        if devices.is_empty() {
            return Ok(());
        }
        scenario.render(&self.lab_dir).await?;
        log::debug!("[kathara] deploy {}", devices.iter().join(", "));
        let mut args = vec!["--noterminals"];
        args.extend(devices.iter().map(String::as_str));
        self.run("lstart", &args).await.map(|_| ())
    }

    async fn save(&self, scenario: &Scenario) -> Result<(), LabError> {
        log::debug!("[kathara] writing lab {}", scenario.name());
        scenario.render(&self.lab_dir).await
    }

    async fn undeploy(&self, devices: &BTreeSet<String>) -> Result<(), LabError> {
        if devices.is_empty() {
            return Ok(());
        }
        log::debug!("[kathara] undeploy {}", devices.iter().join(", "));
        let args = devices.iter().map(String::as_str).collect_vec();
        self.run("lclean", &args).await.map(|_| ())
    }

    async fn running_devices(&self) -> Result<BTreeSet<String>, LabError> {
        let lab = Scenario::from_dir(&self.lab_dir).await?;
        if lab.is_empty() {
            return Ok(BTreeSet::new());
        }
        let (stdout, _) = self.run("linfo", &[] as &[&str]).await?;
        let tokens: BTreeSet<&str> = NAME_TOKEN.find_iter(&stdout).map(|m| m.as_str()).collect();
        Ok(lab
            .device_names()
            .filter(|name| tokens.contains(name))
            .map(str::to_string)
            .collect())
    }

    async fn get_live_scenario(&self) -> Result<Scenario, LabError> {
        let mut lab = Scenario::from_dir(&self.lab_dir).await?;
        let running = self.running_devices().await?;
        let stopped = lab
            .device_names()
            .filter(|name| !running.contains(*name))
            .map(str::to_string)
            .collect_vec();
        for name in stopped {
            lab.remove_device(&name);
        }
        Ok(lab)
    }

    async fn connect(&self, device: &str, cd: &str) -> Result<(), LabError> {
        log::debug!("[{device}] connect to {cd}");
        self.run("lconfig", &["-n", device, "--add", cd])
            .await
            .map(|_| ())
    }

    async fn copy_files(
        &self,
        device: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<(), LabError> {
        if files.is_empty() {
            return Ok(());
        }
        let staging = self.staging_dir(device);
        let result = self.copy_staged(device, files, &staging).await;
        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            log::warn!("[{device}] cannot remove {}: {e}", staging.display());
        }
        result
    }

    async fn exec(&self, device: &str, command: &str) -> Result<ExecOutput, LabError> {
        log::trace!("[{device}] `{command}`");
        let output = self.command("exec", &[device, command]).output().await?;
        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn exec_stream(&self, device: &str, command: &str) -> Result<LineStream, LabError> {
        log::trace!("[{device}] `{command}` (streamed)");
        let mut child = self
            .command("exec", &[device, command])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdout = child.stdout.take().ok_or_else(|| {
            LabError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "Cannot capture stdout of the streamed command",
            ))
        })?;

        let (tx, rx) = LineStream::channel();
        let device = device.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        // receiver is gone, stop reading
                        if !tx.send(line) {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("[{device}] error while reading the stream: {e}");
                        break;
                    }
                }
            }
            let exit_code = match child.wait().await {
                Ok(status) => {
                    log::trace!("[{device}] streamed command exited with {status}");
                    status.code().unwrap_or(-1)
                }
                Err(e) => {
                    log::warn!("[{device}] cannot wait for streamed command: {e}");
                    -1
                }
            };
            tx.finish(exit_code);
        });

        Ok(rx)
    }
}

/// Check the output for successful exit code, and return `STDOUT` and `STDERR`.
pub fn check_output<F, S>(host: &str, output: Output, cmd: F) -> Result<(String, String), LabError>
where
    F: FnOnce() -> S,
    S: std::fmt::Display,
{
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if output.status.success() {
        Ok((stdout, stderr))
    } else {
        let cmd = cmd().to_string();
        log::error!(
            "[{}] {} exited with exit code {}{}{}",
            host,
            cmd,
            output.status.code().unwrap_or_default(),
            if !stdout.is_empty() {
                format!("\nSTDOUT:\n{stdout}")
            } else {
                String::new()
            },
            if !stderr.is_empty() {
                format!("\nSTDERR:\n{stderr}")
            } else {
                String::new()
            }
        );
        Err(LabError::CommandError(
            host.to_string(),
            cmd,
            output.status.code().unwrap_or_default(),
        ))
    }
}
