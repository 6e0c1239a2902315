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

//! This library is the boundary between the IXP digital twin and the Kathara emulator.
//!
//! The network scenario is described by a [`Scenario`], consisting of [`Device`]s that are
//! connected to collision domains. Everything that touches live devices goes through the
//! [`LabRuntime`] trait, which is implemented by [`KatharaRuntime`] by calling the `kathara`
//! command line tool. The trait is the only thing the digital twin depends on, which allows
//! replacing the runtime in tests.
//!
//! All commands executed in a device are opaque shell strings. Their exit code, `STDOUT` and
//! `STDERR` are returned as an [`ExecOutput`] without interpreting them, except for
//! [`LabRuntime::exec_checked`] which requires a zero exit code.

#![deny(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

mod kathara;
pub mod scenario;

pub use kathara::{check_output, KatharaRuntime};
pub use scenario::{Device, DeviceMeta, ExternalLink, Interface, Scenario};

#[cfg(test)]
mod test;

/// Output of a command executed in a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Everything written to `STDOUT`
    pub stdout: String,
    /// Everything written to `STDERR`
    pub stderr: String,
    /// Exit code of the command. Commands terminated by a signal report `-1`.
    pub exit_code: i32,
}

impl ExecOutput {
    /// Returns `true` if the exit code is zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Lines of a streamed command, followed by its exit code. No more lines are received once the
/// command terminates.
#[derive(Debug)]
pub struct LineStream {
    lines: mpsc::UnboundedReceiver<String>,
    exit_code: oneshot::Receiver<i32>,
}

/// Sending half of a [`LineStream`].
#[derive(Debug)]
pub struct LineSender {
    lines: mpsc::UnboundedSender<String>,
    exit_code: oneshot::Sender<i32>,
}

impl LineStream {
    /// Create a connected sender and stream.
    pub fn channel() -> (LineSender, LineStream) {
        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        (
            LineSender {
                lines: lines_tx,
                exit_code: exit_tx,
            },
            LineStream {
                lines: lines_rx,
                exit_code: exit_rx,
            },
        )
    }

    /// Receive the next line, or `None` once the command has terminated.
    pub async fn recv(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Exit code of the command. Waits until the command terminated. A command whose exit code
    /// is unknown reports `-1`.
    pub async fn exit_code(self) -> i32 {
        self.exit_code.await.unwrap_or(-1)
    }
}

impl LineSender {
    /// Send a line. Returns `false` if the stream was dropped.
    pub fn send(&self, line: impl Into<String>) -> bool {
        self.lines.send(line.into()).is_ok()
    }

    /// Close the stream with the exit code of the command.
    pub fn finish(self, exit_code: i32) {
        let LineSender { lines, exit_code: tx } = self;
        drop(lines);
        // the stream may already be gone
        tx.send(exit_code).ok();
    }
}

/// Operations on a running network scenario.
#[async_trait]
pub trait LabRuntime: Send + Sync {
    /// Deploy the selected devices of the scenario. The scenario is written to the lab first, such
    /// that the runtime knows about all devices, interfaces and boot scripts.
    async fn deploy(&self, scenario: &Scenario, devices: &BTreeSet<String>)
        -> Result<(), LabError>;

    /// Write the scenario description to the lab without starting or stopping any device.
    async fn save(&self, scenario: &Scenario) -> Result<(), LabError>;

    /// Stop and remove the selected devices.
    async fn undeploy(&self, devices: &BTreeSet<String>) -> Result<(), LabError>;

    /// Names of all devices that are currently running.
    async fn running_devices(&self) -> Result<BTreeSet<String>, LabError>;

    /// Read the scenario of the running lab. Devices that are described in the lab, but not
    /// running, are dropped.
    async fn get_live_scenario(&self) -> Result<Scenario, LabError>;

    /// Connect a running device to a collision domain. This creates a new interface on that
    /// device.
    async fn connect(&self, device: &str, cd: &str) -> Result<(), LabError>;

    /// Copy files into a running device. The map goes from the absolute guest path to the file
    /// content.
    async fn copy_files(
        &self,
        device: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<(), LabError>;

    /// Execute a command in a device and wait for it to finish.
    async fn exec(&self, device: &str, command: &str) -> Result<ExecOutput, LabError>;

    /// Execute a command in a device and stream its `STDOUT` line by line. The exit code is
    /// available from the stream once all lines are received.
    async fn exec_stream(&self, device: &str, command: &str) -> Result<LineStream, LabError>;

    /// Execute a command and require a zero exit code.
    async fn exec_checked(&self, device: &str, command: &str) -> Result<ExecOutput, LabError> {
        let output = self.exec(device, command).await?;
        if output.success() {
            Ok(output)
        } else {
            log::error!(
                "[{}] {} exited with exit code {}{}",
                device,
                command,
                output.exit_code,
                if output.stderr.is_empty() {
                    String::new()
                } else {
                    format!("\nSTDERR:\n{}", output.stderr)
                }
            );
            Err(LabError::CommandError(
                device.to_string(),
                command.to_string(),
                output.exit_code,
            ))
        }
    }
}

/// Errors of the lab runtime.
#[derive(Debug, Error)]
pub enum LabError {
    /// I/O error, either when spawning a process or when accessing the lab directory.
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
    /// A command returned a non-zero exit code.
    #[error("Non-zero exit code of command {1} on {0}: {2}")]
    CommandError(String, String, i32),
    /// A line of `lab.conf` cannot be parsed.
    #[error("Invalid line {0} in lab.conf: {1}")]
    LabConfSyntax(usize, String),
    /// An external link is not of the form `iface` or `iface.vlan`.
    #[error("Invalid external link: {0}")]
    InvalidExternalLink(String),
    /// The device does not exist in the scenario.
    #[error("Unknown device: {0}")]
    UnknownDevice(String),
}

impl LabError {
    /// Return the status code if the error was a [`LabError::CommandError`]. Otherwise, return
    /// `None`.
    pub fn status(&self) -> Option<i32> {
        if let LabError::CommandError(_, _, status) = self {
            Some(*status)
        } else {
            None
        }
    }
}
