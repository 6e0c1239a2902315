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

//! Verification of a candidate participant before it is admitted to the exchange.
//!
//! Each [`Check`] runs commands on the route servers of the emulated exchange (or on a probe
//! device) and grades its findings in an [`ActionResult`]. The [`ActionManager`] holds the ordered
//! list of enabled checks and runs all of them, or a single one by name.

use std::{
    fmt::{Display, Write},
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

use kathara_lab::{LabRuntime, Scenario};
use thiserror::Error;

use crate::{
    config::{RouteServer, Settings},
    model::{IpVersion, MacAddr, ModelError, Topology},
};

mod bgp;
mod connectivity;
mod security;

pub use security::{is_unauthorized, PROBE_DEVICE, PROBE_IMAGE};

/// Grade of a single finding. Lower values are more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Status {
    /// The candidate violates the policy.
    Error = 0,
    /// The candidate complies with the policy.
    Success = 1,
    /// Something could not be checked.
    Warning = 2,
}

impl From<u8> for Status {
    /// Levels above 2 show all findings.
    fn from(level: u8) -> Self {
        match level {
            0 => Self::Error,
            1 => Self::Success,
            _ => Self::Warning,
        }
    }
}

/// A single finding of a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultEntry {
    /// Grade
    pub status: Status,
    /// Human readable reason
    pub reason: String,
    /// Raw data supporting the finding
    pub data: Option<String>,
}

/// All findings of one check invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    /// Check that produced the result
    pub action: Check,
    /// Findings, in the order they were made.
    pub entries: Vec<ResultEntry>,
}

impl ActionResult {
    /// Create an empty result.
    pub fn new(action: Check) -> Self {
        Self {
            action,
            entries: Vec::new(),
        }
    }

    /// Add a finding
    pub fn add(&mut self, status: Status, reason: impl Into<String>, data: Option<String>) {
        self.entries.push(ResultEntry {
            status,
            reason: reason.into(),
            data,
        });
    }

    /// Add an error without data.
    pub fn error(&mut self, reason: impl Into<String>) {
        self.add(Status::Error, reason, None)
    }

    /// Add a success without data.
    pub fn success(&mut self, reason: impl Into<String>) {
        self.add(Status::Success, reason, None)
    }

    /// The check passed if no finding is an error. A result without findings passes.
    pub fn passed(&self) -> bool {
        !self.entries.iter().any(|e| e.status == Status::Error)
    }

    /// Render all findings with a status of at most `level`, one per line.
    pub fn render(&self, level: Status) -> String {
        let mut s = String::new();
        for entry in self.entries.iter().filter(|e| e.status <= level) {
            let _ = write!(s, "[{}] {}", self.action.display_name(), entry.reason);
            if let Some(data) = entry.data.as_ref() {
                let _ = write!(s, "\nDetails:\n{data}");
            }
            s.push('\n');
        }
        s
    }

    /// Log all findings with a status of at most `level`.
    pub fn log(&self, level: Status) {
        for entry in self.entries.iter().filter(|e| e.status <= level) {
            let details = entry
                .data
                .as_ref()
                .map(|d| format!("\nDetails:\n{d}"))
                .unwrap_or_default();
            let name = self.action.display_name();
            match entry.status {
                Status::Error => log::error!("[{name}] {}{details}", entry.reason),
                Status::Success => log::info!("[{name}] {}{details}", entry.reason),
                Status::Warning => log::warn!("[{name}] {}{details}", entry.reason),
            }
        }
    }
}

/// Identity of the participant under verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// AS number
    pub asn: u32,
    /// MAC address of the peering interface
    pub mac: MacAddr,
    /// IPv4 address on the peering LAN
    pub ipv4: Option<Ipv4Addr>,
    /// IPv6 address on the peering LAN
    pub ipv6: Option<Ipv6Addr>,
}

impl Candidate {
    /// Validate the identity of the candidate. The AS number, the MAC address, and at least one
    /// address are required.
    pub fn new(
        asn: Option<u32>,
        mac: Option<&str>,
        ipv4: Option<Ipv4Addr>,
        ipv6: Option<Ipv6Addr>,
    ) -> Result<Self, QuarantineError> {
        let asn = asn.ok_or(QuarantineError::MissingCandidateField("ASN"))?;
        let mac = mac
            .ok_or(QuarantineError::MissingCandidateField("MAC address"))?
            .parse()?;
        if ipv4.is_none() && ipv6.is_none() {
            return Err(QuarantineError::MissingCandidateField(
                "IPv4 or IPv6 address",
            ));
        }
        Ok(Self {
            asn,
            mac,
            ipv4,
            ipv6,
        })
    }

    /// Address of the candidate in an address family.
    pub fn ip(&self, version: IpVersion) -> Option<IpAddr> {
        match version {
            IpVersion::V4 => self.ipv4.map(IpAddr::V4),
            IpVersion::V6 => self.ipv6.map(IpAddr::V6),
        }
    }
}

/// Everything a check can access.
#[derive(Clone, Copy)]
pub struct QuarantineContext<'a> {
    /// Runtime of the running lab
    pub runtime: &'a dyn LabRuntime,
    /// The running scenario
    pub scenario: &'a Scenario,
    /// Topology of all current participants
    pub topology: &'a Topology,
    /// Deployment settings
    pub settings: &'a Settings,
}

impl std::fmt::Debug for QuarantineContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuarantineContext")
            .field("scenario", &self.scenario.name())
            .field("devices", &self.scenario.len())
            .field("ases", &self.topology.len())
            .finish()
    }
}

impl<'a> QuarantineContext<'a> {
    /// Route servers that are part of the running scenario, each with the candidate's address
    /// of its address family. Route servers without matching candidate address are skipped.
    pub(crate) fn route_servers(
        &self,
        candidate: &Candidate,
    ) -> Vec<(&'a str, &'a RouteServer, IpAddr)> {
        let mut result = Vec::new();
        for (name, rs) in self.settings.route_servers.iter() {
            if !self.scenario.has_device(name) {
                log::warn!("[{name}] not in the network scenario, skipping");
                continue;
            }
            let v = rs.version();
            let Some(ip) = candidate.ip(v) else {
                log::warn!("[{name}] no IPv{v} address of the candidate given, skipping");
                continue;
            };
            result.push((name.as_str(), rs, ip));
        }
        result
    }
}

/// All available checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Check {
    /// The BGP session with every route server is established with the right AS.
    BgpSession,
    /// The announced routes are sane and consistent across route servers.
    BgpRib,
    /// Route servers reach the candidate without loss.
    Ping,
    /// Packets of the full Ethernet MTU reach the candidate.
    PingMtu,
    /// The candidate does not answer ARP requests for foreign addresses.
    ProxyArp,
    /// DNS, NTP and SNMP are not exposed towards the fabric.
    Services,
    /// The candidate sends no unauthorized traffic.
    Traffic,
}

impl Check {
    /// All checks, in their default order.
    pub const ALL: [Check; 7] = [
        Check::BgpSession,
        Check::BgpRib,
        Check::Ping,
        Check::PingMtu,
        Check::ProxyArp,
        Check::Services,
        Check::Traffic,
    ];

    /// Category of the check
    pub fn category(&self) -> &'static str {
        match self {
            Check::BgpSession | Check::BgpRib => "bgp",
            Check::Ping | Check::PingMtu | Check::ProxyArp => "connectivity",
            Check::Services | Check::Traffic => "security",
        }
    }

    /// Short name of the check, unique within all categories.
    pub fn name(&self) -> &'static str {
        match self {
            Check::BgpSession => "bgp_session",
            Check::BgpRib => "bgp_rib",
            Check::Ping => "ping",
            Check::PingMtu => "ping_mtu",
            Check::ProxyArp => "proxy_arp",
            Check::Services => "services",
            Check::Traffic => "traffic",
        }
    }

    /// Dotted name `category.name`.
    pub fn key(&self) -> String {
        format!("{}.{}", self.category(), self.name())
    }

    /// Name shown to users.
    pub fn display_name(&self) -> &'static str {
        match self {
            Check::BgpSession => "BGP Session",
            Check::BgpRib => "BGP RIB",
            Check::Ping => "Ping",
            Check::PingMtu => "Ping MTU",
            Check::ProxyArp => "Proxy ARP",
            Check::Services => "Running Services",
            Check::Traffic => "Unauthorized Traffic",
        }
    }

    /// Run the check.
    pub async fn verify(&self, ctx: &QuarantineContext<'_>, candidate: &Candidate) -> ActionResult {
        log::info!("[quarantine] starting {}", self.display_name());
        match self {
            Check::BgpSession => bgp::verify_session(ctx, candidate).await,
            Check::BgpRib => bgp::verify_rib(ctx, candidate).await,
            Check::Ping => connectivity::verify_ping(ctx, candidate).await,
            Check::PingMtu => connectivity::verify_ping_mtu(ctx, candidate).await,
            Check::ProxyArp => connectivity::verify_proxy_arp(ctx, candidate).await,
            Check::Services => security::verify_services(ctx, candidate).await,
            Check::Traffic => security::verify_traffic(ctx, candidate).await,
        }
    }

    /// Release resources acquired by [`Check::verify`]. Most checks have nothing to clean.
    pub async fn clean(&self, ctx: &QuarantineContext<'_>) {
        match self {
            Check::Services => security::clean_services(ctx).await,
            Check::Traffic => security::clean_traffic(ctx).await,
            _ => {}
        }
    }
}

impl Display for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.category(), self.name())
    }
}

/// Convert a class-like name (`CheckBgpSessionAction`) into the short name (`bgp_session`).
fn short_name(name: &str) -> String {
    let mut snake = String::new();
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                snake.push('_');
            }
            snake.push(c.to_ascii_lowercase());
        } else {
            snake.push(c);
        }
    }
    let snake = snake.strip_prefix("check_").unwrap_or(&snake);
    snake.strip_suffix("_action").unwrap_or(snake).to_string()
}

impl FromStr for Check {
    type Err = QuarantineError;

    /// Parse `category.name`. The name may also be given in the class-like form, e.g.,
    /// `bgp.CheckBgpSessionAction`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (category, name) = s.split_once('.').unwrap_or(("", s));
        let name = short_name(name);
        Check::ALL
            .into_iter()
            .find(|c| c.name() == name && (category.is_empty() || c.category() == category))
            .ok_or_else(|| QuarantineError::UnknownCheck(s.to_string()))
    }
}

/// Ordered list of enabled checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionManager {
    checks: Vec<Check>,
}

impl ActionManager {
    /// Load the checks enabled in the settings, except those whose name or dotted name is in
    /// `exclude`.
    pub fn new(settings: &Settings, exclude: &[String]) -> Result<Self, QuarantineError> {
        let mut checks = Vec::new();
        for action in settings.quarantine.actions.iter() {
            let check: Check = action.parse()?;
            if exclude
                .iter()
                .any(|e| e == check.name() || *e == check.key())
            {
                log::debug!("[quarantine] excluding {check}");
                continue;
            }
            if !checks.contains(&check) {
                checks.push(check);
            }
        }
        Ok(Self { checks })
    }

    /// Enabled checks, in order.
    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    /// Run all enabled checks in order.
    pub async fn check(
        &self,
        ctx: &QuarantineContext<'_>,
        candidate: &Candidate,
    ) -> Vec<ActionResult> {
        log::info!("[quarantine] starting checks of AS{}", candidate.asn);
        let mut results = Vec::with_capacity(self.checks.len());
        for check in self.checks.iter() {
            results.push(check.verify(ctx, candidate).await);
        }
        results
    }

    fn find(&self, name: &str) -> Result<Check, QuarantineError> {
        let check: Check = name.parse()?;
        if self.checks.contains(&check) {
            Ok(check)
        } else {
            Err(QuarantineError::UnknownCheck(name.to_string()))
        }
    }

    /// Run a single enabled check and clean up afterwards.
    pub async fn run_action_by_name(
        &self,
        ctx: &QuarantineContext<'_>,
        name: &str,
        candidate: &Candidate,
    ) -> Result<ActionResult, QuarantineError> {
        let check = self.find(name)?;
        let result = check.verify(ctx, candidate).await;
        check.clean(ctx).await;
        Ok(result)
    }

    /// Clean up after a single enabled check.
    pub async fn clean_action_by_name(
        &self,
        ctx: &QuarantineContext<'_>,
        name: &str,
    ) -> Result<(), QuarantineError> {
        let check = self.find(name)?;
        log::info!("[quarantine] cleaning {}", check.display_name());
        check.clean(ctx).await;
        Ok(())
    }
}

/// Errors of the quarantine pipeline. Failures of the checks themselves are reported as
/// findings, not as errors.
#[derive(Debug, Error)]
pub enum QuarantineError {
    /// A required field of the candidate is missing
    #[error("No {0} of the candidate specified")]
    MissingCandidateField(&'static str),
    /// The MAC address is invalid
    #[error("{0}")]
    Model(#[from] ModelError),
    /// No check with this name exists or it is not enabled.
    #[error("Unknown check: {0}")]
    UnknownCheck(String),
    /// The network scenario is not running
    #[error("The network scenario is not running")]
    NotRunning,
}
