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

//! # IxpTwin
//!
//! Digital twin of an Internet Exchange Point. The twin emulates the peering fabric of an
//! exchange in a Kathara lab: every participant router announcing routes becomes an FRR device,
//! the route servers run their production configuration, and a switch bridges all of them into
//! one peering LAN.
//!
//! - [`dumps`] parse member dumps and RIB dumps into the [`model::Topology`].
//! - [`frr`] generates the configuration of the participant routers.
//! - [`vendor`] abstracts the route server implementations (BIRD and OpenBGPD).
//! - [`scenario`] builds the lab, reconciles it with a new topology, and deploys it.
//! - [`quarantine`] verifies a candidate participant against the running twin.
//! - [`rib_diff`] compares an expected RIB dump with the RIB of a running device.

#![deny(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![allow(clippy::result_large_err)]

pub mod config;
pub mod dumps;
pub mod frr;
pub mod model;
pub mod quarantine;
pub mod rib_diff;
pub mod scenario;
#[cfg(test)]
mod test;
pub mod vendor;

use thiserror::Error;

pub use config::Settings;
pub use model::Topology;

/// Any error of the digital twin.
#[derive(Debug, Error)]
pub enum IxpTwinError {
    /// Error in the settings
    #[error("{0}")]
    Config(#[from] config::ConfigError),
    /// Error while parsing a dump
    #[error("{0}")]
    Dump(#[from] dumps::DumpError),
    /// Error of a route server implementation
    #[error("{0}")]
    Vendor(#[from] vendor::VendorError),
    /// Error while building or deploying the scenario
    #[error("{0}")]
    Scenario(#[from] scenario::ScenarioError),
    /// Error of the quarantine pipeline
    #[error("{0}")]
    Quarantine(#[from] quarantine::QuarantineError),
    /// Error of the lab runtime
    #[error("{0}")]
    Lab(#[from] kathara_lab::LabError),
}
