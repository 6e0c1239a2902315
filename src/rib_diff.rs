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

//! Comparison of an expected OpenBGPD RIB dump with the RIB of a running device.
//!
//! Both sides are parsed line by line. A line is identified by all its whitespace-separated
//! fields, so two routes are equal only if flags, prefix, nexthop, attributes and AS path
//! match.

use std::{collections::BTreeSet, path::Path};

use kathara_lab::{LabError, LabRuntime};
use serde::Serialize;

use crate::dumps::DumpError;

/// Command that prints the RIB of an OpenBGPD device.
pub const LIVE_RIB_COMMAND: &str = "bgpctl show rib";

/// Words that only appear in the header of a RIB dump.
const HEADER_WORDS: [&str; 10] = [
    "flags",
    "Valid",
    "Selected",
    "Announced",
    "Stale",
    "Error",
    "origin",
    "Incomplete",
    "ovs",
    "destination",
];

/// Shortest line that can describe a route.
const MIN_LINE_LEN: usize = 7;

/// A single route of a RIB dump.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RibLine(Vec<String>);

impl RibLine {
    /// Fields of the line
    pub fn fields(&self) -> &[String] {
        &self.0
    }
}

/// All routes of a RIB dump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RibDump {
    lines: BTreeSet<RibLine>,
}

impl RibDump {
    /// Parse the output of `bgpctl show rib`. Header lines and lines too short to describe a
    /// route are skipped.
    pub fn parse(content: &str) -> Self {
        let lines = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .filter(|l| !HEADER_WORDS.iter().any(|w| l.contains(w)))
            .filter(|l| {
                if l.len() < MIN_LINE_LEN {
                    log::debug!("[rib] skipping invalid line {l:?}");
                    false
                } else {
                    true
                }
            })
            .map(|l| RibLine(l.split_whitespace().map(str::to_string).collect()))
            .collect();
        Self { lines }
    }

    /// Read and parse a dump file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, DumpError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| DumpError::Io(path.to_path_buf(), e))?;
        Ok(Self::parse(&content))
    }

    /// Fetch the RIB of a running device.
    pub async fn live(runtime: &dyn LabRuntime, device: &str) -> Result<Self, LabError> {
        let output = runtime.exec_checked(device, LIVE_RIB_COMMAND).await?;
        Ok(Self::parse(&output.stdout))
    }

    /// Routes of the dump
    pub fn lines(&self) -> &BTreeSet<RibLine> {
        &self.lines
    }

    /// Number of routes
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the dump has no routes
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Counters of the difference between the expected and the actual RIB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RibDiff {
    /// Routes in the expected RIB
    pub expected_rib_len: usize,
    /// Routes in the actual RIB
    pub actual_rib_len: usize,
    /// Routes in both
    pub inters: usize,
    /// Expected routes that are not in the actual RIB
    pub notloaded: usize,
    /// Actual routes that were not expected
    pub missing: usize,
}

impl RibDiff {
    /// Compare two dumps
    pub fn new(expected: &RibDump, actual: &RibDump) -> Self {
        Self {
            expected_rib_len: expected.len(),
            actual_rib_len: actual.len(),
            inters: expected.lines.intersection(&actual.lines).count(),
            notloaded: expected.lines.difference(&actual.lines).count(),
            missing: actual.lines.difference(&expected.lines).count(),
        }
    }
}
