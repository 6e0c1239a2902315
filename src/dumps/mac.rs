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

//! Deterministic MAC addresses for peerings without a known MAC.

use std::collections::BTreeMap;

use crate::model::MacAddr;

/// Generates MAC addresses from a counter starting at 1, rendered as 12 hex digits
/// (`00:00:00:00:00:01`, `00:00:00:00:00:02`, ...). Each parser owns its own synthesizer, so a
/// new parser starts again at 1.
#[derive(Debug, Clone)]
pub struct MacSynthesizer {
    counter: u64,
    per_as: BTreeMap<u32, MacAddr>,
}

impl Default for MacSynthesizer {
    fn default() -> Self {
        Self {
            counter: 1,
            per_as: BTreeMap::new(),
        }
    }
}

impl MacSynthesizer {
    /// Generate a fresh MAC address.
    pub fn next_mac(&mut self) -> MacAddr {
        let mac = MacAddr::from_int(self.counter);
        self.counter += 1;
        mac
    }

    /// The MAC address of an AS. The first call for an AS generates a fresh address; later calls
    /// return the same one.
    pub fn for_as(&mut self, as_num: u32) -> MacAddr {
        if let Some(mac) = self.per_as.get(&as_num) {
            return mac.clone();
        }
        let mac = self.next_mac();
        self.per_as.insert(as_num, mac.clone());
        mac
    }
}
