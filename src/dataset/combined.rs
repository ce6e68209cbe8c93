// Copyright 2024 The rbldns developers.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The `combined` dataset: an ordered sequence of child datasets.
//!
//! Each file spec may carry an explicit `type:` prefix
//! (`ip4trie:/path/to/file`); without one, the child's type is detected
//! from the file's first data line. Queries try each child in order and
//! the first non-empty result wins.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ipnetwork::IpNetwork;

use super::{Dataset, Error, Kind, QueryResult};

/// An ordered sequence of child datasets sharing one zone.
pub struct Combined {
    children: Vec<Dataset>,
}

impl Combined {
    /// Queries each child in order; the first non-empty result wins.
    pub fn query(&self, name: &str, qtype: u16) -> Option<QueryResult> {
        self.children
            .iter()
            .find_map(|child| child.query(name, qtype))
    }

    /// Returns the total number of entries across children.
    pub fn count(&self) -> usize {
        self.children.iter().map(Dataset::count).sum()
    }
}

/// Loads a combined dataset from `type:file` specs.
pub(super) fn load(files: &[PathBuf], default_ttl: u32) -> Result<Combined, Error> {
    let mut children = Vec::new();
    for spec in files {
        let spec_str = spec.to_string_lossy();
        let (kind, path) = match spec_str.split_once(':') {
            Some((kind, path)) => (Kind::from_str(kind)?, PathBuf::from(path)),
            None => (detect_kind(spec)?, spec.clone()),
        };
        children.push(super::load(kind, &[path], default_ttl)?);
    }
    Ok(Combined { children })
}

/// Detects a dataset type from the first data line of a file:
/// colon-heavy tokens are IPv6, parsable addresses or CIDR blocks are
/// IPv4, a record-type field means generic records, and anything else
/// is a domain set. An empty file defaults to generic.
fn detect_kind(path: &Path) -> Result<Kind, Error> {
    let (text, _) = super::read_zone_file(path)?;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty()
            || line.starts_with('#')
            || line.starts_with('$')
            || line.starts_with(':')
            || line.starts_with('!')
        {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let first = match fields.first() {
            Some(first) => *first,
            None => continue,
        };

        if first.matches(':').count() > 1 {
            return Ok(Kind::Ip6Trie);
        }
        if first.parse::<IpAddr>().is_ok() || first.parse::<IpNetwork>().is_ok() {
            return Ok(Kind::Ip4Trie);
        }
        if fields.len() >= 3 {
            let has_record_type = fields[1..].iter().any(|field| {
                matches!(
                    field.to_uppercase().as_str(),
                    "A" | "TXT" | "MX" | "AAAA",
                )
            });
            if has_record_type {
                return Ok(Kind::Generic);
            }
        }
        return Ok(Kind::DnSet);
    }

    Ok(Kind::Generic)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
