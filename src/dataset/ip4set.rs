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

//! The `ip4set` dataset: a linear list of IPv4 networks.
//!
//! Suitable for small lists where a scan is cheap; the first containing
//! network wins, so exclusions must precede the broader ranges they
//! carve out of.

use ipnetwork::Ipv4Network;
use log::{debug, warn};

use super::value::{parse_return_value, substitute, Value};
use super::QueryResult;

struct Entry {
    network: Ipv4Network,
    value: Option<Value>,
    ttl: u32,
    excluded: bool,
}

/// A vector of (network, value, excluded) entries scanned in file
/// order.
pub struct Ip4Set {
    entries: Vec<Entry>,
    default_value: Option<Value>,
    default_ttl: u32,
    max_range: u8,
    timestamp: i64,
}

impl Ip4Set {
    /// Creates an empty set whose entries default to `default_ttl`.
    pub fn new(default_ttl: u32) -> Self {
        Self {
            entries: Vec::new(),
            default_value: None,
            default_ttl,
            max_range: 0,
            timestamp: 0,
        }
    }

    /// Records the modification time of a source file.
    pub fn note_timestamp(&mut self, mtime: i64) {
        if mtime > self.timestamp {
            self.timestamp = mtime;
        }
    }

    /// Parses zone-file `text`, appending its entries.
    pub fn parse(&mut self, text: &str, origin: &str) {
        for (index, raw) in text.lines().enumerate() {
            let number = index + 1;
            let mut line = raw.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('$') {
                if line.starts_with("$TTL") {
                    debug!("{}:{}: ignoring $TTL in ip4set dataset", origin, number);
                }
                continue;
            }

            let excluded = if let Some(rest) = line.strip_prefix('!') {
                line = rest.trim();
                true
            } else {
                false
            };

            if line.starts_with(':') {
                self.default_value = Some(parse_return_value(line));
                continue;
            }

            let mut fields = line.split_whitespace();
            let address = match fields.next() {
                Some(address) => address,
                None => continue,
            };
            let rest = fields.collect::<Vec<_>>().join(" ");
            let value = if rest.is_empty() {
                None
            } else {
                Some(parse_return_value(&rest))
            };

            let network = match parse_ipv4_network(address) {
                Some(network) => network,
                None => {
                    warn!("{}:{}: invalid IP or CIDR: {}", origin, number, address);
                    continue;
                }
            };

            if self.max_range == 0 || network.prefix() < self.max_range {
                self.max_range = network.prefix();
            }
            self.entries.push(Entry {
                network,
                value,
                ttl: self.default_ttl,
                excluded,
            });
        }
    }

    /// Looks up a reverse-IPv4 name. The effective value is computed
    /// here per query; stored entries are never written to.
    pub fn query(&self, name: &str, _qtype: u16) -> Option<QueryResult> {
        let addr = super::parse_reverse_ipv4(name)?;

        let entry = self
            .entries
            .iter()
            .find(|entry| entry.network.contains(addr))?;
        if entry.excluded {
            return None;
        }
        let value = entry
            .value
            .clone()
            .or_else(|| self.default_value.clone())
            .unwrap_or_else(Value::fallback);
        let txt = substitute(
            &value.txt,
            &addr.to_string(),
            self.timestamp,
            self.max_range,
            false,
        );
        Some(QueryResult {
            ttl: entry.ttl,
            a_record: value.a,
            txt,
        })
    }

    /// Returns the number of configured entries.
    pub fn count(&self) -> usize {
        self.entries.len()
    }
}

fn parse_ipv4_network(token: &str) -> Option<Ipv4Network> {
    if let Ok(network) = token.parse::<Ipv4Network>() {
        if token.contains('/') {
            return Some(network);
        }
    }
    token
        .parse()
        .ok()
        .and_then(|addr| Ipv4Network::new(addr, 32).ok())
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn set(text: &str) -> Ip4Set {
        let mut ds = Ip4Set::new(3600);
        ds.parse(text, "test");
        ds
    }

    #[test]
    fn first_containing_network_wins() {
        let ds = set(
            "192.0.2.0/25 :3:lower\n\
             192.0.2.0/24 :2:whole\n",
        );
        assert_eq!(ds.query("1.2.0.192", 1).unwrap().txt, "lower");
        assert_eq!(ds.query("200.2.0.192", 1).unwrap().txt, "whole");
    }

    #[test]
    fn an_excluded_hit_returns_no_match() {
        let ds = set(
            "!192.0.2.50\n\
             192.0.2.0/24\n",
        );
        assert!(ds.query("50.2.0.192", 1).is_none());
        assert!(ds.query("51.2.0.192", 1).is_some());
    }

    #[test]
    fn default_value_fills_plain_entries() {
        let ds = set(":4:listed\n198.51.100.0/24\n");
        let result = ds.query("9.100.51.198", 1).unwrap();
        assert_eq!(result.a_record, "127.0.0.4");
        assert_eq!(result.txt, "listed");
    }

    #[test]
    fn a_miss_returns_nothing() {
        let ds = set(":4:listed\n198.51.100.0/24\n");
        assert!(ds.query("1.0.0.10", 1).is_none());
    }
}
