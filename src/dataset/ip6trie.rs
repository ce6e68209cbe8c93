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

//! The `ip6trie` dataset: a nibble-keyed trie over IPv6 CIDR ranges.
//!
//! Each node has up to sixteen children, one per 4-bit nibble, so a
//! full address is 32 steps deep. Prefix lengths that are not a
//! multiple of 4 truncate down to the nearest nibble boundary.

use ipnetwork::Ipv6Network;
use log::{debug, warn};

use super::value::{parse_return_value, substitute, Value};
use super::QueryResult;

struct Node {
    children: [Option<u32>; 16],
    entry: Option<Entry>,
}

impl Node {
    fn new() -> Self {
        Self {
            children: [None; 16],
            entry: None,
        }
    }
}

struct Entry {
    value: Option<Value>,
    ttl: u32,
    excluded: bool,
}

/// A nibble-keyed trie over IPv6 ranges with the same longest-match
/// semantics as the IPv4 trie.
pub struct Ip6Trie {
    nodes: Vec<Node>,
    default_value: Option<Value>,
    default_ttl: u32,
    max_range: u8,
    timestamp: i64,
}

impl Ip6Trie {
    /// Creates an empty trie whose entries default to `default_ttl`.
    pub fn new(default_ttl: u32) -> Self {
        Self {
            nodes: vec![Node::new()],
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

    /// Parses zone-file `text`, adding its entries to the trie.
    pub fn parse(&mut self, text: &str, origin: &str) {
        for (index, raw) in text.lines().enumerate() {
            let number = index + 1;
            let mut line = raw.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('$') {
                if line.starts_with("$TTL") {
                    debug!("{}:{}: ignoring $TTL in ip6trie dataset", origin, number);
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

            let network = match parse_ipv6_network(address) {
                Some(network) => network,
                None => {
                    warn!("{}:{}: invalid IPv6 or CIDR: {}", origin, number, address);
                    continue;
                }
            };

            if self.max_range == 0 || network.prefix() < self.max_range {
                self.max_range = network.prefix();
            }
            self.insert(network, value, excluded);
        }
    }

    fn insert(&mut self, network: Ipv6Network, value: Option<Value>, excluded: bool) {
        let octets = network.network().octets();
        let nibbles = usize::from(network.prefix()) / 4;

        let mut node = 0usize;
        for i in 0..nibbles {
            let octet = octets[i / 2];
            let nibble = if i % 2 == 0 {
                (octet >> 4) & 0x0f
            } else {
                octet & 0x0f
            } as usize;
            node = match self.nodes[node].children[nibble] {
                Some(child) => child as usize,
                None => {
                    let child = self.nodes.len() as u32;
                    self.nodes.push(Node::new());
                    self.nodes[node].children[nibble] = Some(child);
                    child as usize
                }
            };
        }
        self.nodes[node].entry = Some(Entry {
            value,
            ttl: self.default_ttl,
            excluded,
        });
    }

    /// Looks up a reverse-IPv6 name in the trie.
    pub fn query(&self, name: &str, _qtype: u16) -> Option<QueryResult> {
        let addr = super::parse_reverse_ipv6(name)?;
        let octets = addr.octets();

        let mut node = 0usize;
        let mut best = self.nodes[0].entry.as_ref();
        for i in 0..32 {
            let octet = octets[i / 2];
            let nibble = if i % 2 == 0 {
                (octet >> 4) & 0x0f
            } else {
                octet & 0x0f
            } as usize;
            match self.nodes[node].children[nibble] {
                Some(child) => {
                    node = child as usize;
                    if let Some(entry) = self.nodes[node].entry.as_ref() {
                        best = Some(entry);
                    }
                }
                None => break,
            }
        }

        let entry = best?;
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
            true,
        );
        Some(QueryResult {
            ttl: entry.ttl,
            a_record: value.a,
            txt,
        })
    }

    /// Returns the number of configured entries.
    pub fn count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.entry.is_some())
            .count()
    }
}

/// Parses `address/prefix`, falling back to a bare address with a /128
/// host prefix.
fn parse_ipv6_network(token: &str) -> Option<Ipv6Network> {
    if let Ok(network) = token.parse::<Ipv6Network>() {
        if token.contains('/') {
            return Some(network);
        }
    }
    token
        .parse()
        .ok()
        .and_then(|addr| Ipv6Network::new(addr, 128).ok())
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// The reverse form of 2001:db8::1.
    const DB8_ONE: &str = "1.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.8.b.d.0.1.0.0.2";

    /// The reverse form of 2001:db9::1, outside 2001:db8::/32.
    const DB9_ONE: &str = "1.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.9.b.d.0.1.0.0.2";

    fn trie(text: &str) -> Ip6Trie {
        let mut ds = Ip6Trie::new(3600);
        ds.parse(text, "test");
        ds
    }

    #[test]
    fn prefixes_match_and_longer_wins() {
        let ds = trie(
            "2001:db8::/32 :2:wide\n\
             2001:db8::/64 :3:narrow\n",
        );
        let result = ds.query(DB8_ONE, 1).unwrap();
        assert_eq!(result.a_record, "127.0.0.3");
        assert_eq!(result.txt, "narrow");
        assert!(ds.query(DB9_ONE, 1).is_none());
    }

    #[test]
    fn exclusions_suppress_answers() {
        let ds = trie(
            "2001:db8::/32 :2:listed\n\
             !2001:db8::1\n",
        );
        assert!(ds.query(DB8_ONE, 1).is_none());
    }

    #[test]
    fn exact_addresses_match() {
        let ds = trie("2001:db8::1 :5:host\n");
        let result = ds.query(DB8_ONE, 1).unwrap();
        assert_eq!(result.a_record, "127.0.0.5");
        assert!(ds.query(DB9_ONE, 1).is_none());
    }

    #[test]
    fn substitution_uses_the_ipv6_markers() {
        let ds = trie("2001:db8::/32 :2:$ within /$MAXRANGE6\n");
        let result = ds.query(DB8_ONE, 1).unwrap();
        assert_eq!(result.txt, "2001:db8::1 within /32");
    }

    #[test]
    fn invalid_names_miss() {
        let ds = trie("2001:db8::/32\n");
        assert!(ds.query("5.2.0.192", 1).is_none());
        assert!(ds.query("", 1).is_none());
    }
}
