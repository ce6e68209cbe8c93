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

//! The `ip4trie` dataset: a bit-level binary trie over IPv4 CIDR
//! ranges with longest-prefix matching.

use ipnetwork::Ipv4Network;
use log::{debug, warn};

use super::value::{parse_return_value, substitute, Value};
use super::QueryResult;

////////////////////////////////////////////////////////////////////////
// TRIE STRUCTURE                                                     //
////////////////////////////////////////////////////////////////////////

/// A trie node. Nodes live in the dataset's arena and refer to their
/// children by index; the tree is destroyed by dropping the arena.
struct Node {
    children: [Option<u32>; 2],
    entry: Option<Entry>,
}

impl Node {
    fn new() -> Self {
        Self {
            children: [None; 2],
            entry: None,
        }
    }
}

/// The payload of a node that terminates a configured range.
struct Entry {
    value: Option<Value>,
    ttl: u32,
    excluded: bool,
}

/// A bit-keyed binary trie over IPv4 ranges.
///
/// Each configured CIDR range marks the node reached by walking its
/// prefix bits from the most significant bit of the address. A lookup
/// walks all 32 bits of the queried address and answers from the
/// deepest marked node (the longest matching prefix); a marked node
/// whose entry is excluded suppresses the answer.
pub struct Ip4Trie {
    nodes: Vec<Node>,
    default_value: Option<Value>,
    default_ttl: u32,
    max_range: u8,
    timestamp: i64,
}

impl Ip4Trie {
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

    /// Records the modification time of a source file (for
    /// `$TIMESTAMP`). The newest time wins when several files feed one
    /// dataset.
    pub fn note_timestamp(&mut self, mtime: i64) {
        if mtime > self.timestamp {
            self.timestamp = mtime;
        }
    }

    /// Parses zone-file `text`, adding its entries to the trie.
    /// `origin` names the source in log messages.
    pub fn parse(&mut self, text: &str, origin: &str) {
        for (index, raw) in text.lines().enumerate() {
            let number = index + 1;
            let mut line = raw.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('$') {
                if line.starts_with("$TTL") {
                    debug!("{}:{}: ignoring $TTL in ip4trie dataset", origin, number);
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
            self.insert(network, value, excluded);
        }
    }

    fn insert(&mut self, network: Ipv4Network, value: Option<Value>, excluded: bool) {
        let address = u32::from(network.network());
        let mut node = 0usize;
        for i in 0..u32::from(network.prefix()) {
            let bit = ((address >> (31 - i)) & 1) as usize;
            node = match self.nodes[node].children[bit] {
                Some(child) => child as usize,
                None => {
                    let child = self.nodes.len() as u32;
                    self.nodes.push(Node::new());
                    self.nodes[node].children[bit] = Some(child);
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

    /// Looks up a reverse-IPv4 name in the trie.
    pub fn query(&self, name: &str, _qtype: u16) -> Option<QueryResult> {
        let addr = super::parse_reverse_ipv4(name)?;
        let bits = u32::from(addr);

        let mut node = 0usize;
        let mut best = self.nodes[0].entry.as_ref();
        for i in 0..32 {
            let bit = ((bits >> (31 - i)) & 1) as usize;
            match self.nodes[node].children[bit] {
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
        self.nodes
            .iter()
            .filter(|node| node.entry.is_some())
            .count()
    }
}

/// Parses `address/prefix`, falling back to a bare address with a /32
/// host prefix.
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

    fn trie(text: &str) -> Ip4Trie {
        let mut ds = Ip4Trie::new(3600);
        ds.parse(text, "test");
        ds
    }

    #[test]
    fn longest_prefix_wins() {
        let ds = trie(
            "192.0.2.0/24 :127.0.0.2:outer\n\
             192.0.2.128/25 :127.0.0.3:inner\n",
        );
        assert_eq!(ds.count(), 2);
        let outer = ds.query("5.2.0.192", 1).unwrap();
        assert_eq!(outer.a_record, "127.0.0.2");
        assert_eq!(outer.txt, "outer");
        let inner = ds.query("200.2.0.192", 1).unwrap();
        assert_eq!(inner.a_record, "127.0.0.3");
        assert_eq!(inner.txt, "inner");
    }

    #[test]
    fn excluded_longer_prefix_suppresses_the_answer() {
        let ds = trie("192.0.2.0/24 :127.0.0.2:spam\n!192.0.2.50\n");
        assert!(ds.query("50.2.0.192", 1).is_none());
        let hit = ds.query("51.2.0.192", 1).unwrap();
        assert_eq!(hit.a_record, "127.0.0.2");
    }

    #[test]
    fn default_route_with_default_value_answers_everything() {
        let ds = trie(":127.0.0.9:caught\n0.0.0.0/0\n");
        let result = ds.query("1.1.168.192", 1).unwrap();
        assert_eq!(result.a_record, "127.0.0.9");
        assert_eq!(result.txt, "caught");
    }

    #[test]
    fn entries_without_values_fall_back_to_127_0_0_2() {
        let ds = trie("198.51.100.0/24\n");
        let result = ds.query("7.100.51.198", 1).unwrap();
        assert_eq!(result.a_record, "127.0.0.2");
        assert_eq!(result.txt, "");
        assert_eq!(result.ttl, 3600);
    }

    #[test]
    fn unlisted_addresses_and_invalid_names_miss() {
        let ds = trie("192.0.2.0/24\n");
        assert!(ds.query("1.1.168.192", 1).is_none());
        assert!(ds.query("not-an-ip", 1).is_none());
        assert!(ds.query("", 1).is_none());
    }

    #[test]
    fn bad_lines_are_skipped() {
        let ds = trie(
            "# comment\n\
             \n\
             not-an-address :2:x\n\
             192.0.2.0/24\n",
        );
        assert_eq!(ds.count(), 1);
    }

    #[test]
    fn substitution_sees_the_queried_address_and_metadata() {
        let mut ds = Ip4Trie::new(300);
        ds.note_timestamp(1700000000);
        ds.parse("192.0.2.0/24 :2:$ since $TIMESTAMP within /$MAXRANGE4\n", "test");
        let result = ds.query("5.2.0.192", 1).unwrap();
        assert_eq!(result.txt, "192.0.2.5 since 1700000000 within /24");
    }

    #[test]
    fn host_entries_match_exactly() {
        let ds = trie("203.0.113.7 :3:single\n");
        assert_eq!(ds.query("7.113.0.203", 1).unwrap().a_record, "127.0.0.3");
        assert!(ds.query("8.113.0.203", 1).is_none());
    }
}
