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

//! The `ip6tset` dataset: exact IPv6 addresses, one value each.

use std::net::Ipv6Addr;

use log::{debug, warn};

use super::value::{parse_return_value, substitute, Value};
use super::QueryResult;

struct Entry {
    address: Ipv6Addr,
    value: Option<Value>,
    ttl: u32,
}

/// A flat list of exact IPv6 addresses compared by 16-byte equality.
pub struct Ip6TSet {
    entries: Vec<Entry>,
    default_value: Option<Value>,
    default_ttl: u32,
    timestamp: i64,
}

impl Ip6TSet {
    /// Creates an empty set whose entries default to `default_ttl`.
    pub fn new(default_ttl: u32) -> Self {
        Self {
            entries: Vec::new(),
            default_value: None,
            default_ttl,
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
            let line = raw.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('$') {
                if line.starts_with("$TTL") {
                    debug!("{}:{}: ignoring $TTL in ip6tset dataset", origin, number);
                }
                continue;
            }
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

            let address: Ipv6Addr = match address.parse() {
                Ok(address) => address,
                Err(_) => {
                    warn!("{}:{}: invalid IPv6 address: {}", origin, number, address);
                    continue;
                }
            };

            self.entries.push(Entry {
                address,
                value,
                ttl: self.default_ttl,
            });
        }
    }

    /// Looks up a reverse-IPv6 name by exact address match.
    pub fn query(&self, name: &str, _qtype: u16) -> Option<QueryResult> {
        let addr = super::parse_reverse_ipv6(name)?;

        let entry = self.entries.iter().find(|entry| entry.address == addr)?;
        let value = entry
            .value
            .clone()
            .or_else(|| self.default_value.clone())
            .unwrap_or_else(Value::fallback);
        let txt = substitute(&value.txt, &addr.to_string(), self.timestamp, 0, true);
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

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    const DB8_ONE: &str = "1.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.8.b.d.0.1.0.0.2";
    const DB8_TWO: &str = "2.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.8.b.d.0.1.0.0.2";

    #[test]
    fn exact_addresses_match() {
        let mut ds = Ip6TSet::new(600);
        ds.parse(
            ":2:seen at $\n\
             2001:db8::1\n",
            "test",
        );
        assert_eq!(ds.count(), 1);

        let result = ds.query(DB8_ONE, 1).unwrap();
        assert_eq!(result.a_record, "127.0.0.2");
        assert_eq!(result.txt, "seen at 2001:db8::1");
        assert_eq!(result.ttl, 600);

        assert!(ds.query(DB8_TWO, 1).is_none());
    }

    #[test]
    fn invalid_addresses_are_skipped() {
        let mut ds = Ip6TSet::new(600);
        ds.parse("2001:db8::zz\n2001:db8::1 :3:ok\n", "test");
        assert_eq!(ds.count(), 1);
        assert_eq!(ds.query(DB8_ONE, 1).unwrap().a_record, "127.0.0.3");
    }
}
