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

//! The `dnset` dataset: domain names with wildcards and negation.
//!
//! Entries are normalized to lowercase with a trailing dot. A leading
//! `*.` declares a wildcard, a leading `!` a negation. Exact entries
//! take precedence over wildcards, and within each class longer names
//! are consulted first, so the most specific entry (negated or not)
//! decides the outcome.

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use log::{debug, warn};

use super::value::{parse_return_value, Value};
use super::QueryResult;

struct Entry {
    name: String,
    value: Option<Value>,
    ttl: u32,
    wildcard: bool,
    negated: bool,
}

/// A sorted list of domain-name entries.
pub struct DnSet {
    entries: Vec<Entry>,
    default_value: Option<Value>,
    default_ttl: u32,
}

impl DnSet {
    /// Creates an empty set whose entries default to `default_ttl`.
    pub fn new(default_ttl: u32) -> Self {
        Self {
            entries: Vec::new(),
            default_value: None,
            default_ttl,
        }
    }

    /// Parses zone-file `text`, appending its entries. Call
    /// [`DnSet::finish`] once all files are parsed.
    pub fn parse(&mut self, text: &str, origin: &str) {
        for (index, raw) in text.lines().enumerate() {
            let number = index + 1;
            let mut line = raw.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('$') {
                if line.starts_with("$TTL") {
                    debug!("{}:{}: ignoring $TTL in dnset dataset", origin, number);
                }
                continue;
            }
            if line.starts_with(':') {
                self.default_value = Some(parse_return_value(line));
                continue;
            }

            let negated = if let Some(rest) = line.strip_prefix('!') {
                line = rest.trim();
                true
            } else {
                false
            };

            let mut fields = line.split_whitespace();
            let mut name = match fields.next() {
                Some(name) => name.to_lowercase(),
                None => continue,
            };

            // IP addresses and CIDR blocks are not domain names. They
            // show up when a dnset shares a file with the IP datasets
            // of a combined zone.
            if name.parse::<IpAddr>().is_ok()
                || name.parse::<IpNetwork>().is_ok()
                || name.contains('/')
            {
                continue;
            }
            if name.is_empty() || name == "." {
                warn!("{}:{}: empty domain name", origin, number);
                continue;
            }

            let wildcard = if let Some(rest) = name.strip_prefix("*.") {
                name = rest.to_owned();
                true
            } else {
                false
            };
            if !name.ends_with('.') {
                name.push('.');
            }

            let rest = fields.collect::<Vec<_>>().join(" ");
            let value = if rest.is_empty() || negated {
                None
            } else {
                Some(parse_return_value(&rest))
            };

            self.entries.push(Entry {
                name,
                value,
                ttl: self.default_ttl,
                wildcard,
                negated,
            });
        }
    }

    /// Sorts the entries into match order: exact entries before
    /// wildcards, longer names before shorter ones.
    pub fn finish(&mut self) {
        self.entries.sort_by(|a, b| {
            a.wildcard
                .cmp(&b.wildcard)
                .then_with(|| b.name.len().cmp(&a.name.len()))
        });
    }

    /// Looks up a domain name. Matching is case-insensitive.
    pub fn query(&self, name: &str, _qtype: u16) -> Option<QueryResult> {
        let mut name = name.to_lowercase();
        if !name.ends_with('.') {
            name.push('.');
        }

        // Exact entries first, then wildcards; within each pass the
        // sorted order puts the most specific entry first.
        for entry in self.entries.iter().filter(|entry| !entry.wildcard) {
            if entry.name == name {
                return self.answer(entry, &name);
            }
        }
        for entry in self.entries.iter().filter(|entry| entry.wildcard) {
            if wildcard_matches(&entry.name, &name) {
                return self.answer(entry, &name);
            }
        }
        None
    }

    fn answer(&self, entry: &Entry, name: &str) -> Option<QueryResult> {
        if entry.negated {
            return None;
        }
        let value = entry
            .value
            .clone()
            .or_else(|| self.default_value.clone())
            .unwrap_or_else(Value::fallback);
        let txt = value.txt.replace('$', name.trim_end_matches('.'));
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

/// A wildcard entry matches the entry name itself and anything below
/// it, on label boundaries.
fn wildcard_matches(entry_name: &str, name: &str) -> bool {
    if name == entry_name {
        return true;
    }
    name.len() > entry_name.len()
        && name.ends_with(entry_name)
        && name.as_bytes()[name.len() - entry_name.len() - 1] == b'.'
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn dnset(text: &str) -> DnSet {
        let mut ds = DnSet::new(3600);
        ds.parse(text, "test");
        ds.finish();
        ds
    }

    #[test]
    fn wildcards_answer_and_negations_suppress() {
        let ds = dnset(
            "*.spam.example :2:\n\
             !ham.spam.example\n",
        );
        assert_eq!(ds.query("x.spam.example", 1).unwrap().a_record, "127.0.0.2");
        assert!(ds.query("ham.spam.example", 1).is_none());
        assert!(ds.query("unrelated.example", 1).is_none());
    }

    #[test]
    fn the_wildcard_covers_its_own_name() {
        let ds = dnset("*.spam.example :2:\n");
        assert!(ds.query("spam.example", 1).is_some());
        assert!(ds.query("deep.down.spam.example", 1).is_some());
    }

    #[test]
    fn exact_entries_beat_wildcards() {
        let ds = dnset(
            "*.example :2:wild\n\
             mail.example :3:exact\n",
        );
        assert_eq!(ds.query("mail.example", 1).unwrap().txt, "exact");
        assert_eq!(ds.query("other.example", 1).unwrap().txt, "wild");
    }

    #[test]
    fn longer_wildcards_beat_shorter_ones() {
        let ds = dnset(
            "*.example :2:outer\n\
             !*.good.example\n",
        );
        assert!(ds.query("x.good.example", 1).is_none());
        assert_eq!(ds.query("x.bad.example", 1).unwrap().txt, "outer");
    }

    #[test]
    fn matching_is_case_insensitive() {
        let ds = dnset("*.Spam.Example :2:\n");
        assert!(ds.query("X.SPAM.EXAMPLE", 1).is_some());
        assert!(ds.query("x.spam.example.", 1).is_some());
    }

    #[test]
    fn wildcard_suffixes_respect_label_boundaries() {
        let ds = dnset("*.am.example :2:\n");
        assert!(ds.query("x.am.example", 1).is_some());
        assert!(ds.query("spam.example", 1).is_none());
    }

    #[test]
    fn dollar_substitutes_the_matched_name() {
        let ds = dnset("*.spam.example :2:$ is listed\n");
        assert_eq!(
            ds.query("x.spam.example", 1).unwrap().txt,
            "x.spam.example is listed",
        );
    }

    #[test]
    fn ip_shaped_lines_are_ignored() {
        let ds = dnset(
            "192.0.2.1\n\
             192.0.2.0/24\n\
             real.example\n",
        );
        assert_eq!(ds.count(), 1);
    }
}
