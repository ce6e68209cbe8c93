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

//! The `generic` dataset: BIND-style forward records.
//!
//! Lines have the form `<name> [<ttl>] [IN] <type> <rdata>` with `@`
//! standing for the zone apex and `$TTL` setting the default TTL for
//! subsequent records. Supported types are A, AAAA, TXT (quoting
//! allowed), and MX. Values are literal: no `$` substitution happens on
//! generic results.

use std::collections::HashMap;

use log::warn;

use super::value::parse_ttl;
use super::QueryResult;
use crate::message::qtype;

struct Record {
    rr_type: u16,
    ttl: u32,
    value: String,
}

/// Forward records keyed by lowercased fully-qualified name.
pub struct Generic {
    entries: HashMap<String, Vec<Record>>,
    default_ttl: u32,
}

impl Generic {
    /// Creates an empty dataset with the given initial default TTL
    /// (overridden by `$TTL` directives in the file).
    pub fn new(default_ttl: u32) -> Self {
        Self {
            entries: HashMap::new(),
            default_ttl,
        }
    }

    /// Parses zone-file `text`, appending its records.
    pub fn parse(&mut self, text: &str, origin: &str) {
        let mut current_ttl = self.default_ttl;

        for (index, raw) in text.lines().enumerate() {
            let number = index + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('$') {
                let mut fields = line.split_whitespace();
                if fields.next() == Some("$TTL") {
                    if let Some(ttl) = fields.next().and_then(parse_ttl) {
                        current_ttl = ttl;
                    } else {
                        warn!("{}:{}: invalid $TTL directive", origin, number);
                    }
                }
                continue;
            }

            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 {
                continue;
            }

            let name = if fields[0] == "@" { "" } else { fields[0] };

            let mut index = 1;
            let mut ttl = current_ttl;
            if let Some(parsed) = parse_ttl(fields[index]) {
                ttl = parsed;
                index += 1;
            }
            if index < fields.len() && fields[index].eq_ignore_ascii_case("IN") {
                index += 1;
            }
            if index >= fields.len() {
                continue;
            }

            let record_type = fields[index].to_uppercase();
            index += 1;
            if index >= fields.len() {
                continue;
            }

            let (rr_type, value) = match record_type.as_str() {
                "A" => (qtype::A, fields[index].to_owned()),
                "AAAA" => (qtype::AAAA, fields[index].to_owned()),
                "TXT" => {
                    let mut text = fields[index..].join(" ");
                    if text.starts_with('"') && text.ends_with('"') && text.len() >= 2 {
                        text = text[1..text.len() - 1].to_owned();
                    }
                    if text.len() > 255 {
                        // Cut on a character boundary; the wire limit
                        // is 255 octets.
                        let mut cut = 255;
                        while !text.is_char_boundary(cut) {
                            cut -= 1;
                        }
                        text.truncate(cut);
                    }
                    (qtype::TXT, text)
                }
                "MX" => {
                    if index + 1 >= fields.len() {
                        warn!(
                            "{}:{}: MX record requires preference and exchange",
                            origin, number,
                        );
                        continue;
                    }
                    (qtype::MX, format!("{} {}", fields[index], fields[index + 1]))
                }
                _ => continue,
            };

            let key = normalize(name);
            self.entries.entry(key).or_default().push(Record {
                rr_type,
                ttl,
                value,
            });
        }
    }

    /// Looks up records by name and QTYPE (255 matches all). The
    /// returned TTL is the smallest among the matched records.
    pub fn query(&self, name: &str, query_type: u16) -> Option<QueryResult> {
        let records = self.entries.get(&normalize(name))?;

        let mut a_record = String::new();
        let mut txt = String::new();
        let mut ttl = 0u32;
        for record in records {
            if record.rr_type != query_type && query_type != qtype::ANY {
                continue;
            }
            match record.rr_type {
                qtype::A => a_record = record.value.clone(),
                qtype::AAAA if query_type == qtype::AAAA => a_record = record.value.clone(),
                qtype::MX if query_type == qtype::MX => a_record = record.value.clone(),
                qtype::TXT => txt = record.value.clone(),
                _ => continue,
            }
            if ttl == 0 || record.ttl < ttl {
                ttl = record.ttl;
            }
        }

        if a_record.is_empty() && txt.is_empty() {
            return None;
        }
        Some(QueryResult {
            ttl,
            a_record,
            txt,
        })
    }

    /// Returns the number of records.
    pub fn count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

/// Lowercases a name and gives it a trailing dot; the empty name (the
/// zone apex) becomes the bare dot.
fn normalize(name: &str) -> String {
    let mut name = name.to_lowercase();
    if !name.ends_with('.') {
        name.push('.');
    }
    name
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn generic(text: &str) -> Generic {
        let mut ds = Generic::new(3600);
        ds.parse(text, "test");
        ds
    }

    #[test]
    fn records_answer_by_qtype() {
        let ds = generic(
            "example 3600 IN A 192.0.2.1\n\
             example 3600 IN TXT \"v=spf1\"\n",
        );
        assert_eq!(ds.count(), 2);

        let a = ds.query("example", qtype::A).unwrap();
        assert_eq!(a.a_record, "192.0.2.1");
        assert_eq!(a.txt, "");

        let txt = ds.query("example", qtype::TXT).unwrap();
        assert_eq!(txt.txt, "v=spf1");
        assert_eq!(txt.a_record, "");
    }

    #[test]
    fn any_returns_both_a_and_txt() {
        let ds = generic(
            "example 600 IN A 192.0.2.1\n\
             example 300 IN TXT \"v=spf1\"\n",
        );
        let result = ds.query("example", qtype::ANY).unwrap();
        assert_eq!(result.a_record, "192.0.2.1");
        assert_eq!(result.txt, "v=spf1");
        assert_eq!(result.ttl, 300);
    }

    #[test]
    fn ttl_and_class_tokens_are_optional() {
        let ds = generic(
            "$TTL 1h\n\
             www A 192.0.2.2\n\
             mail 2h MX 10 mail.example.com.\n",
        );
        let www = ds.query("www", qtype::A).unwrap();
        assert_eq!(www.ttl, 3600);
        let mx = ds.query("mail", qtype::MX).unwrap();
        assert_eq!(mx.ttl, 7200);
        assert_eq!(mx.a_record, "10 mail.example.com.");
    }

    #[test]
    fn aaaa_records_answer_aaaa_queries() {
        let ds = generic("host IN AAAA 2001:db8::1\n");
        // Three fields minimum, no TTL: "host IN AAAA ..." parses with
        // the class token.
        let result = ds.query("host", qtype::AAAA).unwrap();
        assert_eq!(result.a_record, "2001:db8::1");
        assert!(ds.query("host", qtype::A).is_none());
    }

    #[test]
    fn the_apex_is_addressable_as_at() {
        let ds = generic("@ 3600 IN A 192.0.2.9\n");
        assert_eq!(ds.query("", qtype::A).unwrap().a_record, "192.0.2.9");
        assert_eq!(ds.query(".", qtype::A).unwrap().a_record, "192.0.2.9");
    }

    #[test]
    fn lookups_are_case_insensitive() {
        let ds = generic("Example 3600 IN A 192.0.2.1\n");
        assert!(ds.query("EXAMPLE", qtype::A).is_some());
        assert!(ds.query("example.", qtype::A).is_some());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let ds = generic(
            "short A\n\
             mail 3600 IN MX 10\n\
             good 3600 IN A 192.0.2.1\n",
        );
        assert_eq!(ds.count(), 1);
    }
}
