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

//! Routing of one question to a zone and conversion of the dataset
//! result into resource records.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use log::debug;

use crate::dataset::QueryResult;
use crate::message::{qtype, writer, Question, ResourceRecord};
use crate::metrics;
use crate::zone::{self, Registry, Zone};

/// Answers one question: find the longest-suffix zone, enforce its
/// ACL, synthesize apex NS/SOA where asked, and otherwise strip the
/// zone suffix and dispatch to the dataset. An empty return means no
/// answer (the caller shapes the NXDOMAIN).
pub(super) fn answer(
    registry: &Registry,
    default_ttl: u32,
    source: IpAddr,
    question: &Question,
) -> Vec<ResourceRecord> {
    let qname = zone::normalize_name(&question.name);

    let zone = match registry.find(&qname) {
        Some(zone) => zone,
        None => return Vec::new(),
    };

    if let Some(acl) = zone.acl() {
        if !acl.permits(source) {
            debug!(
                "query {} from {} denied by ACL of zone {}",
                qname,
                source,
                zone.name(),
            );
            metrics::record_error(zone.name(), "acl_denied");
            return Vec::new();
        }
    }

    // Zone-apex meta-records.
    if qname == zone.name() {
        if let Some(answers) = answer_apex(&zone, &qname, question.qtype, default_ttl) {
            metrics::record_response(zone.name(), true);
            return answers;
        }
    }

    // Strip the zone suffix and hand the inner name to the dataset.
    let inner = qname[..qname.len() - zone.name().len()].trim_end_matches('.');
    let result = match zone.dataset().query(inner, question.qtype) {
        Some(result) => result,
        None => {
            metrics::record_response(zone.name(), false);
            return Vec::new();
        }
    };
    metrics::record_response(zone.name(), true);
    convert(&qname, question.qtype, &result)
}

/// Synthesizes apex NS/SOA answers. Returns [`None`] when the QTYPE is
/// something else or the zone has no material for it, in which case the
/// query falls through to the dataset.
fn answer_apex(
    zone: &Zone,
    qname: &str,
    query_type: u16,
    default_ttl: u32,
) -> Option<Vec<ResourceRecord>> {
    match query_type {
        qtype::NS if !zone.ns().is_empty() => {
            let answers: Vec<ResourceRecord> = zone
                .ns()
                .iter()
                .filter_map(|ns| writer::encode_ns(ns).ok())
                .map(|rdata| {
                    ResourceRecord::new(qname.to_owned(), qtype::NS, default_ttl, rdata)
                })
                .collect();
            if answers.is_empty() {
                None
            } else {
                Some(answers)
            }
        }
        qtype::SOA => {
            let soa = zone.soa()?;
            let rdata = writer::encode_soa(
                &soa.mname,
                &soa.rname,
                soa.serial,
                soa.refresh,
                soa.retry,
                soa.expire,
                soa.minimum,
            )
            .ok()?;
            Some(vec![ResourceRecord::new(
                qname.to_owned(),
                qtype::SOA,
                soa.minimum,
                rdata,
            )])
        }
        _ => None,
    }
}

/// Converts a dataset result into wire records for the requested
/// QTYPE. A record whose stored value does not fit the type is simply
/// not emitted; the others proceed.
fn convert(qname: &str, query_type: u16, result: &QueryResult) -> Vec<ResourceRecord> {
    let mut answers = Vec::new();
    match query_type {
        qtype::A => {
            if let Ok(addr) = result.a_record.parse::<Ipv4Addr>() {
                answers.push(ResourceRecord::new(
                    qname.to_owned(),
                    qtype::A,
                    result.ttl,
                    writer::encode_a(addr),
                ));
            }
        }
        qtype::AAAA => {
            if let Ok(addr) = result.a_record.parse::<Ipv6Addr>() {
                answers.push(ResourceRecord::new(
                    qname.to_owned(),
                    qtype::AAAA,
                    result.ttl,
                    writer::encode_aaaa(addr),
                ));
            }
        }
        qtype::TXT => {
            if !result.txt.is_empty() {
                answers.push(ResourceRecord::new(
                    qname.to_owned(),
                    qtype::TXT,
                    result.ttl,
                    writer::encode_txt(&result.txt),
                ));
            }
        }
        qtype::ANY => {
            if let Ok(addr) = result.a_record.parse::<Ipv4Addr>() {
                answers.push(ResourceRecord::new(
                    qname.to_owned(),
                    qtype::A,
                    result.ttl,
                    writer::encode_a(addr),
                ));
            }
            if !result.txt.is_empty() {
                answers.push(ResourceRecord::new(
                    qname.to_owned(),
                    qtype::TXT,
                    result.ttl,
                    writer::encode_txt(&result.txt),
                ));
            }
        }
        qtype::MX => {
            // The value carries "<preference> <exchange>"; only the
            // generic dataset produces these.
            let mut fields = result.a_record.split_whitespace();
            if let (Some(preference), Some(exchange)) = (fields.next(), fields.next()) {
                if let Ok(preference) = preference.parse::<u16>() {
                    if let Ok(rdata) = writer::encode_mx(preference, exchange) {
                        answers.push(ResourceRecord::new(
                            qname.to_owned(),
                            qtype::MX,
                            result.ttl,
                            rdata,
                        ));
                    }
                }
            }
        }
        _ => {}
    }
    answers
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn result(a_record: &str, txt: &str) -> QueryResult {
        QueryResult {
            ttl: 300,
            a_record: a_record.to_owned(),
            txt: txt.to_owned(),
        }
    }

    #[test]
    fn convert_emits_only_records_that_fit_the_qtype() {
        let both = result("127.0.0.2", "listed");
        assert_eq!(convert("q.", qtype::A, &both).len(), 1);
        assert_eq!(convert("q.", qtype::TXT, &both).len(), 1);
        assert_eq!(convert("q.", qtype::ANY, &both).len(), 2);
        // The stored A value is not an IPv6 address.
        assert!(convert("q.", qtype::AAAA, &both).is_empty());
        // No NS conversion exists outside the apex.
        assert!(convert("q.", qtype::NS, &both).is_empty());
    }

    #[test]
    fn convert_skips_empty_fields() {
        let a_only = result("127.0.0.2", "");
        assert!(convert("q.", qtype::TXT, &a_only).is_empty());
        assert_eq!(convert("q.", qtype::ANY, &a_only).len(), 1);

        let malformed = result("not-an-address", "");
        assert!(convert("q.", qtype::A, &malformed).is_empty());
    }

    #[test]
    fn convert_builds_mx_from_the_value_string() {
        let mx = result("10 mail.example.com.", "");
        let answers = convert("q.", qtype::MX, &mx);
        assert_eq!(answers.len(), 1);
        assert_eq!(&answers[0].rdata[..2], &10u16.to_be_bytes());

        let bad = result("ten mail.example.com.", "");
        assert!(convert("q.", qtype::MX, &bad).is_empty());
    }
}
