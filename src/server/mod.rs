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

//! The processing logic of the server, abstracted from network I/O.
//!
//! [`Server::handle_message`] turns one received datagram into at most
//! one response: parse the message, route each question through the
//! zone registry, and encode the answers. The I/O provider ([`crate::io`])
//! is responsible for moving datagrams in and out.

use std::convert::TryFrom;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::message::{rcode, writer, Question, Reader, ResourceRecord};
use crate::metrics;
use crate::zone::Registry;

mod query;

/// The query-answering half of the server, shared by all UDP workers.
pub struct Server {
    registry: Arc<Registry>,
    default_ttl: u32,
}

impl Server {
    /// Creates a server answering from `registry`. `default_ttl` is
    /// used for synthesized apex NS records.
    pub fn new(registry: Arc<Registry>, default_ttl: u32) -> Self {
        Self {
            registry,
            default_ttl,
        }
    }

    /// Returns the registry this server answers from.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Handles one received DNS message. Returns the encoded response,
    /// or [`None`] when no response must be sent (malformed input, or
    /// a message that is itself a response).
    pub fn handle_message(&self, received: &[u8], source: IpAddr) -> Option<Vec<u8>> {
        let started = Instant::now();

        let mut reader = match Reader::try_from(received) {
            Ok(reader) => reader,
            Err(_) => {
                metrics::record_error("unknown", "parse_error");
                return None;
            }
        };
        if reader.qr() {
            return None;
        }

        let mut questions: Vec<Question> = Vec::new();
        for _ in 0..reader.qdcount() {
            match reader.read_question() {
                Ok(question) => questions.push(question),
                Err(_) => {
                    metrics::record_error("unknown", "parse_error");
                    return None;
                }
            }
        }

        let mut answers: Vec<ResourceRecord> = Vec::new();
        for question in &questions {
            metrics::record_query("all", question.qtype);
            answers.extend(query::answer(
                &self.registry,
                self.default_ttl,
                source,
                question,
            ));
        }

        let response_rcode = if answers.is_empty() && !questions.is_empty() {
            rcode::NXDOMAIN
        } else {
            rcode::NOERROR
        };
        let response = writer::build_response(reader.id(), &questions, &answers, response_rcode);
        metrics::observe_duration("all", started.elapsed().as_secs_f64());
        Some(response)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use super::*;
    use crate::dataset::Kind;
    use crate::message::{qtype, CLASS_IN};
    use crate::zone::{self, AclRules, SoaSpec, ZoneDefaults, ZoneSpec};

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn spec(name: &str, kind: Kind, file: &tempfile::NamedTempFile) -> ZoneSpec {
        ZoneSpec {
            name: name.to_owned(),
            kind,
            files: vec![PathBuf::from(file.path())],
            acl_file: None,
            acl_rules: None,
            ns: Vec::new(),
            soa: None,
        }
    }

    fn server_with(specs: &[ZoneSpec]) -> Server {
        let registry = Arc::new(Registry::new());
        for spec in specs {
            let _ = registry.replace(zone::build(spec, &ZoneDefaults::default()).unwrap());
        }
        Server::new(registry, 3600)
    }

    fn build_query(name: &str, query_type: u16) -> Vec<u8> {
        let mut message = b"\x12\x34\x00\x00\x00\x01\x00\x00\x00\x00\x00\x00".to_vec();
        message.extend_from_slice(&writer::encode_name(name).unwrap());
        message.extend_from_slice(&query_type.to_be_bytes());
        message.extend_from_slice(&CLASS_IN.to_be_bytes());
        message
    }

    fn source() -> IpAddr {
        "198.51.100.1".parse().unwrap()
    }

    /// Parses the response into its RCODE and its answers as
    /// (rr_type, ttl, rdata) triples. The Reader only consumes
    /// questions, so the records are decoded by hand; our responses
    /// never compress owner names.
    fn parse_answers(response: &[u8]) -> (u8, Vec<(u16, u32, Vec<u8>)>) {
        let mut reader = Reader::try_from(response).unwrap();
        let response_rcode = reader.rcode();
        let ancount = reader.ancount();

        let mut offset = 12;
        for _ in 0..reader.qdcount() {
            let question = reader.read_question().unwrap();
            offset += writer::encode_name(&question.name).unwrap().len() + 4;
        }

        let mut answers = Vec::new();
        for _ in 0..ancount {
            while response[offset] != 0 {
                offset += 1 + response[offset] as usize;
            }
            offset += 1;
            let rr_type = u16::from_be_bytes([response[offset], response[offset + 1]]);
            let ttl = u32::from_be_bytes([
                response[offset + 4],
                response[offset + 5],
                response[offset + 6],
                response[offset + 7],
            ]);
            let rdlength =
                u16::from_be_bytes([response[offset + 8], response[offset + 9]]) as usize;
            let rdata = response[offset + 10..offset + 10 + rdlength].to_vec();
            offset += 10 + rdlength;
            answers.push((rr_type, ttl, rdata));
        }
        (response_rcode, answers)
    }

    #[test]
    fn ip4trie_zone_answers_a_and_txt() {
        let file = write_temp("192.0.2.0/24 :127.0.0.2:spam\n");
        let server = server_with(&[spec("bl.local", Kind::Ip4Trie, &file)]);

        let response = server
            .handle_message(&build_query("5.2.0.192.bl.local.", qtype::A), source())
            .unwrap();
        let (response_rcode, answers) = parse_answers(&response);
        assert_eq!(response_rcode, rcode::NOERROR);
        assert_eq!(answers, vec![(qtype::A, 3600, vec![127, 0, 0, 2])]);

        let response = server
            .handle_message(&build_query("5.2.0.192.bl.local.", qtype::TXT), source())
            .unwrap();
        let (_, answers) = parse_answers(&response);
        assert_eq!(answers, vec![(qtype::TXT, 3600, b"\x04spam".to_vec())]);
    }

    #[test]
    fn excluded_addresses_yield_nxdomain() {
        let file = write_temp("192.0.2.0/24 :127.0.0.2:spam\n!192.0.2.50\n");
        let server = server_with(&[spec("bl.local", Kind::Ip4Trie, &file)]);

        let response = server
            .handle_message(&build_query("50.2.0.192.bl.local.", qtype::A), source())
            .unwrap();
        let (response_rcode, answers) = parse_answers(&response);
        assert_eq!(response_rcode, rcode::NXDOMAIN);
        assert!(answers.is_empty());

        let response = server
            .handle_message(&build_query("51.2.0.192.bl.local.", qtype::A), source())
            .unwrap();
        let (response_rcode, answers) = parse_answers(&response);
        assert_eq!(response_rcode, rcode::NOERROR);
        assert_eq!(answers, vec![(qtype::A, 3600, vec![127, 0, 0, 2])]);
    }

    #[test]
    fn dnset_zone_honors_wildcards_and_negation() {
        let file = write_temp("*.spam.example 127.0.0.2\n!ham.spam.example\n");
        let server = server_with(&[spec("dn.local", Kind::DnSet, &file)]);

        let response = server
            .handle_message(
                &build_query("x.spam.example.dn.local.", qtype::A),
                source(),
            )
            .unwrap();
        let (response_rcode, answers) = parse_answers(&response);
        assert_eq!(response_rcode, rcode::NOERROR);
        assert_eq!(answers, vec![(qtype::A, 3600, vec![127, 0, 0, 2])]);

        let response = server
            .handle_message(
                &build_query("ham.spam.example.dn.local.", qtype::A),
                source(),
            )
            .unwrap();
        let (response_rcode, answers) = parse_answers(&response);
        assert_eq!(response_rcode, rcode::NXDOMAIN);
        assert!(answers.is_empty());
    }

    #[test]
    fn generic_zone_serves_forward_records() {
        let file = write_temp(
            "example 3600 IN A 192.0.2.1\n\
             example 3600 IN TXT \"v=spf1\"\n",
        );
        let server = server_with(&[spec("fwd.local", Kind::Generic, &file)]);

        let response = server
            .handle_message(&build_query("example.fwd.local.", qtype::A), source())
            .unwrap();
        let (_, answers) = parse_answers(&response);
        assert_eq!(answers, vec![(qtype::A, 3600, vec![192, 0, 2, 1])]);

        let response = server
            .handle_message(&build_query("example.fwd.local.", qtype::ANY), source())
            .unwrap();
        let (_, answers) = parse_answers(&response);
        assert_eq!(answers.len(), 2);
        assert!(answers.iter().any(|(t, _, _)| *t == qtype::A));
        assert!(answers.iter().any(|(t, _, _)| *t == qtype::TXT));
    }

    #[test]
    fn acl_gates_queries_by_source_address() {
        let file = write_temp("192.0.2.0/24\n");
        let mut zone_spec = spec("acl.local", Kind::Ip4Trie, &file);
        zone_spec.acl_rules = Some(AclRules {
            allow: vec!["192.168.0.0/16".to_owned()],
            deny: vec!["203.0.113.0/24".to_owned()],
        });
        let server = server_with(&[zone_spec]);
        let query = build_query("5.2.0.192.acl.local.", qtype::A);

        let allowed: IpAddr = "192.168.1.1".parse().unwrap();
        let (response_rcode, answers) =
            parse_answers(&server.handle_message(&query, allowed).unwrap());
        assert_eq!(response_rcode, rcode::NOERROR);
        assert_eq!(answers.len(), 1);

        let denied_before = metrics::ERRORS_TOTAL
            .with_label_values(&["acl.local.", "acl_denied"])
            .get();
        let denied: IpAddr = "203.0.113.9".parse().unwrap();
        let (response_rcode, answers) =
            parse_answers(&server.handle_message(&query, denied).unwrap());
        assert_eq!(response_rcode, rcode::NXDOMAIN);
        assert!(answers.is_empty());
        let denied_after = metrics::ERRORS_TOTAL
            .with_label_values(&["acl.local.", "acl_denied"])
            .get();
        assert_eq!(denied_after - denied_before, 1);

        // Not on the allow list either: the allow list is exclusive.
        let outsider: IpAddr = "10.0.0.1".parse().unwrap();
        let (response_rcode, answers) =
            parse_answers(&server.handle_message(&query, outsider).unwrap());
        assert_eq!(response_rcode, rcode::NXDOMAIN);
        assert!(answers.is_empty());
    }

    #[test]
    fn apex_ns_and_soa_are_synthesized() {
        let file = write_temp("192.0.2.0/24\n");
        let mut zone_spec = spec("bl.local", Kind::Ip4Trie, &file);
        zone_spec.ns = vec!["ns1.example.com".to_owned(), "ns2.example.com".to_owned()];
        zone_spec.soa = Some(SoaSpec {
            mname: "ns1.example.com".to_owned(),
            rname: "hostmaster.example.com".to_owned(),
            serial: 2024010101,
            ..SoaSpec::default()
        });
        let server = server_with(&[zone_spec]);

        let response = server
            .handle_message(&build_query("bl.local.", qtype::NS), source())
            .unwrap();
        let (response_rcode, answers) = parse_answers(&response);
        assert_eq!(response_rcode, rcode::NOERROR);
        assert_eq!(answers.len(), 2);
        assert!(answers.iter().all(|(t, ttl, _)| *t == qtype::NS && *ttl == 3600));

        let response = server
            .handle_message(&build_query("bl.local.", qtype::SOA), source())
            .unwrap();
        let (_, answers) = parse_answers(&response);
        assert_eq!(answers.len(), 1);
        let (rr_type, ttl, rdata) = &answers[0];
        assert_eq!(*rr_type, qtype::SOA);
        assert_eq!(*ttl, 3600);
        // Serial sits right after the two encoded names.
        let names_len = writer::encode_name("ns1.example.com").unwrap().len()
            + writer::encode_name("hostmaster.example.com").unwrap().len();
        assert_eq!(
            rdata[names_len..names_len + 4],
            2024010101u32.to_be_bytes(),
        );
    }

    #[test]
    fn aaaa_against_an_ip4_dataset_yields_nothing() {
        let file = write_temp("192.0.2.0/24\n");
        let server = server_with(&[spec("bl.local", Kind::Ip4Trie, &file)]);
        let response = server
            .handle_message(&build_query("5.2.0.192.bl.local.", qtype::AAAA), source())
            .unwrap();
        let (response_rcode, answers) = parse_answers(&response);
        assert_eq!(response_rcode, rcode::NXDOMAIN);
        assert!(answers.is_empty());
    }

    #[test]
    fn unknown_zones_yield_nxdomain() {
        let file = write_temp("192.0.2.0/24\n");
        let server = server_with(&[spec("bl.local", Kind::Ip4Trie, &file)]);
        let response = server
            .handle_message(&build_query("www.example.org.", qtype::A), source())
            .unwrap();
        let (response_rcode, answers) = parse_answers(&response);
        assert_eq!(response_rcode, rcode::NXDOMAIN);
        assert!(answers.is_empty());
    }

    #[test]
    fn malformed_and_response_messages_get_no_reply() {
        let file = write_temp("192.0.2.0/24\n");
        let server = server_with(&[spec("bl.local", Kind::Ip4Trie, &file)]);

        assert!(server.handle_message(b"\x00\x01\x02", source()).is_none());

        let mut response_bit_set = build_query("5.2.0.192.bl.local.", qtype::A);
        response_bit_set[2] |= 0x80;
        assert!(server.handle_message(&response_bit_set, source()).is_none());
    }
}
