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

//! Serialization of DNS responses and rdata.
//!
//! Responses are built in one pass with [`build_response`]. Outgoing
//! names are encoded without compression; per RFC 1035 a label may be
//! at most 63 octets. The per-type rdata encoders produce the wire form
//! consumed by [`build_response`] through
//! [`ResourceRecord`](super::ResourceRecord).

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use super::{Question, ResourceRecord, CLASS_IN};

/// The maximum length of a single label in an encoded name.
const MAX_LABEL_LEN: usize = 63;

/// The maximum length of a TXT character-string.
const MAX_CHARACTER_STRING_LEN: usize = 255;

////////////////////////////////////////////////////////////////////////
// RESPONSE CONSTRUCTION                                              //
////////////////////////////////////////////////////////////////////////

/// Builds a complete response message: a header with `QR` and `AA` set
/// and the given RCODE, the echoed question section, and the provided
/// answers. The authority and additional sections are always empty.
///
/// A record whose owner name fails to encode is dropped from the
/// response; the remaining records proceed.
pub fn build_response(
    id: u16,
    questions: &[Question],
    answers: &[ResourceRecord],
    rcode: u8,
) -> Vec<u8> {
    let encoded_questions: Vec<(Vec<u8>, &Question)> = questions
        .iter()
        .filter_map(|q| encode_name(&q.name).ok().map(|name| (name, q)))
        .collect();
    let encoded_answers: Vec<(Vec<u8>, &ResourceRecord)> = answers
        .iter()
        .filter_map(|rr| encode_name(&rr.name).ok().map(|name| (name, rr)))
        .collect();

    let mut buf = Vec::with_capacity(512);

    // Header: ID, flags (QR=1, AA=1, RD=1), counts.
    buf.extend_from_slice(&id.to_be_bytes());
    let flags = 0x8400u16 | rcode as u16;
    buf.extend_from_slice(&flags.to_be_bytes());
    buf.extend_from_slice(&(encoded_questions.len() as u16).to_be_bytes());
    buf.extend_from_slice(&(encoded_answers.len() as u16).to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes());

    // Question section, re-encoded without compression.
    for (name, question) in &encoded_questions {
        buf.extend_from_slice(name);
        buf.extend_from_slice(&question.qtype.to_be_bytes());
        buf.extend_from_slice(&question.qclass.to_be_bytes());
    }

    // Answer section.
    for (name, rr) in &encoded_answers {
        buf.extend_from_slice(name);
        buf.extend_from_slice(&rr.rr_type.to_be_bytes());
        buf.extend_from_slice(&rr.class.to_be_bytes());
        buf.extend_from_slice(&rr.ttl.to_be_bytes());
        buf.extend_from_slice(&(rr.rdata.len() as u16).to_be_bytes());
        buf.extend_from_slice(&rr.rdata);
    }

    buf
}

impl ResourceRecord {
    /// Convenience constructor for the class-IN records this server
    /// produces.
    pub fn new(name: String, rr_type: u16, ttl: u32, rdata: Vec<u8>) -> Self {
        Self {
            name,
            rr_type,
            class: CLASS_IN,
            ttl,
            rdata,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// NAME ENCODING                                                      //
////////////////////////////////////////////////////////////////////////

/// Encodes a dotted domain name into uncompressed wire form: a sequence
/// of length-prefixed labels followed by the null terminator. A
/// trailing dot on the input is optional; `""` and `"."` encode the
/// root.
pub fn encode_name(name: &str) -> Result<Vec<u8>> {
    let name = name.strip_suffix('.').unwrap_or(name);
    let mut buf = Vec::with_capacity(name.len() + 2);
    if !name.is_empty() {
        for label in name.split('.') {
            if label.len() > MAX_LABEL_LEN {
                return Err(Error::LabelTooLong);
            }
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
    }
    buf.push(0);
    Ok(buf)
}

////////////////////////////////////////////////////////////////////////
// RDATA ENCODING                                                     //
////////////////////////////////////////////////////////////////////////

/// Encodes the rdata of an A record.
pub fn encode_a(addr: Ipv4Addr) -> Vec<u8> {
    addr.octets().to_vec()
}

/// Encodes the rdata of an AAAA record.
pub fn encode_aaaa(addr: Ipv6Addr) -> Vec<u8> {
    addr.octets().to_vec()
}

/// Encodes the rdata of a TXT record as a single character-string,
/// truncated to 255 octets.
pub fn encode_txt(text: &str) -> Vec<u8> {
    let text = if text.len() > MAX_CHARACTER_STRING_LEN {
        &text.as_bytes()[..MAX_CHARACTER_STRING_LEN]
    } else {
        text.as_bytes()
    };
    let mut buf = Vec::with_capacity(text.len() + 1);
    buf.push(text.len() as u8);
    buf.extend_from_slice(text);
    buf
}

/// Encodes the rdata of an MX record: the 16-bit preference followed by
/// the exchange name.
pub fn encode_mx(preference: u16, exchange: &str) -> Result<Vec<u8>> {
    let name = encode_name(exchange)?;
    let mut buf = Vec::with_capacity(2 + name.len());
    buf.extend_from_slice(&preference.to_be_bytes());
    buf.extend_from_slice(&name);
    Ok(buf)
}

/// Encodes the rdata of an NS record.
pub fn encode_ns(nameserver: &str) -> Result<Vec<u8>> {
    encode_name(nameserver)
}

/// Encodes the rdata of an SOA record: mname, rname, and then the five
/// 32-bit fields in RFC 1035 order.
#[allow(clippy::too_many_arguments)]
pub fn encode_soa(
    mname: &str,
    rname: &str,
    serial: u32,
    refresh: u32,
    retry: u32,
    expire: u32,
    minimum: u32,
) -> Result<Vec<u8>> {
    let mname = encode_name(mname)?;
    let rname = encode_name(rname)?;
    let mut buf = Vec::with_capacity(mname.len() + rname.len() + 20);
    buf.extend_from_slice(&mname);
    buf.extend_from_slice(&rname);
    for field in [serial, refresh, retry, expire, minimum] {
        buf.extend_from_slice(&field.to_be_bytes());
    }
    Ok(buf)
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a name could not be encoded.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// A label exceeded 63 octets.
    LabelTooLong,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::LabelTooLong => f.write_str("label too long"),
        }
    }
}

impl std::error::Error for Error {}

/// The type returned by fallible encoding functions.
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
