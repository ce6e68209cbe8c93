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

//! Reading and writing of on-the-wire DNS messages.
//!
//! The [`Reader`] type parses received datagrams (header fields and
//! questions; this server never consumes records sent to it), and the
//! [`writer`] module serializes complete responses. Domain names are
//! handled as dotted strings with a trailing dot, the form in which the
//! rest of the crate stores and compares them.

pub mod reader;
pub mod writer;

pub use reader::Reader;

/// RR TYPE and QTYPE codes understood by this server.
pub mod qtype {
    pub const A: u16 = 1;
    pub const NS: u16 = 2;
    pub const SOA: u16 = 6;
    pub const MX: u16 = 15;
    pub const TXT: u16 = 16;
    pub const AAAA: u16 = 28;

    /// QTYPE * (ANY), valid in questions only.
    pub const ANY: u16 = 255;
}

/// RCODE values this server produces.
pub mod rcode {
    pub const NOERROR: u8 = 0;
    pub const NXDOMAIN: u8 = 3;
}

/// The Internet class. The only class this server serves.
pub const CLASS_IN: u16 = 1;

/// The question of a DNS query: the queried name (dotted form with a
/// trailing dot, exactly as received), the QTYPE, and the QCLASS.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Question {
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

/// A resource record ready for serialization: the owner name in dotted
/// form and the rdata already encoded by one of the [`writer`]
/// functions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceRecord {
    pub name: String,
    pub rr_type: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}
