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

//! Implementation of the [`Reader`] type to read on-the-wire DNS
//! messages.

use std::convert::TryFrom;
use std::fmt;

use super::Question;

/// The size of a DNS message header.
pub const HEADER_SIZE: usize = 12;

/// The maximum on-the-wire length of an uncompressed domain name.
const MAX_NAME_WIRE_LEN: usize = 255;

////////////////////////////////////////////////////////////////////////
// READER                                                             //
////////////////////////////////////////////////////////////////////////

/// A "frame" around a buffer containing a DNS message that enables
/// reading the message data.
///
/// A `Reader` is constructed using its [`TryFrom`] implementation. Any
/// underlying buffer for a reader must contain at least a full DNS
/// message header of 12 octets; otherwise the construction fails with
/// [`Error::TooShort`].
///
/// Since header information is in a fixed position, it can be read at
/// any time through the appropriate `Reader` methods. Questions are
/// read sequentially with [`Reader::read_question`], which uses a
/// cursor initially set to the first octet after the header. The
/// answer, authority, and additional sections are never read: this is
/// an authoritative-only server and does not act on records sent to it.
#[derive(Eq, PartialEq)]
pub struct Reader<'a> {
    octets: &'a [u8],
    cursor: usize,
}

impl<'a> Reader<'a> {
    /// Returns the 16-bit ID of the message.
    pub fn id(&self) -> u16 {
        u16::from_be_bytes([self.octets[0], self.octets[1]])
    }

    /// Returns whether the QR (query response) bit is set.
    pub fn qr(&self) -> bool {
        (self.octets[2] & 0x80) != 0
    }

    /// Returns the message's opcode.
    pub fn opcode(&self) -> u8 {
        (self.octets[2] & 0x78) >> 3
    }

    /// Returns whether the AA (authoritative answer) bit is set.
    pub fn aa(&self) -> bool {
        (self.octets[2] & 0x04) != 0
    }

    /// Returns whether the TC (truncation) bit is set.
    pub fn tc(&self) -> bool {
        (self.octets[2] & 0x02) != 0
    }

    /// Returns whether the RD (recursion desired) bit is set.
    pub fn rd(&self) -> bool {
        (self.octets[2] & 0x01) != 0
    }

    /// Returns whether the RA (recursion available) bit is set.
    pub fn ra(&self) -> bool {
        (self.octets[3] & 0x80) != 0
    }

    /// Returns the RCODE of the message.
    pub fn rcode(&self) -> u8 {
        self.octets[3] & 0x0f
    }

    /// Returns the number of questions in the message.
    pub fn qdcount(&self) -> u16 {
        u16::from_be_bytes([self.octets[4], self.octets[5]])
    }

    /// Returns the number of answers in the message.
    pub fn ancount(&self) -> u16 {
        u16::from_be_bytes([self.octets[6], self.octets[7]])
    }

    /// Returns the number of authority records in the message.
    pub fn nscount(&self) -> u16 {
        u16::from_be_bytes([self.octets[8], self.octets[9]])
    }

    /// Returns the number of additional records in the message.
    pub fn arcount(&self) -> u16 {
        u16::from_be_bytes([self.octets[10], self.octets[11]])
    }

    /// Reads a [`Question`] starting at the current cursor.
    ///
    /// This method is atomic, in that the cursor is not changed on
    /// failure.
    pub fn read_question(&mut self) -> Result<Question> {
        let (name, name_len) = parse_name(self.octets, self.cursor)?;
        let fixed = self
            .octets
            .get(self.cursor + name_len..self.cursor + name_len + 4)
            .ok_or(Error::TruncatedQuestion)?;
        let qtype = u16::from_be_bytes([fixed[0], fixed[1]]);
        let qclass = u16::from_be_bytes([fixed[2], fixed[3]]);
        self.cursor += name_len + 4;
        Ok(Question {
            name,
            qtype,
            qclass,
        })
    }
}

impl<'a> TryFrom<&'a [u8]> for Reader<'a> {
    type Error = Error;

    fn try_from(octets: &'a [u8]) -> Result<Self> {
        if octets.len() >= HEADER_SIZE {
            Ok(Self {
                octets,
                cursor: HEADER_SIZE,
            })
        } else {
            Err(Error::TooShort)
        }
    }
}

impl fmt::Debug for Reader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Reader")
            .field("id", &self.id())
            .field("qr", &self.qr())
            .field("opcode", &self.opcode())
            .field("rcode", &self.rcode())
            .field("qdcount", &self.qdcount())
            .field("ancount", &self.ancount())
            .field("nscount", &self.nscount())
            .field("arcount", &self.arcount())
            .field("cursor", &self.cursor)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////
// PARSING OF (POSSIBLY COMPRESSED) ON-THE-WIRE NAMES                 //
////////////////////////////////////////////////////////////////////////

/// Parses a domain name starting at index `start` of `octets`,
/// following compression pointers. Pointer targets are indices into
/// `octets`, so the whole message must be passed in.
///
/// Returns the name in dotted form with a trailing dot (`"."` for the
/// root) together with the on-the-wire length of the name's first
/// chunk, i.e. how far the caller's cursor must advance.
///
/// Pointers must refer to an index before the chunk they appear in
/// (RFC 1035 § 4.1.4 describes them as pointing to a *prior*
/// occurrence). Rejecting anything else guarantees termination on
/// malformed and malicious input alike.
fn parse_name(octets: &[u8], start: usize) -> Result<(String, usize)> {
    let mut name = String::new();
    let mut chunk_start = start;
    let mut wire_len_of_first_chunk = None;
    let mut decoded_len = 0;

    loop {
        let mut index = chunk_start;
        let next_chunk = loop {
            let len = *octets.get(index).ok_or(Error::TruncatedName)? as usize;
            if len & 0xc0 == 0xc0 {
                let low = *octets.get(index + 1).ok_or(Error::TruncatedName)?;
                let pointer = ((len & 0x3f) << 8) | low as usize;
                if pointer >= chunk_start {
                    return Err(Error::BadLabel);
                }
                index += 2;
                break Some(pointer);
            } else if len & 0xc0 != 0 {
                return Err(Error::BadLabel);
            } else if len == 0 {
                index += 1;
                break None;
            } else {
                let label = octets
                    .get(index + 1..index + 1 + len)
                    .ok_or(Error::TruncatedName)?;
                decoded_len += len + 1;
                if decoded_len > MAX_NAME_WIRE_LEN {
                    return Err(Error::BadLabel);
                }
                name.push_str(&String::from_utf8_lossy(label));
                name.push('.');
                index += 1 + len;
            }
        };

        wire_len_of_first_chunk.get_or_insert(index - chunk_start);
        match next_chunk {
            Some(pointer) => chunk_start = pointer,
            None => break,
        }
    }

    if name.is_empty() {
        name.push('.');
    }
    Ok((name, wire_len_of_first_chunk.unwrap()))
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a message or a [`Question`] within it could
/// not be read. A message that fails to parse receives no response.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// The buffer is shorter than a DNS message header.
    TooShort,

    /// A domain name ran off the end of the message.
    TruncatedName,

    /// A label had reserved type bits set, a compression pointer did
    /// not point backwards, or a name exceeded the length limit.
    BadLabel,

    /// The fixed fields after a question name were missing.
    TruncatedQuestion,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::TooShort => f.write_str("message too short"),
            Self::TruncatedName => f.write_str("truncated domain name"),
            Self::BadLabel => f.write_str("bad label"),
            Self::TruncatedQuestion => f.write_str("truncated question"),
        }
    }
}

impl std::error::Error for Error {}

/// The type returned by fallible [`Reader`] methods.
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
