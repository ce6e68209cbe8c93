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

//! The dataset engine: typed in-memory stores loaded from plain-text
//! zone files.
//!
//! A [`Dataset`] is one of seven concrete stores ([`Ip4Trie`],
//! [`Ip4Set`], [`Ip4TSet`], [`Ip6Trie`], [`Ip6TSet`], [`DnSet`], and
//! [`Generic`]) or a [`Combined`] sequence of them. Each store parses
//! its own line format and implements its own lookup; [`load`] builds a
//! store of a given [`Kind`] from a list of files. Lookup keys arrive
//! as the query name with the zone suffix already stripped: the IP
//! stores decode it as a reverse-arpa label sequence, the domain stores
//! treat it as a domain name.
//!
//! Malformed data lines are logged and skipped so that one bad line
//! never takes down a zone; failing to read a file at all aborts that
//! dataset's load.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::UNIX_EPOCH;

mod combined;
mod dnset;
mod generic;
mod ip4set;
mod ip4trie;
mod ip4tset;
mod ip6trie;
mod ip6tset;
pub mod value;

pub use combined::Combined;
pub use dnset::DnSet;
pub use generic::Generic;
pub use ip4set::Ip4Set;
pub use ip4trie::Ip4Trie;
pub use ip4tset::Ip4TSet;
pub use ip6trie::Ip6Trie;
pub use ip6tset::Ip6TSet;
pub use value::Value;

////////////////////////////////////////////////////////////////////////
// QUERY RESULTS                                                      //
////////////////////////////////////////////////////////////////////////

/// The result of a dataset lookup: a TTL, the A record value, and the
/// TXT text with all substitution already applied. Either string may be
/// empty; the caller decides what to emit for the requested QTYPE.
///
/// For MX lookups against a [`Generic`] dataset, `a_record` carries the
/// `"<preference> <exchange>"` value string.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueryResult {
    pub ttl: u32,
    pub a_record: String,
    pub txt: String,
}

////////////////////////////////////////////////////////////////////////
// DATASET KINDS                                                      //
////////////////////////////////////////////////////////////////////////

/// The type of a dataset, as named in configuration.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Kind {
    Ip4Trie,
    Ip4Set,
    Ip4TSet,
    Ip6Trie,
    Ip6TSet,
    DnSet,
    Generic,
    Combined,
}

impl Kind {
    /// Returns the configuration name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ip4Trie => "ip4trie",
            Self::Ip4Set => "ip4set",
            Self::Ip4TSet => "ip4tset",
            Self::Ip6Trie => "ip6trie",
            Self::Ip6TSet => "ip6tset",
            Self::DnSet => "dnset",
            Self::Generic => "generic",
            Self::Combined => "combined",
        }
    }
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "ip4trie" => Ok(Self::Ip4Trie),
            "ip4set" => Ok(Self::Ip4Set),
            "ip4tset" => Ok(Self::Ip4TSet),
            "ip6trie" => Ok(Self::Ip6Trie),
            "ip6tset" => Ok(Self::Ip6TSet),
            "dnset" => Ok(Self::DnSet),
            "generic" => Ok(Self::Generic),
            "combined" => Ok(Self::Combined),
            _ => Err(Error::UnknownType(s.to_owned())),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

////////////////////////////////////////////////////////////////////////
// THE DATASET SUM TYPE                                               //
////////////////////////////////////////////////////////////////////////

/// An in-memory dataset of one of the supported kinds.
///
/// Datasets are immutable once built and published; reloading replaces
/// the whole object rather than mutating it in place.
pub enum Dataset {
    Ip4Trie(Ip4Trie),
    Ip4Set(Ip4Set),
    Ip4TSet(Ip4TSet),
    Ip6Trie(Ip6Trie),
    Ip6TSet(Ip6TSet),
    DnSet(DnSet),
    Generic(Generic),
    Combined(Combined),
}

impl Dataset {
    /// Looks up `name` (the query name with the zone suffix stripped)
    /// for the given QTYPE.
    pub fn query(&self, name: &str, qtype: u16) -> Option<QueryResult> {
        match self {
            Self::Ip4Trie(ds) => ds.query(name, qtype),
            Self::Ip4Set(ds) => ds.query(name, qtype),
            Self::Ip4TSet(ds) => ds.query(name, qtype),
            Self::Ip6Trie(ds) => ds.query(name, qtype),
            Self::Ip6TSet(ds) => ds.query(name, qtype),
            Self::DnSet(ds) => ds.query(name, qtype),
            Self::Generic(ds) => ds.query(name, qtype),
            Self::Combined(ds) => ds.query(name, qtype),
        }
    }

    /// Returns the number of entries in the dataset.
    pub fn count(&self) -> usize {
        match self {
            Self::Ip4Trie(ds) => ds.count(),
            Self::Ip4Set(ds) => ds.count(),
            Self::Ip4TSet(ds) => ds.count(),
            Self::Ip6Trie(ds) => ds.count(),
            Self::Ip6TSet(ds) => ds.count(),
            Self::DnSet(ds) => ds.count(),
            Self::Generic(ds) => ds.count(),
            Self::Combined(ds) => ds.count(),
        }
    }

    /// Returns the kind of this dataset.
    pub fn kind(&self) -> Kind {
        match self {
            Self::Ip4Trie(_) => Kind::Ip4Trie,
            Self::Ip4Set(_) => Kind::Ip4Set,
            Self::Ip4TSet(_) => Kind::Ip4TSet,
            Self::Ip6Trie(_) => Kind::Ip6Trie,
            Self::Ip6TSet(_) => Kind::Ip6TSet,
            Self::DnSet(_) => Kind::DnSet,
            Self::Generic(_) => Kind::Generic,
            Self::Combined(_) => Kind::Combined,
        }
    }
}

/// Builds a dataset of the given kind from `files`, in order.
/// `default_ttl` is the TTL entries receive when the file gives none.
pub fn load(kind: Kind, files: &[PathBuf], default_ttl: u32) -> Result<Dataset, Error> {
    match kind {
        Kind::Ip4Trie => {
            let mut ds = Ip4Trie::new(default_ttl);
            for file in files {
                let (text, mtime) = read_zone_file(file)?;
                ds.note_timestamp(mtime);
                ds.parse(&text, &file.to_string_lossy());
            }
            Ok(Dataset::Ip4Trie(ds))
        }
        Kind::Ip4Set => {
            let mut ds = Ip4Set::new(default_ttl);
            for file in files {
                let (text, mtime) = read_zone_file(file)?;
                ds.note_timestamp(mtime);
                ds.parse(&text, &file.to_string_lossy());
            }
            Ok(Dataset::Ip4Set(ds))
        }
        Kind::Ip4TSet => {
            let mut ds = Ip4TSet::new(default_ttl);
            for file in files {
                let (text, mtime) = read_zone_file(file)?;
                ds.note_timestamp(mtime);
                ds.parse(&text, &file.to_string_lossy());
            }
            Ok(Dataset::Ip4TSet(ds))
        }
        Kind::Ip6Trie => {
            let mut ds = Ip6Trie::new(default_ttl);
            for file in files {
                let (text, mtime) = read_zone_file(file)?;
                ds.note_timestamp(mtime);
                ds.parse(&text, &file.to_string_lossy());
            }
            Ok(Dataset::Ip6Trie(ds))
        }
        Kind::Ip6TSet => {
            let mut ds = Ip6TSet::new(default_ttl);
            for file in files {
                let (text, mtime) = read_zone_file(file)?;
                ds.note_timestamp(mtime);
                ds.parse(&text, &file.to_string_lossy());
            }
            Ok(Dataset::Ip6TSet(ds))
        }
        Kind::DnSet => {
            let mut ds = DnSet::new(default_ttl);
            for file in files {
                let (text, _) = read_zone_file(file)?;
                ds.parse(&text, &file.to_string_lossy());
            }
            ds.finish();
            Ok(Dataset::DnSet(ds))
        }
        Kind::Generic => {
            let mut ds = Generic::new(default_ttl);
            for file in files {
                let (text, _) = read_zone_file(file)?;
                ds.parse(&text, &file.to_string_lossy());
            }
            Ok(Dataset::Generic(ds))
        }
        Kind::Combined => combined::load(files, default_ttl).map(Dataset::Combined),
    }
}

/// Reads a zone file, returning its contents and its modification time
/// in epoch seconds (zero if unavailable).
fn read_zone_file(path: &Path) -> Result<(String, i64), Error> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mtime = std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0);
    Ok((text, mtime))
}

////////////////////////////////////////////////////////////////////////
// REVERSE-NAME DECODING                                              //
////////////////////////////////////////////////////////////////////////

/// Decodes a reverse-IPv4 label sequence: `d.c.b.a` stands for the
/// address `a.b.c.d`. Exactly four decimal labels must be present.
fn parse_reverse_ipv4(name: &str) -> Option<Ipv4Addr> {
    let name = name.strip_suffix('.').unwrap_or(name);
    let mut octets = [0u8; 4];
    let mut labels = name.split('.');
    for slot in (0..4).rev() {
        octets[slot] = labels.next()?.parse().ok()?;
    }
    if labels.next().is_some() {
        return None;
    }
    Some(Ipv4Addr::from(octets))
}

/// Decodes a reverse-IPv6 label sequence: 32 single hex-nibble labels
/// in reverse order, with any residual `ip6.arpa` suffix tolerated.
fn parse_reverse_ipv6(name: &str) -> Option<Ipv6Addr> {
    let name = name.strip_suffix('.').unwrap_or(name);
    let name = name.strip_suffix(".ip6.arpa").unwrap_or(name);

    let labels: Vec<&str> = name.split('.').collect();
    if labels.len() != 32 {
        return None;
    }

    let mut octets = [0u8; 16];
    for (i, label) in labels.iter().enumerate() {
        let mut chars = label.chars();
        let nibble = chars.next()?.to_digit(16)? as u8;
        if chars.next().is_some() {
            return None;
        }
        let byte = 15 - i / 2;
        if i % 2 == 0 {
            octets[byte] |= nibble;
        } else {
            octets[byte] |= nibble << 4;
        }
    }
    Some(Ipv6Addr::from(octets))
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error preventing a dataset from being built.
#[derive(Debug)]
pub enum Error {
    /// A zone file could not be read.
    Io { path: PathBuf, source: io::Error },

    /// The configured dataset type is not one of the supported kinds.
    UnknownType(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            Self::UnknownType(kind) => write!(f, "unknown dataset type: {}", kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::UnknownType(_) => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reverse_ipv4_decodes_and_rejects() {
        assert_eq!(
            parse_reverse_ipv4("5.2.0.192"),
            Some(Ipv4Addr::new(192, 0, 2, 5)),
        );
        assert_eq!(
            parse_reverse_ipv4("5.2.0.192."),
            Some(Ipv4Addr::new(192, 0, 2, 5)),
        );
        assert_eq!(parse_reverse_ipv4("2.0.192"), None);
        assert_eq!(parse_reverse_ipv4("x.5.2.0.192"), None);
        assert_eq!(parse_reverse_ipv4("5.2.0.999"), None);
        assert_eq!(parse_reverse_ipv4("5.2.0.oops"), None);
    }

    #[test]
    fn parse_reverse_ipv6_decodes_full_nibble_sequences() {
        // 2001:db8::1 reversed.
        let name = "1.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.8.b.d.0.1.0.0.2";
        let expected: Ipv6Addr = "2001:db8::1".parse().unwrap();
        assert_eq!(parse_reverse_ipv6(name), Some(expected));
        assert_eq!(
            parse_reverse_ipv6(&format!("{}.ip6.arpa.", name)),
            Some(expected),
        );
    }

    #[test]
    fn parse_reverse_ipv6_rejects_short_and_wide_labels() {
        assert_eq!(parse_reverse_ipv6("1.0.0.0"), None);
        let name = "10.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.8.b.d.0.1.0.0.2";
        assert_eq!(parse_reverse_ipv6(name), None);
    }

    #[test]
    fn kind_round_trips_through_strings() {
        for kind in [
            Kind::Ip4Trie,
            Kind::Ip4Set,
            Kind::Ip4TSet,
            Kind::Ip6Trie,
            Kind::Ip6TSet,
            Kind::DnSet,
            Kind::Generic,
            Kind::Combined,
        ] {
            assert_eq!(kind.as_str().parse::<Kind>().unwrap(), kind);
        }
        assert!(matches!(
            "ip5trie".parse::<Kind>(),
            Err(Error::UnknownType(_)),
        ));
    }
}
