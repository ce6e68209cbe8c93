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

//! Zones and the registry that routes queries to them.
//!
//! A [`Zone`] couples a dataset with its access control list and its
//! apex NS/SOA material. Zones are built from [`ZoneSpec`]s (the typed
//! form of the server configuration) by [`build`], published into the
//! [`Registry`], and never mutated afterwards: a reload builds a fresh
//! `Zone` and swaps it in whole.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::acl::Acl;
use crate::dataset::{self, Dataset, Kind};

mod registry;

pub use registry::Registry;

////////////////////////////////////////////////////////////////////////
// ZONES                                                              //
////////////////////////////////////////////////////////////////////////

/// A single served zone. Immutable once published.
pub struct Zone {
    name: String,
    dataset: Dataset,
    acl: Option<Acl>,
    ns: Vec<String>,
    soa: Option<Soa>,
}

impl Zone {
    /// Returns the zone's normalized name (lowercase, trailing dot).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the zone's dataset.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Returns the zone's ACL, if any.
    pub fn acl(&self) -> Option<&Acl> {
        self.acl.as_ref()
    }

    /// Returns the zone's nameserver names for apex NS synthesis.
    pub fn ns(&self) -> &[String] {
        &self.ns
    }

    /// Returns the zone's SOA parameters, if complete enough to serve.
    pub fn soa(&self) -> Option<&Soa> {
        self.soa.as_ref()
    }
}

/// SOA parameters for a zone apex.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Soa {
    pub mname: String,
    pub rname: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

/// Normalizes a domain name for storage and comparison: lowercase with
/// a trailing dot.
pub fn normalize_name(name: &str) -> String {
    let mut name = name.to_lowercase();
    if !name.ends_with('.') {
        name.push('.');
    }
    name
}

////////////////////////////////////////////////////////////////////////
// ZONE SPECIFICATIONS                                                //
////////////////////////////////////////////////////////////////////////

/// The typed description of a zone, as handed over by the
/// configuration layer. Comparing two specs tells the reload controller
/// whether a zone needs rebuilding.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ZoneSpec {
    pub name: String,
    pub kind: Kind,
    pub files: Vec<PathBuf>,
    pub acl_file: Option<PathBuf>,
    pub acl_rules: Option<AclRules>,
    pub ns: Vec<String>,
    pub soa: Option<SoaSpec>,
}

/// Inline allow/deny rules from the configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AclRules {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

impl AclRules {
    /// Whether any rules are present at all.
    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }
}

/// Raw SOA parameters from the configuration; zero fields take the
/// server-wide defaults.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SoaSpec {
    pub mname: String,
    pub rname: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

/// Server-wide defaults applied while building zones.
#[derive(Clone, Copy, Debug)]
pub struct ZoneDefaults {
    pub default_ttl: u32,
    pub soa_refresh: u32,
    pub soa_retry: u32,
    pub soa_expire: u32,
    pub soa_minimum: u32,
}

impl Default for ZoneDefaults {
    fn default() -> Self {
        Self {
            default_ttl: 3600,
            soa_refresh: 3600,
            soa_retry: 600,
            soa_expire: 86400,
            soa_minimum: 3600,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// ZONE CONSTRUCTION                                                  //
////////////////////////////////////////////////////////////////////////

/// Builds a zone from its specification: loads the dataset from its
/// files, builds the ACL (inline rules take precedence over an ACL
/// file), and resolves the SOA parameters against the defaults.
pub fn build(spec: &ZoneSpec, defaults: &ZoneDefaults) -> Result<Zone, BuildError> {
    let dataset =
        dataset::load(spec.kind, &spec.files, defaults.default_ttl).map_err(BuildError::Dataset)?;

    let acl = match (&spec.acl_rules, &spec.acl_file) {
        (Some(rules), _) if !rules.is_empty() => Some(Acl::from_rules(&rules.allow, &rules.deny)),
        (_, Some(path)) => Some(Acl::from_file(path).map_err(|source| BuildError::Acl {
            path: path.clone(),
            source,
        })?),
        _ => None,
    };

    Ok(Zone {
        name: normalize_name(&spec.name),
        dataset,
        acl,
        ns: spec.ns.clone(),
        soa: resolve_soa(spec, defaults),
    })
}

/// Resolves the SOA parameters for a zone: the mname falls back to the
/// first NS name, zero timer fields take the server defaults, and the
/// SOA is only served when both mname and rname end up known.
fn resolve_soa(spec: &ZoneSpec, defaults: &ZoneDefaults) -> Option<Soa> {
    let mut soa = spec.soa.clone().unwrap_or_default();
    if soa.mname.is_empty() {
        if let Some(first_ns) = spec.ns.first() {
            soa.mname = first_ns.clone();
        }
    }
    if soa.refresh == 0 {
        soa.refresh = defaults.soa_refresh;
    }
    if soa.retry == 0 {
        soa.retry = defaults.soa_retry;
    }
    if soa.expire == 0 {
        soa.expire = defaults.soa_expire;
    }
    if soa.minimum == 0 {
        soa.minimum = defaults.soa_minimum;
    }

    if soa.mname.is_empty() || soa.rname.is_empty() {
        return None;
    }
    Some(Soa {
        mname: soa.mname,
        rname: soa.rname,
        serial: soa.serial,
        refresh: soa.refresh,
        retry: soa.retry,
        expire: soa.expire,
        minimum: soa.minimum,
    })
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error preventing a zone from being built. The caller keeps any
/// previously published version of the zone.
#[derive(Debug)]
pub enum BuildError {
    /// The dataset could not be loaded.
    Dataset(dataset::Error),

    /// The ACL file could not be read.
    Acl { path: PathBuf, source: io::Error },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Dataset(err) => err.fmt(f),
            Self::Acl { path, source } => {
                write!(f, "failed to read ACL {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Dataset(err) => Some(err),
            Self::Acl { source, .. } => Some(source),
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
    fn normalize_name_lowercases_and_dots() {
        assert_eq!(normalize_name("BL.Local"), "bl.local.");
        assert_eq!(normalize_name("bl.local."), "bl.local.");
    }

    #[test]
    fn soa_resolution_fills_defaults_and_borrows_the_first_ns() {
        let spec = ZoneSpec {
            name: "bl.local".to_owned(),
            kind: Kind::DnSet,
            files: Vec::new(),
            acl_file: None,
            acl_rules: None,
            ns: vec!["ns1.example.com".to_owned()],
            soa: Some(SoaSpec {
                rname: "hostmaster.example.com".to_owned(),
                serial: 7,
                ..SoaSpec::default()
            }),
        };
        let soa = resolve_soa(&spec, &ZoneDefaults::default()).unwrap();
        assert_eq!(soa.mname, "ns1.example.com");
        assert_eq!(soa.serial, 7);
        assert_eq!(soa.refresh, 3600);
        assert_eq!(soa.retry, 600);
        assert_eq!(soa.expire, 86400);
        assert_eq!(soa.minimum, 3600);
    }

    #[test]
    fn soa_needs_both_mname_and_rname() {
        let spec = ZoneSpec {
            name: "bl.local".to_owned(),
            kind: Kind::DnSet,
            files: Vec::new(),
            acl_file: None,
            acl_rules: None,
            ns: vec!["ns1.example.com".to_owned()],
            soa: None,
        };
        assert!(resolve_soa(&spec, &ZoneDefaults::default()).is_none());
    }
}
