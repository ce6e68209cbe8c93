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

//! Implementation of the [`Registry`] structure.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{normalize_name, Zone};

/// The set of zones served by the server, shared between the query
/// path and the reload controller.
///
/// Query workers take the read side of the lock just long enough to
/// find the matching zone and clone its [`Arc`]; a query that started
/// before a swap therefore keeps serving from the dataset it captured.
/// The reload controller rebuilds zones entirely outside the lock and
/// takes the write side only for the instantaneous insertion, removal,
/// or replacement of a single entry.
#[derive(Default)]
pub struct Registry {
    zones: RwLock<HashMap<String, Arc<Zone>>>,
}

impl Registry {
    /// Creates a new, initially empty `Registry`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `zone`, replacing and returning the preexisting zone
    /// of that name (if any).
    pub fn replace(&self, zone: Zone) -> Option<Arc<Zone>> {
        let name = zone.name().to_owned();
        let mut zones = self.zones.write().unwrap();
        zones.insert(name, Arc::new(zone))
    }

    /// Removes and returns the zone named `name` (if any).
    pub fn remove(&self, name: &str) -> Option<Arc<Zone>> {
        let mut zones = self.zones.write().unwrap();
        zones.remove(&normalize_name(name))
    }

    /// Finds the zone whose name is the longest suffix of `qname` (a
    /// normalized query name). Suffixes match on label boundaries only:
    /// `xbl.local.` is not inside the zone `bl.local.`. Equal-length
    /// matches cannot occur with unique zone names, but ties would
    /// resolve deterministically by name order.
    pub fn find(&self, qname: &str) -> Option<Arc<Zone>> {
        let zones = self.zones.read().unwrap();
        let mut best: Option<&Arc<Zone>> = None;
        for zone in zones.values() {
            if !is_zone_suffix(zone.name(), qname) {
                continue;
            }
            let better = match best {
                None => true,
                Some(current) => {
                    let (current_name, name) = (current.name(), zone.name());
                    name.len() > current_name.len()
                        || (name.len() == current_name.len() && name < current_name)
                }
            };
            if better {
                best = Some(zone);
            }
        }
        best.cloned()
    }

    /// Returns the number of published zones.
    pub fn len(&self) -> usize {
        self.zones.read().unwrap().len()
    }

    /// Returns whether the registry holds no zones.
    pub fn is_empty(&self) -> bool {
        self.zones.read().unwrap().is_empty()
    }

    /// Returns the published zone names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.zones.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Whether `zone` (normalized, trailing dot) is a label-boundary
/// suffix of `qname`.
fn is_zone_suffix(zone: &str, qname: &str) -> bool {
    if zone == "." {
        return true;
    }
    if qname == zone {
        return true;
    }
    qname.len() > zone.len()
        && qname.ends_with(zone)
        && qname.as_bytes()[qname.len() - zone.len() - 1] == b'.'
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::super::{build, ZoneDefaults, ZoneSpec};
    use super::*;
    use crate::dataset::Kind;

    fn publish(registry: &Registry, name: &str) {
        let spec = ZoneSpec {
            name: name.to_owned(),
            kind: Kind::DnSet,
            files: Vec::new(),
            acl_file: None,
            acl_rules: None,
            ns: Vec::new(),
            soa: None,
        };
        let _ = registry.replace(build(&spec, &ZoneDefaults::default()).unwrap());
    }

    #[test]
    fn find_selects_the_longest_suffix_on_label_boundaries() {
        let registry = Registry::new();
        publish(&registry, "example.com");
        publish(&registry, "bl.example.com");

        assert_eq!(
            registry.find("x.bl.example.com.").unwrap().name(),
            "bl.example.com.",
        );
        assert_eq!(
            registry.find("x.example.com.").unwrap().name(),
            "example.com.",
        );
        assert_eq!(
            registry.find("bl.example.com.").unwrap().name(),
            "bl.example.com.",
        );
        assert!(registry.find("example.org.").is_none());
        // No label boundary: xbl.example.com is not in bl.example.com.
        assert_eq!(
            registry.find("xbl.example.com.").unwrap().name(),
            "example.com.",
        );
    }

    #[test]
    fn replace_swaps_and_remove_deletes() {
        let registry = Registry::new();
        publish(&registry, "bl.local");
        assert_eq!(registry.len(), 1);

        publish(&registry, "bl.local");
        assert_eq!(registry.len(), 1);

        assert!(registry.remove("BL.LOCAL").is_some());
        assert!(registry.is_empty());
        assert!(registry.find("5.2.0.192.bl.local.").is_none());
    }
}
