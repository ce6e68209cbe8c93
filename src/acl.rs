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

//! Per-zone access control lists.
//!
//! An ACL holds two lists of CIDR networks. The evaluation order is
//! fixed: an ACL with no rules accepts everything; a deny match
//! rejects; a non-empty allow list then accepts only its members;
//! otherwise the query is accepted. ACLs are immutable once built and
//! are replaced wholesale on reload.

use std::io;
use std::net::IpAddr;
use std::path::Path;

use ipnetwork::IpNetwork;
use log::warn;

/// An access control list for one zone.
#[derive(Clone, Debug, Default)]
pub struct Acl {
    allow: Vec<IpNetwork>,
    deny: Vec<IpNetwork>,
}

impl Acl {
    /// Builds an ACL from a rules file. Lines `allow:` and `deny:`
    /// switch the target list (the default is `allow`); other
    /// non-comment lines are CIDR blocks or bare addresses. Invalid
    /// entries are logged and skipped.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text, &path.to_string_lossy()))
    }

    fn parse(text: &str, origin: &str) -> Self {
        let mut acl = Self::default();
        let mut denying = false;

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with("allow:") {
                denying = false;
                continue;
            }
            if line.starts_with("deny:") {
                denying = true;
                continue;
            }

            match parse_network(line) {
                Some(network) => {
                    if denying {
                        acl.deny.push(network);
                    } else {
                        acl.allow.push(network);
                    }
                }
                None => warn!("{}:{}: invalid IP or CIDR: {}", origin, index + 1, line),
            }
        }
        acl
    }

    /// Builds an ACL from inline allow/deny rule lists. Invalid
    /// entries are logged and skipped.
    pub fn from_rules(allow: &[String], deny: &[String]) -> Self {
        let mut acl = Self::default();
        for rule in allow {
            let rule = rule.trim();
            if rule.is_empty() {
                continue;
            }
            match parse_network(rule) {
                Some(network) => acl.allow.push(network),
                None => warn!("invalid allow rule: {}", rule),
            }
        }
        for rule in deny {
            let rule = rule.trim();
            if rule.is_empty() {
                continue;
            }
            match parse_network(rule) {
                Some(network) => acl.deny.push(network),
                None => warn!("invalid deny rule: {}", rule),
            }
        }
        acl
    }

    /// Evaluates the ACL for a query source address.
    pub fn permits(&self, addr: IpAddr) -> bool {
        if self.allow.is_empty() && self.deny.is_empty() {
            return true;
        }
        if self.deny.iter().any(|network| network.contains(addr)) {
            return false;
        }
        if !self.allow.is_empty() {
            return self.allow.iter().any(|network| network.contains(addr));
        }
        true
    }

    /// Returns the sizes of the allow and deny lists.
    pub fn rule_counts(&self) -> (usize, usize) {
        (self.allow.len(), self.deny.len())
    }
}

/// Parses a CIDR token, falling back to a bare address with a host
/// prefix (`/32` for IPv4, `/128` for IPv6).
fn parse_network(token: &str) -> Option<IpNetwork> {
    if let Ok(network) = token.parse::<IpNetwork>() {
        if token.contains('/') {
            return Some(network);
        }
    }
    let addr: IpAddr = token.parse().ok()?;
    let prefix = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    IpNetwork::new(addr, prefix).ok()
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn an_empty_acl_accepts_everything() {
        let acl = Acl::default();
        assert!(acl.permits(ip("192.168.1.1")));
        assert!(acl.permits(ip("2001:db8::1")));
    }

    #[test]
    fn deny_rules_reject_matching_sources() {
        let acl = Acl::from_rules(&[], &["203.0.113.0/24".to_owned()]);
        assert!(!acl.permits(ip("203.0.113.9")));
        assert!(acl.permits(ip("192.168.1.1")));
    }

    #[test]
    fn a_non_empty_allow_list_is_exclusive() {
        let acl = Acl::from_rules(
            &["192.168.0.0/16".to_owned()],
            &["203.0.113.0/24".to_owned()],
        );
        assert!(acl.permits(ip("192.168.1.1")));
        assert!(!acl.permits(ip("203.0.113.9")));
        assert!(!acl.permits(ip("10.0.0.1")));
    }

    #[test]
    fn bare_addresses_become_host_prefixes() {
        let acl = Acl::from_rules(
            &["127.0.0.1".to_owned(), "2001:db8::1".to_owned()],
            &[],
        );
        assert!(acl.permits(ip("127.0.0.1")));
        assert!(!acl.permits(ip("127.0.0.2")));
        assert!(acl.permits(ip("2001:db8::1")));
        assert!(!acl.permits(ip("2001:db8::2")));
    }

    #[test]
    fn invalid_rules_are_skipped_and_the_rest_apply() {
        let acl = Acl::from_rules(
            &["not-an-ip".to_owned(), "192.168.0.0/16".to_owned()],
            &["300.300.300.300".to_owned()],
        );
        assert_eq!(acl.rule_counts(), (1, 0));
        assert!(acl.permits(ip("192.168.1.1")));
        assert!(!acl.permits(ip("10.0.0.1")));
    }

    #[test]
    fn files_switch_modes_with_directive_lines() {
        let acl = Acl::parse(
            "# management networks\n\
             allow:\n\
             192.168.0.0/16\n\
             deny:\n\
             192.168.66.0/24\n\
             bogus-line\n",
            "test",
        );
        assert_eq!(acl.rule_counts(), (1, 1));
        assert!(acl.permits(ip("192.168.1.1")));
        assert!(!acl.permits(ip("192.168.66.6")));
        assert!(!acl.permits(ip("10.0.0.1")));
    }

    #[test]
    fn an_acl_with_only_invalid_rules_accepts_everything() {
        let acl = Acl::from_rules(&["junk".to_owned()], &["more junk".to_owned()]);
        assert!(acl.permits(ip("10.0.0.1")));
    }
}
