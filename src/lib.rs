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

//! An authoritative, UDP-only DNS server for blocklist/allowlist zones.
//!
//! The `rbldns` crate implements the machinery of a DNSBL-style
//! nameserver: typed in-memory datasets loaded from plain-text zone
//! files ([`dataset`]), a zone registry with longest-suffix routing and
//! per-zone access control ([`zone`], [`acl`]), an RFC 1035 wire codec
//! for questions and answers ([`message`]), the query-answering logic
//! itself ([`server`]), a blocking UDP I/O provider ([`io`]), and a
//! reload controller that watches zone files on disk and swaps rebuilt
//! datasets into the registry without interrupting in-flight queries
//! ([`reload`]).
//!
//! The accompanying `rbldnsd` binary wires these pieces to a
//! configuration file, command-line arguments, process signals, and a
//! Prometheus metrics endpoint.

pub mod acl;
pub mod dataset;
pub mod io;
pub mod message;
pub mod metrics;
pub mod reload;
pub mod server;
pub mod thread;
pub mod zone;
