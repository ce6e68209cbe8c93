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

//! Implements the server configuration file.
//!
//! The configuration is TOML. Zone file paths and ACL paths are
//! interpreted relative to the configuration file's directory.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::error;
use serde::Deserialize;

use rbldns::dataset::Kind;
use rbldns::io::UdpConfig;
use rbldns::zone::{AclRules, SoaSpec, ZoneDefaults, ZoneSpec};

////////////////////////////////////////////////////////////////////////
// CONFIGURATION LOADING                                              //
////////////////////////////////////////////////////////////////////////

/// Loads the server configuration from the file given by `path`.
pub fn load_from_path(path: &Path) -> Result<Config> {
    let dir = path
        .parent()
        .context("the configuration file path has no parent")?;
    let raw = std::fs::read_to_string(path).context("failed to read the configuration file")?;
    let mut config: Config =
        toml::from_str(&raw).context("failed to parse the configuration file")?;

    // Zone and ACL paths are relative to the configuration file.
    for zone in &mut config.zones {
        for file in &mut zone.files {
            if file.is_relative() {
                *file = dir.join(&*file);
            }
        }
        if let Some(acl) = &mut zone.acl {
            if acl.is_relative() {
                *acl = dir.join(&*acl);
            }
        }
    }
    Ok(config)
}

/// Converts the configured zones into typed [`ZoneSpec`]s. Zones with
/// an unknown dataset type are logged and skipped; the returned count
/// is the number of zones listed in the configuration.
pub fn collect_specs(config: &Config) -> (Vec<ZoneSpec>, usize) {
    let listed = config.zones.len();
    let mut specs = Vec::new();
    for zone in &config.zones {
        match to_zone_spec(zone) {
            Ok(spec) => specs.push(spec),
            Err(err) => error!("skipping zone {}: {}", zone.name, err),
        }
    }
    (specs, listed)
}

fn to_zone_spec(zone: &ZoneSection) -> Result<ZoneSpec> {
    let kind: Kind = zone.kind.parse()?;
    Ok(ZoneSpec {
        name: zone.name.clone(),
        kind,
        files: zone.files.clone(),
        acl_file: zone.acl.clone(),
        acl_rules: zone.acl_rules.as_ref().map(|rules| AclRules {
            allow: rules.allow.clone(),
            deny: rules.deny.clone(),
        }),
        ns: zone.ns.clone(),
        soa: zone.soa.as_ref().map(|soa| SoaSpec {
            mname: soa.mname.clone(),
            rname: soa.rname.clone(),
            serial: soa.serial,
            refresh: soa.refresh,
            retry: soa.retry,
            expire: soa.expire,
            minimum: soa.minimum,
        }),
    })
}

/// Derives the zone-building defaults from the server section.
pub fn zone_defaults(server: &ServerSection) -> ZoneDefaults {
    ZoneDefaults {
        default_ttl: server.default_ttl,
        soa_refresh: server.soa_refresh,
        soa_retry: server.soa_retry,
        soa_expire: server.soa_expire,
        soa_minimum: server.soa_minimum,
    }
}

/// Derives the UDP provider configuration from the server section.
pub fn udp_config(server: &ServerSection) -> UdpConfig {
    UdpConfig {
        read_timeout: Duration::from_secs(server.read_timeout),
        buffer_size: server.udp_buffer_size,
        ..UdpConfig::default()
    }
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION FILE STRUCTURE                                       //
////////////////////////////////////////////////////////////////////////

/// The complete configuration file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub zones: Vec<ZoneSection>,
    #[serde(default)]
    pub metrics: MetricsSection,
}

/// The `[server]` section.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    #[serde(default = "default_auto_reload")]
    pub auto_reload: bool,
    #[serde(default = "default_reload_debounce")]
    pub reload_debounce: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
    #[serde(default = "default_udp_buffer_size")]
    pub udp_buffer_size: usize,
    #[serde(default = "default_default_ttl")]
    pub default_ttl: u32,
    #[serde(default = "default_soa_refresh")]
    pub soa_refresh: u32,
    #[serde(default = "default_soa_retry")]
    pub soa_retry: u32,
    #[serde(default = "default_soa_expire")]
    pub soa_expire: u32,
    #[serde(default = "default_soa_minimum")]
    pub soa_minimum: u32,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            auto_reload: default_auto_reload(),
            reload_debounce: default_reload_debounce(),
            read_timeout: default_read_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
            udp_buffer_size: default_udp_buffer_size(),
            default_ttl: default_default_ttl(),
            soa_refresh: default_soa_refresh(),
            soa_retry: default_soa_retry(),
            soa_expire: default_soa_expire(),
            soa_minimum: default_soa_minimum(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 53))
}

fn default_auto_reload() -> bool {
    true
}

fn default_reload_debounce() -> u64 {
    2
}

fn default_read_timeout() -> u64 {
    1
}

fn default_shutdown_timeout() -> u64 {
    5
}

fn default_udp_buffer_size() -> usize {
    512
}

fn default_default_ttl() -> u32 {
    3600
}

fn default_soa_refresh() -> u32 {
    3600
}

fn default_soa_retry() -> u32 {
    600
}

fn default_soa_expire() -> u32 {
    86400
}

fn default_soa_minimum() -> u32 {
    3600
}

/// The configuration of a single zone.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneSection {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub acl: Option<PathBuf>,
    #[serde(default)]
    pub acl_rules: Option<AclRulesSection>,
    #[serde(default)]
    pub ns: Vec<String>,
    #[serde(default)]
    pub soa: Option<SoaSection>,
}

/// Inline ACL rules for a zone.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AclRulesSection {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

/// SOA parameters for a zone.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SoaSection {
    #[serde(default)]
    pub mname: String,
    #[serde(default)]
    pub rname: String,
    #[serde(default)]
    pub serial: u32,
    #[serde(default)]
    pub refresh: u32,
    #[serde(default)]
    pub retry: u32,
    #[serde(default)]
    pub expire: u32,
    #[serde(default)]
    pub minimum: u32,
}

/// The `[metrics]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsSection {
    #[serde(default)]
    pub prometheus_endpoint: Option<String>,
    #[serde(default)]
    pub otel_endpoint: Option<String>,
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
