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

//! Implements command-line argument parsing.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use clap::{ArgGroup, Parser, Subcommand};

use rbldns::dataset::Kind;

/// Parses the command line arguments.
pub fn parse() -> Args {
    Args::parse()
}

/// The rbldns authoritative DNSBL server
#[derive(Debug, Parser)]
#[command(author, version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the server
    Run(RunArgs),
}

#[derive(Debug, clap::Args)]
#[command(group(ArgGroup::new("sources").required(true).args(["config", "zones"])))]
pub struct RunArgs {
    /// Set the configuration file to use
    #[arg(long, value_name = "FILE", conflicts_with = "bind")]
    pub config: Option<PathBuf>,

    /// Set the server bind IP address and port
    #[arg(long, value_name = "IP:PORT")]
    pub bind: Option<SocketAddr>,

    /// Add zones to serve
    #[arg(long = "zone", value_name = "NAME:TYPE:FILE[,FILE...]")]
    pub zones: Vec<ZoneArg>,
}

/// A zone provided on the command line with the `--zone` option:
/// `NAME:TYPE:FILE[,FILE...]`, e.g.
/// `bl.example.com:ip4trie:/etc/rbldns/bl.txt`.
#[derive(Clone, Debug)]
pub struct ZoneArg {
    pub name: String,
    pub kind: Kind,
    pub files: Vec<PathBuf>,
}

impl FromStr for ZoneArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        let mut parts = s.splitn(3, ':');
        let name = parts.next().filter(|name| !name.is_empty());
        let kind = parts.next();
        let files = parts.next();
        let (name, kind, files) = match (name, kind, files) {
            (Some(name), Some(kind), Some(files)) => (name, kind, files),
            _ => return Err("expected NAME:TYPE:FILE[,FILE...]".to_owned()),
        };

        let kind: Kind = kind.parse().map_err(|e| format!("{}", e))?;
        let files: Vec<PathBuf> = files
            .split(',')
            .filter(|file| !file.is_empty())
            .map(PathBuf::from)
            .collect();
        if files.is_empty() {
            return Err("at least one zone file is required".to_owned());
        }

        Ok(Self {
            name: name.to_owned(),
            kind,
            files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_arg_from_str_parses_the_three_parts() {
        let arg: ZoneArg = "bl.example.com:ip4trie:/a/bl.txt,/a/extra.txt"
            .parse()
            .unwrap();
        assert_eq!(arg.name, "bl.example.com");
        assert_eq!(arg.kind, Kind::Ip4Trie);
        assert_eq!(
            arg.files,
            vec![PathBuf::from("/a/bl.txt"), PathBuf::from("/a/extra.txt")],
        );
    }

    #[test]
    fn zone_arg_from_str_rejects_bad_specs() {
        assert!("bl.example.com".parse::<ZoneArg>().is_err());
        assert!("bl.example.com:ip4trie".parse::<ZoneArg>().is_err());
        assert!("bl.example.com:ip9trie:/a/bl.txt".parse::<ZoneArg>().is_err());
        assert!(":ip4trie:/a/bl.txt".parse::<ZoneArg>().is_err());
    }
}
