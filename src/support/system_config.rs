//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of spfcheck.
//
// spfcheck is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// spfcheck is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// spfcheck. If not, see <http://www.gnu.org/licenses/>.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::dns::StaticResolver;
use super::error::Error;

/// The configuration for spfcheck.
///
/// This is stored in a file named `spfcheck.toml`, typically under
/// `/usr/local/etc` or `/etc`. Every part of it is optional.
#[derive(Clone, Debug, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct SystemConfig {
    /// The host name to report through the `%{r}` macro.
    ///
    /// If unset, `unknown` is used.
    pub checker_domain: String,

    /// Path to a `log4rs` configuration file.
    ///
    /// If unset, log messages go to standard error.
    pub log_config: Option<PathBuf>,

    /// Fixed DNS data, keyed by domain name.
    ///
    /// If this or `reverse` is non-empty, no real DNS queries are made at
    /// all; anything not listed simply does not exist.
    pub zone: BTreeMap<String, ZoneConfig>,

    /// Fixed reverse DNS data, from IP address to host names.
    pub reverse: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ZoneConfig {
    pub txt: Vec<String>,
    pub ip: Vec<IpAddr>,
    pub mx: Vec<String>,
    /// If true, every query for this domain fails.
    pub fail: bool,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Error reading '{path}': {error}")]
    Io { path: String, error: io::Error },
    #[error("Error in config file at '{path}': {error}")]
    Toml {
        path: String,
        error: toml::de::Error,
    },
}

impl SystemConfig {
    /// Read the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read(path).map_err(|error| ConfigError::Io {
            path: path.display().to_string(),
            error,
        })?;
        toml::from_slice(&data).map_err(|error| ConfigError::Toml {
            path: path.display().to_string(),
            error,
        })
    }

    /// Build the resolver described by `zone` and `reverse`.
    ///
    /// Returns `None` if neither is set, meaning the system resolver should
    /// be used.
    pub fn static_resolver(&self) -> Result<Option<StaticResolver>, Error> {
        if self.zone.is_empty() && self.reverse.is_empty() {
            return Ok(None);
        }

        let mut resolver = StaticResolver::new();
        for (domain, zone) in &self.zone {
            resolver = resolver
                .with_txt(domain, &zone.txt)
                .with_ips(domain, zone.ip.iter().copied())
                .with_mx(domain, &zone.mx);
            if zone.fail {
                resolver = resolver.with_failure(domain);
            }
        }

        for (ip, names) in &self.reverse {
            let ip = ip
                .parse::<IpAddr>()
                .map_err(|_| Error::InvalidIpAddress(ip.clone()))?;
            resolver = resolver.with_ptr(ip, names);
        }

        Ok(Some(resolver))
    }
}
