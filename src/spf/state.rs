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

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::prelude::*;
use log::debug;

use crate::support::dns::Resolver;
use crate::support::error::Error;

/// RFC 7208 § 4.6.4
pub const MAX_DNS_LOOKUPS: u32 = 10;
/// The most names an `mx` or `ptr` mechanism (or the `%{p}` macro) will
/// look at.
pub const MAX_NAME_LOOKUPS: usize = 10;

pub const UNKNOWN_CHECKER_DOMAIN: &str = "unknown";

/// The SMTP envelope being checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Environment {
    client_ip: Option<IpAddr>,
    mail_from: String,
    helo_domain: String,
    checker_domain: String,
}

fn domain_part(address: &str) -> &str {
    address.split_once('@').map_or("", |(_, domain)| domain)
}

impl Environment {
    /// Set up an environment.
    ///
    /// If `helo_domain` is `None`, the domain of `mail_from` is used.
    pub fn new(
        client_ip: Option<IpAddr>,
        mail_from: impl Into<String>,
        helo_domain: Option<&str>,
    ) -> Self {
        let mail_from = mail_from.into();
        let helo_domain = helo_domain
            .unwrap_or_else(|| domain_part(&mail_from))
            .to_owned();
        Self {
            client_ip,
            mail_from,
            helo_domain,
            checker_domain: UNKNOWN_CHECKER_DOMAIN.to_owned(),
        }
    }

    /// Like `new`, but takes the client IP as text. Empty text means there is
    /// no client IP.
    pub fn parse(
        client_ip: &str,
        mail_from: impl Into<String>,
        helo_domain: Option<&str>,
    ) -> Result<Self, Error> {
        let client_ip = if client_ip.is_empty() {
            None
        } else {
            Some(
                client_ip
                    .parse::<IpAddr>()
                    .map_err(|_| Error::InvalidIpAddress(client_ip.to_owned()))?,
            )
        };

        Ok(Self::new(client_ip, mail_from, helo_domain))
    }

    /// Set the name of the host doing the check, reported through `%{r}`.
    pub fn with_checker_domain(mut self, checker_domain: &str) -> Self {
        self.checker_domain = checker_domain.to_owned();
        self
    }

    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }

    pub fn mail_from(&self) -> &str {
        &self.mail_from
    }

    pub fn mail_from_domain(&self) -> &str {
        domain_part(&self.mail_from)
    }

    pub fn helo_domain(&self) -> &str {
        &self.helo_domain
    }

    pub fn checker_domain(&self) -> &str {
        &self.checker_domain
    }
}

/// Which identity a `State` is checking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sender {
    HeloDomain,
    MailFrom,
}

/// Mutable context of one sender check.
///
/// Every check of one identity gets a fresh `State`, and with it a fresh DNS
/// lookup budget.
pub struct State<'a> {
    environment: &'a Environment,
    resolver: &'a dyn Resolver,
    sender_kind: Sender,
    sender: String,
    dns_lookups: u32,
    validated_domains: HashMap<String, String>,
    now: DateTime<Utc>,
}

impl<'a> State<'a> {
    pub fn new(
        environment: &'a Environment,
        resolver: &'a dyn Resolver,
        sender_kind: Sender,
    ) -> Self {
        let sender = match sender_kind {
            Sender::HeloDomain => {
                format!("postmaster@{}", environment.helo_domain())
            }
            Sender::MailFrom => {
                let mail_from = environment.mail_from();
                if mail_from.starts_with('@') {
                    format!("postmaster{}", mail_from)
                } else {
                    mail_from.to_owned()
                }
            }
        };

        Self {
            environment,
            resolver,
            sender_kind,
            sender,
            dns_lookups: 0,
            validated_domains: HashMap::new(),
            now: Utc::now(),
        }
    }

    pub fn environment(&self) -> &'a Environment {
        self.environment
    }

    pub fn resolver(&self) -> &'a dyn Resolver {
        self.resolver
    }

    pub fn sender_kind(&self) -> Sender {
        self.sender_kind
    }

    /// The full sender address, as used by `%{s}`.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn sender_local_part(&self) -> &str {
        self.sender
            .split_once('@')
            .map_or("", |(local, _)| local)
    }

    pub fn sender_domain(&self) -> &str {
        domain_part(&self.sender)
    }

    /// The domain whose policy is checked first.
    pub fn sender_policy_domain(&self) -> &'a str {
        match self.sender_kind {
            Sender::HeloDomain => self.environment.helo_domain(),
            Sender::MailFrom => self.environment.mail_from_domain(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn dns_lookups(&self) -> u32 {
        self.dns_lookups
    }

    /// Record one DNS-querying term, failing once more than
    /// `MAX_DNS_LOOKUPS` have been made.
    pub fn count_dns_lookup(&mut self) -> Result<(), Error> {
        self.dns_lookups += 1;
        if self.dns_lookups > MAX_DNS_LOOKUPS {
            debug!(
                "DNS lookup limit exceeded ({} > {})",
                self.dns_lookups, MAX_DNS_LOOKUPS
            );
            Err(Error::TooManyDnsLookups(MAX_DNS_LOOKUPS))
        } else {
            Ok(())
        }
    }

    /// Find the validated domain name of the client IP, for `%{p}`.
    ///
    /// The result is empty if there is no client IP or no PTR name leads back
    /// to it. The first call for an address costs one DNS lookup; the result
    /// is then remembered.
    pub fn validated_client_domain(&mut self) -> Result<String, Error> {
        let ip = match self.environment.client_ip() {
            Some(ip) => ip,
            None => return Ok(String::new()),
        };
        let key = ip.to_string();
        if let Some(domain) = self.validated_domains.get(&key) {
            return Ok(domain.clone());
        }

        self.count_dns_lookup()?;
        let domain = self.resolver.domain_name_from_ip(ip);
        self.validated_domains.insert(key, domain.clone());
        Ok(domain)
    }
}
