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

//! DNS access for SPF evaluation.
//!
//! The evaluator only ever talks to DNS through the `Resolver` trait, which
//! exposes exactly the primitives RFC 7208 needs. "The name exists but has no
//! such records" and "the name does not exist" are both reported as an empty
//! list; only transport-level failures are errors.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::net::IpAddr;
use std::sync::Arc;

use log::debug;

use super::error::Error;
use crate::spf::state::MAX_NAME_LOOKUPS;

pub trait Resolver {
    /// Return the TXT records of `domain`, each with its character-strings
    /// concatenated.
    fn txt_records(&self, domain: &str) -> Result<Vec<String>, Error>;
    /// Return the A and AAAA records of `domain`.
    fn ip_addresses(&self, domain: &str) -> Result<Vec<IpAddr>, Error>;
    /// Return the exchange names of the MX records of `domain`, without any
    /// trailing `.`.
    fn mx_records(&self, domain: &str) -> Result<Vec<String>, Error>;
    /// Return the names the PTR records for `ip` point to.
    fn ptr_records(&self, ip: IpAddr) -> Result<Vec<String>, Error>;

    /// Return the validated host name of `ip`: the first of its PTR names
    /// whose forward lookup includes `ip` again.
    ///
    /// Only the first `MAX_NAME_LOOKUPS` PTR names are tried. Returns an empty
    /// string if no name validates or any lookup fails.
    fn domain_name_from_ip(&self, ip: IpAddr) -> String {
        match validated_name(self, ip) {
            Ok(name) => name.unwrap_or_default(),
            Err(e) => {
                debug!("Reverse lookup of {} failed: {}", ip, e);
                String::new()
            }
        }
    }
}

fn validated_name<R: Resolver + ?Sized>(
    resolver: &R,
    ip: IpAddr,
) -> Result<Option<String>, Error> {
    for name in resolver
        .ptr_records(ip)?
        .into_iter()
        .take(MAX_NAME_LOOKUPS)
    {
        if resolver.ip_addresses(&name)?.contains(&ip) {
            return Ok(Some(name));
        }
    }

    Ok(None)
}

impl<R: Resolver + ?Sized> Resolver for &R {
    fn txt_records(&self, domain: &str) -> Result<Vec<String>, Error> {
        (**self).txt_records(domain)
    }

    fn ip_addresses(&self, domain: &str) -> Result<Vec<IpAddr>, Error> {
        (**self).ip_addresses(domain)
    }

    fn mx_records(&self, domain: &str) -> Result<Vec<String>, Error> {
        (**self).mx_records(domain)
    }

    fn ptr_records(&self, ip: IpAddr) -> Result<Vec<String>, Error> {
        (**self).ptr_records(ip)
    }

    fn domain_name_from_ip(&self, ip: IpAddr) -> String {
        (**self).domain_name_from_ip(ip)
    }
}

impl<R: Resolver + ?Sized> Resolver for Box<R> {
    fn txt_records(&self, domain: &str) -> Result<Vec<String>, Error> {
        (**self).txt_records(domain)
    }

    fn ip_addresses(&self, domain: &str) -> Result<Vec<IpAddr>, Error> {
        (**self).ip_addresses(domain)
    }

    fn mx_records(&self, domain: &str) -> Result<Vec<String>, Error> {
        (**self).mx_records(domain)
    }

    fn ptr_records(&self, ip: IpAddr) -> Result<Vec<String>, Error> {
        (**self).ptr_records(ip)
    }

    fn domain_name_from_ip(&self, ip: IpAddr) -> String {
        (**self).domain_name_from_ip(ip)
    }
}

impl<R: Resolver + ?Sized> Resolver for Arc<R> {
    fn txt_records(&self, domain: &str) -> Result<Vec<String>, Error> {
        (**self).txt_records(domain)
    }

    fn ip_addresses(&self, domain: &str) -> Result<Vec<IpAddr>, Error> {
        (**self).ip_addresses(domain)
    }

    fn mx_records(&self, domain: &str) -> Result<Vec<String>, Error> {
        (**self).mx_records(domain)
    }

    fn ptr_records(&self, ip: IpAddr) -> Result<Vec<String>, Error> {
        (**self).ptr_records(ip)
    }

    fn domain_name_from_ip(&self, ip: IpAddr) -> String {
        (**self).domain_name_from_ip(ip)
    }
}

/// Build the reverse-lookup name for `ip`.
///
/// IPv6 addresses are written as 32 reversed nibbles, per RFC 3596.
pub fn reverse_name(ip: IpAddr) -> String {
    let mut s = String::new();
    match ip {
        IpAddr::V4(ip) => {
            let [a, b, c, d] = ip.octets();
            let _ = write!(s, "{}.{}.{}.{}.in-addr.arpa", d, c, b, a);
        }
        IpAddr::V6(ip) => {
            for octet in ip.octets().iter().rev() {
                let _ = write!(s, "{:x}.{:x}.", octet & 0xF, octet >> 4);
            }
            s.push_str("ip6.arpa");
        }
    }
    s
}

/// Normalise a domain for use as a lookup key: lower case, no trailing `.`.
fn normalise(domain: &str) -> String {
    domain.trim_end_matches('.').to_ascii_lowercase()
}

fn require_domain(domain: &str) -> Result<(), Error> {
    if domain.trim().is_empty() {
        Err(Error::dns(domain, "No domain specified"))
    } else {
        Ok(())
    }
}

/// A `Resolver` backed by the system's DNS configuration.
pub struct HickoryResolver {
    inner: hickory_resolver::Resolver,
}

impl HickoryResolver {
    /// Create a resolver from `/etc/resolv.conf` or the platform equivalent.
    pub fn from_system_conf() -> Result<Self, Error> {
        hickory_resolver::Resolver::from_system_conf()
            .map(|inner| Self { inner })
            .map_err(|e| Error::dns("", e))
    }
}

/// Looks up fully-qualified so that resolver search domains never apply.
fn fqdn(domain: &str) -> String {
    format!("{}.", domain.trim_end_matches('.'))
}

fn is_not_found(e: &hickory_resolver::error::ResolveError) -> bool {
    use hickory_resolver::error::ResolveErrorKind as Rek;

    matches!(*e.kind(), Rek::NoRecordsFound { .. })
}

impl Resolver for HickoryResolver {
    fn txt_records(&self, domain: &str) -> Result<Vec<String>, Error> {
        require_domain(domain)?;
        debug!("TXT lookup for {}", domain);
        match self.inner.txt_lookup(fqdn(domain)) {
            Ok(r) => Ok(r
                .iter()
                .map(|parts| {
                    let len = parts.iter().map(|p| p.len()).sum();
                    let mut combined = Vec::with_capacity(len);
                    for part in parts.iter() {
                        combined.extend_from_slice(part);
                    }

                    match String::from_utf8(combined) {
                        Ok(s) => s,
                        Err(e) => {
                            String::from_utf8_lossy(e.as_bytes()).into_owned()
                        }
                    }
                })
                .collect()),
            Err(e) if is_not_found(&e) => Ok(Vec::new()),
            Err(e) => Err(Error::dns(domain, e)),
        }
    }

    fn ip_addresses(&self, domain: &str) -> Result<Vec<IpAddr>, Error> {
        require_domain(domain)?;
        debug!("A/AAAA lookup for {}", domain);
        match self.inner.lookup_ip(fqdn(domain)) {
            Ok(r) => Ok(r.iter().collect()),
            Err(e) if is_not_found(&e) => Ok(Vec::new()),
            Err(e) => Err(Error::dns(domain, e)),
        }
    }

    fn mx_records(&self, domain: &str) -> Result<Vec<String>, Error> {
        require_domain(domain)?;
        debug!("MX lookup for {}", domain);
        match self.inner.mx_lookup(fqdn(domain)) {
            Ok(r) => Ok(r
                .iter()
                .map(|mx| normalise(&mx.exchange().to_utf8()))
                .collect()),
            Err(e) if is_not_found(&e) => Ok(Vec::new()),
            Err(e) => Err(Error::dns(domain, e)),
        }
    }

    fn ptr_records(&self, ip: IpAddr) -> Result<Vec<String>, Error> {
        debug!("PTR lookup for {}", ip);
        match self.inner.reverse_lookup(ip) {
            Ok(r) => Ok(r.iter().map(|n| normalise(&n.0.to_utf8())).collect()),
            Err(e) if is_not_found(&e) => Ok(Vec::new()),
            Err(e) => Err(Error::dns(&reverse_name(ip), e)),
        }
    }
}

/// An in-memory DNS zone.
///
/// Names are matched case-insensitively and without regard to a trailing
/// `.`. Names marked as failing produce `Error::DnsResolution` for every
/// query type.
#[derive(Clone, Debug, Default)]
pub struct StaticResolver {
    txt: HashMap<String, Vec<String>>,
    ip: HashMap<String, Vec<IpAddr>>,
    mx: HashMap<String, Vec<String>>,
    ptr: HashMap<IpAddr, Vec<String>>,
    failing: HashSet<String>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_txt<S: ToString>(
        mut self,
        domain: &str,
        records: impl IntoIterator<Item = S>,
    ) -> Self {
        self.txt
            .entry(normalise(domain))
            .or_default()
            .extend(records.into_iter().map(|r| r.to_string()));
        self
    }

    pub fn with_ips(
        mut self,
        domain: &str,
        ips: impl IntoIterator<Item = IpAddr>,
    ) -> Self {
        self.ip.entry(normalise(domain)).or_default().extend(ips);
        self
    }

    pub fn with_mx<S: AsRef<str>>(
        mut self,
        domain: &str,
        exchanges: impl IntoIterator<Item = S>,
    ) -> Self {
        self.mx
            .entry(normalise(domain))
            .or_default()
            .extend(exchanges.into_iter().map(|e| normalise(e.as_ref())));
        self
    }

    pub fn with_ptr<S: AsRef<str>>(
        mut self,
        ip: IpAddr,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        self.ptr
            .entry(ip)
            .or_default()
            .extend(names.into_iter().map(|n| normalise(n.as_ref())));
        self
    }

    pub fn with_failure(mut self, domain: &str) -> Self {
        self.failing.insert(normalise(domain));
        self
    }

    fn check_failure(&self, domain: &str) -> Result<String, Error> {
        require_domain(domain)?;
        let key = normalise(domain);
        if self.failing.contains(&key) {
            Err(Error::dns(domain, "SERVFAIL"))
        } else {
            Ok(key)
        }
    }
}

impl Resolver for StaticResolver {
    fn txt_records(&self, domain: &str) -> Result<Vec<String>, Error> {
        let key = self.check_failure(domain)?;
        Ok(self.txt.get(&key).cloned().unwrap_or_default())
    }

    fn ip_addresses(&self, domain: &str) -> Result<Vec<IpAddr>, Error> {
        let key = self.check_failure(domain)?;
        Ok(self.ip.get(&key).cloned().unwrap_or_default())
    }

    fn mx_records(&self, domain: &str) -> Result<Vec<String>, Error> {
        let key = self.check_failure(domain)?;
        Ok(self.mx.get(&key).cloned().unwrap_or_default())
    }

    fn ptr_records(&self, ip: IpAddr) -> Result<Vec<String>, Error> {
        self.check_failure(&reverse_name(ip))?;
        Ok(self.ptr.get(&ip).cloned().unwrap_or_default())
    }
}
