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

//! An interpreter for the esoteric programming language known as "Sender
//! Policy Framework".
//!
//! Evaluation is a straightforward recursive walk. `include` and `redirect`
//! recurse into other records; the only thing bounding that recursion is the
//! DNS lookup budget in `State`, which unwinds everything through `?` once
//! it is exhausted.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bitflags::bitflags;
use log::{debug, info};

use super::decoder::Decoder;
use super::expand::expand;
use super::macro_string::MacroString;
use super::semantic::{self, Level};
use super::state::{Environment, Sender, State, MAX_NAME_LOOKUPS};
use super::syntax::{Mechanism, Modifier, Qualifier, Record};
use crate::support::dns::Resolver;
use crate::support::error::Error;

/// The SPF result codes.
///
/// RFC 7208 § 2.6. There is no `TempError`: DNS failures which RFC 7208
/// would report that way produce `None` with a message instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpfResult {
    None,
    Neutral,
    Pass,
    Fail,
    SoftFail,
    PermError,
}

impl SpfResult {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Neutral => "neutral",
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::SoftFail => "softfail",
            Self::PermError => "permerror",
        }
    }
}

impl fmt::Display for SpfResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Qualifier> for SpfResult {
    fn from(q: Qualifier) -> Self {
        match q {
            Qualifier::Pass => Self::Pass,
            Qualifier::Fail => Self::Fail,
            Qualifier::SoftFail => Self::SoftFail,
            Qualifier::Neutral => Self::Neutral,
        }
    }
}

/// The outcome of a check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckResult {
    pub code: SpfResult,
    /// The mechanism which determined `code`, if any.
    pub matched_mechanism: Option<Mechanism>,
    /// Diagnostics explaining the result.
    pub messages: Vec<String>,
    /// The text built from the `exp` modifier of a failing record.
    pub fail_explanation: Option<String>,
}

impl CheckResult {
    pub fn new(code: SpfResult) -> Self {
        Self {
            code,
            matched_mechanism: None,
            messages: Vec::new(),
            fail_explanation: None,
        }
    }

    fn matched(mechanism: &Mechanism) -> Self {
        Self {
            matched_mechanism: Some(mechanism.clone()),
            ..Self::new(mechanism.qualifier.into())
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }
}

bitflags! {
    /// Which identities `Checker::check` evaluates.
    pub struct CheckFlags: u32 {
        const HELO_DOMAIN = 1 << 0;
        const MAIL_FROM_ADDRESS = 1 << 1;
    }
}

impl Default for CheckFlags {
    fn default() -> Self {
        Self::all()
    }
}

/// Evaluates SPF policies against SMTP envelopes.
///
/// A `Checker` holds no per-check state and can be shared between threads
/// when its resolver can.
#[derive(Clone, Debug, Default)]
pub struct Checker<R> {
    decoder: Decoder<R>,
}

impl<R: Resolver> Checker<R> {
    pub fn new(resolver: R) -> Self {
        Self {
            decoder: Decoder::new(resolver),
        }
    }

    pub fn resolver(&self) -> &R {
        self.decoder.resolver()
    }

    /// Check both the HELO and MAIL FROM identities.
    pub fn check_default(&self, env: &Environment) -> CheckResult {
        self.check(env, CheckFlags::default())
    }

    /// Check the identities of `env` selected by `flags`.
    ///
    /// RFC 7208 § 2.3: the HELO identity is checked first. If it gives a
    /// definitive `Pass` or `Fail`, that is the result; otherwise the MAIL
    /// FROM identity is checked (unless it is in the same domain) and its
    /// result is used instead.
    pub fn check(&self, env: &Environment, flags: CheckFlags) -> CheckResult {
        if env.client_ip().is_none() {
            return CheckResult::new(SpfResult::None).with_message(
                "The IP address of the sender SMTP client is not specified",
            );
        }

        let mut result = None::<CheckResult>;
        if flags.contains(CheckFlags::HELO_DOMAIN) {
            result = Some(self.check_sender(env, Sender::HeloDomain));
        }

        if flags.contains(CheckFlags::MAIL_FROM_ADDRESS) {
            let run = match result {
                None => true,
                Some(CheckResult {
                    code: SpfResult::Pass | SpfResult::Fail,
                    ..
                }) => false,
                Some(..) => {
                    let mail_from_domain = env.mail_from_domain();
                    !mail_from_domain.is_empty()
                        && !mail_from_domain
                            .eq_ignore_ascii_case(env.helo_domain())
                }
            };

            if run {
                result = Some(self.check_sender(env, Sender::MailFrom));
            }
        }

        result.unwrap_or_else(|| {
            CheckResult::new(SpfResult::None)
                .with_message("No check has been performed (as requested)")
        })
    }

    fn check_sender(&self, env: &Environment, sender: Sender) -> CheckResult {
        let resolver: &dyn Resolver = self.decoder.resolver();
        let mut state = State::new(env, resolver, sender);
        let domain = state.sender_policy_domain();
        if domain.is_empty() {
            return CheckResult::new(SpfResult::None).with_message(
                match sender {
                    Sender::HeloDomain => {
                        "The \"HELO\"/\"EHLO\" domain is not valid"
                    }
                    Sender::MailFrom => {
                        "The \"MAIL FROM\" email address is not valid"
                    }
                },
            );
        }

        let result = match self.validate(&mut state, domain) {
            Ok(result) => result,
            Err(e @ Error::DnsResolution { .. }) => {
                CheckResult::new(SpfResult::None).with_message(e.to_string())
            }
            Err(e) => CheckResult::new(SpfResult::PermError)
                .with_message(e.to_string()),
        };

        info!(
            "SPF {:?} check of {} for {}: {} ({} DNS lookups)",
            sender,
            domain,
            env.client_ip().map_or_else(String::new, |ip| ip.to_string()),
            result.code,
            state.dns_lookups(),
        );
        result
    }

    /// Evaluate the policy of `domain`.
    ///
    /// Errors returned from here abort the whole sender check.
    fn validate(
        &self,
        state: &mut State<'_>,
        domain: &str,
    ) -> Result<CheckResult, Error> {
        if domain.is_empty() {
            return Ok(CheckResult::new(SpfResult::None)
                .with_message("The sender domain is not valid"));
        }

        if !domain.trim_matches('.').contains('.') {
            return Ok(CheckResult::new(SpfResult::None)
                .with_message("The sender domain is not multi-label"));
        }

        let record = match self.decoder.record_from_domain(domain) {
            Ok(Some(record)) => record,
            Ok(None) => {
                return Ok(CheckResult::new(SpfResult::None).with_message(
                    format!("No SPF DNS record found for domain '{}'", domain),
                ));
            }
            Err(e @ Error::DnsResolution { .. }) => {
                return Ok(CheckResult::new(SpfResult::None)
                    .with_message(e.to_string()));
            }
            Err(e) => {
                return Ok(CheckResult::new(SpfResult::PermError)
                    .with_message(e.to_string()));
            }
        };

        let fatal = semantic::validate(&record, Some(Level::Fatal));
        if !fatal.is_empty() {
            let mut result = CheckResult::new(SpfResult::PermError);
            result.messages =
                fatal.into_iter().map(|i| i.description).collect();
            return Ok(result);
        }

        for mechanism in record.mechanisms() {
            if self.match_mechanism(state, domain, mechanism)? {
                debug!("{}: '{}' matched", domain, mechanism);
                let mut result = CheckResult::matched(mechanism);
                if matches!(result.code, SpfResult::Fail | SpfResult::SoftFail)
                {
                    self.explain(state, domain, &record, &mut result);
                }
                return Ok(result);
            }
        }

        if let Some(target) = record.modifiers().find_map(|m| match *m {
            Modifier::Redirect(ref target) => Some(target),
            _ => None,
        }) {
            state.count_dns_lookup()?;
            let target = expand(target, domain, state)?;
            debug!("{}: redirect to {}", domain, target);
            let mut result = self.validate(state, &target)?;
            if SpfResult::None == result.code {
                result = CheckResult::new(SpfResult::PermError).with_message(
                    "The redirect SPF record didn't return a response code",
                );
            }
            return Ok(result);
        }

        Ok(CheckResult::new(SpfResult::Neutral)
            .with_message("No mechanism matched and no redirect modifier found."))
    }

    /// Expand the domain-spec of a mechanism, defaulting to the current
    /// domain.
    fn target_domain(
        &self,
        state: &mut State<'_>,
        domain: &str,
        domain_spec: Option<&MacroString>,
    ) -> Result<String, Error> {
        match domain_spec {
            Some(ms) => expand(ms, domain, state),
            None => Ok(domain.to_owned()),
        }
    }

    fn match_mechanism(
        &self,
        state: &mut State<'_>,
        domain: &str,
        mechanism: &Mechanism,
    ) -> Result<bool, Error> {
        use super::syntax::MechanismKind as K;

        if mechanism.kind.needs_dns_lookup() {
            state.count_dns_lookup()?;
        }

        // The lookup budget is charged before the client IP is consulted, so
        // this is only reachable for `check()` callers, which guarantee an IP.
        let Some(client_ip) = state.environment().client_ip() else {
            return Ok(false);
        };

        match mechanism.kind {
            K::All => Ok(true),
            K::Include(ref domain_spec) => {
                let target = expand(domain_spec, domain, state)?;
                debug!("{}: include {}", domain, target);
                Ok(SpfResult::Pass == self.validate(state, &target)?.code)
            }
            K::A {
                domain: ref domain_spec,
                ipv4_cidr_len,
                ipv6_cidr_len,
            } => {
                let target =
                    self.target_domain(state, domain, domain_spec.as_ref())?;
                self.match_domain_ips(
                    client_ip,
                    &target,
                    Some(ipv4_cidr_len),
                    Some(ipv6_cidr_len),
                )
            }
            K::Mx {
                domain: ref domain_spec,
                ipv4_cidr_len,
                ipv6_cidr_len,
            } => {
                let target =
                    self.target_domain(state, domain, domain_spec.as_ref())?;
                for exchange in self
                    .resolver()
                    .mx_records(&target)?
                    .into_iter()
                    .take(MAX_NAME_LOOKUPS)
                {
                    let matched = match exchange.parse::<IpAddr>() {
                        Ok(exchange_ip) => ip_matches(
                            client_ip,
                            exchange_ip,
                            Some(ipv4_cidr_len),
                            Some(ipv6_cidr_len),
                        ),
                        Err(_) => self.match_domain_ips(
                            client_ip,
                            &exchange,
                            Some(ipv4_cidr_len),
                            Some(ipv6_cidr_len),
                        )?,
                    };

                    if matched {
                        return Ok(true);
                    }
                }

                Ok(false)
            }
            K::Ptr(ref domain_spec) => {
                let target =
                    self.target_domain(state, domain, domain_spec.as_ref())?;
                self.match_ptr(client_ip, &target)
            }
            K::Ip4 { addr, cidr_len } => Ok(ip_matches(
                client_ip,
                IpAddr::V4(addr),
                Some(cidr_len),
                None,
            )),
            K::Ip6 { addr, cidr_len } => Ok(ip_matches(
                client_ip,
                IpAddr::V6(addr),
                None,
                Some(cidr_len),
            )),
            K::Exists(ref domain_spec) => {
                let target = expand(domain_spec, domain, state)?;
                Ok(!self.resolver().ip_addresses(&target)?.is_empty())
            }
        }
    }

    fn match_domain_ips(
        &self,
        client_ip: IpAddr,
        domain: &str,
        ipv4_cidr_len: Option<u32>,
        ipv6_cidr_len: Option<u32>,
    ) -> Result<bool, Error> {
        Ok(self
            .resolver()
            .ip_addresses(domain)?
            .into_iter()
            .any(|ip| ip_matches(client_ip, ip, ipv4_cidr_len, ipv6_cidr_len)))
    }

    /// RFC 7208 § 5.5
    fn match_ptr(&self, client_ip: IpAddr, target: &str) -> Result<bool, Error> {
        let target = target.trim_start_matches('.');
        for name in self
            .resolver()
            .ptr_records(client_ip)?
            .into_iter()
            .take(MAX_NAME_LOOKUPS)
        {
            if !is_same_or_subdomain(&name, target) {
                continue;
            }

            if self
                .resolver()
                .ip_addresses(&name)?
                .into_iter()
                .any(|ip| ip_matches(client_ip, ip, Some(32), Some(128)))
            {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Build the `exp` explanation for a failing `result`.
    ///
    /// RFC 7208 § 6.2. Nothing here can change the result code; every
    /// problem is recorded as a message instead.
    fn explain(
        &self,
        state: &mut State<'_>,
        domain: &str,
        record: &Record,
        result: &mut CheckResult,
    ) {
        let Some(Modifier::Explanation(domain_spec)) = record.modifiers().next()
        else {
            return;
        };

        match self.build_explanation(state, domain, domain_spec) {
            Ok(explanation) => result.fail_explanation = Some(explanation),
            Err(message) => result.messages.push(format!(
                "Failed to build the fail explanation string: {}",
                message
            )),
        }
    }

    fn build_explanation(
        &self,
        state: &mut State<'_>,
        domain: &str,
        domain_spec: &MacroString,
    ) -> Result<String, String> {
        let target =
            expand(domain_spec, domain, state).map_err(|e| e.to_string())?;
        let txts = self
            .resolver()
            .txt_records(&target)
            .map_err(|e| e.to_string())?;
        let txt = match txts.len() {
            0 => return Err(format!("no TXT records for '{}'", target)),
            1 => &txts[0],
            n => {
                return Err(format!(
                    "more than one TXT records (exactly {}) for '{}'",
                    n, target
                ))
            }
        };

        let ms = MacroString::parse(txt, true).map_err(|e| e.to_string())?;
        let explanation =
            expand(&ms, &target, state).map_err(|e| e.to_string())?;
        if !explanation.bytes().all(|b| (0x01..=0x7F).contains(&b)) {
            return Err(format!(
                "non US-ASCII chars found in '{}'",
                explanation
            ));
        }

        Ok(explanation)
    }
}

/// Whether `name` equals `domain` or is a subdomain of it, ignoring case.
fn is_same_or_subdomain(name: &str, domain: &str) -> bool {
    let name = name.trim_end_matches('.');
    let domain = domain.trim_end_matches('.');
    if domain.is_empty() {
        return true;
    }
    if name.len() < domain.len()
        || !name.is_char_boundary(name.len() - domain.len())
    {
        return false;
    }

    let (prefix, suffix) = name.split_at(name.len() - domain.len());
    suffix.eq_ignore_ascii_case(domain)
        && (prefix.is_empty() || prefix.ends_with('.'))
}

/// Whether `client` is within the network of `target` of the given prefix
/// lengths.
///
/// An IPv4 prefix length compares both addresses as IPv4 and an IPv6 prefix
/// length compares them as IPv6, converting through IPv4-mapped IPv6
/// addresses where the families differ.
fn ip_matches(
    client: IpAddr,
    target: IpAddr,
    ipv4_cidr_len: Option<u32>,
    ipv6_cidr_len: Option<u32>,
) -> bool {
    fn to_ipv4(ip: IpAddr) -> Option<Ipv4Addr> {
        match ip {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(ip) => ip.to_ipv4_mapped(),
        }
    }

    fn to_ipv6(ip: IpAddr) -> Ipv6Addr {
        match ip {
            IpAddr::V4(ip) => ip.to_ipv6_mapped(),
            IpAddr::V6(ip) => ip,
        }
    }

    if let Some(cidr_len) = ipv4_cidr_len {
        if let (Some(client), Some(target)) = (to_ipv4(client), to_ipv4(target))
        {
            if ipv4_addr_matches(client, target, cidr_len) {
                return true;
            }
        }
    }

    if let Some(cidr_len) = ipv6_cidr_len {
        if ipv6_addr_matches(to_ipv6(client), to_ipv6(target), cidr_len) {
            return true;
        }
    }

    false
}

fn ipv4_addr_matches(a: Ipv4Addr, b: Ipv4Addr, cidr_len: u32) -> bool {
    let mask = u32::MAX
        .checked_shl(32u32.saturating_sub(cidr_len))
        .unwrap_or(0);
    let a = u32::from_be_bytes(a.octets());
    let b = u32::from_be_bytes(b.octets());
    (a & mask) == (b & mask)
}

fn ipv6_addr_matches(a: Ipv6Addr, b: Ipv6Addr, cidr_len: u32) -> bool {
    let mask = u128::MAX
        .checked_shl(128u32.saturating_sub(cidr_len))
        .unwrap_or(0);
    let a = u128::from_be_bytes(a.octets());
    let b = u128::from_be_bytes(b.octets());
    (a & mask) == (b & mask)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::support::dns::StaticResolver;

    fn resolver() -> StaticResolver {
        zone! {
            "mail1.from.com" => {
                txt: ["v=spf1 ip4:10.20.30.40 ~ip6:0:0::3 -all exp=_exp.%{d}"],
            },
            "mail2.from.com" => {
                txt: ["v=spf1 -all exp=_exp.%{d}"],
            },
            "_exp.mail1.from.com" => {
                txt: ["%{l}%_access%_denied%_at%_%{o}%_via%_%{dr}"],
            },
            "recursive1.recdomain.com" => {
                txt: ["v=spf1 include:recursive2.recdomain.%{d1}"],
            },
            "recursive2.recdomain.com" => {
                txt: ["v=spf1 redirect=recursive1.%{d2}"],
            },
            "invalid.spf.com" => {
                txt: ["v=spf1 redirect=domain1 redirect=domain2"],
            },
            "neutral.spf.com" => {
                txt: ["v=spf1 ?all"],
            },
            "redirect.to.notexisting" => {
                txt: ["v=spf1 redirect=not.existing.domain"],
            },
            "empty.spf.com" => {
                txt: ["v=spf1"],
            },
            "a.default.spf.com" => {
                txt: ["v=spf1 a"],
                ip: ["a:b::c:d"],
            },
            "a.cidr.spf.com" => {
                txt: ["v=spf1 a/24//64"],
                ip: ["a:b::c:d"],
            },
        }
    }

    fn env(ip: &str, helo: &str, mail_from: &str) -> Environment {
        Environment::parse(ip, mail_from, Some(helo)).unwrap()
    }

    fn check(
        resolver: &StaticResolver,
        env: &Environment,
        flags: CheckFlags,
    ) -> CheckResult {
        Checker::new(resolver).check(env, flags)
    }

    fn mechanism_name(result: &CheckResult) -> Option<&'static str> {
        result.matched_mechanism.as_ref().map(|m| m.name())
    }

    const MAIL_FROM: CheckFlags = CheckFlags::MAIL_FROM_ADDRESS;
    const HELO: CheckFlags = CheckFlags::HELO_DOMAIN;

    #[test]
    fn preconditions() {
        let empty = StaticResolver::new();
        let default_env =
            env("10.20.30.40", "helo.ehlo.domain", "john-doe.jr@mail.from.com");

        let result = check(&empty, &default_env, CheckFlags::empty());
        assert_eq!(SpfResult::None, result.code);
        assert_eq!(
            vec!["No check has been performed (as requested)".to_owned()],
            result.messages
        );

        let result = check(
            &empty,
            &env("", "helo.ehlo.domain", "john-doe.jr@mail.from.com"),
            CheckFlags::all(),
        );
        assert_eq!(SpfResult::None, result.code);
        assert_eq!(
            vec!["The IP address of the sender SMTP client is not specified"
                .to_owned()],
            result.messages
        );

        let result =
            check(&empty, &env("10.20.30.40", "helo.ehlo.domain", ""), MAIL_FROM);
        assert_eq!(SpfResult::None, result.code);
        assert_eq!(
            vec!["The \"MAIL FROM\" email address is not valid".to_owned()],
            result.messages
        );

        let result = check(
            &empty,
            &env("10.20.30.40", "", "john-doe.jr@mail.from.com"),
            HELO,
        );
        assert_eq!(SpfResult::None, result.code);
        assert_eq!(
            vec!["The \"HELO\"/\"EHLO\" domain is not valid".to_owned()],
            result.messages
        );

        let result = check(&empty, &default_env, MAIL_FROM);
        assert_eq!(SpfResult::None, result.code);
        assert_eq!(
            vec!["No SPF DNS record found for domain 'mail.from.com'".to_owned()],
            result.messages
        );
        assert_eq!(None, result.matched_mechanism);
    }

    #[test]
    fn mail_from_results() {
        let resolver = resolver();
        let check_mail_from = |ip: &str, mail_from: &str| {
            check(&resolver, &env(ip, "helo.ehlo.domain", mail_from), MAIL_FROM)
        };

        let result = check_mail_from("10.20.30.40", "john-doe.jr@mail1.from.com");
        assert_eq!(SpfResult::Pass, result.code);
        assert_eq!(Some("ip4"), mechanism_name(&result));
        assert_eq!(None, result.fail_explanation);
        assert!(result.messages.is_empty());

        let result = check_mail_from("127.0.0.1", "john-doe.jr@mail1.from.com");
        assert_eq!(SpfResult::Fail, result.code);
        assert_eq!(Some("all"), mechanism_name(&result));
        assert_eq!(
            Some(
                "john-doe.jr access denied at mail1.from.com via \
                 com.from.mail1._exp"
            ),
            result.fail_explanation.as_deref()
        );
        assert!(result.messages.is_empty());

        let result = check_mail_from("::3", "john-doe.jr@mail1.from.com");
        assert_eq!(SpfResult::SoftFail, result.code);
        assert_eq!(Some("ip6"), mechanism_name(&result));
        assert_eq!(
            Some(
                "john-doe.jr access denied at mail1.from.com via \
                 com.from.mail1._exp"
            ),
            result.fail_explanation.as_deref()
        );

        let result = check_mail_from("10.20.30.40", "x@invalid.spf.com");
        assert_eq!(SpfResult::PermError, result.code);
        assert_eq!(
            vec!["The 'redirect' modifier is present more than once (2 times)"
                .to_owned()],
            result.messages
        );

        let result = check_mail_from("10.20.30.40", "x@neutral.spf.com");
        assert_eq!(SpfResult::Neutral, result.code);
        assert_eq!(Some("all"), mechanism_name(&result));

        let result = check_mail_from("10.20.30.40", "x@redirect.to.notexisting");
        assert_eq!(SpfResult::PermError, result.code);
        assert_eq!(None, result.matched_mechanism);
        assert_eq!(
            vec!["The redirect SPF record didn't return a response code"
                .to_owned()],
            result.messages
        );

        let result = check_mail_from("10.20.30.40", "x@empty.spf.com");
        assert_eq!(SpfResult::Neutral, result.code);
        assert_eq!(None, result.matched_mechanism);
        assert_eq!(
            vec!["No mechanism matched and no redirect modifier found."
                .to_owned()],
            result.messages
        );
    }

    #[test]
    fn recursion_exhausts_lookup_budget() {
        let resolver = resolver();
        let result = check(
            &resolver,
            &env(
                "10.20.30.40",
                "helo.ehlo.domain",
                "john-doe.jr@recursive1.recdomain.com",
            ),
            MAIL_FROM,
        );
        assert_eq!(SpfResult::PermError, result.code);
        assert_eq!(
            vec!["Too many DNS lookups (more than 10)".to_owned()],
            result.messages
        );

        let result = check(
            &resolver,
            &env(
                "10.20.30.40",
                "recursive2.recdomain.com",
                "john-doe.jr@recursive1.recdomain.com",
            ),
            HELO,
        );
        assert_eq!(SpfResult::PermError, result.code);
    }

    #[test]
    fn helo_takes_precedence_when_definitive() {
        let resolver = resolver();

        // HELO fails definitively, so MAIL FROM is never consulted; the
        // explanation is built for the HELO identity.
        let result = check(
            &resolver,
            &env("::a", "mail1.from.com", "john-doe.jr@mail1.from.com"),
            CheckFlags::all(),
        );
        assert_eq!(SpfResult::Fail, result.code);
        assert_eq!(Some("all"), mechanism_name(&result));
        assert_eq!(
            Some(
                "postmaster access denied at mail1.from.com via \
                 com.from.mail1._exp"
            ),
            result.fail_explanation.as_deref()
        );

        let result = check(
            &resolver,
            &env("::a", "mail2.from.com", "john-doe.jr@mail1.from.com"),
            CheckFlags::all(),
        );
        assert_eq!(SpfResult::Fail, result.code);
        assert_eq!(None, result.fail_explanation);
        assert_eq!(
            vec!["Failed to build the fail explanation string: no TXT \
                  records for '_exp.mail2.from.com'"
                .to_owned()],
            result.messages
        );

        let result = check(
            &resolver,
            &env("10.20.30.40", "mail1.from.com", "john-doe.jr@mail2.from.com"),
            CheckFlags::all(),
        );
        assert_eq!(SpfResult::Pass, result.code);
        assert_eq!(Some("ip4"), mechanism_name(&result));
    }

    #[test]
    fn mail_from_consulted_after_indefinite_helo() {
        let resolver = resolver();

        let result = check(
            &resolver,
            &env("127.0.0.1", "neutral.spf.com", "someone@mail2.from.com"),
            CheckFlags::all(),
        );
        assert_eq!(SpfResult::Fail, result.code);

        // Same domain, so the HELO result stands.
        let result = check(
            &resolver,
            &env("127.0.0.1", "neutral.spf.com", "someone@NEUTRAL.spf.com"),
            CheckFlags::all(),
        );
        assert_eq!(SpfResult::Neutral, result.code);

        let result = check(
            &resolver,
            &env("127.0.0.1", "neutral.spf.com", "nobody"),
            CheckFlags::all(),
        );
        assert_eq!(SpfResult::Neutral, result.code);
    }

    #[test]
    fn a_mechanism_cidr() {
        let resolver = resolver();
        let check_a = |ip: &str, domain: &str| {
            check(
                &resolver,
                &env(ip, "helo.ehlo.domain", &format!("john@{}", domain)),
                MAIL_FROM,
            )
        };

        let result = check_a("10.20.30.40", "a.default.spf.com");
        assert_eq!(SpfResult::Neutral, result.code);
        assert_eq!(None, result.matched_mechanism);

        let result = check_a("a:b::c:d", "a.default.spf.com");
        assert_eq!(SpfResult::Pass, result.code);
        assert_eq!(Some("a"), mechanism_name(&result));

        assert_eq!(
            SpfResult::Neutral,
            check_a("a:b::c:1", "a.default.spf.com").code
        );
        assert_eq!(SpfResult::Pass, check_a("a:b::c:1", "a.cidr.spf.com").code);
        assert_eq!(
            SpfResult::Neutral,
            check_a("a:b:1::c:1", "a.cidr.spf.com").code
        );
    }

    #[test]
    fn lookup_mechanisms() {
        let client: IpAddr = "192.0.2.10".parse().unwrap();
        let resolver = zone! {
            "mx.example.com" => {
                txt: ["v=spf1 mx/24 -all"],
                mx: ["mail.example.com", "192.0.2.200"],
            },
            "mx-literal.example.com" => {
                txt: ["v=spf1 mx:mx.example.com//128 -all"],
            },
            "mail.example.com" => {
                ip: ["198.51.100.1"],
            },
            "ptr.example.com" => {
                txt: ["v=spf1 ptr -all"],
            },
            "ptr-other.example.com" => {
                txt: ["v=spf1 ptr:example.org -all"],
            },
            "host.ptr.example.com" => {
                ip: ["192.0.2.10"],
            },
            "192.0.2.10" => {
                ptr: ["host.ptr.example.com"],
            },
            "exists.example.com" => {
                txt: ["v=spf1 exists:%{i}._spf.%{d} -all"],
            },
            "192.0.2.10._spf.exists.example.com" => {
                ip: ["127.0.0.2"],
            },
            "include.example.com" => {
                txt: ["v=spf1 include:exists.example.com ~all"],
            },
            "broken.example.com" => {
                txt: ["v=spf1 a:dead.example.com -all"],
            },
            "dead.example.com" => {
                fail: true,
            },
        };

        let check_domain = |domain: &str| {
            check(
                &resolver,
                &Environment::new(
                    Some(client),
                    format!("user@{}", domain),
                    Some("helo.example.net"),
                ),
                MAIL_FROM,
            )
        };

        let result = check_domain("mx.example.com");
        assert_eq!(SpfResult::Pass, result.code);
        assert_eq!(Some("mx"), mechanism_name(&result));
        assert_eq!(SpfResult::Fail, check_domain("mx-literal.example.com").code);

        let result = check_domain("ptr.example.com");
        assert_eq!(SpfResult::Pass, result.code);
        assert_eq!(Some("ptr"), mechanism_name(&result));
        assert_eq!(SpfResult::Fail, check_domain("ptr-other.example.com").code);

        let result = check_domain("exists.example.com");
        assert_eq!(SpfResult::Pass, result.code);
        assert_eq!(Some("exists"), mechanism_name(&result));

        let result = check_domain("include.example.com");
        assert_eq!(SpfResult::Pass, result.code);
        assert_eq!(Some("include"), mechanism_name(&result));

        let result = check_domain("broken.example.com");
        assert_eq!(SpfResult::None, result.code);
        assert_matches!(Some(_), result.messages.first());
    }

    #[test]
    fn sender_domain_must_be_multi_label() {
        let resolver = zone! {
            "com" => {
                txt: ["v=spf1 +all"],
            },
        };

        let result = check(
            &resolver,
            &env("192.0.2.1", "helo.example.net", "u@com"),
            MAIL_FROM,
        );
        assert_eq!(SpfResult::None, result.code);
        assert_eq!(None, result.matched_mechanism);
        assert_eq!(
            vec!["The sender domain is not multi-label".to_owned()],
            result.messages
        );
    }

    #[test]
    fn multiple_spf_records() {
        let resolver = zone! {
            "multi.example.com" => {
                txt: ["v=spf1 -all", "v=spf1 +all"],
            },
            "single.example.com" => {
                txt: ["site-verification=abc", "v=spf1 -all"],
            },
        };
        let check_mail_from = |mail_from: &str| {
            check(
                &resolver,
                &env("192.0.2.1", "helo.example.net", mail_from),
                MAIL_FROM,
            )
        };

        let result = check_mail_from("u@multi.example.com");
        assert_eq!(SpfResult::PermError, result.code);
        assert_eq!(
            vec!["Multiple SPF records found for domain 'multi.example.com'"
                .to_owned()],
            result.messages
        );

        assert_eq!(SpfResult::Fail, check_mail_from("u@single.example.com").code);
    }

    #[test]
    fn explanation_edge_cases() {
        let resolver = zone! {
            "multi-exp.example.com" => {
                txt: ["v=spf1 -all exp=two.example.com"],
            },
            "two.example.com" => {
                txt: ["first", "second"],
            },
            "late-exp.example.com" => {
                txt: ["v=spf1 -all foo=bar exp=one.example.com"],
            },
            "one.example.com" => {
                txt: ["denied"],
            },
            "ascii-exp.example.com" => {
                txt: ["v=spf1 -all exp=local.example.com"],
            },
            "local.example.com" => {
                txt: ["%{l} denied"],
            },
        };
        let check_mail_from = |mail_from: &str| {
            check(
                &resolver,
                &env("192.0.2.1", "helo.example.net", mail_from),
                MAIL_FROM,
            )
        };

        let result = check_mail_from("u@multi-exp.example.com");
        assert_eq!(SpfResult::Fail, result.code);
        assert_eq!(None, result.fail_explanation);
        assert_eq!(
            vec!["Failed to build the fail explanation string: more than one \
                  TXT records (exactly 2) for 'two.example.com'"
                .to_owned()],
            result.messages
        );

        let result = check_mail_from("u@late-exp.example.com");
        assert_eq!(SpfResult::Fail, result.code);
        assert_eq!(None, result.fail_explanation);
        assert!(result.messages.is_empty());

        let result = check_mail_from("u@ascii-exp.example.com");
        assert_eq!(SpfResult::Fail, result.code);
        assert_eq!(Some("u denied"), result.fail_explanation.as_deref());

        let result = check_mail_from("jösé@ascii-exp.example.com");
        assert_eq!(SpfResult::Fail, result.code);
        assert_eq!(Some("all"), mechanism_name(&result));
        assert_eq!(None, result.fail_explanation);
        assert_eq!(
            vec!["Failed to build the fail explanation string: non US-ASCII \
                  chars found in 'jösé denied'"
                .to_owned()],
            result.messages
        );
    }

    #[test]
    fn name_lists_are_truncated() {
        let client: IpAddr = "192.0.2.10".parse().unwrap();
        let other_client: IpAddr = "192.0.2.11".parse().unwrap();
        let exchanges = (0..11)
            .map(|i| format!("mx{}.example.net", i))
            .collect::<Vec<_>>();
        let ptr_names = (0..11)
            .map(|i| format!("host{}.example.org", i))
            .collect::<Vec<_>>();

        let resolver = zone! {
            "eleven-mx.example.com" => {
                txt: ["v=spf1 mx -all"],
                mx: &exchanges,
            },
            "ten-mx.example.com" => {
                txt: ["v=spf1 mx -all"],
                mx: &exchanges[1..],
            },
            "mx10.example.net" => {
                ip: ["192.0.2.10"],
            },
            "ptr.example.com" => {
                txt: ["v=spf1 ptr:example.org -all"],
            },
            "192.0.2.10" => {
                ptr: &ptr_names,
            },
            "192.0.2.11" => {
                ptr: &ptr_names[1..],
            },
            "host10.example.org" => {
                ip: ["192.0.2.10", "192.0.2.11"],
            },
        };
        let check_domain = |ip: IpAddr, domain: &str| {
            check(
                &resolver,
                &Environment::new(
                    Some(ip),
                    format!("user@{}", domain),
                    Some("helo.example.net"),
                ),
                MAIL_FROM,
            )
        };

        let result = check_domain(client, "eleven-mx.example.com");
        assert_eq!(SpfResult::Fail, result.code);
        assert_eq!(Some("all"), mechanism_name(&result));
        let result = check_domain(client, "ten-mx.example.com");
        assert_eq!(SpfResult::Pass, result.code);
        assert_eq!(Some("mx"), mechanism_name(&result));

        let result = check_domain(client, "ptr.example.com");
        assert_eq!(SpfResult::Fail, result.code);
        assert_eq!(Some("all"), mechanism_name(&result));
        let result = check_domain(other_client, "ptr.example.com");
        assert_eq!(SpfResult::Pass, result.code);
        assert_eq!(Some("ptr"), mechanism_name(&result));
    }

    #[test]
    fn validated_domain_macro() {
        let resolver = zone! {
            "p.example.com" => {
                txt: ["v=spf1 exists:%{p}.allow.example.com -all"],
            },
            "unknown.allow.example.com" => {
                ip: ["127.0.0.2"],
            },
            "mail.example.org.allow.example.com" => {
                ip: ["127.0.0.2"],
            },
            "192.0.2.10" => {
                ptr: ["mail.example.org"],
            },
            "mail.example.org" => {
                ip: ["192.0.2.10"],
            },
        };
        let check_ip = |ip: &str| {
            check(
                &resolver,
                &env(ip, "helo.example.net", "u@p.example.com"),
                MAIL_FROM,
            )
        };

        let result = check_ip("192.0.2.10");
        assert_eq!(SpfResult::Pass, result.code);
        assert_eq!(Some("exists"), mechanism_name(&result));

        let result = check_ip("192.0.2.99");
        assert_eq!(SpfResult::PermError, result.code);
        assert_eq!(None, result.matched_mechanism);
        assert_eq!(
            vec!["The environment has no value for the macro letter 'p'"
                .to_owned()],
            result.messages
        );
    }

    #[test]
    fn ip_matching() {
        let ip = |s: &str| s.parse::<IpAddr>().unwrap();

        assert!(ip_matches(ip("10.1.2.3"), ip("10.1.2.3"), Some(32), None));
        assert!(!ip_matches(ip("10.1.2.3"), ip("10.1.2.4"), Some(32), None));
        assert!(ip_matches(ip("10.1.2.3"), ip("10.1.2.4"), Some(24), None));
        assert!(!ip_matches(ip("10.1.3.3"), ip("10.1.2.4"), Some(24), None));
        assert!(ip_matches(ip("10.1.3.3"), ip("99.1.2.4"), Some(0), None));
        assert!(ip_matches(ip("10.1.2.3"), ip("10.1.2.2"), Some(31), None));
        assert!(!ip_matches(ip("10.1.2.3"), ip("10.1.2.1"), Some(31), None));

        assert!(ip_matches(ip("::ffff:10.1.2.3"), ip("10.1.2.0"), Some(24), None));
        assert!(ip_matches(ip("10.1.2.3"), ip("::ffff:10.1.2.3"), None, Some(128)));
        assert!(!ip_matches(ip("::1"), ip("10.1.2.3"), Some(0), None));

        assert!(ip_matches(ip("2001:db8::1"), ip("2001:db8::"), None, Some(32)));
        assert!(!ip_matches(ip("2001:db9::1"), ip("2001:db8::"), None, Some(32)));
        assert!(ip_matches(ip("2001:db9::1"), ip("::"), None, Some(0)));
        assert!(!ip_matches(ip("2001:db8::1"), ip("2001:db8::"), Some(32), None));
    }

    #[test]
    fn subdomain_matching() {
        assert!(is_same_or_subdomain("example.com", "example.com"));
        assert!(is_same_or_subdomain("mail.Example.com.", "example.COM"));
        assert!(!is_same_or_subdomain("badexample.com", "example.com"));
        assert!(!is_same_or_subdomain("com", "example.com"));
    }

    #[test]
    fn concurrent_checks() {
        use rayon::prelude::*;

        let checker = Checker::new(resolver());
        let results = (0..64u8)
            .into_par_iter()
            .map(|n| {
                let env = Environment::new(
                    Some(IpAddr::V4(Ipv4Addr::new(10, 20, 30, 40 + n % 2))),
                    "john@mail1.from.com",
                    None,
                );
                (n, checker.check(&env, MAIL_FROM).code)
            })
            .collect::<Vec<_>>();

        for (n, code) in results {
            let expected = if 0 == n % 2 {
                SpfResult::Pass
            } else {
                SpfResult::Fail
            };
            assert_eq!(expected, code);
        }
    }
}
