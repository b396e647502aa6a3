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

//! The syntax for SPF TXT records.
//! RFC 7208 § 12
//!
//! Mechanism and modifier names are matched case-sensitively. A term which
//! looks like a mechanism but carries bad data is an error rather than being
//! reinterpreted as something else.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use super::macro_string::{self, LexError, MacroString};
use crate::support::error::Error as CrateError;

pub const VERSION: &str = "v=spf1";
pub const DEFAULT_IPV4_CIDR_LEN: u32 = 32;
pub const DEFAULT_IPV6_CIDR_LEN: u32 = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Term {
    Mechanism(Mechanism),
    Modifier(Modifier),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Qualifier {
    Pass,
    Fail,
    SoftFail,
    Neutral,
}

impl Qualifier {
    pub fn as_char(self) -> char {
        match self {
            Self::Pass => '+',
            Self::Fail => '-',
            Self::SoftFail => '~',
            Self::Neutral => '?',
        }
    }

    fn from_prefix(s: &str) -> Option<Self> {
        match s {
            "" | "+" => Some(Self::Pass),
            "-" => Some(Self::Fail),
            "~" => Some(Self::SoftFail),
            "?" => Some(Self::Neutral),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mechanism {
    pub qualifier: Qualifier,
    pub kind: MechanismKind,
}

// CIDR lengths are stored with the defaults applied; `Display` omits them
// again when they are the defaults.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MechanismKind {
    All,
    Include(MacroString),
    A {
        domain: Option<MacroString>,
        ipv4_cidr_len: u32,
        ipv6_cidr_len: u32,
    },
    Mx {
        domain: Option<MacroString>,
        ipv4_cidr_len: u32,
        ipv6_cidr_len: u32,
    },
    Ptr(Option<MacroString>),
    Ip4 {
        addr: Ipv4Addr,
        cidr_len: u32,
    },
    Ip6 {
        addr: Ipv6Addr,
        cidr_len: u32,
    },
    Exists(MacroString),
}

impl MechanismKind {
    pub fn name(&self) -> &'static str {
        match *self {
            Self::All => "all",
            Self::Include(..) => "include",
            Self::A { .. } => "a",
            Self::Mx { .. } => "mx",
            Self::Ptr(..) => "ptr",
            Self::Ip4 { .. } => "ip4",
            Self::Ip6 { .. } => "ip6",
            Self::Exists(..) => "exists",
        }
    }

    /// Whether evaluating this mechanism counts against the DNS lookup
    /// budget.
    pub fn needs_dns_lookup(&self) -> bool {
        !matches!(*self, Self::All | Self::Ip4 { .. } | Self::Ip6 { .. })
    }
}

impl Mechanism {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Modifier {
    Redirect(MacroString),
    Explanation(MacroString),
    Unknown { name: String, value: String },
}

impl Modifier {
    pub fn name(&self) -> &str {
        match *self {
            Self::Redirect(..) => "redirect",
            Self::Explanation(..) => "exp",
            Self::Unknown { ref name, .. } => name,
        }
    }
}

/// A parsed SPF record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    terms: Vec<Term>,
}

impl Record {
    /// Parse the text of a TXT record.
    ///
    /// Returns `Ok(None)` if the text is not an SPF version 1 record at all.
    pub fn parse(txt: &str) -> Result<Option<Self>, CrateError> {
        let mut words = txt.trim_end_matches(' ').split(' ');
        if Some(VERSION) != words.next() {
            return Ok(None);
        }

        words
            .filter(|w| !w.is_empty())
            .map(|word| {
                Term::parse(word).map_err(|e| match e {
                    Error::MacroString(reason) => {
                        CrateError::InvalidMacroString {
                            text: word.to_owned(),
                            reason,
                        }
                    }
                    _ => CrateError::InvalidTerm(word.to_owned()),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|terms| Some(Self { terms }))
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn mechanisms(&self) -> impl Iterator<Item = &Mechanism> + '_ {
        self.terms.iter().filter_map(|t| match *t {
            Term::Mechanism(ref m) => Some(m),
            Term::Modifier(..) => None,
        })
    }

    pub fn modifiers(&self) -> impl Iterator<Item = &Modifier> + '_ {
        self.terms.iter().filter_map(|t| match *t {
            Term::Modifier(ref m) => Some(m),
            Term::Mechanism(..) => None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Error {
    #[error("not a mechanism or modifier")]
    UnknownTerm,
    #[error("invalid CIDR length")]
    InvalidCidrLength,
    #[error("invalid IP address")]
    InvalidIpAddress,
    #[error("unused argument for {0}")]
    UnusedArgument(&'static str),
    #[error("missing argument for {0}")]
    MissingArgument(&'static str),
    #[error(transparent)]
    MacroString(#[from] LexError),
}

impl Term {
    /// Parses a single term.
    ///
    /// `word` is a non-empty item from the SPF record after splitting on
    /// space.
    pub fn parse(word: &str) -> Result<Self, Error> {
        lazy_static! {
            static ref MECHANISM: Regex = Regex::new(
                "^([-+~?])?(all|include|a|mx|ptr|ip4|ip6|exists)([:/].*)?$"
            )
            .unwrap();
            static ref MODIFIER: Regex =
                Regex::new("^([a-zA-Z][a-zA-Z0-9_.-]*)=(.*)$").unwrap();
        }

        if let Some(captures) = MECHANISM.captures(word) {
            let qualifier = Qualifier::from_prefix(
                captures.get(1).map_or("", |c| c.as_str()),
            )
            .ok_or(Error::UnknownTerm)?;
            let kind = MechanismKind::parse(
                &captures[2],
                captures.get(3).map_or("", |c| c.as_str()),
            )?;
            Ok(Self::Mechanism(Mechanism { qualifier, kind }))
        } else if let Some(captures) = MODIFIER.captures(word) {
            Modifier::parse(&captures[1], &captures[2]).map(Self::Modifier)
        } else {
            Err(Error::UnknownTerm)
        }
    }
}

impl Modifier {
    fn parse(name: &str, value: &str) -> Result<Self, Error> {
        match name {
            "redirect" => Ok(Self::Redirect(parse_domain_spec(
                "redirect", value,
            )?)),
            "exp" => {
                Ok(Self::Explanation(parse_domain_spec("exp", value)?))
            }
            _ => Ok(Self::Unknown {
                name: name.to_owned(),
                value: value.to_owned(),
            }),
        }
    }
}

fn parse_domain_spec(
    what: &'static str,
    s: &str,
) -> Result<MacroString, Error> {
    if s.is_empty() {
        return Err(Error::MissingArgument(what));
    }

    Ok(macro_string::lex(s, false)?)
}

/// Parse `:domain-spec` requiring a non-empty domain-spec.
fn parse_required_domain_spec(
    what: &'static str,
    data: &str,
) -> Result<MacroString, Error> {
    data.strip_prefix(':')
        .ok_or(Error::MissingArgument(what))
        .and_then(|d| parse_domain_spec(what, d))
}

/// Parse the argument of `a` or `mx`: `[:domain-spec][/v4][//v6]`, where the
/// two CIDR lengths may appear in either order.
fn parse_domain_spec_dual_cidr(
    what: &'static str,
    data: &str,
) -> Result<(Option<MacroString>, u32, u32), Error> {
    lazy_static! {
        static ref CIDR: Regex = Regex::new("^/(/)?(0|[1-9][0-9]{0,2})").unwrap();
    }

    let (domain, mut rest) = if let Some(data) = data.strip_prefix(':') {
        let end = domain_spec_end(data);
        (Some(parse_domain_spec(what, &data[..end])?), &data[end..])
    } else {
        (None, data)
    };

    let mut ipv4_cidr_len = None::<u32>;
    let mut ipv6_cidr_len = None::<u32>;
    while !rest.is_empty() {
        let captures = CIDR.captures(rest).ok_or(Error::InvalidCidrLength)?;
        let len = captures[2]
            .parse::<u32>()
            .map_err(|_| Error::InvalidCidrLength)?;
        let (slot, max) = if captures.get(1).is_some() {
            (&mut ipv6_cidr_len, DEFAULT_IPV6_CIDR_LEN)
        } else {
            (&mut ipv4_cidr_len, DEFAULT_IPV4_CIDR_LEN)
        };

        if len > max || slot.is_some() {
            return Err(Error::InvalidCidrLength);
        }
        *slot = Some(len);
        rest = &rest[captures[0].len()..];
    }

    Ok((
        domain,
        ipv4_cidr_len.unwrap_or(DEFAULT_IPV4_CIDR_LEN),
        ipv6_cidr_len.unwrap_or(DEFAULT_IPV6_CIDR_LEN),
    ))
}

/// Find the first `/` of `data` that is not part of a macro expansion or
/// escape.
fn domain_spec_end(data: &str) -> usize {
    let bytes = data.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if Some(&b'{') == bytes.get(i + 1) => {
                match data[i..].find('}') {
                    Some(close) => i += close + 1,
                    // Let the macro-string parser report it
                    None => return data.len(),
                }
            }
            b'%' => i += 2,
            b'/' => return i,
            _ => i += 1,
        }
    }

    data.len()
}

/// Split `addr/len` for `ip4` and `ip6`.
fn split_ip_cidr<'a>(
    what: &'static str,
    data: &'a str,
    max: u32,
) -> Result<(&'a str, u32), Error> {
    lazy_static! {
        static ref IP_CIDR: Regex =
            Regex::new("^(.+)/(0|[1-9][0-9]{0,2})$").unwrap();
    }

    let data = data.strip_prefix(':').ok_or(Error::MissingArgument(what))?;
    match IP_CIDR.captures(data) {
        Some(captures) => {
            let len = captures[2]
                .parse::<u32>()
                .map_err(|_| Error::InvalidCidrLength)?;
            if len > max {
                return Err(Error::InvalidCidrLength);
            }
            let addr = captures.get(1).map_or("", |c| c.as_str());
            Ok((addr, len))
        }
        None => Ok((data, max)),
    }
}

impl MechanismKind {
    fn parse(name: &str, data: &str) -> Result<Self, Error> {
        match name {
            "all" => {
                if !data.is_empty() {
                    return Err(Error::UnusedArgument("all"));
                }
                Ok(Self::All)
            }
            "include" => {
                Ok(Self::Include(parse_required_domain_spec("include", data)?))
            }
            "exists" => {
                Ok(Self::Exists(parse_required_domain_spec("exists", data)?))
            }
            "ptr" => {
                if data.is_empty() {
                    Ok(Self::Ptr(None))
                } else {
                    Ok(Self::Ptr(Some(parse_required_domain_spec(
                        "ptr", data,
                    )?)))
                }
            }
            "a" => {
                let (domain, ipv4_cidr_len, ipv6_cidr_len) =
                    parse_domain_spec_dual_cidr("a", data)?;
                Ok(Self::A {
                    domain,
                    ipv4_cidr_len,
                    ipv6_cidr_len,
                })
            }
            "mx" => {
                let (domain, ipv4_cidr_len, ipv6_cidr_len) =
                    parse_domain_spec_dual_cidr("mx", data)?;
                Ok(Self::Mx {
                    domain,
                    ipv4_cidr_len,
                    ipv6_cidr_len,
                })
            }
            "ip4" => {
                let (addr, cidr_len) =
                    split_ip_cidr("ip4", data, DEFAULT_IPV4_CIDR_LEN)?;
                let addr = addr
                    .parse::<Ipv4Addr>()
                    .map_err(|_| Error::InvalidIpAddress)?;
                Ok(Self::Ip4 { addr, cidr_len })
            }
            "ip6" => {
                let (addr, cidr_len) =
                    split_ip_cidr("ip6", data, DEFAULT_IPV6_CIDR_LEN)?;
                let addr = addr
                    .parse::<Ipv6Addr>()
                    .map_err(|_| Error::InvalidIpAddress)?;
                Ok(Self::Ip6 { addr, cidr_len })
            }
            _ => Err(Error::UnknownTerm),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(VERSION)?;
        for term in &self.terms {
            write!(f, " {}", term)?;
        }
        Ok(())
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Mechanism(ref m) => write!(f, "{}", m),
            Self::Modifier(ref m) => write!(f, "{}", m),
        }
    }
}

fn fmt_dual_cidr(
    f: &mut fmt::Formatter<'_>,
    domain: &Option<MacroString>,
    ipv4_cidr_len: u32,
    ipv6_cidr_len: u32,
) -> fmt::Result {
    if let Some(ref domain) = *domain {
        write!(f, ":{}", domain)?;
    }
    if DEFAULT_IPV4_CIDR_LEN != ipv4_cidr_len {
        write!(f, "/{}", ipv4_cidr_len)?;
    }
    if DEFAULT_IPV6_CIDR_LEN != ipv6_cidr_len {
        write!(f, "//{}", ipv6_cidr_len)?;
    }
    Ok(())
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if Qualifier::Pass != self.qualifier {
            write!(f, "{}", self.qualifier.as_char())?;
        }
        f.write_str(self.name())?;

        match self.kind {
            MechanismKind::All | MechanismKind::Ptr(None) => Ok(()),
            MechanismKind::Include(ref d)
            | MechanismKind::Exists(ref d)
            | MechanismKind::Ptr(Some(ref d)) => write!(f, ":{}", d),
            MechanismKind::A {
                ref domain,
                ipv4_cidr_len,
                ipv6_cidr_len,
            }
            | MechanismKind::Mx {
                ref domain,
                ipv4_cidr_len,
                ipv6_cidr_len,
            } => fmt_dual_cidr(f, domain, ipv4_cidr_len, ipv6_cidr_len),
            MechanismKind::Ip4 { addr, cidr_len } => {
                write!(f, ":{}", addr)?;
                if DEFAULT_IPV4_CIDR_LEN != cidr_len {
                    write!(f, "/{}", cidr_len)?;
                }
                Ok(())
            }
            MechanismKind::Ip6 { addr, cidr_len } => {
                write!(f, ":{}", addr)?;
                if DEFAULT_IPV6_CIDR_LEN != cidr_len {
                    write!(f, "/{}", cidr_len)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Redirect(ref d) => write!(f, "redirect={}", d),
            Self::Explanation(ref d) => write!(f, "exp={}", d),
            Self::Unknown {
                ref name,
                ref value,
            } => write!(f, "{}={}", name, value),
        }
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn ms(s: &str) -> MacroString {
        MacroString::parse(s, false).unwrap()
    }

    #[test]
    fn term_parse() {
        use super::MechanismKind as K;

        fn mech(qualifier: Qualifier, kind: MechanismKind) -> Term {
            Term::Mechanism(Mechanism { qualifier, kind })
        }

        assert_eq!(
            mech(Qualifier::Pass, K::All),
            Term::parse("all").unwrap()
        );
        assert_eq!(
            mech(Qualifier::Fail, K::All),
            Term::parse("-all").unwrap()
        );
        assert_eq!(
            mech(Qualifier::SoftFail, K::Include(ms("_spf.example.com"))),
            Term::parse("~include:_spf.example.com").unwrap()
        );
        assert_eq!(
            mech(
                Qualifier::Pass,
                K::A {
                    domain: None,
                    ipv4_cidr_len: 32,
                    ipv6_cidr_len: 128,
                }
            ),
            Term::parse("a").unwrap()
        );
        assert_eq!(
            mech(
                Qualifier::Neutral,
                K::Mx {
                    domain: Some(ms("%{d}")),
                    ipv4_cidr_len: 24,
                    ipv6_cidr_len: 64,
                }
            ),
            Term::parse("?mx:%{d}//64/24").unwrap()
        );
        assert_eq!(
            mech(
                Qualifier::Pass,
                K::A {
                    domain: Some(ms("%{l/}.example.com")),
                    ipv4_cidr_len: 24,
                    ipv6_cidr_len: 128,
                }
            ),
            Term::parse("a:%{l/}.example.com/24").unwrap()
        );
        assert_eq!(
            mech(
                Qualifier::Pass,
                K::Mx {
                    domain: Some(ms("%{o/}")),
                    ipv4_cidr_len: 32,
                    ipv6_cidr_len: 128,
                }
            ),
            Term::parse("mx:%{o/}").unwrap()
        );
        assert_eq!(
            mech(
                Qualifier::Pass,
                K::A {
                    domain: Some(ms("%%.example.com")),
                    ipv4_cidr_len: 32,
                    ipv6_cidr_len: 48,
                }
            ),
            Term::parse("a:%%.example.com//48").unwrap()
        );
        assert_eq!(
            mech(Qualifier::Pass, K::Ptr(None)),
            Term::parse("ptr").unwrap()
        );
        assert_eq!(
            mech(
                Qualifier::Pass,
                K::Ip4 {
                    addr: Ipv4Addr::new(192, 0, 2, 0),
                    cidr_len: 24,
                }
            ),
            Term::parse("ip4:192.0.2.0/24").unwrap()
        );
        assert_eq!(
            mech(
                Qualifier::Pass,
                K::Ip6 {
                    addr: "2001:db8::".parse().unwrap(),
                    cidr_len: 128,
                }
            ),
            Term::parse("ip6:2001:db8::").unwrap()
        );
        assert_eq!(
            mech(Qualifier::Pass, K::Exists(ms("%{ir}.bl.example.com"))),
            Term::parse("exists:%{ir}.bl.example.com").unwrap()
        );
        assert_eq!(
            Term::Modifier(Modifier::Redirect(ms("_spf.example.com"))),
            Term::parse("redirect=_spf.example.com").unwrap()
        );
        assert_eq!(
            Term::Modifier(Modifier::Explanation(ms("explain.%{d}"))),
            Term::parse("exp=explain.%{d}").unwrap()
        );
        assert_eq!(
            Term::Modifier(Modifier::Unknown {
                name: "Redirect".to_owned(),
                value: "foo.com".to_owned(),
            }),
            Term::parse("Redirect=foo.com").unwrap()
        );
        assert_eq!(
            Term::Modifier(Modifier::Unknown {
                name: "foo".to_owned(),
                value: String::new(),
            }),
            Term::parse("foo=").unwrap()
        );
    }

    #[test]
    fn term_parse_errors() {
        for word in [
            "All",
            "A",
            "+",
            "=foo",
            "all:foo",
            "all/24",
            "include",
            "include:",
            "exists",
            "exists:",
            "ptr:",
            "a:",
            "a:/1",
            "a/00",
            "a/1/2",
            "a//1//2",
            "a/33",
            "a//129",
            "a/1:foo.bar",
            "a/24x",
            "ip4",
            "ip4:",
            "ip4:1.2.3.4/33",
            "ip4:1.2.3.4/08",
            "ip4:0:1::2",
            "ip6:127.0.0.1",
            "ip6:::1/129",
            "redirect=",
            "exp=",
            "redirect=%",
            "a:%(r))",
            "a:%{l/.example.com/24",
            "-foo",
        ] {
            assert!(Term::parse(word).is_err(), "{} parsed", word);
        }
    }

    #[test]
    fn record_parse_and_canonicalise() {
        let cases = [
            ("v=spf1", "v=spf1"),
            ("v=spf1   ", "v=spf1"),
            ("v=spf1 +all", "v=spf1 all"),
            ("v=spf1 a//0/0", "v=spf1 a/0//0"),
            ("v=spf1 a/32//64", "v=spf1 a//64"),
            ("v=spf1 mx:example.com/32//128", "v=spf1 mx:example.com"),
            ("v=spf1 ?ip6:1::0000:2/5", "v=spf1 ?ip6:1::2/5"),
            ("v=spf1 ip4:10.0.0.1/32 -all", "v=spf1 ip4:10.0.0.1 -all"),
            (
                "v=spf1  ptr:%{d2}  exp=x.%{d} foo=bar",
                "v=spf1 ptr:%{d2} exp=x.%{d} foo=bar",
            ),
        ];

        for (input, expected) in cases {
            let record = Record::parse(input).unwrap().unwrap();
            assert_eq!(expected, record.to_string(), "input {:?}", input);
        }
    }

    #[test]
    fn record_parse_not_spf() {
        assert_eq!(None, Record::parse("").unwrap());
        assert_eq!(None, Record::parse("v=spf10").unwrap());
        assert_eq!(None, Record::parse("V=SPF1 -all").unwrap());
        assert_eq!(None, Record::parse("spf2.0/pra -all").unwrap());
    }

    #[test]
    fn record_parse_errors() {
        assert_eq!(
            Err(CrateError::InvalidTerm("All".to_owned())),
            Record::parse("v=spf1 a All")
        );
        assert_matches!(
            Err(CrateError::InvalidMacroString { .. }),
            Record::parse("v=spf1 a:%(r))")
        );
    }

    #[test]
    fn record_views() {
        let record = Record::parse(
            "v=spf1 exp=e.com a foo=bar -all redirect=r.com",
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            vec!["a", "all"],
            record.mechanisms().map(|m| m.name()).collect::<Vec<_>>()
        );
        assert_eq!(
            vec!["exp", "foo", "redirect"],
            record.modifiers().map(|m| m.name()).collect::<Vec<_>>()
        );
    }

    fn arb_qualifier() -> impl Strategy<Value = &'static str> {
        prop_oneof![Just(""), Just("+"), Just("-"), Just("~"), Just("?")]
    }

    fn arb_domain() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z]{1,8}(\\.[a-z]{1,8}){0,3}",
            Just("%{d}".to_owned()),
            Just("%{ir}.%{v}._spf.%{d2}".to_owned()),
        ]
    }

    fn arb_dual_cidr() -> impl Strategy<Value = String> {
        (
            proptest::option::of(0u32..=32),
            proptest::option::of(0u32..=128),
        )
            .prop_map(|(v4, v6)| {
                let mut s = String::new();
                if let Some(v4) = v4 {
                    s.push_str(&format!("/{}", v4));
                }
                if let Some(v6) = v6 {
                    s.push_str(&format!("//{}", v6));
                }
                s
            })
    }

    fn arb_term() -> impl Strategy<Value = String> {
        prop_oneof![
            arb_qualifier().prop_map(|q| format!("{}all", q)),
            (arb_qualifier(), arb_domain())
                .prop_map(|(q, d)| format!("{}include:{}", q, d)),
            (arb_qualifier(), proptest::option::of(arb_domain()), arb_dual_cidr())
                .prop_map(|(q, d, c)| match d {
                    Some(d) => format!("{}a:{}{}", q, d, c),
                    None => format!("{}a{}", q, c),
                }),
            (arb_qualifier(), proptest::option::of(arb_domain()), arb_dual_cidr())
                .prop_map(|(q, d, c)| match d {
                    Some(d) => format!("{}mx:{}{}", q, d, c),
                    None => format!("{}mx{}", q, c),
                }),
            (arb_qualifier(), any::<[u8; 4]>(), 0u32..=32).prop_map(
                |(q, a, l)| format!("{}ip4:{}/{}", q, Ipv4Addr::from(a), l)
            ),
            (arb_qualifier(), any::<[u8; 16]>(), 0u32..=128).prop_map(
                |(q, a, l)| format!("{}ip6:{}/{}", q, Ipv6Addr::from(a), l)
            ),
            (arb_qualifier(), arb_domain())
                .prop_map(|(q, d)| format!("{}exists:{}", q, d)),
            arb_domain().prop_map(|d| format!("redirect={}", d)),
            arb_domain().prop_map(|d| format!("exp={}", d)),
        ]
    }

    proptest! {
        #[test]
        fn canonical_form_is_stable(
            terms in proptest::collection::vec(arb_term(), 0..8)
        ) {
            let text = format!("v=spf1 {}", terms.join(" "));
            let record = Record::parse(&text).unwrap().unwrap();
            let canonical = record.to_string();
            let reparsed = Record::parse(&canonical).unwrap().unwrap();
            prop_assert_eq!(&record, &reparsed);
            prop_assert_eq!(canonical, reparsed.to_string());
        }
    }
}
