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

//! Validation of a whole tree of SPF records.
//!
//! This follows every `include` and `redirect` whose target is a plain domain
//! name, runs the offline checks on each record found, and adds up the DNS
//! lookups of the tree.

use std::fmt;

use log::debug;

use super::decoder::Decoder;
use super::expand::expand_literal;
use super::macro_string::MacroString;
use super::semantic::{
    self, too_many_lookups_description, Issue, IssueCode, Level,
};
use super::state::MAX_DNS_LOOKUPS;
use super::syntax::{MechanismKind, Modifier, Record};
use crate::support::dns::Resolver;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OnlineIssueCode {
    /// An issue of one record in the tree, found by the offline checks.
    Offline(IssueCode),
    NoDomainNoRecordProvided,
    RecursiveDomainDetected,
    RecordFetchOrParseFailed,
    RecordNotFound,
    DomainWithPlaceholder,
    TooManyDnsLookupsOnline,
    RecordParseFailed,
}

/// A DNS-querying term of a record, and the lookups of the record it leads
/// to, if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnlineDnsLookup {
    /// The term, as written in canonical form.
    pub name: String,
    /// The record fetched for an `include` or `redirect`.
    pub record: Option<String>,
    pub references: Vec<OnlineDnsLookup>,
}

impl OnlineDnsLookup {
    fn new(name: String, record: Option<String>) -> Self {
        Self {
            name,
            record,
            references: Vec::new(),
        }
    }

    /// The number of lookups of this term and everything beneath it.
    pub fn lookup_count(&self) -> usize {
        1 + self
            .references
            .iter()
            .map(OnlineDnsLookup::lookup_count)
            .sum::<usize>()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnlineIssue {
    /// The domain whose record has the issue, if known.
    pub domain: String,
    /// The raw text of the record, for issues of unparsable records.
    pub txt_record: String,
    pub record: Option<Record>,
    pub code: OnlineIssueCode,
    pub description: String,
    pub level: Level,
    /// For `TooManyDnsLookupsOnline`, the lookups of the whole tree.
    pub dns_lookups: Vec<OnlineDnsLookup>,
}

impl OnlineIssue {
    fn new(
        domain: &str,
        code: OnlineIssueCode,
        description: String,
        level: Level,
    ) -> Self {
        Self {
            domain: domain.to_owned(),
            txt_record: String::new(),
            record: None,
            code,
            description,
            level,
            dns_lookups: Vec::new(),
        }
    }

    fn fatal(domain: &str, code: OnlineIssueCode, description: String) -> Self {
        Self::new(domain, code, description, Level::Fatal)
    }

    fn from_offline(issue: Issue, domain: &str, record: &Record) -> Self {
        Self {
            record: Some(record.clone()),
            ..Self::new(
                domain,
                OnlineIssueCode::Offline(issue.code),
                issue.description,
                issue.level,
            )
        }
    }

    /// The total of `dns_lookups`.
    pub fn total_lookup_count(&self) -> usize {
        self.dns_lookups
            .iter()
            .map(OnlineDnsLookup::lookup_count)
            .sum()
    }
}

impl fmt::Display for OnlineIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.description)
    }
}

/// Bookkeeping carried through the walk of one tree.
#[derive(Default)]
struct Walk {
    /// Domains currently being validated, outermost first.
    parents: Vec<String>,
    /// DNS-querying terms seen in all records so far.
    total_lookups: usize,
    issues: Vec<OnlineIssue>,
}

/// Validates SPF records together with everything they include or redirect
/// to.
#[derive(Clone, Debug, Default)]
pub struct OnlineSemanticValidator<R> {
    decoder: Decoder<R>,
}

impl<R: Resolver> OnlineSemanticValidator<R> {
    pub fn new(resolver: R) -> Self {
        Self {
            decoder: Decoder::new(resolver),
        }
    }

    /// Validate the record published by `domain` and its whole tree.
    pub fn validate_domain(
        &self,
        domain: &str,
        min_level: Option<Level>,
    ) -> Vec<OnlineIssue> {
        filter_level(self.run(domain, None).0, min_level)
    }

    /// Validate the record with text `txt`, owned by `domain` (which may be
    /// empty), and its whole tree.
    pub fn validate_raw_record(
        &self,
        txt: &str,
        domain: &str,
        min_level: Option<Level>,
    ) -> Vec<OnlineIssue> {
        let issues = match self.decoder.record_from_txt(txt) {
            Ok(Some(record)) => self.run(domain, Some(record)).0,
            Ok(None) => vec![raw_parse_failure(
                txt,
                domain,
                format!("'{}' is not a valid SPF record", txt),
            )],
            Err(e) => vec![raw_parse_failure(txt, domain, e.to_string())],
        };

        filter_level(issues, min_level)
    }

    /// Validate `record`, owned by `domain` (which may be empty), and its
    /// whole tree.
    pub fn validate_record(
        &self,
        record: &Record,
        domain: &str,
        min_level: Option<Level>,
    ) -> Vec<OnlineIssue> {
        filter_level(self.run(domain, Some(record.clone())).0, min_level)
    }

    /// The DNS lookups made by the record of `domain`.
    pub fn lookups_for_domain(&self, domain: &str) -> Vec<OnlineDnsLookup> {
        self.run(domain, None).1
    }

    /// The DNS lookups made by the record with text `txt`, or nothing if it
    /// is not a valid SPF record.
    pub fn lookups_for_raw_record(
        &self,
        txt: &str,
        domain: &str,
    ) -> Vec<OnlineDnsLookup> {
        match self.decoder.record_from_txt(txt) {
            Ok(Some(record)) => self.run(domain, Some(record)).1,
            _ => Vec::new(),
        }
    }

    pub fn lookups_for_record(
        &self,
        record: &Record,
        domain: &str,
    ) -> Vec<OnlineDnsLookup> {
        self.run(domain, Some(record.clone())).1
    }

    fn run(
        &self,
        domain: &str,
        record: Option<Record>,
    ) -> (Vec<OnlineIssue>, Vec<OnlineDnsLookup>) {
        let mut walk = Walk::default();
        let Some((record, lookups)) = self.walk(&mut walk, domain, record)
        else {
            return (walk.issues, Vec::new());
        };

        if walk.total_lookups > MAX_DNS_LOOKUPS as usize {
            walk.issues.push(OnlineIssue {
                record: Some(record),
                dns_lookups: lookups.clone(),
                ..OnlineIssue::new(
                    domain,
                    OnlineIssueCode::TooManyDnsLookupsOnline,
                    too_many_lookups_description(walk.total_lookups),
                    Level::Warning,
                )
            });
        }

        (walk.issues, lookups)
    }

    /// Validate one record of the tree, recursing into the records it
    /// references.
    ///
    /// If `record` is `None`, it is fetched from `domain`. Returns the record
    /// and its lookups, or `None` if the record could not be obtained.
    fn walk(
        &self,
        walk: &mut Walk,
        domain: &str,
        record: Option<Record>,
    ) -> Option<(Record, Vec<OnlineDnsLookup>)> {
        let record = match record {
            Some(record) => record,
            None => self.fetch(walk, domain)?,
        };

        for issue in semantic::validate(&record, None) {
            walk.issues
                .push(OnlineIssue::from_offline(issue, domain, &record));
        }

        if !domain.is_empty() {
            walk.parents.push(domain.to_owned());
        }

        let mut lookups = Vec::new();
        for mechanism in record.mechanisms() {
            if !mechanism.kind.needs_dns_lookup() {
                continue;
            }

            walk.total_lookups += 1;
            if let MechanismKind::Include(ref domain_spec) = mechanism.kind {
                if let Some(lookup) = self.follow(
                    walk,
                    domain,
                    &record,
                    "mechanism",
                    mechanism.to_string(),
                    domain_spec,
                ) {
                    lookups.push(lookup);
                }
            } else {
                lookups.push(OnlineDnsLookup::new(mechanism.to_string(), None));
            }
        }

        for modifier in record.modifiers() {
            if let Modifier::Redirect(ref domain_spec) = *modifier {
                walk.total_lookups += 1;
                if let Some(lookup) = self.follow(
                    walk,
                    domain,
                    &record,
                    "modifier",
                    modifier.to_string(),
                    domain_spec,
                ) {
                    lookups.push(lookup);
                }
            }
        }

        if !domain.is_empty() {
            walk.parents.pop();
        }

        Some((record, lookups))
    }

    fn fetch(&self, walk: &mut Walk, domain: &str) -> Option<Record> {
        if domain.is_empty() {
            walk.issues.push(OnlineIssue::fatal(
                domain,
                OnlineIssueCode::NoDomainNoRecordProvided,
                "Neither a domain nor an SPF record has been provided."
                    .to_owned(),
            ));
            return None;
        }

        if walk.parents.iter().any(|p| p.eq_ignore_ascii_case(domain)) {
            walk.issues.push(OnlineIssue::fatal(
                domain,
                OnlineIssueCode::RecursiveDomainDetected,
                format!(
                    "The domain {} is included/redirected-to recursively",
                    domain
                ),
            ));
            return None;
        }

        match self.decoder.record_from_domain(domain) {
            Ok(Some(record)) => Some(record),
            Ok(None) => {
                walk.issues.push(OnlineIssue::fatal(
                    domain,
                    OnlineIssueCode::RecordNotFound,
                    format!("No SPF records found for domain {}", domain),
                ));
                None
            }
            Err(e) => {
                walk.issues.push(OnlineIssue::fatal(
                    domain,
                    OnlineIssueCode::RecordFetchOrParseFailed,
                    e.to_string(),
                ));
                None
            }
        }
    }

    /// Follow an `include` or `redirect` term.
    ///
    /// Targets with macros depend on the message being checked, so they are
    /// only reported, not followed.
    fn follow(
        &self,
        walk: &mut Walk,
        domain: &str,
        record: &Record,
        term_kind: &str,
        term: String,
        domain_spec: &MacroString,
    ) -> Option<OnlineDnsLookup> {
        if domain_spec.contains_placeholders() {
            walk.issues.push(OnlineIssue {
                record: Some(record.clone()),
                ..OnlineIssue::new(
                    domain,
                    OnlineIssueCode::DomainWithPlaceholder,
                    format!(
                        "The {} {} includes a placeholder: its SPF record has \
                         not been parsed.",
                        term_kind, term,
                    ),
                    Level::Notice,
                )
            });
            return None;
        }

        let target = expand_literal(&domain_spec.to_string()).into_owned();
        debug!("{}: following '{}' to {}", domain, term, target);
        Some(match self.walk(walk, &target, None) {
            Some((sub_record, references)) => OnlineDnsLookup {
                name: term,
                record: Some(sub_record.to_string()),
                references,
            },
            None => OnlineDnsLookup::new(term, None),
        })
    }
}

fn raw_parse_failure(txt: &str, domain: &str, description: String) -> OnlineIssue {
    OnlineIssue {
        txt_record: txt.to_owned(),
        ..OnlineIssue::fatal(
            domain,
            OnlineIssueCode::RecordParseFailed,
            description,
        )
    }
}

fn filter_level(
    mut issues: Vec<OnlineIssue>,
    min_level: Option<Level>,
) -> Vec<OnlineIssue> {
    if let Some(min_level) = min_level {
        issues.retain(|i| i.level >= min_level);
    }
    issues
}
