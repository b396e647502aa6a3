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

//! Offline checks for common mistakes in SPF records.
//!
//! Only `Level::Fatal` issues make evaluation fail; the rest are advice for
//! whoever maintains the record.

use std::fmt;

use itertools::Itertools;

use super::state::MAX_DNS_LOOKUPS;
use super::syntax::{MechanismKind, Modifier, Record, Term};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Notice,
    Warning,
    Fatal,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IssueCode {
    TooManyDnsLookups,
    AllNotLastMechanism,
    AllAndRedirect,
    ShouldAvoidPtr,
    ModifierNotAfterMechanisms,
    DuplicatedModifier,
    UnknownModifier,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Issue {
    pub code: IssueCode,
    pub description: String,
    pub level: Level,
}

impl Issue {
    fn new(code: IssueCode, description: String, level: Level) -> Self {
        Self {
            code,
            description,
            level,
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.description)
    }
}

/// Mechanisms whose evaluation queries DNS.
pub const MECHANISMS_INVOLVING_DNS_LOOKUPS: &[&str] =
    &["include", "a", "mx", "ptr", "exists"];
/// Modifiers whose evaluation queries DNS.
pub const MODIFIERS_INVOLVING_DNS_LOOKUPS: &[&str] = &["redirect"];

/// The description used both here and by the online validator when too many
/// DNS-querying terms are present.
pub(super) fn too_many_lookups_description(count: usize) -> String {
    format!(
        "The total number of the '{}' mechanisms and the '{}' modifiers is \
         {} (it should not exceed {})",
        MECHANISMS_INVOLVING_DNS_LOOKUPS.iter().join("', '"),
        MODIFIERS_INVOLVING_DNS_LOOKUPS.iter().join("', '"),
        count,
        MAX_DNS_LOOKUPS,
    )
}

/// The number of terms of `record` which will query DNS when evaluated.
pub fn count_dns_lookup_terms(record: &Record) -> usize {
    record
        .mechanisms()
        .filter(|m| m.kind.needs_dns_lookup())
        .count()
        + record
            .modifiers()
            .filter(|m| matches!(**m, Modifier::Redirect(..)))
            .count()
}

/// Offline record checks, as an object for callers that want to hold one.
#[derive(Clone, Copy, Debug, Default)]
pub struct SemanticValidator;

impl SemanticValidator {
    pub fn validate(
        &self,
        record: &Record,
        min_level: Option<Level>,
    ) -> Vec<Issue> {
        validate(record, min_level)
    }
}

/// Check `record`, returning the issues at or above `min_level`, or all
/// issues if `min_level` is `None`.
pub fn validate(record: &Record, min_level: Option<Level>) -> Vec<Issue> {
    let mut issues = Vec::new();
    check_max_dns_lookups(record, &mut issues);
    check_all_is_last_mechanism(record, &mut issues);
    check_all_and_redirect(record, &mut issues);
    check_no_ptr(record, &mut issues);
    check_modifiers_position(record, &mut issues);
    check_modifiers_uniqueness(record, &mut issues);
    check_unknown_modifiers(record, &mut issues);

    if let Some(min_level) = min_level {
        issues.retain(|i| i.level >= min_level);
    }
    issues
}

fn check_max_dns_lookups(record: &Record, issues: &mut Vec<Issue>) {
    let count = count_dns_lookup_terms(record);
    if count > MAX_DNS_LOOKUPS as usize {
        issues.push(Issue::new(
            IssueCode::TooManyDnsLookups,
            too_many_lookups_description(count),
            Level::Warning,
        ));
    }
}

fn check_all_is_last_mechanism(record: &Record, issues: &mut Vec<Issue>) {
    let mechanisms = record.mechanisms().collect::<Vec<_>>();
    let n = mechanisms.len();
    if mechanisms
        .iter()
        .take(n.saturating_sub(1))
        .any(|m| matches!(m.kind, MechanismKind::All))
    {
        issues.push(Issue::new(
            IssueCode::AllNotLastMechanism,
            "'all' should be the last mechanism (any other mechanism will be \
             ignored)"
                .to_owned(),
            Level::Warning,
        ));
    }
}

fn check_all_and_redirect(record: &Record, issues: &mut Vec<Issue>) {
    let has_all = record
        .mechanisms()
        .any(|m| matches!(m.kind, MechanismKind::All));
    let has_redirect = record
        .modifiers()
        .any(|m| matches!(*m, Modifier::Redirect(..)));
    if has_all && has_redirect {
        issues.push(Issue::new(
            IssueCode::AllAndRedirect,
            "The 'redirect' modifier will be ignored since there's an 'all' \
             mechanism"
                .to_owned(),
            Level::Warning,
        ));
    }
}

fn check_no_ptr(record: &Record, issues: &mut Vec<Issue>) {
    if record
        .mechanisms()
        .any(|m| matches!(m.kind, MechanismKind::Ptr(..)))
    {
        issues.push(Issue::new(
            IssueCode::ShouldAvoidPtr,
            "The 'ptr' mechanism shouldn't be used because it's slow, \
             resource intensive, and not very reliable"
                .to_owned(),
            Level::Notice,
        ));
    }
}

fn check_modifiers_position(record: &Record, issues: &mut Vec<Issue>) {
    let Some(last_mechanism) = record
        .terms()
        .iter()
        .rposition(|t| matches!(*t, Term::Mechanism(..)))
    else {
        return;
    };

    let misplaced = record.terms()[..last_mechanism]
        .iter()
        .filter(|t| {
            matches!(
                **t,
                Term::Modifier(Modifier::Redirect(..))
                    | Term::Modifier(Modifier::Explanation(..))
            )
        })
        .map(|t| t.to_string())
        .collect::<Vec<_>>();

    if !misplaced.is_empty() {
        issues.push(Issue::new(
            IssueCode::ModifierNotAfterMechanisms,
            format!(
                "The modifiers ('{}') should be after all the mechanisms",
                misplaced.join("', '"),
            ),
            Level::Notice,
        ));
    }
}

fn check_modifiers_uniqueness(record: &Record, issues: &mut Vec<Issue>) {
    for name in ["redirect", "exp"] {
        let count = record
            .modifiers()
            .filter(|m| {
                matches!(
                    (name, *m),
                    ("redirect", Modifier::Redirect(..))
                        | ("exp", Modifier::Explanation(..))
                )
            })
            .count();
        if count > 1 {
            issues.push(Issue::new(
                IssueCode::DuplicatedModifier,
                format!(
                    "The '{}' modifier is present more than once ({} times)",
                    name, count,
                ),
                Level::Fatal,
            ));
        }
    }
}

fn check_unknown_modifiers(record: &Record, issues: &mut Vec<Issue>) {
    for modifier in record.modifiers() {
        if let Modifier::Unknown { .. } = *modifier {
            issues.push(Issue::new(
                IssueCode::UnknownModifier,
                format!("The '{}' modifier is unknown", modifier),
                Level::Notice,
            ));
        }
    }
}
