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

use spfcheck::spf::semantic;
use spfcheck::spf::{
    Level, OnlineDnsLookup, OnlineIssue, OnlineSemanticValidator, Record,
};
use spfcheck::support::dns::Resolver;
use spfcheck::support::sysexits::*;

use super::main::{
    LintRecordSubcommand, LintSubcommand, LookupsSubcommand, ParseSubcommand,
};

pub(super) fn lint(resolver: Box<dyn Resolver>, cmd: LintSubcommand) {
    let issues = OnlineSemanticValidator::new(resolver)
        .validate_domain(&cmd.domain, cmd.level);
    report(&issues);
}

pub(super) fn lint_record(
    resolver: Box<dyn Resolver>,
    cmd: LintRecordSubcommand,
) {
    let issues = OnlineSemanticValidator::new(resolver).validate_raw_record(
        &cmd.record,
        &cmd.domain,
        cmd.level,
    );
    report(&issues);
}

fn report(issues: &[OnlineIssue]) {
    for issue in issues {
        if issue.domain.is_empty() {
            println!("{}", issue);
        } else {
            println!("{}: {}", issue.domain, issue);
        }
    }

    if issues.iter().any(|i| Level::Fatal == i.level) {
        EX_DATAERR.exit();
    }
}

pub(super) fn lookups(resolver: Box<dyn Resolver>, cmd: LookupsSubcommand) {
    let validator = OnlineSemanticValidator::new(resolver);
    let lookups = match cmd.record {
        Some(ref record) => {
            validator.lookups_for_raw_record(record, &cmd.domain)
        }
        None => validator.lookups_for_domain(&cmd.domain),
    };

    for lookup in &lookups {
        print_lookup(lookup, 0);
    }
    println!(
        "total: {}",
        lookups.iter().map(OnlineDnsLookup::lookup_count).sum::<usize>()
    );
}

fn print_lookup(lookup: &OnlineDnsLookup, depth: usize) {
    match lookup.record {
        Some(ref record) => println!(
            "{:width$}{} -> \"{}\"",
            "",
            lookup.name,
            record,
            width = depth * 2,
        ),
        None => println!("{:width$}{}", "", lookup.name, width = depth * 2),
    }

    for reference in &lookup.references {
        print_lookup(reference, depth + 1);
    }
}

pub(super) fn parse(cmd: ParseSubcommand) {
    let record = match Record::parse(&cmd.record) {
        Ok(Some(record)) => record,
        Ok(None) => {
            eprintln!("'{}' is not an SPF record", cmd.record);
            EX_DATAERR.exit()
        }
        Err(e) => {
            eprintln!("{}", e);
            EX_DATAERR.exit()
        }
    };

    println!("{}", record);
    for issue in semantic::validate(&record, None) {
        println!("{}", issue);
    }
}
