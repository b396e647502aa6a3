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

use thiserror::Error;

use crate::spf::macro_string::LexError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The resolver failed to talk to DNS. "No such record" is never reported
    /// this way; resolvers return an empty list instead.
    #[error("DNS resolution failed for '{domain}': {message}")]
    DnsResolution { domain: String, message: String },
    #[error("The SPF record contains an unrecognized term: {0}")]
    InvalidTerm(String),
    #[error("Multiple SPF records found for domain '{domain}'")]
    MultipleSpfRecords { domain: String, records: Vec<String> },
    #[error("Too many DNS lookups (more than {0})")]
    TooManyDnsLookups(u32),
    #[error("The environment has no value for the macro letter '{0}'")]
    MissingEnvironmentValue(char),
    #[error("Invalid macro string '{text}': {reason}")]
    InvalidMacroString { text: String, reason: LexError },
    #[error("Invalid IP address: '{0}'")]
    InvalidIpAddress(String),
}

impl Error {
    pub(crate) fn dns(domain: &str, message: impl ToString) -> Self {
        Error::DnsResolution {
            domain: domain.to_owned(),
            message: message.to_string(),
        }
    }
}
