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

use log::debug;

use super::syntax::{Record, VERSION};
use crate::support::dns::Resolver;
use crate::support::error::Error;

/// Fetches SPF records out of DNS and parses them.
#[derive(Clone, Debug, Default)]
pub struct Decoder<R> {
    resolver: R,
}

/// Whether `txt` claims to be an SPF version 1 record.
///
/// RFC 7208 § 4.5
pub fn is_spf_record(txt: &str) -> bool {
    txt.strip_prefix(VERSION)
        .map_or(false, |rest| rest.is_empty() || rest.starts_with(' '))
}

impl<R: Resolver> Decoder<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Fetch and parse the SPF record of `domain`.
    ///
    /// Returns `Ok(None)` if the domain publishes no SPF record, and
    /// `Error::MultipleSpfRecords` if it publishes more than one.
    pub fn record_from_domain(
        &self,
        domain: &str,
    ) -> Result<Option<Record>, Error> {
        let mut records = self
            .resolver
            .txt_records(domain)?
            .into_iter()
            .filter(|txt| is_spf_record(txt))
            .collect::<Vec<_>>();

        match records.len() {
            0 => {
                debug!("{} has no SPF record", domain);
                Ok(None)
            }
            1 => {
                let txt = records.pop().unwrap_or_default();
                debug!("{} has SPF record {:?}", domain, txt);
                self.record_from_txt(&txt)
            }
            _ => Err(Error::MultipleSpfRecords {
                domain: domain.to_owned(),
                records,
            }),
        }
    }

    /// Parse the text of a TXT record.
    pub fn record_from_txt(&self, txt: &str) -> Result<Option<Record>, Error> {
        Record::parse(txt)
    }
}
