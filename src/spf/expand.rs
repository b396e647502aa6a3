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

//! Macro expansion.
//! RFC 7208 § 7.3, 7.4

use std::borrow::Cow;
use std::net::IpAddr;

use itertools::Itertools;

use super::macro_string::{Chunk, MacroLetter, MacroString, Placeholder};
use super::state::State;
use crate::support::error::Error;

/// Expand `ms`, with `current_domain` as the value of `%{d}`.
pub fn expand(
    ms: &MacroString,
    current_domain: &str,
    state: &mut State<'_>,
) -> Result<String, Error> {
    let mut ret = String::new();
    for chunk in ms.chunks() {
        match *chunk {
            Chunk::Literal(ref s) => ret.push_str(&expand_literal(s)),
            Chunk::Placeholder(ref p) => {
                let value = placeholder_value(p.letter, current_domain, state)?;
                ret.push_str(&transform(p, &value));
            }
        }
    }

    Ok(ret)
}

/// Replace the `%%`, `%_` and `%-` escapes in `s`.
pub fn expand_literal(s: &str) -> Cow<'_, str> {
    if !s.contains('%') {
        return Cow::Borrowed(s);
    }

    let mut ret = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if '%' != c {
            ret.push(c);
            continue;
        }

        match chars.next() {
            Some('_') => ret.push(' '),
            Some('-') => ret.push_str("%20"),
            // `%%`, or a stray `%` which the lexer would not have produced
            Some(c) => {
                ret.push('%');
                if '%' != c {
                    ret.push(c);
                }
            }
            None => ret.push('%'),
        }
    }

    Cow::Owned(ret)
}

fn ip_nibbles(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(ip) => ip.to_string(),
        IpAddr::V6(ip) => ip
            .octets()
            .iter()
            .flat_map(|&o| [o >> 4, o & 0xF])
            .map(|n| format!("{:x}", n))
            .join("."),
    }
}

fn placeholder_value(
    letter: MacroLetter,
    current_domain: &str,
    state: &mut State<'_>,
) -> Result<String, Error> {
    use super::macro_string::MacroLetter as L;

    let env = state.environment();
    let missing_ip = || Error::MissingEnvironmentValue('i');

    let value = match letter {
        L::Sender => state.sender().to_owned(),
        L::SenderLocalPart | L::SenderDomain => {
            if state.sender().is_empty() {
                return Err(Error::MissingEnvironmentValue('s'));
            }

            if L::SenderLocalPart == letter {
                state.sender_local_part().to_owned()
            } else {
                state.sender_domain().to_owned()
            }
        }
        L::Domain => current_domain.to_owned(),
        L::Ip => env.client_ip().map(ip_nibbles).unwrap_or_default(),
        L::ValidatedDomain => state.validated_client_domain()?,
        L::IpVersion => match env.client_ip().ok_or_else(missing_ip)? {
            IpAddr::V4(..) => "in-addr".to_owned(),
            IpAddr::V6(..) => "ip6".to_owned(),
        },
        L::HeloDomain => env.helo_domain().to_owned(),
        L::SmtpClientIp => env.client_ip().ok_or_else(missing_ip)?.to_string(),
        L::CheckerDomain => env.checker_domain().to_owned(),
        L::CurrentTimestamp => state.now().timestamp().to_string(),
    };

    if value.is_empty() {
        return Err(Error::MissingEnvironmentValue(letter.as_char()));
    }

    Ok(value)
}

// Per RFC 7208 § 7.3, splitting is done naïvely, with no special handling
// for adjacent delimiters or delimiters at the start/end of the string.
fn transform<'a>(p: &Placeholder, value: &'a str) -> Cow<'a, str> {
    if p.keep_parts.is_none() && !p.reverse && p.delimiters.is_empty() {
        return Cow::Borrowed(value);
    }

    let effective_delimiters = if p.delimiters.is_empty() {
        "."
    } else {
        &p.delimiters
    };
    let is_delimiter = |c: char| effective_delimiters.contains(c);
    let keep_parts = p.keep_parts.unwrap_or(usize::MAX);

    if p.reverse {
        let it = value.rsplit(is_delimiter);
        let parts = it.clone().count();
        Cow::Owned(it.skip(parts.saturating_sub(keep_parts)).join("."))
    } else {
        let it = value.split(is_delimiter);
        let parts = it.clone().count();
        Cow::Owned(it.skip(parts.saturating_sub(keep_parts)).join("."))
    }
}
