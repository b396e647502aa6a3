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

//! An RFC 7208 Sender Policy Framework checker, with offline and online
//! linting of SPF records.

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

/// Build a `StaticResolver` out of a table of DNS data.
///
/// Keys are domain names, except for `ptr` entries, which are keyed by the
/// IP address being reversed.
#[cfg(test)]
macro_rules! zone {
    ($($name:expr => {
        $($field:ident : $value:expr,)*
    },)*) => {{
        let resolver = $crate::support::dns::StaticResolver::new();
        $(
            $(
                let resolver = zone!(@$field, resolver, $name, $value);
            )*
        )*
        resolver
    }};

    (@txt, $resolver:ident, $name:expr, $value:expr) => {
        $resolver.with_txt($name, $value)
    };
    (@ip, $resolver:ident, $name:expr, $value:expr) => {
        $resolver.with_ips(
            $name,
            $value
                .iter()
                .map(|s| s.parse::<std::net::IpAddr>().unwrap()),
        )
    };
    (@mx, $resolver:ident, $name:expr, $value:expr) => {
        $resolver.with_mx($name, $value)
    };
    (@ptr, $resolver:ident, $name:expr, $value:expr) => {
        $resolver.with_ptr($name.parse().unwrap(), $value)
    };
    (@fail, $resolver:ident, $name:expr, $value:expr) => {
        if $value {
            $resolver.with_failure($name)
        } else {
            $resolver
        }
    };
}

pub mod spf;
pub mod support;

pub use support::error::Error;
