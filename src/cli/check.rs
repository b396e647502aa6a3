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

use spfcheck::spf::{CheckFlags, Checker, Environment};
use spfcheck::support::dns::Resolver;
use spfcheck::support::sysexits::*;
use spfcheck::support::system_config::SystemConfig;

use super::main::CheckSubcommand;

pub(super) fn check(
    config: &SystemConfig,
    resolver: Box<dyn Resolver>,
    cmd: CheckSubcommand,
) {
    let flags = match (cmd.helo_only, cmd.mail_from_only) {
        (false, false) => CheckFlags::all(),
        (true, false) => CheckFlags::HELO_DOMAIN,
        (false, true) => CheckFlags::MAIL_FROM_ADDRESS,
        (true, true) => {
            eprintln!(
                "--helo-only and --mail-from-only cannot be used together"
            );
            EX_USAGE.exit()
        }
    };

    let mut env = match Environment::parse(
        &cmd.client_ip,
        cmd.mail_from,
        cmd.helo.as_deref(),
    ) {
        Ok(env) => env,
        Err(e) => {
            eprintln!("{}", e);
            EX_USAGE.exit()
        }
    };
    if !config.checker_domain.is_empty() {
        env = env.with_checker_domain(&config.checker_domain);
    }

    let result = Checker::new(resolver).check(&env, flags);
    println!("result: {}", result.code);
    if let Some(ref mechanism) = result.matched_mechanism {
        println!("mechanism: {}", mechanism);
    }
    if let Some(ref explanation) = result.fail_explanation {
        println!("explanation: {}", explanation);
    }
    for message in &result.messages {
        println!("message: {}", message);
    }
}
