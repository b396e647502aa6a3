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

use std::path::{Path, PathBuf};

use log::LevelFilter;
use structopt::StructOpt;

use spfcheck::spf::Level;
use spfcheck::support::dns::{HickoryResolver, Resolver};
use spfcheck::support::sysexits::*;
use spfcheck::support::system_config::SystemConfig;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
struct Command {
    /// The configuration file to use
    /// [default: /etc/spfcheck.toml or /usr/local/etc/spfcheck.toml, if
    /// either exists]
    #[structopt(long, short, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Log more detail to standard error. Can be passed multiple times.
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u8,

    /// Log to syslog instead of standard error.
    #[structopt(long)]
    syslog: bool,

    #[structopt(subcommand)]
    subcommand: Subcommand,
}

#[derive(StructOpt)]
enum Subcommand {
    Check(CheckSubcommand),
    Lint(LintSubcommand),
    LintRecord(LintRecordSubcommand),
    Lookups(LookupsSubcommand),
    Parse(ParseSubcommand),
}

/// Evaluate the SPF policy for an SMTP envelope.
///
/// By default, the HELO domain is checked first. If its policy does not give
/// a definitive "pass" or "fail", the MAIL FROM address is checked too, and
/// its result is reported.
#[derive(StructOpt)]
pub(super) struct CheckSubcommand {
    /// The HELO/EHLO domain given by the client
    /// [default: the domain of the MAIL FROM address]
    #[structopt(long)]
    pub(super) helo: Option<String>,

    /// Only check the HELO domain.
    #[structopt(long)]
    pub(super) helo_only: bool,

    /// Only check the MAIL FROM address.
    #[structopt(long)]
    pub(super) mail_from_only: bool,

    /// The IP address of the SMTP client.
    pub(super) client_ip: String,

    /// The MAIL FROM address. May be empty for bounces.
    pub(super) mail_from: String,
}

/// Check the SPF record of a domain and everything it includes.
///
/// Each record in the tree is linted, and the DNS lookups of the whole tree
/// are added up.
#[derive(StructOpt)]
pub(super) struct LintSubcommand {
    /// Only report issues of at least this level (notice, warning, fatal).
    #[structopt(long, parse(try_from_str = parse_level))]
    pub(super) level: Option<Level>,

    /// The domain to check.
    pub(super) domain: String,
}

/// Check an SPF record given on the command line and everything it
/// includes.
#[derive(StructOpt)]
pub(super) struct LintRecordSubcommand {
    /// Only report issues of at least this level (notice, warning, fatal).
    #[structopt(long, parse(try_from_str = parse_level))]
    pub(super) level: Option<Level>,

    /// The domain publishing the record, if any.
    #[structopt(long, default_value = "")]
    pub(super) domain: String,

    /// The text of the record, e.g. "v=spf1 mx -all".
    pub(super) record: String,
}

/// Show the tree of DNS lookups made when evaluating an SPF record.
#[derive(StructOpt)]
pub(super) struct LookupsSubcommand {
    /// Use this record text instead of fetching the record of DOMAIN.
    #[structopt(long)]
    pub(super) record: Option<String>,

    /// The domain whose record is examined.
    #[structopt(default_value = "")]
    pub(super) domain: String,
}

/// Parse an SPF record and print it in canonical form.
#[derive(StructOpt)]
pub(super) struct ParseSubcommand {
    /// The text of the record.
    pub(super) record: String,
}

fn parse_level(s: &str) -> Result<Level, String> {
    match s {
        "notice" => Ok(Level::Notice),
        "warning" => Ok(Level::Warning),
        "fatal" => Ok(Level::Fatal),
        _ => Err(format!("Unknown level: {}", s)),
    }
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    let config = load_config(cmd.config.as_deref());
    init_logging(&config, cmd.verbose, cmd.syslog);
    let resolver = create_resolver(&config);

    match cmd.subcommand {
        Subcommand::Check(cmd) => super::check::check(&config, resolver, cmd),
        Subcommand::Lint(cmd) => super::lint::lint(resolver, cmd),
        Subcommand::LintRecord(cmd) => super::lint::lint_record(resolver, cmd),
        Subcommand::Lookups(cmd) => super::lint::lookups(resolver, cmd),
        Subcommand::Parse(cmd) => super::lint::parse(cmd),
    }
}

fn load_config(path: Option<&Path>) -> SystemConfig {
    let path = match path {
        Some(path) => path.to_owned(),
        None => {
            match ["/etc/spfcheck.toml", "/usr/local/etc/spfcheck.toml"]
                .iter()
                .map(Path::new)
                .find(|p| p.is_file())
            {
                Some(path) => path.to_owned(),
                None => return SystemConfig::default(),
            }
        }
    };

    match SystemConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            EX_CONFIG.exit()
        }
    }
}

fn init_logging(config: &SystemConfig, verbose: u8, syslog: bool) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    // log4rs and syslog are mutually exclusive since log4rs-syslog hasn't been
    // updated in quite a while.
    if syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_MAIL,
            hostname: None,
            process: env!("CARGO_PKG_NAME").to_owned(),
            pid: std::process::id() as i32,
        };
        let result = syslog::unix(formatter)
            .map_err(|e| e.to_string())
            .and_then(|logger| {
                log::set_boxed_logger(Box::new(syslog::BasicLogger::new(
                    logger,
                )))
                .map_err(|e| e.to_string())
            });
        match result {
            Ok(()) => log::set_max_level(level),
            Err(e) => {
                eprintln!("Failed to connect to syslog: {}", e);
                EX_UNAVAILABLE.exit()
            }
        }
    } else if let Some(ref log_config) = config.log_config {
        if let Err(e) = log4rs::init_file(log_config, log_deserializers()) {
            eprintln!(
                "Failed to initialise logging from '{}': {}",
                log_config.display(),
                e
            );
            EX_CONFIG.exit()
        }
    } else {
        init_simple_log(level);
    }
}

fn log_deserializers() -> log4rs::file::Deserializers {
    log4rs::file::Deserializers::new()
}

fn init_simple_log(level: LevelFilter) {
    use log4rs::append::console::{ConsoleAppender, Target};
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%H:%M:%S%.3f)} [{l}][{t}] {m}{n}",
        )))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level));

    let result = match config {
        Ok(config) => log4rs::init_config(config)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    if let Err(e) = result {
        eprintln!("Failed to initialise logging: {}", e);
        EX_SOFTWARE.exit()
    }
}

fn create_resolver(config: &SystemConfig) -> Box<dyn Resolver> {
    match config.static_resolver() {
        Ok(Some(resolver)) => return Box::new(resolver),
        Ok(None) => (),
        Err(e) => {
            eprintln!("Error in DNS zone configuration: {}", e);
            EX_CONFIG.exit()
        }
    }

    match HickoryResolver::from_system_conf() {
        Ok(resolver) => Box::new(resolver),
        Err(e) => {
            eprintln!("Unable to set up DNS resolution: {}", e);
            EX_UNAVAILABLE.exit()
        }
    }
}
