// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

//! Logging setup shared by the keychain binaries.
//!
//! Every record is one stderr line, `<syslog priority>timestamp [TAG] - message`, so that journald picks up the priority.
//! Debug and trace lines also name the module that logged them, which tells apart the keychain front end from the
//! provider adapters. `KEYCHAIN_LOG` overrides the filter using `env_logger` syntax, e.g. `keychain_ffi=trace,info`.

use std::fmt::Display;
use std::io::Write;

pub const LOG_LEVEL_ENV_VAR: &str = "KEYCHAIN_LOG";

/// Installs the global logger, filtering at `default_level` unless `KEYCHAIN_LOG` is set.
pub fn try_init(default_level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    env_logger::Builder::new()
        .format(|fmt, record| {
            let timestamp = fmt.timestamp();
            write_record(fmt, &timestamp, record)
        })
        .filter_level(default_level)
        .parse_env(LOG_LEVEL_ENV_VAR)
        .try_init()
}

/// Writes `record` as a single line.
pub fn write_record(
    out: &mut impl Write,
    timestamp: &dyn Display,
    record: &log::Record<'_>,
) -> std::io::Result<()> {
    let severity = Severity(record.level());
    write!(out, "{severity}{timestamp} [{}] - ", severity.tag())?;
    if record.level() >= log::Level::Debug {
        write!(out, "[{}] ", record.target())?;
    }
    writeln!(out, "{}", record.args())
}

/// Renders as the `<N>` syslog priority prefix of a level.
struct Severity(log::Level);

impl Severity {
    fn priority(&self) -> u8 {
        match self.0 {
            log::Level::Error => 3,
            log::Level::Warn => 4,
            log::Level::Info => 6,
            log::Level::Debug | log::Level::Trace => 7,
        }
    }

    /// Four characters wide, so that messages line up.
    fn tag(&self) -> &'static str {
        match self.0 {
            log::Level::Error => "ERR!",
            log::Level::Warn => "WARN",
            log::Level::Info => "INFO",
            log::Level::Debug => "DBUG",
            log::Level::Trace => "TRCE",
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}>", self.priority())
    }
}
