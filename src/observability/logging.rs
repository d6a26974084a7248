//! Logging initialization.
//!
//! Structured events go through `tracing`; the config decides the
//! sinks. `log.stdio` drives the usual fmt layer, `log.syslog` mirrors
//! events to the local syslog daemon under the configured facility.

use std::io;
use std::sync::Mutex;

use syslog::{Facility, Formatter3164, LoggerBackend};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Install the global subscriber. `RUST_LOG` wins over the config level
/// when set; repeated calls (tests, embedders) are no-ops.
pub fn init(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(&log.level)));

    let stdio_layer = log.stdio.then(tracing_subscriber::fmt::layer);

    let syslog_layer = if log.syslog {
        match SyslogWriter::connect(&log.facility) {
            Ok(writer) => Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .without_time(),
            ),
            Err(err) => {
                eprintln!("canopy: syslog unavailable: {err}");
                None
            }
        }
    } else {
        None
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stdio_layer)
        .with(syslog_layer)
        .try_init();
}

/// Translate the config level into a filter directive, mapping the
/// traditional syslog-ish names onto tracing's set.
fn level_directive(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" | "notice" => "info",
        "warn" | "warning" => "warn",
        "error" | "fatal" | "crit" => "error",
        _ => "info",
    }
}

/// RFC 3164 facility keywords; unknown names fall back to `user`.
fn facility(name: &str) -> Facility {
    match name.to_ascii_lowercase().as_str() {
        "kern" => Facility::LOG_KERN,
        "user" => Facility::LOG_USER,
        "mail" => Facility::LOG_MAIL,
        "daemon" => Facility::LOG_DAEMON,
        "auth" => Facility::LOG_AUTH,
        "syslog" => Facility::LOG_SYSLOG,
        "lpr" => Facility::LOG_LPR,
        "news" => Facility::LOG_NEWS,
        "uucp" => Facility::LOG_UUCP,
        "cron" => Facility::LOG_CRON,
        "authpriv" => Facility::LOG_AUTHPRIV,
        "ftp" => Facility::LOG_FTP,
        "local0" => Facility::LOG_LOCAL0,
        "local1" => Facility::LOG_LOCAL1,
        "local2" => Facility::LOG_LOCAL2,
        "local3" => Facility::LOG_LOCAL3,
        "local4" => Facility::LOG_LOCAL4,
        "local5" => Facility::LOG_LOCAL5,
        "local6" => Facility::LOG_LOCAL6,
        "local7" => Facility::LOG_LOCAL7,
        _ => Facility::LOG_USER,
    }
}

/// Bridges `tracing_subscriber`'s fmt layer onto a syslog connection.
struct SyslogWriter {
    logger: Mutex<syslog::Logger<LoggerBackend, Formatter3164>>,
}

impl SyslogWriter {
    fn connect(facility_name: &str) -> Result<Self, syslog::Error> {
        let formatter = Formatter3164 {
            facility: facility(facility_name),
            hostname: None,
            process: "canopy".to_string(),
            pid: std::process::id(),
        };
        Ok(Self {
            logger: Mutex::new(syslog::unix(formatter)?),
        })
    }
}

impl<'a> MakeWriter<'a> for SyslogWriter {
    type Writer = SyslogLine<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SyslogLine {
            logger: &self.logger,
        }
    }
}

/// One formatted event becomes one syslog message.
struct SyslogLine<'a> {
    logger: &'a Mutex<syslog::Logger<LoggerBackend, Formatter3164>>,
}

impl io::Write for SyslogLine<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let message = String::from_utf8_lossy(buf);
        let message = message.trim_end();
        if !message.is_empty() {
            if let Ok(mut logger) = self.logger.lock() {
                let _ = logger.info(message);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
