// crates/logging/src/lib.rs

//! Tracing subscriber construction for sysgpiod.
//!
//! Three sinks, all optional except stderr: the stderr fmt layer (which a
//! detached service effectively silences by redirecting stderr to the null
//! device), an append-mode log file, and a syslog datagram socket. Verbosity
//! maps onto level filters the usual way and `RUST_LOG` directives are still
//! honored on top.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
#[cfg(unix)]
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    EnvFilter, fmt as tracing_fmt,
    layer::{Context, Layer, SubscriberExt},
    util::SubscriberInitExt,
};

/// How verbose to be and where to send it.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Number of `-v` flags: 0 warn, 1 info, 2 debug, 3+ trace.
    pub verbose: u8,
    /// Errors only; wins over `verbose`.
    pub quiet: bool,
    /// Append events to this file as well.
    pub log_file: Option<PathBuf>,
    /// Also send events to the syslog socket.
    pub syslog: bool,
}

/// Install the global subscriber. May only succeed once per process.
pub fn init(cfg: &LogConfig) -> io::Result<()> {
    let level = if cfg.quiet {
        LevelFilter::ERROR
    } else if cfg.verbose > 2 {
        LevelFilter::TRACE
    } else if cfg.verbose > 1 {
        LevelFilter::DEBUG
    } else if cfg.verbose > 0 {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let stderr_layer = tracing_fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false);

    let file_layer = match &cfg.log_file {
        Some(path) => {
            let file: File = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_target(false)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    #[cfg(unix)]
    let syslog_layer = if cfg.syslog {
        Some(SyslogLayer::new()?)
    } else {
        None
    };

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer);
    #[cfg(unix)]
    let registry = registry.with(syslog_layer);
    registry.try_init().map_err(io::Error::other)
}

#[cfg(unix)]
struct SyslogLayer {
    sock: UnixDatagram,
}

#[cfg(unix)]
impl SyslogLayer {
    fn new() -> io::Result<Self> {
        let path = std::env::var_os("SYSGPIOD_SYSLOG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/dev/log"));
        let sock = UnixDatagram::unbound()?;
        sock.connect(path)?;
        Ok(Self { sock })
    }
}

#[cfg(unix)]
fn syslog_severity(level: Level) -> u8 {
    match level {
        Level::ERROR => 3,
        Level::WARN => 4,
        Level::INFO => 6,
        Level::DEBUG | Level::TRACE => 7,
    }
}

#[cfg(unix)]
impl<S> Layer<S> for SyslogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event, _ctx: Context<S>) {
        let mut v = MessageVisitor { msg: String::new() };
        event.record(&mut v);
        if v.msg.is_empty() {
            v.msg.push_str(event.metadata().target());
        }
        // user facility (1) << 3 | severity
        let pri = 8 + syslog_severity(*event.metadata().level());
        let pid = std::process::id();
        let data = format!("<{pri}>sysgpiod[{pid}]: {}", v.msg);
        let _ = self.sock.send(data.as_bytes());
    }
}

struct MessageVisitor {
    msg: String,
}

impl MessageVisitor {
    fn push_field(&mut self, field: &Field, value: &str) {
        if !self.msg.is_empty() {
            self.msg.push(' ');
        }
        if field.name() == "message" {
            self.msg.push_str(value);
        } else {
            self.msg.push_str(field.name());
            self.msg.push('=');
            self.msg.push_str(value);
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push_field(field, value);
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push_field(field, &format!("{value:?}"));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn syslog_layer_formats_priority_ident_and_fields() {
        let (tx, rx) = UnixDatagram::pair().unwrap();
        let subscriber = tracing_subscriber::registry().with(SyslogLayer { sock: tx });
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(line = 17, "failed to unexport");
        });
        let mut buf = [0u8; 256];
        let n = rx.recv(&mut buf).unwrap();
        let text = String::from_utf8_lossy(&buf[..n]).into_owned();
        assert!(text.starts_with("<12>sysgpiod["), "got {text}");
        assert!(text.contains("failed to unexport"), "got {text}");
        assert!(text.contains("line=17"), "got {text}");
    }

    #[test]
    fn severity_follows_the_syslog_table() {
        assert_eq!(syslog_severity(Level::ERROR), 3);
        assert_eq!(syslog_severity(Level::WARN), 4);
        assert_eq!(syslog_severity(Level::INFO), 6);
        assert_eq!(syslog_severity(Level::DEBUG), 7);
    }
}
