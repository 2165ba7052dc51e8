//! Console log sink for the structured single-line wire format.
//!
//! Every event is one line: `<unix_millis>|<LEVEL_3>|<MODULE_2>|k1=v1,k2=v2`.
//! The protocol carries five severities with `CRT` above `ERR`; the `log`
//! facade tops out at `Error`, so critical events go through [`crit!`], which
//! shares the sink and the minimum-severity gate.
//!
//! Module codes used as `target:` across the crate:
//! `MA` main, `SP` sensor filter, `CB` ring buffer, `CL` command logic,
//! `FM` fault monitor, `NC` navigation, `RP` route planner, `DC` data
//! logger, `LI` local HMI.

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{Level, LevelFilter, Log, Metadata, Record};

const SEV_DEBUG: u8 = 0;
const SEV_INFO: u8 = 1;
const SEV_WARN: u8 = 2;
const SEV_ERR: u8 = 3;
const SEV_CRIT: u8 = 4;

static MIN_SEVERITY: AtomicU8 = AtomicU8::new(SEV_INFO);

/// Milliseconds since the Unix epoch, as stamped on every log line and
/// every outbound boundary file.
pub fn timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn severity_of(level: Level) -> u8 {
    match level {
        Level::Trace | Level::Debug => SEV_DEBUG,
        Level::Info => SEV_INFO,
        Level::Warn => SEV_WARN,
        Level::Error => SEV_ERR,
    }
}

fn severity_code(severity: u8) -> &'static str {
    match severity {
        SEV_DEBUG => "DBG",
        SEV_INFO => "INF",
        SEV_WARN => "WRN",
        SEV_ERR => "ERR",
        _ => "CRT",
    }
}

fn emit(severity: u8, module: &str, args: fmt::Arguments) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(
        out,
        "{}|{}|{}|{}",
        timestamp_ms(),
        severity_code(severity),
        module,
        args
    );
}

struct ConsoleSink;

static SINK: ConsoleSink = ConsoleSink;

impl Log for ConsoleSink {
    fn enabled(&self, metadata: &Metadata) -> bool {
        severity_of(metadata.level()) >= MIN_SEVERITY.load(Ordering::Relaxed)
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            emit(severity_of(record.level()), record.target(), *record.args());
        }
    }

    fn flush(&self) {}
}

/// Emits a `CRT` line through the console sink. Used by the [`crit!`] macro.
pub fn crit_event(module: &str, args: fmt::Arguments) {
    emit(SEV_CRIT, module, args);
}

/// Logs a critical event, one severity above `error!`.
///
/// Same call shape as the `log` macros:
/// `crit!(target: "FM", "event=fault,type={}", code)`.
#[macro_export]
macro_rules! crit {
    (target: $target:expr, $($arg:tt)+) => {
        $crate::logfmt::crit_event($target, format_args!($($arg)+))
    };
}

/// Installs the console sink and applies the `LOG_LEVEL` environment
/// variable (`DEBUG`/`INFO`/`WARN`/`ERR`/`CRIT`). Unparseable values fall
/// back to `INFO` with a warning; calling twice is a no-op.
pub fn init() {
    let raw = std::env::var("LOG_LEVEL").ok();
    let (severity, recognized) = match raw.as_deref() {
        Some("DEBUG") => (SEV_DEBUG, true),
        Some("INFO") => (SEV_INFO, true),
        Some("WARN") => (SEV_WARN, true),
        Some("ERR") => (SEV_ERR, true),
        Some("CRIT") => (SEV_CRIT, true),
        Some(_) => (SEV_INFO, false),
        None => (SEV_INFO, true),
    };

    MIN_SEVERITY.store(severity, Ordering::Relaxed);

    // CRIT lines bypass the facade, so its ceiling only has to cover
    // DEBUG..=ERR.
    let filter = match severity {
        SEV_DEBUG => LevelFilter::Debug,
        SEV_INFO => LevelFilter::Info,
        SEV_WARN => LevelFilter::Warn,
        SEV_ERR => LevelFilter::Error,
        _ => LevelFilter::Off,
    };

    if log::set_logger(&SINK).is_ok() {
        log::set_max_level(filter);
    }

    if !recognized {
        if let Some(value) = raw {
            log::warn!(target: "MA", "event=bad_log_level,value={}", value);
        }
    }
}
