//! Line-oriented logging with timestamps and source locations.
//!
//! The [`tlog!`] macro writes lines of the form:
//!
//! ```text
//! 20261018T09:14:03.512 - src/service.rs:88 - send: u-3f9a2c1 -> u-b71e0d4 (id=m-9c0ffee)
//! ```
//!
//! On a terminal, timestamps and locations are dimmed and user ids are
//! coloured by a hash of their content so the same user reads the same
//! colour throughout a session.
//!
//! Output goes to stderr until [`set_writer`] installs another destination;
//! a custom writer turns colour off.

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

static COLOUR_ENABLED: AtomicBool = AtomicBool::new(false);

static LOG_WRITER: LazyLock<Mutex<Box<dyn Write + Send>>> =
    LazyLock::new(|| Mutex::new(Box::new(io::stderr())));

/// Detect whether stderr can take ANSI colour. Call once at startup.
pub fn init() {
    COLOUR_ENABLED.store(io::stderr().is_terminal(), Ordering::Relaxed);
}

/// Send all subsequent [`tlog!`] output to `w`, without colour.
pub fn set_writer(w: Box<dyn Write + Send>) {
    COLOUR_ENABLED.store(false, Ordering::Relaxed);
    *LOG_WRITER.lock().unwrap_or_else(PoisonError::into_inner) = w;
}

pub fn colour_enabled() -> bool {
    COLOUR_ENABLED.load(Ordering::Relaxed)
}

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";
const MSG_ID_COLOUR: &str = "\x1b[93m";

const ID_COLOURS: &[&str] = &[
    "\x1b[91m", "\x1b[92m", "\x1b[94m", "\x1b[95m", "\x1b[96m", "\x1b[32m", "\x1b[33m",
    "\x1b[34m", "\x1b[35m", "\x1b[36m",
];

const ID_DISPLAY_LEN: usize = 7;

fn hash_colour(id: &str) -> &'static str {
    let hash = id
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
    ID_COLOURS[hash as usize % ID_COLOURS.len()]
}

fn short(id: &str) -> &str {
    match id.char_indices().nth(ID_DISPLAY_LEN) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

/// Format a user id for logs, e.g. `u-3f9a2c1`.
pub fn user_id(id: &str) -> String {
    if colour_enabled() {
        format!("{}u-{}{RESET}", hash_colour(id), short(id))
    } else {
        format!("u-{}", short(id))
    }
}

/// Format a message id for logs, e.g. `m-9c0ffee`.
pub fn msg_id(id: &str) -> String {
    if colour_enabled() {
        format!("{MSG_ID_COLOUR}m-{}{RESET}", short(id))
    } else {
        format!("m-{}", short(id))
    }
}

/// Proleptic Gregorian (year, month, day) for a count of days since
/// 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u64, u64) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe as i64 + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

/// Wall-clock time as `YYYYMMDDTHH:MM:SS.mmm` (UTC).
pub fn format_timestamp() -> String {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = since_epoch.as_secs();
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    let of_day = secs % 86_400;

    format!(
        "{year:04}{month:02}{day:02}T{:02}:{:02}:{:02}.{:03}",
        of_day / 3600,
        (of_day % 3600) / 60,
        of_day % 60,
        since_epoch.subsec_millis()
    )
}

/// Write one log line. Called by [`tlog!`].
pub fn emit(file: &str, line: u32, msg: &str) {
    let ts = format_timestamp();
    let formatted = if colour_enabled() {
        format!("{DIM}{ts}{RESET} {DIM}{file}:{line}{RESET} {msg}")
    } else {
        format!("{ts} - {file}:{line} - {msg}")
    };
    let mut writer = LOG_WRITER.lock().unwrap_or_else(PoisonError::into_inner);
    let _ = writeln!(writer, "{formatted}");
}

/// Emit a log line with timestamp and source location.
///
/// ```ignore
/// tlog!("send: {} -> {}", logging::user_id(&from), logging::user_id(&to));
/// ```
#[macro_export]
macro_rules! tlog {
    ($($arg:tt)*) => {{
        $crate::logging::emit(file!(), line!(), &format!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn civil_dates() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(19_723), (2024, 1, 1));
        assert_eq!(civil_from_days(19_782), (2024, 2, 29));
    }

    #[test]
    fn ids_are_truncated() {
        assert_eq!(short("abcdefghij"), "abcdefg");
        assert_eq!(short("abc"), "abc");
        assert!(user_id("abcdefghij").ends_with("u-abcdefg") || colour_enabled());
    }

    #[test]
    fn timestamp_shape() {
        let ts = format_timestamp();
        assert_eq!(ts.len(), "20261018T09:14:03.512".len());
        assert_eq!(&ts[8..9], "T");
    }
}
